use crate::upload::{ImageStore, ImportState};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::types::{
    ArchitectureValues, BlockDeviceMapping, EbsBlockDevice, SnapshotDiskContainer, UserBucket,
};
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;

/// S3 + EC2 implementation of the image store. Credentials and, when the
/// request names none, the region come from the ambient provider chain
/// (environment, shared profile, instance metadata).
pub struct AwsImageStore {
    s3: aws_sdk_s3::Client,
    ec2: aws_sdk_ec2::Client,
}

impl AwsImageStore {
    pub async fn from_env(region: Option<String>) -> Self {
        let region_provider =
            RegionProviderChain::first_try(region.map(Region::new)).or_default_provider();
        let config = aws_config::from_env().region(region_provider).load().await;
        Self {
            s3: aws_sdk_s3::Client::new(&config),
            ec2: aws_sdk_ec2::Client::new(&config),
        }
    }
}

#[async_trait]
impl ImageStore for AwsImageStore {
    async fn upload(&self, path: &Path, bucket: &str, key: &str) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("uploading s3://{}/{}", bucket, key))?;
        Ok(())
    }

    async fn begin_import(&self, bucket: &str, key: &str, image_name: &str) -> Result<String> {
        let container = SnapshotDiskContainer::builder()
            .format("RAW")
            .user_bucket(UserBucket::builder().s3_bucket(bucket).s3_key(key).build())
            .build();
        let resp = self
            .ec2
            .import_snapshot()
            .description(format!("bootforge import for {}", image_name))
            .disk_container(container)
            .send()
            .await
            .context("starting snapshot import")?;
        resp.import_task_id()
            .map(str::to_string)
            .context("import task id missing from response")
    }

    async fn import_status(&self, task_id: &str) -> Result<ImportState> {
        let resp = self
            .ec2
            .describe_import_snapshot_tasks()
            .import_task_ids(task_id)
            .send()
            .await
            .context("describing snapshot import")?;
        let detail = resp
            .import_snapshot_tasks()
            .unwrap_or_default()
            .first()
            .and_then(|t| t.snapshot_task_detail());
        let Some(detail) = detail else {
            return Ok(ImportState::Failed {
                message: format!("import task {} no longer exists", task_id),
            });
        };

        match detail.status() {
            Some("completed") => match detail.snapshot_id() {
                Some(id) => Ok(ImportState::Completed {
                    snapshot_id: id.to_string(),
                }),
                None => Ok(ImportState::Failed {
                    message: "import completed without a snapshot id".to_string(),
                }),
            },
            Some("deleted") | Some("deleting") => Ok(ImportState::Failed {
                message: detail
                    .status_message()
                    .unwrap_or("import task was deleted")
                    .to_string(),
            }),
            _ => Ok(ImportState::InProgress),
        }
    }

    async fn register(&self, snapshot_id: &str, image_name: &str) -> Result<String> {
        let mapping = BlockDeviceMapping::builder()
            .device_name("/dev/xvda")
            .ebs(
                EbsBlockDevice::builder()
                    .snapshot_id(snapshot_id)
                    .delete_on_termination(true)
                    .build(),
            )
            .build();
        let resp = self
            .ec2
            .register_image()
            .name(image_name)
            .architecture(ArchitectureValues::X8664)
            .virtualization_type("hvm")
            .ena_support(true)
            .root_device_name("/dev/xvda")
            .block_device_mappings(mapping)
            .send()
            .await
            .with_context(|| format!("registering image {}", image_name))?;
        resp.image_id()
            .map(str::to_string)
            .context("image id missing from registration response")
    }
}
