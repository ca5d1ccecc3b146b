use anyhow::Result;
use bootforge::error::BuildError;
use bootforge::runtime::podman::PodmanRuntime;
use bootforge::upload::aws::AwsImageStore;
use bootforge::{AwsOptions, BuildRequest, CancelSource, Orchestrator, OrchestratorConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_BUILDER_IMAGE: &str = "quay.io/centos-bootc/bootc-image-builder:latest";

#[derive(Parser, Debug)]
#[command(
    name = "bootforge",
    version,
    about = "Build bootable disk images from a bootc container image"
)]
struct Cli {
    /// Source container image reference
    image: String,

    /// Build-definition file mounted read-only into the builder
    #[arg(long, env = "BOOTFORGE_CONFIG")]
    config: PathBuf,

    /// Container image implementing the build tool
    #[arg(long, env = "BOOTFORGE_BUILDER_IMAGE", default_value = DEFAULT_BUILDER_IMAGE)]
    builder_image: String,

    /// Artifact type to produce; repeat for several
    #[arg(long = "type", value_name = "TYPE")]
    types: Vec<String>,

    /// Owner spec (uid:gid) applied to output files
    #[arg(long)]
    chown: Option<String>,

    /// Target root filesystem type
    #[arg(long)]
    rootfs: Option<String>,

    /// Verify registry TLS when pulling the source image
    #[arg(long = "tls-verify", default_value_t = true, action = clap::ArgAction::Set)]
    tls_verify: bool,

    /// Extra arguments handed to the builder verbatim
    #[arg(long)]
    additional_args: Option<String>,

    /// Directory that receives per-build output directories
    #[arg(long, env = "BOOTFORGE_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Name for the registered machine image (with --type ami)
    #[arg(long)]
    aws_ami_name: Option<String>,

    /// S3 bucket receiving the intermediate image object
    #[arg(long)]
    aws_bucket: Option<String>,

    /// AWS region; falls back to the ambient provider chain
    #[arg(long)]
    aws_region: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn into_request(self) -> BuildRequest {
        let aws = if self.aws_ami_name.is_some() || self.aws_bucket.is_some() {
            // Half-specified options become empty fields and fail request
            // validation with a pointed message.
            Some(AwsOptions {
                ami_name: self.aws_ami_name.unwrap_or_default(),
                bucket_name: self.aws_bucket.unwrap_or_default(),
                region: self.aws_region,
            })
        } else {
            None
        };

        BuildRequest {
            config_file_path: self.config,
            image: self.image,
            builder_image: self.builder_image,
            additional_args: self.additional_args,
            chown: self.chown,
            rootfs: self.rootfs,
            tls_verify: self.tls_verify,
            types: if self.types.is_empty() {
                None
            } else {
                Some(self.types)
            },
            aws,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let json_logs = cli.json_logs;
    let scratch_dir = cli.scratch_dir.clone();

    bootforge::logging::init_logging(json_logs)
        .map_err(|e| anyhow::anyhow!("logging setup failed: {}", e))?;

    let request = cli.into_request();

    let mut config = OrchestratorConfig::default();
    if let Some(dir) = scratch_dir {
        config.scratch_root = dir;
    }

    let mut orchestrator = Orchestrator::new(Arc::new(PodmanRuntime::new()), config);
    if request.wants_ami() {
        let region = request.aws.as_ref().and_then(|a| a.region.clone());
        let store = AwsImageStore::from_env(region).await;
        orchestrator = orchestrator.with_image_store(Arc::new(store));
    }

    let source = CancelSource::new();
    let token = source.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling build");
            source.cancel();
        }
    });

    match orchestrator.build(&request, token).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(err) => {
            // An upload failure still leaves a complete local build worth
            // reporting; the error decides the exit code regardless.
            if let BuildError::UploadFailed { local, .. }
            | BuildError::UploadTimedOut { local, .. } = &err
            {
                tracing::warn!("local artifacts were built before the upload failed");
                println!("{}", serde_json::to_string_pretty(local.as_ref())?);
            }
            Err(err.into())
        }
    }
}
