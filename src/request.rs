use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Artifact type name the cloud-upload leg keys off
pub const TYPE_AMI: &str = "ami";

/// Types built when the request names none; mirrors the tool's own default.
pub const DEFAULT_TYPES: &[&str] = &["qcow2"];

/// Declarative description of one build. Immutable once handed to the
/// orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Build-definition file mounted read-only into the builder container
    pub config_file_path: PathBuf,
    /// Source container image reference to convert
    pub image: String,
    /// Container image implementing the build tool
    pub builder_image: String,
    /// Opaque passthrough appended verbatim to the tool arguments
    #[serde(default)]
    pub additional_args: Option<String>,
    /// Owner spec (`uid:gid`) the tool applies to output files
    #[serde(default)]
    pub chown: Option<String>,
    /// Target root filesystem type (tool default when absent)
    #[serde(default)]
    pub rootfs: Option<String>,
    /// Whether registry TLS must be verified when pulling the source image
    pub tls_verify: bool,
    /// Ordered artifact types to produce; `None` means the tool default
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub aws: Option<AwsOptions>,
}

/// Options for the AMI upload leg. Credentials are never carried here;
/// they come from the ambient provider chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsOptions {
    #[serde(rename = "AMIName")]
    pub ami_name: String,
    #[serde(rename = "BucketName")]
    pub bucket_name: String,
    #[serde(rename = "Region", default)]
    pub region: Option<String>,
}

impl BuildRequest {
    /// Requested types with the tool default applied.
    pub fn effective_types(&self) -> Vec<String> {
        match &self.types {
            Some(types) if !types.is_empty() => types.clone(),
            _ => DEFAULT_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn wants_ami(&self) -> bool {
        self.effective_types().iter().any(|t| t == TYPE_AMI)
    }

    /// Rejects malformed requests before any external work happens.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.config_file_path.as_os_str().is_empty() {
            return Err(BuildError::InvalidRequest {
                reason: "config file path is empty".to_string(),
            });
        }
        if self.image.is_empty() {
            return Err(BuildError::InvalidRequest {
                reason: "source image reference is empty".to_string(),
            });
        }
        if self.builder_image.is_empty() {
            return Err(BuildError::InvalidRequest {
                reason: "builder image reference is empty".to_string(),
            });
        }

        if self.wants_ami() {
            match &self.aws {
                None => {
                    return Err(BuildError::InvalidRequest {
                        reason: "type 'ami' requested but no AWS options given".to_string(),
                    })
                }
                Some(aws) => {
                    if aws.ami_name.is_empty() {
                        return Err(BuildError::InvalidRequest {
                            reason: "AWS options are missing an AMI name".to_string(),
                        });
                    }
                    if aws.bucket_name.is_empty() {
                        return Err(BuildError::InvalidRequest {
                            reason: "AWS options are missing a bucket name".to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// One produced output file, keyed by type in the final result map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputArtifact {
    #[serde(rename = "type")]
    pub kind: String,
    /// Absolute path inside the build's output directory
    pub path: PathBuf,
    /// `sha256:<hex>` content hash; always present in orchestrator output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Machine-image identifier, recorded after a successful AMI registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

/// Complete result of one successful build. Never constructed partially:
/// the orchestrator either returns all requested types or an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub manifest_path: PathBuf,
    pub output_directory: PathBuf,
    pub output_artifacts: HashMap<String, OutputArtifact>,
}
