use crate::cancel::CancelToken;
use crate::error::{calculate_backoff, RetryConfig};
use crate::request::{AwsOptions, OutputArtifact};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};

pub mod aws;

/// Where the coordinator was in its state machine when something happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Pending,
    Uploading,
    Importing,
    Registered,
    Failed,
}

impl std::fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Importing => "importing",
            Self::Registered => "registered",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub enum ImportState {
    InProgress,
    Completed { snapshot_id: String },
    Failed { message: String },
}

/// Object-storage / image-registration collaborator. Credentials are the
/// implementation's business (ambient provider chain); they are never
/// threaded through this interface.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Upload the artifact bytes to the bucket under the given key.
    async fn upload(&self, path: &Path, bucket: &str, key: &str) -> Result<()>;

    /// Kick off the snapshot import for an uploaded object; returns the
    /// import task identifier to poll.
    async fn begin_import(&self, bucket: &str, key: &str, image_name: &str) -> Result<String>;

    async fn import_status(&self, task_id: &str) -> Result<ImportState>;

    /// Register the imported snapshot as a machine image; returns its id.
    async fn register(&self, snapshot_id: &str, image_name: &str) -> Result<String>;
}

/// Polling policy for the import wait
#[derive(Clone)]
pub struct PollConfig {
    /// Hard wall-clock cap on the whole import wait
    pub max_wait: Duration,
    pub backoff: RetryConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(30 * 60),
            backoff: RetryConfig::default(),
        }
    }
}

/// Upload-leg outcome, mapped onto `BuildError` by the orchestrator,
/// which attaches the intact local build result.
#[derive(Debug)]
pub enum UploadError {
    Failed { phase: UploadPhase, reason: String },
    TimedOut { waited_ms: u64 },
    Cancelled,
}

/// Drives one artifact through Pending → Uploading → Importing →
/// Registered. The uploaded object is never deleted on failure, timeout,
/// or cancellation: the caller can re-drive registration against it.
pub struct UploadCoordinator<'a> {
    store: &'a dyn ImageStore,
    poll: PollConfig,
}

impl<'a> UploadCoordinator<'a> {
    pub fn new(store: &'a dyn ImageStore, poll: PollConfig) -> Self {
        Self { store, poll }
    }

    pub async fn run(
        &self,
        artifact: &OutputArtifact,
        opts: &AwsOptions,
        cancel: &CancelToken,
    ) -> Result<String, UploadError> {
        let file_name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image.raw".to_string());
        let key = format!("{}-{}", opts.ami_name, file_name);

        tracing::info!(
            phase = %UploadPhase::Uploading,
            bucket = %opts.bucket_name,
            key = %key,
            "uploading machine image"
        );
        tokio::select! {
            uploaded = self.store.upload(&artifact.path, &opts.bucket_name, &key) => {
                uploaded.map_err(|e| UploadError::Failed {
                    phase: UploadPhase::Uploading,
                    reason: e.to_string(),
                })?;
            }
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
        }

        tracing::info!(phase = %UploadPhase::Importing, ami_name = %opts.ami_name, "starting image import");
        let task_id = tokio::select! {
            begun = self.store.begin_import(&opts.bucket_name, &key, &opts.ami_name) => {
                begun.map_err(|e| UploadError::Failed {
                    phase: UploadPhase::Importing,
                    reason: e.to_string(),
                })?
            }
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
        };

        let snapshot_id = self.poll_import(&task_id, cancel).await?;

        let image_id = tokio::select! {
            registered = self.store.register(&snapshot_id, &opts.ami_name) => {
                registered.map_err(|e| UploadError::Failed {
                    phase: UploadPhase::Importing,
                    reason: e.to_string(),
                })?
            }
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
        };

        tracing::info!(phase = %UploadPhase::Registered, image_id = %image_id, "machine image registered");
        Ok(image_id)
    }

    /// Suspends between attempts with jittered exponential backoff up to
    /// the hard wall-clock cap.
    async fn poll_import(
        &self,
        task_id: &str,
        cancel: &CancelToken,
    ) -> Result<String, UploadError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let state = tokio::select! {
                state = self.store.import_status(task_id) => {
                    state.map_err(|e| UploadError::Failed {
                        phase: UploadPhase::Importing,
                        reason: e.to_string(),
                    })?
                }
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            };

            match state {
                ImportState::Completed { snapshot_id } => return Ok(snapshot_id),
                ImportState::Failed { message } => {
                    return Err(UploadError::Failed {
                        phase: UploadPhase::Importing,
                        reason: message,
                    })
                }
                ImportState::InProgress => {
                    let waited = started.elapsed();
                    if waited >= self.poll.max_wait {
                        return Err(UploadError::TimedOut {
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    let delay = calculate_backoff(attempt, &self.poll.backoff);
                    tracing::debug!(task_id = %task_id, attempt, delay_ms = delay, "import still in progress");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }
}
