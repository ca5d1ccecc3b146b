/// Bootforge error types and handling utilities
use crate::request::BuildResult;
use crate::upload::UploadPhase;
use std::path::PathBuf;

/// Main error type for build orchestration
#[derive(Debug)]
pub enum BuildError {
    /// Request failed validation before any external work was started
    InvalidRequest { reason: String },
    /// The external build tool exited non-zero
    BuildFailed {
        exit_code: i32,
        last_log_lines: Vec<String>,
    },
    /// The tool exited zero but produced no usable manifest
    ManifestMissing { output_directory: PathBuf },
    /// A requested artifact type has no surviving manifest entry
    IncompleteBuild { missing_type: String },
    /// The post-build cloud step failed; the local build result is intact
    UploadFailed {
        phase: UploadPhase,
        reason: String,
        local: Box<BuildResult>,
    },
    /// Image import never completed within the polling window
    UploadTimedOut {
        waited_ms: u64,
        local: Box<BuildResult>,
    },
    /// Caller-initiated abort
    Cancelled,
    /// Wrapped anyhow error for I/O and collaborator transport failures
    Other(anyhow::Error),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest { reason } => {
                write!(f, "invalid build request: {}", reason)
            }
            Self::BuildFailed {
                exit_code,
                last_log_lines,
            } => {
                write!(
                    f,
                    "builder exited with code {} ({} log lines captured)",
                    exit_code,
                    last_log_lines.len()
                )
            }
            Self::ManifestMissing { output_directory } => {
                write!(
                    f,
                    "builder reported success but left no manifest in {}",
                    output_directory.display()
                )
            }
            Self::IncompleteBuild { missing_type } => {
                write!(
                    f,
                    "no artifact produced for requested type '{}'",
                    missing_type
                )
            }
            Self::UploadFailed { phase, reason, .. } => {
                write!(f, "upload failed during {}: {}", phase, reason)
            }
            Self::UploadTimedOut { waited_ms, .. } => {
                write!(f, "image import did not complete after {}ms", waited_ms)
            }
            Self::Cancelled => write!(f, "build cancelled"),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<anyhow::Error> for BuildError {
    fn from(err: anyhow::Error) -> Self {
        BuildError::Other(err)
    }
}

impl From<std::io::Error> for BuildError {
    fn from(err: std::io::Error) -> Self {
        BuildError::Other(err.into())
    }
}

/// Helper to determine whether the caller can recover without operator help.
/// `InvalidRequest` is fixed by correcting the input; `UploadTimedOut` leaves
/// the object in storage so registration can be re-driven against it.
pub fn is_recoverable(err: &BuildError) -> bool {
    match err {
        BuildError::InvalidRequest { .. } => true,
        BuildError::BuildFailed { .. } => false,
        BuildError::ManifestMissing { .. } => false,
        BuildError::IncompleteBuild { .. } => false,
        BuildError::UploadFailed { .. } => false,
        BuildError::UploadTimedOut { .. } => true,
        BuildError::Cancelled => false,
        BuildError::Other(_) => false,
    }
}

/// Backoff configuration for the import polling loop
#[derive(Clone)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 2000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Calculates exponential backoff with jitter
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> u64 {
    let backoff = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powi(attempt as i32))
    .min(config.max_backoff_ms as f64) as u64;

    // Add jitter: ±20% of backoff, then clamp to max
    let jitter = (backoff as f64) * (rand::random::<f64>() * 0.4 - 0.2);
    ((backoff as f64) + jitter)
        .max(0.0)
        .min(config.max_backoff_ms as f64) as u64
}
