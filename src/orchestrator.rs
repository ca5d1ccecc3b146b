use crate::cancel::CancelToken;
use crate::error::BuildError;
use crate::invocation;
use crate::invoker;
use crate::manifest;
use crate::registry;
use crate::request::{BuildRequest, BuildResult, TYPE_AMI};
use crate::runtime::ContainerRuntime;
use crate::upload::{ImageStore, PollConfig, UploadCoordinator, UploadError, UploadPhase};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub struct OrchestratorConfig {
    /// Every build gets its own output directory under this root
    pub scratch_root: PathBuf,
    /// Whether a cancelled build's partial output directory is removed.
    /// Off by default so debris stays inspectable.
    pub remove_output_on_cancel: bool,
    pub poll: PollConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("bootforge"),
            remove_output_on_cancel: false,
            poll: PollConfig::default(),
        }
    }
}

/// Drives one build request through translate → invoke → resolve →
/// register artifacts → optional AMI upload. Stages run strictly in
/// sequence; the single external invocation produces all requested types
/// in one pass. Concurrent builds are independent: each owns its output
/// directory exclusively and no process-wide state is shared.
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    store: Option<Arc<dyn ImageStore>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: OrchestratorConfig) -> Self {
        Self {
            runtime,
            store: None,
            config,
        }
    }

    pub fn with_image_store(mut self, store: Arc<dyn ImageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the requested disk images. Either every requested type is
    /// satisfied and a complete result comes back, or the call fails with
    /// one of the `BuildError` kinds; partial results are never returned.
    pub async fn build(
        &self,
        request: &BuildRequest,
        cancel: CancelToken,
    ) -> Result<BuildResult, BuildError> {
        let output_dir = self
            .config
            .scratch_root
            .join(format!("build-{}", Uuid::new_v4()));

        // translate validates the request; nothing is created on disk and
        // no collaborator is touched until it passes.
        let spec = invocation::translate(request, &output_dir)?;
        std::fs::create_dir_all(&output_dir)?;
        tracing::info!(
            image = %request.image,
            output_dir = %output_dir.display(),
            "build started"
        );

        match invoker::invoke(self.runtime.as_ref(), &spec, &cancel).await {
            Ok(()) => {}
            Err(BuildError::Cancelled) => {
                if self.config.remove_output_on_cancel {
                    let _ = std::fs::remove_dir_all(&output_dir);
                }
                return Err(BuildError::Cancelled);
            }
            // Failure debris is left in place for inspection.
            Err(e) => return Err(e),
        }

        let requested = request.effective_types();
        let resolved = manifest::resolve(&output_dir, &requested)?;
        let output_artifacts = registry::build_artifact_map(&resolved)?;

        let mut result = BuildResult {
            manifest_path: resolved.manifest_path,
            output_directory: output_dir,
            output_artifacts,
        };

        if result.output_artifacts.contains_key(TYPE_AMI) {
            if let Some(aws) = &request.aws {
                let Some(store) = &self.store else {
                    return Err(BuildError::UploadFailed {
                        phase: UploadPhase::Pending,
                        reason: "no image store configured".to_string(),
                        local: Box::new(result),
                    });
                };
                let artifact = result.output_artifacts[TYPE_AMI].clone();
                let coordinator = UploadCoordinator::new(store.as_ref(), self.config.poll.clone());
                match coordinator.run(&artifact, aws, &cancel).await {
                    Ok(image_id) => {
                        if let Some(entry) = result.output_artifacts.get_mut(TYPE_AMI) {
                            entry.image_id = Some(image_id);
                        }
                    }
                    Err(UploadError::Cancelled) => return Err(BuildError::Cancelled),
                    Err(UploadError::TimedOut { waited_ms }) => {
                        return Err(BuildError::UploadTimedOut {
                            waited_ms,
                            local: Box::new(result),
                        })
                    }
                    Err(UploadError::Failed { phase, reason }) => {
                        return Err(BuildError::UploadFailed {
                            phase,
                            reason,
                            local: Box::new(result),
                        })
                    }
                }
            }
        }

        tracing::info!(
            artifacts = result.output_artifacts.len(),
            manifest = %result.manifest_path.display(),
            "build complete"
        );
        Ok(result)
    }
}
