use crate::invocation::InvocationSpec;
use anyhow::Result;
use async_trait::async_trait;

/// Capability contract for the container-execution collaborator: start a
/// build container, stream its combined output, terminate it on demand.
/// The orchestrator never manages container lifecycle beyond this.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self, spec: &InvocationSpec) -> Result<Box<dyn ContainerProcess>>;
}

/// One running build invocation.
#[async_trait]
pub trait ContainerProcess: Send {
    /// Next line of combined stdout/stderr; `None` once both streams close.
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Block until the process exits and return its exit code.
    async fn wait(&mut self) -> Result<i32>;

    /// Kill the process. Idempotent; used on cancellation.
    async fn terminate(&mut self) -> Result<()>;
}

pub mod podman;
