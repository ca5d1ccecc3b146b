pub mod cancel;
pub mod error;
pub mod invocation;
pub mod invoker;
pub mod logging;
pub mod manifest;
pub mod orchestrator;
pub mod registry;
pub mod request;
pub mod runtime;
pub mod upload;

pub use cancel::{CancelSource, CancelToken};
pub use error::BuildError;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use request::{AwsOptions, BuildRequest, BuildResult, OutputArtifact};
