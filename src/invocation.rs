use crate::error::BuildError;
use crate::request::BuildRequest;
use std::path::{Path, PathBuf};

/// Where the build-definition file appears inside the builder container
pub const CONFIG_MOUNT_PATH: &str = "/config.toml";
/// Where the tool writes its artifacts and manifest
pub const OUTPUT_MOUNT_PATH: &str = "/output";

/// Everything the container-execution collaborator needs for one run
#[derive(Debug, Clone)]
pub struct InvocationSpec {
    pub image: String,
    pub mounts: Vec<Mount>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub tls_verify: bool,
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub readonly: bool,
}

impl InvocationSpec {
    /// The host directory mounted at the tool's output path, if any.
    /// Lets tests locate a build's output without threading extra state.
    pub fn output_host_path(&self) -> Option<&Path> {
        self.mounts
            .iter()
            .find(|m| m.container_path == OUTPUT_MOUNT_PATH)
            .map(|m| m.host_path.as_path())
    }
}

/// Translate a build request into a single tool invocation. Pure function
/// of the request and the caller-supplied output directory; validation
/// failures surface as `InvalidRequest` before any side effects.
pub fn translate(request: &BuildRequest, output_dir: &Path) -> Result<InvocationSpec, BuildError> {
    request.validate()?;

    let mounts = vec![
        Mount {
            host_path: request.config_file_path.clone(),
            container_path: CONFIG_MOUNT_PATH.to_string(),
            readonly: true,
        },
        Mount {
            host_path: output_dir.to_path_buf(),
            container_path: OUTPUT_MOUNT_PATH.to_string(),
            readonly: false,
        },
    ];

    let mut args = Vec::new();
    for kind in request.effective_types() {
        args.push("--type".to_string());
        args.push(kind);
    }
    args.push(format!("--tls-verify={}", request.tls_verify));
    if let Some(rootfs) = &request.rootfs {
        args.push("--rootfs".to_string());
        args.push(rootfs.clone());
    }
    if let Some(chown) = &request.chown {
        args.push("--chown".to_string());
        args.push(chown.clone());
    }
    // Opaque passthrough: whitespace-split, never interpreted. Malformed
    // content surfaces as a tool failure, not ours.
    if let Some(extra) = &request.additional_args {
        args.extend(extra.split_whitespace().map(str::to_string));
    }
    args.push(request.image.clone());

    Ok(InvocationSpec {
        image: request.builder_image.clone(),
        mounts,
        args,
        env: Vec::new(),
        tls_verify: request.tls_verify,
    })
}
