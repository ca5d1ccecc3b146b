use crate::invocation::InvocationSpec;
use crate::runtime::{ContainerProcess, ContainerRuntime};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Production runtime shelling out to podman. The build container runs
/// privileged with an unconfined SELinux label, which the image build
/// tool needs for loopback mounts inside the container.
pub struct PodmanRuntime {
    binary: String,
}

impl PodmanRuntime {
    pub fn new() -> Self {
        Self {
            binary: std::env::var("BOOTFORGE_PODMAN").unwrap_or_else(|_| "podman".to_string()),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run_args(&self, spec: &InvocationSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--privileged".to_string(),
            "--security-opt".to_string(),
            "label=type:unconfined_t".to_string(),
            format!("--tls-verify={}", spec.tls_verify),
        ];
        for mount in &spec.mounts {
            let suffix = if mount.readonly { ":ro" } else { "" };
            args.push("-v".to_string());
            args.push(format!(
                "{}:{}{}",
                mount.host_path.display(),
                mount.container_path,
                suffix
            ));
        }
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(spec.image.clone());
        args.extend(spec.args.iter().cloned());
        args
    }
}

impl Default for PodmanRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for PodmanRuntime {
    async fn start(&self, spec: &InvocationSpec) -> Result<Box<dyn ContainerProcess>> {
        let args = self.run_args(spec);
        tracing::debug!(binary = %self.binary, ?args, "starting builder container");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.binary))?;

        let (tx, rx) = mpsc::channel(256);
        let stdout = child.stdout.take().context("builder stdout not piped")?;
        let stderr = child.stderr.take().context("builder stderr not piped")?;
        tokio::spawn(pump_lines(stdout, tx.clone()));
        tokio::spawn(pump_lines(stderr, tx));

        Ok(Box::new(PodmanProcess { child, lines: rx }))
    }
}

/// Forward one stream line-by-line into the merged channel until EOF.
async fn pump_lines<R: AsyncRead + Unpin>(stream: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("builder output stream closed: {}", e);
                break;
            }
        }
    }
}

struct PodmanProcess {
    child: Child,
    lines: mpsc::Receiver<String>,
}

#[async_trait]
impl ContainerProcess for PodmanProcess {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.recv().await)
    }

    async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await.context("waiting for builder")?;
        // No code means the process died to a signal.
        Ok(status.code().unwrap_or(-1))
    }

    async fn terminate(&mut self) -> Result<()> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Already exited; nothing left to kill.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e).context("terminating builder"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{Mount, OUTPUT_MOUNT_PATH};
    use std::path::PathBuf;

    fn spec() -> InvocationSpec {
        InvocationSpec {
            image: "quay.io/centos-bootc/bootc-image-builder:latest".to_string(),
            mounts: vec![
                Mount {
                    host_path: PathBuf::from("/tmp/config.toml"),
                    container_path: "/config.toml".to_string(),
                    readonly: true,
                },
                Mount {
                    host_path: PathBuf::from("/tmp/out"),
                    container_path: OUTPUT_MOUNT_PATH.to_string(),
                    readonly: false,
                },
            ],
            args: vec!["--type".to_string(), "qcow2".to_string()],
            env: vec![("OSBUILD_LOG".to_string(), "debug".to_string())],
            tls_verify: false,
        }
    }

    #[test]
    fn test_run_args_shape() {
        let runtime = PodmanRuntime::with_binary("podman");
        let args = runtime.run_args(&spec());
        let joined = args.join(" ");
        assert!(joined.starts_with("run --rm --privileged"));
        assert!(joined.contains("--tls-verify=false"));
        assert!(joined.contains("-v /tmp/config.toml:/config.toml:ro"));
        assert!(joined.contains("-v /tmp/out:/output"));
        assert!(joined.contains("--env OSBUILD_LOG=debug"));
        // Image first, then tool args.
        let image_at = joined
            .find("bootc-image-builder:latest --type qcow2")
            .unwrap();
        assert!(image_at > 0);
    }

    #[tokio::test]
    async fn test_streams_and_exit_code_via_shell() {
        // Drive the process plumbing with /bin/sh standing in for podman.
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("echo one; echo two >&2; exit 3")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn /bin/sh");
        let (tx, rx) = mpsc::channel(16);
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        tokio::spawn(pump_lines(stdout, tx.clone()));
        tokio::spawn(pump_lines(stderr, tx));
        let mut proc = PodmanProcess { child, lines: rx };

        let mut seen = Vec::new();
        while let Some(line) = proc.next_line().await.unwrap() {
            seen.push(line);
        }
        seen.sort();
        assert_eq!(seen, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(proc.wait().await.unwrap(), 3);
    }
}
