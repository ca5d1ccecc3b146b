use crate::cancel::CancelToken;
use crate::error::BuildError;
use crate::invocation::InvocationSpec;
use crate::runtime::ContainerRuntime;
use std::collections::VecDeque;

/// How many trailing tool-output lines ride along on `BuildFailed`
pub const LOG_TAIL_LINES: usize = 50;

/// Bounded ring of the most recent builder output lines
#[derive(Debug)]
pub struct LogTail {
    cap: usize,
    lines: VecDeque<String>,
}

impl LogTail {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            lines: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Run one builder invocation to completion. Streams every output line to
/// the logging sink as it arrives without interpreting it; interpretation
/// of results belongs to the manifest resolver. A non-zero exit is never
/// retried, since the tool may have partially populated the shared mount.
pub async fn invoke(
    runtime: &dyn ContainerRuntime,
    spec: &InvocationSpec,
    cancel: &CancelToken,
) -> Result<(), BuildError> {
    if cancel.is_cancelled() {
        return Err(BuildError::Cancelled);
    }

    tracing::info!(image = %spec.image, "starting build invocation");
    let mut proc = runtime.start(spec).await?;
    let mut tail = LogTail::new(LOG_TAIL_LINES);

    loop {
        tokio::select! {
            line = proc.next_line() => match line? {
                Some(line) => {
                    tracing::info!(target: "builder", "{}", line);
                    tail.push(line);
                }
                None => break,
            },
            _ = cancel.cancelled() => {
                tracing::warn!("cancellation requested, terminating builder");
                if let Err(e) = proc.terminate().await {
                    tracing::warn!("builder terminate failed: {}", e);
                }
                return Err(BuildError::Cancelled);
            }
        }
    }

    let exit_code = tokio::select! {
        code = proc.wait() => code?,
        _ = cancel.cancelled() => {
            if let Err(e) = proc.terminate().await {
                tracing::warn!("builder terminate failed: {}", e);
            }
            return Err(BuildError::Cancelled);
        }
    };

    if exit_code != 0 {
        return Err(BuildError::BuildFailed {
            exit_code,
            last_log_lines: tail.into_lines(),
        });
    }

    tracing::info!("builder finished");
    Ok(())
}
