//! Cancellable subprocess execution shared by the extractor and media tool.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors from running an external program.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started (missing binary, permissions).
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program name or path.
        program: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the program failed.
    #[error("failed waiting for {program}: {source}")]
    Wait {
        /// Program name or path.
        program: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The program ran longer than allowed and was killed.
    #[error("{program} timed out after {}s", timeout.as_secs())]
    TimedOut {
        /// Program name or path.
        program: String,
        /// The limit that was exceeded.
        timeout: Duration,
    },

    /// The run was cancelled and the program was killed.
    #[error("{program} cancelled")]
    Cancelled {
        /// Program name or path.
        program: String,
    },
}

/// Captured result of a finished program.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Exit status.
    pub status: ExitStatus,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error, lossily decoded.
    pub stderr: String,
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe
            && let Err(e) = pipe.read_to_end(&mut buf).await
        {
            debug!(error = %e, "pipe read ended early");
        }
        buf
    })
}

/// Runs `command` to completion, capturing its output.
///
/// The child is killed when `cancel` fires, when `timeout` elapses, or when
/// the returned future is dropped.
///
/// # Errors
///
/// Returns [`ProcessError`] when the program cannot be started, times out,
/// or is cancelled. A non-zero exit status is not an error here; callers
/// classify it from the captured stderr.
pub async fn run(
    mut command: Command,
    program: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, ProcessError> {
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled {
            program: program.to_string(),
        });
    }

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = tokio::select! {
        status = child.wait() => status.map_err(|source| ProcessError::Wait {
            program: program.to_string(),
            source,
        })?,
        () = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(program, error = %e, "failed to kill cancelled process");
            }
            stdout.abort();
            stderr.abort();
            return Err(ProcessError::Cancelled { program: program.to_string() });
        }
        () = tokio::time::sleep(timeout) => {
            if let Err(e) = child.kill().await {
                warn!(program, error = %e, "failed to kill timed out process");
            }
            stdout.abort();
            stderr.abort();
            return Err(ProcessError::TimedOut { program: program.to_string(), timeout });
        }
    };

    let stdout = stdout.await.unwrap_or_default();
    let stderr = String::from_utf8_lossy(&stderr.await.unwrap_or_default()).into_owned();
    debug!(program, code = ?status.code(), "process exited");

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
    })
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let cancel = CancellationToken::new();
        let output = run(
            sh("echo out; echo err >&2; exit 3"),
            "sh",
            Duration::from_secs(10),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_missing_program_is_spawn_error() {
        let cancel = CancellationToken::new();
        let result = run(
            Command::new("/definitely/not/a/program"),
            "nope",
            Duration::from_secs(1),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_run_cancel_kills_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let result = run(sh("sleep 30"), "sh", Duration::from_secs(60), &cancel).await;
        assert!(matches!(result, Err(ProcessError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_timeout_kills_process() {
        let cancel = CancellationToken::new();
        let result = run(sh("sleep 30"), "sh", Duration::from_millis(100), &cancel).await;
        assert!(matches!(result, Err(ProcessError::TimedOut { .. })));
    }

    #[tokio::test]
    async fn test_run_already_cancelled_does_not_spawn() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run(sh("exit 0"), "sh", Duration::from_secs(1), &cancel).await;
        assert!(matches!(result, Err(ProcessError::Cancelled { .. })));
    }
}
