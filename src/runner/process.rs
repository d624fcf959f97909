//! Child process plumbing for test runs

use std::process::ExitStatus;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

fn exit_code_from_parts(code: Option<i32>, _signal: Option<i32>) -> Option<i32> {
    if let Some(code) = code {
        return Some(code);
    }
    #[cfg(unix)]
    {
        if let Some(signal) = _signal {
            return Some(128 + signal);
        }
    }
    None
}

/// Exit code of a finished process; 128 + signal for signal deaths on Unix.
pub(crate) fn exit_status_code(status: &ExitStatus) -> Option<i32> {
    let code = status.code();
    #[cfg(unix)]
    let signal = status.signal();
    #[cfg(not(unix))]
    let signal = None;
    exit_code_from_parts(code, signal)
}

/// Which pipe a read failed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Errors while collecting a child's output
#[derive(Debug, Error)]
pub(crate) enum CaptureError {
    #[error("failed to read {stream}: {source}")]
    Read {
        stream: OutputStream,
        source: std::io::Error,
    },

    #[error("failed to wait for process: {source}")]
    Wait { source: std::io::Error },
}

/// Bytes read from a child's pipes so far.
///
/// Lives outside the capture future, so whatever arrived before a timeout
/// dropped that future is still here.
#[derive(Debug, Default)]
pub(crate) struct PartialOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl PartialOutput {
    // Test runners print whatever bytes they like
    pub(crate) fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub(crate) fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Append everything from `pipe` to `buf`, one read at a time, so a
/// cancelled drain keeps every chunk it already got
async fn drain<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    buf: &mut Vec<u8>,
    stream: OutputStream,
) -> Result<(), CaptureError> {
    let Some(mut pipe) = pipe else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe
            .read(&mut chunk)
            .await
            .map_err(|source| CaptureError::Read { stream, source })?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Read stdout and stderr concurrently into `output`, then reap the child.
pub(crate) async fn capture_child_output(
    child: &mut Child,
    output: &mut PartialOutput,
) -> Result<ExitStatus, CaptureError> {
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let PartialOutput { stdout, stderr } = output;

    if let Err(e) = tokio::try_join!(
        drain(stdout_pipe, stdout, OutputStream::Stdout),
        drain(stderr_pipe, stderr, OutputStream::Stderr)
    ) {
        let _ = child.kill().await;
        return Err(e);
    }

    child
        .wait()
        .await
        .map_err(|source| CaptureError::Wait { source })
}
