use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};

/// Result of running the post-implementation check command.
#[derive(Debug)]
pub struct CheckOutcome {
    pub passed: bool,
    /// Combined stdout and stderr.
    pub output: String,
    pub summary: String,
}

/// Run `command` through `sh -c` in the checkout, bounded by `timeout`.
///
/// A timeout counts as a failed check rather than an error. Whatever the
/// command printed before the deadline is kept.
pub async fn run_post_check(command: &str, checkout: &Path, timeout: Duration) -> Result<CheckOutcome> {
    tracing::info!(command, timeout_secs = timeout.as_secs(), "Running post-implementation check");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(checkout)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::Internal(format!("Failed to spawn post-check shell: {e}")))?;

    let stdout = Arc::new(Mutex::new(Vec::new()));
    let stderr = Arc::new(Mutex::new(Vec::new()));
    let mut readers = [
        child.stdout.take().map(|pipe| drain(pipe, Arc::clone(&stdout))),
        child.stderr.take().map(|pipe| drain(pipe, Arc::clone(&stderr))),
    ];

    let finished = tokio::time::timeout(timeout, async {
        let status = child.wait().await?;
        // Joined by reference so the handles stay abortable.
        for reader in readers.iter_mut().flatten() {
            let _ = reader.await;
        }
        Ok::<_, std::io::Error>(status)
    })
    .await;

    let status = match finished {
        Ok(status) => Some(status?),
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill post-check shell");
            }
            // Background jobs of the command may still hold the pipes.
            for reader in readers.iter().flatten() {
                reader.abort();
            }
            None
        }
    };

    let mut combined = captured(&stdout);
    combined.push_str(&captured(&stderr));

    let Some(status) = status else {
        return Ok(CheckOutcome {
            passed: false,
            output: combined,
            summary: format!("`{command}` did not finish within {}s", timeout.as_secs()),
        });
    };

    let summary = match status.code() {
        Some(0) => format!("`{command}` passed"),
        Some(code) => format!("`{command}` exited with {code}"),
        None => format!("`{command}` was terminated by a signal"),
    };

    Ok(CheckOutcome {
        passed: status.success(),
        output: combined,
        summary,
    })
}

/// Copy `pipe` into `sink` as it arrives.
fn drain<R>(mut pipe: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut sink) = sink.lock() {
                        sink.extend_from_slice(&buf[..n]);
                    }
                }
            }
        }
    })
}

fn captured(sink: &Mutex<Vec<u8>>) -> String {
    sink.lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
