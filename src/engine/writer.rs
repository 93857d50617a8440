//! Engine stdin writer task.
//!
//! Drains command lines from an unbounded channel into the engine's stdin so
//! that [`ProcessHandle::write`](super::process::ProcessHandle::write) never
//! blocks the caller. Lines are written exactly as queued; the translator
//! already appended the `\n` terminator.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Engine writer task: writes queued lines to `stdin` until cancelled.
///
/// The task exits when:
/// - `cancel` is triggered (termination requested or the process exited),
/// - `line_rx` is closed (the owning handle was dropped), or
/// - a write fails. Write failures are an expected race with process exit
///   and are logged, not returned.
pub async fn run_writer<W>(
    session_id: String,
    mut stdin: W,
    mut line_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "engine writer: cancellation received, stopping");
                break;
            }

            line = line_rx.recv() => {
                let Some(line) = line else {
                    debug!(session_id, "engine writer: channel closed, stopping");
                    break;
                };

                debug!(session_id, command = line.trim_end(), "engine <-");

                let result = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.flush().await
                }
                .await;

                if let Err(err) = result {
                    warn!(session_id, error = %err, "engine writer: write to stdin failed");
                    break;
                }
            }
        }
    }
}
