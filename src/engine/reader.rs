//! Engine output reader tasks.
//!
//! One task per output pipe. Each drives a [`FramedRead`] with
//! [`LineFramer`] and forwards complete lines, tagged with the pipe they
//! came from, into the session's signal channel. Classification happens in
//! the session loop so the stdout order seen by the client is the order the
//! lines were decoded.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::framer::LineFramer;
use crate::AppError;

/// Which engine pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output: protocol replies.
    Stdout,
    /// Standard error: diagnostics only.
    Stderr,
}

impl OutputStream {
    /// Short label used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Signal delivered from a reader task to the session loop.
#[derive(Debug)]
pub enum EngineSignal {
    /// One complete line, terminator stripped.
    Line {
        /// Source pipe.
        stream: OutputStream,
        /// Line content.
        line: String,
    },
    /// The pipe reached end of stream.
    Closed(OutputStream),
    /// Framing or I/O failure; fatal to the session.
    Failed(OutputStream, AppError),
}

/// Reader task: frames `pipe` into lines and forwards them through `signal_tx`.
///
/// Stops on cancellation, end of stream, a framing error, or when the
/// session loop has dropped its receiver. No signal is sent after
/// cancellation is observed.
pub async fn run_reader<R>(
    session_id: String,
    stream: OutputStream,
    pipe: R,
    framer: LineFramer,
    signal_tx: mpsc::Sender<EngineSignal>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(pipe, framer);

    loop {
        let signal = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, stream = stream.as_str(), "engine reader: cancellation received, stopping");
                return;
            }

            item = framed.next() => match item {
                None => {
                    debug!(session_id, stream = stream.as_str(), "engine reader: EOF detected");
                    EngineSignal::Closed(stream)
                }
                Some(Ok(line)) => EngineSignal::Line { stream, line },
                Some(Err(err)) => {
                    warn!(session_id, stream = stream.as_str(), error = %err, "engine reader: stream failed");
                    EngineSignal::Failed(stream, err)
                }
            },
        };

        let last = !matches!(signal, EngineSignal::Line { .. });
        tokio::select! {
            biased;

            () = cancel.cancelled() => return,

            sent = signal_tx.send(signal) => {
                if sent.is_err() {
                    debug!(session_id, stream = stream.as_str(), "engine reader: session gone, stopping");
                    return;
                }
            }
        }
        if last {
            return;
        }
    }
}
