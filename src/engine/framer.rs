//! Incremental line framing for engine output.
//!
//! [`LineFramer`] is a [`Decoder`] for [`tokio_util::codec::FramedRead`]
//! over the engine's stdout and stderr pipes. It splits on `\n`, strips an
//! optional preceding `\r`, and keeps the unterminated remainder in the read
//! buffer until the next chunk completes it. At end of stream a non-empty
//! remainder is flushed as a final line, byte for byte: a `\r` only counts
//! as part of a terminator when `\n` follows it.
//!
//! Empty and whitespace-only lines are returned unchanged; skipping them is
//! the caller's decision.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

/// Default maximum line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited text decoder with a bounded pending line.
///
/// Bytes are decoded as lossy UTF-8. A line (or pending partial line) longer
/// than the configured limit returns [`AppError::Framing`]; callers treat
/// that as fatal to the session rather than growing the buffer forever.
#[derive(Debug, Clone)]
pub struct LineFramer {
    max_line_bytes: usize,
    /// Offset up to which `src` is known to contain no `\n`.
    scanned: usize,
}

impl LineFramer {
    /// Create a framer with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    /// Create a framer with a custom line limit.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            scanned: 0,
        }
    }

    /// Configured line limit in bytes.
    #[must_use]
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    fn too_long(&self) -> AppError {
        AppError::Framing(format!(
            "line too long: exceeded {} bytes",
            self.max_line_bytes
        ))
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineFramer {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        let start = self.scanned.min(src.len());
        match src[start..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline = start + offset;
                self.scanned = 0;
                let line = src.split_to(newline + 1);
                let content = strip_terminator(&line);
                if content.len() > self.max_line_bytes {
                    return Err(self.too_long());
                }
                Ok(Some(String::from_utf8_lossy(content).into_owned()))
            }
            None => {
                // A trailing `\r` may be the first half of a `\r\n` terminator.
                let pending = src.len() - usize::from(src.ends_with(b"\r"));
                if pending > self.max_line_bytes {
                    // Drop what we hold so a retrying caller does not loop on it.
                    src.advance(src.len());
                    self.scanned = 0;
                    return Err(self.too_long());
                }
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.scanned = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split_to(src.len());
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
