//! Translation between client JSON messages and UCI command lines.
//!
//! Outbound (client → engine) a `getmove` request becomes two lines:
//!
//! ```text
//! position fen <payload>
//! go movetime <ms>
//! ```
//!
//! Inbound (engine → client) only lines of the form `bestmove <move> …`
//! are consumed; everything else is [`EngineEvent::Ignored`]. The position
//! payload is opaque and never validated here.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::models::client::{ClientEnvelope, ClientEvent};
use crate::models::engine::{EngineEvent, EngineRequest, DEFAULT_MOVETIME_MS};
use crate::{AppError, Result};

/// Message `type` that requests a move.
pub const GET_MOVE: &str = "getmove";

const BEST_MOVE: &str = "bestmove";
const NO_MOVE: &str = "(none)";

/// Engine initialisation sequence written once the process is running:
/// protocol handshake, evaluation-file option, readiness probe.
#[must_use]
pub fn handshake_commands(eval_file: &Path) -> Vec<String> {
    vec![
        "uci\n".to_owned(),
        format!("setoption name EvalFile value {}\n", eval_file.display()),
        "isready\n".to_owned(),
    ]
}

/// Command lines for one request, in write order.
#[must_use]
pub fn request_commands(request: &EngineRequest) -> Vec<String> {
    vec![
        format!("position fen {}\n", request.position),
        format!("go movetime {}\n", request.movetime_ms),
    ]
}

/// Resolve the client's `movetime` into a positive millisecond budget.
#[must_use]
pub fn resolve_movetime(raw: Option<&Value>) -> u64 {
    raw.and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_MOVETIME_MS)
}

/// Parse one inbound client text frame.
///
/// # Return value
///
/// - `Ok(Some(request))` for a well-formed `getmove`.
/// - `Ok(None)` for any other message `type` (logged at `DEBUG`).
///
/// # Errors
///
/// Returns [`AppError::Parse`] when the frame is not a JSON object with a
/// string `type`, or a `getmove` lacks a string `fen`.
pub fn parse_client_message(raw: &str) -> Result<Option<EngineRequest>> {
    let envelope: ClientEnvelope = serde_json::from_str(raw)?;

    if envelope.kind != GET_MOVE {
        debug!(kind = %envelope.kind, "ignoring client message of unknown type");
        return Ok(None);
    }

    let position = envelope
        .fen
        .ok_or_else(|| AppError::Parse("missing required field: `fen` in getmove".into()))?;

    Ok(Some(EngineRequest::new(
        position,
        resolve_movetime(envelope.movetime.as_ref()),
    )))
}

/// Classify one decoded stdout line.
///
/// A result line starts with `bestmove` followed by whitespace; the next
/// whitespace-delimited token is the move unless it is absent or `(none)`.
#[must_use]
pub fn classify_line(line: &str) -> EngineEvent {
    let Some(rest) = line.trim().strip_prefix(BEST_MOVE) else {
        return EngineEvent::Ignored;
    };
    if !rest.starts_with(char::is_whitespace) {
        return EngineEvent::Ignored;
    }
    match rest.split_whitespace().next() {
        Some(token) if token != NO_MOVE => EngineEvent::BestMove(token.to_owned()),
        _ => EngineEvent::Ignored,
    }
}

/// Map a classified stdout line to the event the client should receive.
#[must_use]
pub fn client_event(event: EngineEvent) -> Option<ClientEvent> {
    match event {
        EngineEvent::BestMove(mv) => Some(ClientEvent::engine_move(mv)),
        EngineEvent::Ignored => None,
    }
}

/// Wrap an engine stderr line as a diagnostic, verbatim.
#[must_use]
pub fn diagnostic_event(line: &str) -> ClientEvent {
    ClientEvent::error(line)
}
