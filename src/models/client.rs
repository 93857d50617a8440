//! Client-facing WebSocket message shapes.

use serde::{Deserialize, Serialize};

/// Inbound message envelope (client → bridge).
///
/// Only `type` is required on the wire; the remaining fields are checked
/// once the message kind is known.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClientEnvelope {
    /// Message discriminant (e.g. `getmove`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque position payload for `getmove`.
    #[serde(default)]
    pub fen: Option<String>,
    /// Requested search time; any non-positive or non-integer value falls
    /// back to the default.
    #[serde(default)]
    pub movetime: Option<serde_json::Value>,
}

/// Outbound event (bridge → client).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// The engine produced a move.
    #[serde(rename = "engineMove")]
    EngineMove {
        /// Move token exactly as the engine reported it.
        #[serde(rename = "move")]
        mv: String,
    },
    /// Diagnostic: launch failure, spawn error, or engine stderr output.
    #[serde(rename = "error")]
    Error {
        /// Human-readable diagnostic text.
        data: String,
    },
}

impl ClientEvent {
    /// Build an `engineMove` event.
    #[must_use]
    pub fn engine_move(mv: impl Into<String>) -> Self {
        Self::EngineMove { mv: mv.into() }
    }

    /// Build an `error` event.
    #[must_use]
    pub fn error(data: impl Into<String>) -> Self {
        Self::Error { data: data.into() }
    }

    /// Serialise to the single-line JSON text sent over the socket.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Parse` if serialisation fails (not expected for
    /// these string-only variants).
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
