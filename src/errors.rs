//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering every session and listener failure mode.
///
/// [`AppError::Write`] and [`AppError::Parse`] are expected during normal
/// operation and are logged, never surfaced. [`AppError::Io`] also carries
/// engine pipe read failures raised through the line decoder.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Engine executable or companion asset missing or unusable.
    Launch(String),
    /// The platform failed to start the engine process.
    Spawn(String),
    /// Writing to an engine that is no longer running.
    Write(String),
    /// Malformed inbound client message.
    Parse(String),
    /// Engine output violated the line framing limits.
    Framing(String),
    /// Listener or client socket failure.
    Transport(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Write(msg) => write!(f, "write: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Framing(msg) => write!(f, "framing: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(format!("malformed json: {err}"))
    }
}
