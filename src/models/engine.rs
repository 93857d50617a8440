//! Engine-side values: requests, classified output, process lifecycle.

/// Search time used when a request omits `movetime` or sends a non-positive value.
pub const DEFAULT_MOVETIME_MS: u64 = 2000;

/// Task descriptor submitted by the client. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    /// Opaque position payload, forwarded verbatim.
    pub position: String,
    /// Resolved search time in milliseconds.
    pub movetime_ms: u64,
}

impl EngineRequest {
    /// Create a request with an already-resolved time budget.
    #[must_use]
    pub fn new(position: impl Into<String>, movetime_ms: u64) -> Self {
        Self {
            position: position.into(),
            movetime_ms,
        }
    }
}

/// Classification of one decoded engine stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineEvent {
    /// A `bestmove` reply carrying a playable move.
    BestMove(String),
    /// Nothing the client needs to see.
    Ignored,
}

/// Lifecycle of one engine subprocess.
///
/// Transitions only move forward:
/// `NotStarted → Starting → Running → {Exited | Failed}`. A launch that
/// fails pre-flight goes straight from `NotStarted` to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Handle created, nothing spawned.
    NotStarted,
    /// Spawn requested.
    Starting,
    /// The platform confirmed the process started.
    Running,
    /// Process exited. `code` is `None` when it was killed by a signal.
    Exited {
        /// Exit code, when the platform reported one.
        code: Option<i32>,
    },
    /// Launch or wait failed.
    Failed {
        /// Description of the failure.
        error: String,
    },
}

impl ProcessState {
    /// `Exited` or `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Failed { .. })
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: &ProcessState) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Starting | Self::Failed { .. })
                | (Self::Starting, Self::Running | Self::Failed { .. })
                | (Self::Running, Self::Exited { .. } | Self::Failed { .. })
        )
    }
}
