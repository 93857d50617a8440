//! Session bridge lifecycle.

use super::engine::ProcessState;

/// Lifecycle state of a [`SessionBridge`](crate::bridge::session::SessionBridge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Connection accepted, nothing launched.
    Idle,
    /// Engine launch in progress.
    Launching,
    /// Engine running; requests and output flow.
    Active,
    /// Teardown in progress; late events are dropped.
    Closing,
    /// Terminal. All resources released.
    Closed,
}

impl BridgeState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: BridgeState) -> bool {
        matches!(
            (self, next),
            (BridgeState::Idle, BridgeState::Launching)
                | (BridgeState::Launching, BridgeState::Active | BridgeState::Closing)
                | (BridgeState::Active, BridgeState::Closing)
                | (BridgeState::Closing, BridgeState::Closed)
        )
    }
}

/// Why a session left `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away.
    ClientDisconnected,
    /// The engine process exited on its own.
    EngineExited,
    /// Assets missing or the process could not be started.
    LaunchFailed,
    /// Engine output broke the framing limits.
    StreamFailed,
}

/// Summary returned when a session reaches `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Connection identifier.
    pub session_id: String,
    /// Final bridge state (always `Closed`).
    pub state: BridgeState,
    /// Why the session closed.
    pub reason: CloseReason,
    /// Last observed process state; `None` when no process was ever created.
    pub process: Option<ProcessState>,
    /// OS pid of the engine, when one was spawned.
    pub pid: Option<u32>,
    /// Whether teardown had to request termination.
    pub terminate_requested: bool,
    /// Number of request command batches written to the engine.
    pub requests_forwarded: u64,
}
