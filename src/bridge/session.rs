//! Per-connection session bridge.
//!
//! A [`SessionBridge`] pairs one client connection with one engine process
//! and walks the lifecycle `Idle → Launching → Active → Closing → Closed`.
//!
//! The bridge loop is the only consumer of client frames and the only
//! producer of client events. Engine output arrives from two reader tasks
//! (stdout, stderr) through a single signal channel, so stdout lines reach
//! the client in the order they were decoded. Nothing is delivered once
//! `Closing` begins: the readers are cancelled and the signal channel is
//! closed before the process is reaped. An event still waiting for outbound
//! capacity when the client disconnects is dropped.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GlobalConfig;
use crate::engine::assets::AssetResolver;
use crate::engine::framer::{LineFramer, MAX_LINE_BYTES};
use crate::engine::process::{terminal_state, ProcessHandle};
use crate::engine::reader::{run_reader, EngineSignal, OutputStream};
use crate::engine::translator;
use crate::models::bridge::{BridgeState, CloseReason, SessionOutcome};
use crate::models::client::ClientEvent;
use crate::models::engine::{EngineRequest, ProcessState};
use crate::Result;

/// Buffered engine lines between the reader tasks and the session loop.
const SIGNAL_CAPACITY: usize = 256;

/// Per-session tunables derived from [`GlobalConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Longest engine output line accepted before the session fails.
    pub max_line_bytes: usize,
    /// How long teardown waits for the engine to exit.
    pub teardown_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_line_bytes: MAX_LINE_BYTES,
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&GlobalConfig> for SessionSettings {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            max_line_bytes: config.max_line_bytes,
            teardown_timeout: config.teardown_timeout(),
        }
    }
}

/// Result of a successful launch, consumed on entry to `Active`.
struct Launched {
    exit_rx: watch::Receiver<ProcessState>,
    handshake: Vec<String>,
}

/// Connection-scoped bridge between a client and one engine process.
pub struct SessionBridge {
    session_id: String,
    resolver: Arc<dyn AssetResolver>,
    settings: SessionSettings,
    state: BridgeState,
    process: Option<ProcessHandle>,
    cancel: CancellationToken,
    requests_forwarded: u64,
}

impl SessionBridge {
    /// Create an `Idle` bridge for connection `session_id`.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        resolver: Arc<dyn AssetResolver>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            resolver,
            settings,
            state: BridgeState::Idle,
            process: None,
            cancel: CancellationToken::new(),
            requests_forwarded: 0,
        }
    }

    /// Drive the session until it is `Closed`.
    ///
    /// `inbound` carries raw client text frames; its closure means the client
    /// disconnected. `outbound` receives every event for the client.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<String>,
        outbound: mpsc::Sender<ClientEvent>,
    ) -> SessionOutcome {
        self.transition(BridgeState::Launching);

        let (signal_tx, mut signal_rx) = mpsc::channel(SIGNAL_CAPACITY);

        let reason = match self.launch(&signal_tx) {
            Ok(launched) => {
                drop(signal_tx);
                self.transition(BridgeState::Active);
                self.write_all(&launched.handshake);
                let mut exit_rx = launched.exit_rx;
                self.pump(&mut inbound, &outbound, &mut signal_rx, &mut exit_rx)
                    .await
            }
            Err(err) => {
                drop(signal_tx);
                error!(session_id = self.session_id, %err, "engine launch failed");
                self.transition(BridgeState::Closing);
                if outbound.send(ClientEvent::error(err.to_string())).await.is_err() {
                    debug!(session_id = self.session_id, "client gone before launch diagnostic");
                }
                CloseReason::LaunchFailed
            }
        };

        self.close(reason, signal_rx).await
    }

    fn launch(&mut self, signal_tx: &mpsc::Sender<EngineSignal>) -> Result<Launched> {
        let assets = self.resolver.resolve()?;
        assets.verify()?;

        let mut process =
            ProcessHandle::new(self.session_id.clone(), &assets.executable, &assets.working_dir);
        let launched = process.launch();
        let exit_rx = process.subscribe();
        self.process = Some(process);
        let output = launched?;

        let framer = LineFramer::with_max_line_bytes(self.settings.max_line_bytes);
        tokio::spawn(run_reader(
            self.session_id.clone(),
            OutputStream::Stdout,
            output.stdout,
            framer.clone(),
            signal_tx.clone(),
            self.cancel.clone(),
        ));
        tokio::spawn(run_reader(
            self.session_id.clone(),
            OutputStream::Stderr,
            output.stderr,
            framer,
            signal_tx.clone(),
            self.cancel.clone(),
        ));

        Ok(Launched {
            exit_rx,
            handshake: translator::handshake_commands(&assets.eval_file),
        })
    }

    async fn pump(
        &mut self,
        inbound: &mut mpsc::Receiver<String>,
        outbound: &mpsc::Sender<ClientEvent>,
        signal_rx: &mut mpsc::Receiver<EngineSignal>,
        exit_rx: &mut watch::Receiver<ProcessState>,
    ) -> CloseReason {
        let mut readers_open = true;
        // Event waiting for outbound capacity; no signal is read while set.
        let mut pending: Option<ClientEvent> = None;

        loop {
            tokio::select! {
                biased;

                frame = inbound.recv() => match frame {
                    Some(raw) => self.handle_client_frame(&raw),
                    None => {
                        if pending.is_some() {
                            debug!(session_id = self.session_id, "dropping undelivered event");
                        }
                        info!(session_id = self.session_id, "client disconnected");
                        return CloseReason::ClientDisconnected;
                    }
                },

                permit = outbound.reserve(), if pending.is_some() => match permit {
                    Ok(permit) => {
                        if let Some(event) = pending.take() {
                            permit.send(event);
                        }
                    }
                    Err(_closed) => {
                        info!(session_id = self.session_id, "client sink closed");
                        return CloseReason::ClientDisconnected;
                    }
                },

                signal = signal_rx.recv(), if readers_open && pending.is_none() => match signal {
                    Some(signal) => match self.handle_signal(signal, outbound).await {
                        ControlFlow::Continue(event) => pending = event,
                        ControlFlow::Break(reason) => return reason,
                    },
                    None => readers_open = false,
                },

                state = terminal_state(exit_rx), if pending.is_none() => {
                    info!(session_id = self.session_id, ?state, "engine exited while client connected");
                    return CloseReason::EngineExited;
                }
            }
        }
    }

    /// Map one reader signal to the event owed to the client, if any.
    async fn handle_signal(
        &self,
        signal: EngineSignal,
        outbound: &mpsc::Sender<ClientEvent>,
    ) -> ControlFlow<CloseReason, Option<ClientEvent>> {
        match signal {
            EngineSignal::Line {
                stream: OutputStream::Stdout,
                line,
            } => {
                let line = line.trim();
                if line.is_empty() {
                    return ControlFlow::Continue(None);
                }
                debug!(session_id = self.session_id, line, "engine ->");
                ControlFlow::Continue(translator::client_event(translator::classify_line(line)))
            }
            EngineSignal::Line {
                stream: OutputStream::Stderr,
                line,
            } => {
                if line.trim().is_empty() {
                    return ControlFlow::Continue(None);
                }
                warn!(session_id = self.session_id, line, "engine stderr");
                ControlFlow::Continue(Some(translator::diagnostic_event(&line)))
            }
            EngineSignal::Closed(stream) => {
                debug!(session_id = self.session_id, stream = stream.as_str(), "engine pipe closed");
                ControlFlow::Continue(None)
            }
            EngineSignal::Failed(stream, err) => {
                error!(session_id = self.session_id, stream = stream.as_str(), %err, "engine output failed");
                // Delivery is best effort; the session ends either way.
                let _ = outbound.send(ClientEvent::error(err.to_string())).await;
                ControlFlow::Break(CloseReason::StreamFailed)
            }
        }
    }

    fn handle_client_frame(&mut self, raw: &str) {
        match translator::parse_client_message(raw) {
            Ok(Some(request)) => self.forward(&request),
            Ok(None) => {}
            Err(err) => {
                warn!(session_id = self.session_id, %err, "ignoring malformed client message");
            }
        }
    }

    fn forward(&mut self, request: &EngineRequest) {
        let running = self
            .process
            .as_ref()
            .is_some_and(|process| process.state() == ProcessState::Running);
        if !running {
            // Requests are not queued for a process that is not running.
            info!(session_id = self.session_id, "engine not ready, dropping getmove");
            return;
        }

        debug!(
            session_id = self.session_id,
            position = %request.position,
            movetime_ms = request.movetime_ms,
            "forwarding getmove"
        );
        if self.write_all(&translator::request_commands(request)) {
            self.requests_forwarded += 1;
        }
    }

    fn write_all(&self, lines: &[String]) -> bool {
        let Some(process) = &self.process else {
            return false;
        };
        lines.iter().all(|line| process.write(line))
    }

    async fn close(
        mut self,
        reason: CloseReason,
        mut signal_rx: mpsc::Receiver<EngineSignal>,
    ) -> SessionOutcome {
        if self.state != BridgeState::Closing {
            self.transition(BridgeState::Closing);
        }

        self.cancel.cancel();
        signal_rx.close();
        while signal_rx.try_recv().is_ok() {}

        let mut terminate_requested = false;
        let mut process_state = None;
        let mut pid = None;
        if let Some(process) = self.process.take() {
            terminate_requested = process.terminate();
            process_state = Some(process.wait_terminal(self.settings.teardown_timeout).await);
            pid = process.id();
        }

        self.transition(BridgeState::Closed);
        info!(
            session_id = self.session_id,
            ?reason,
            ?process_state,
            terminate_requested,
            requests = self.requests_forwarded,
            "session closed"
        );

        SessionOutcome {
            session_id: self.session_id,
            state: self.state,
            reason,
            process: process_state,
            pid,
            terminate_requested,
            requests_forwarded: self.requests_forwarded,
        }
    }

    fn transition(&mut self, next: BridgeState) {
        if !self.state.can_transition_to(next) {
            warn!(session_id = self.session_id, from = ?self.state, to = ?next, "illegal session transition");
            return;
        }
        debug!(session_id = self.session_id, from = ?self.state, to = ?next, "session transition");
        self.state = next;
    }
}
