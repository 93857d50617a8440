//! Engine subprocess ownership.
//!
//! A [`ProcessHandle`] owns exactly one engine process:
//! - pre-flight checks the executable before anything is spawned;
//! - spawns with piped stdio, the configured working directory and
//!   `kill_on_drop(true)`;
//! - hands the stdout/stderr pipes back to the caller as two independent
//!   output streams;
//! - queues stdin writes on a channel drained by a writer task;
//! - records exit through a monitor task that also services termination.
//!
//! Lifecycle state lives in a [`watch`] channel. Only the handle's launch
//! path and its monitor task write to it; owners read or subscribe.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::writer::run_writer;
use crate::models::engine::ProcessState;
use crate::{AppError, Result};

/// Output pipes of a running engine.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Engine standard output.
    pub stdout: ChildStdout,
    /// Engine standard error.
    pub stderr: ChildStderr,
}

/// Owner of one engine subprocess.
#[derive(Debug)]
pub struct ProcessHandle {
    session_id: String,
    executable: PathBuf,
    working_dir: PathBuf,
    state_tx: Arc<watch::Sender<ProcessState>>,
    state_rx: watch::Receiver<ProcessState>,
    stdin_tx: Option<mpsc::UnboundedSender<String>>,
    kill: CancellationToken,
    pid: Option<u32>,
}

impl ProcessHandle {
    /// Create a handle in [`ProcessState::NotStarted`].
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        executable: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ProcessState::NotStarted);
        Self {
            session_id: session_id.into(),
            executable: executable.into(),
            working_dir: working_dir.into(),
            state_tx: Arc::new(state_tx),
            state_rx,
            stdin_tx: None,
            kill: CancellationToken::new(),
            pid: None,
        }
    }

    /// Start the engine.
    ///
    /// On success the handle is `Running` and the caller receives the output
    /// pipes. The writer and exit-monitor tasks are already spawned.
    ///
    /// # Errors
    ///
    /// - [`AppError::Launch`] — the handle was already launched, or the
    ///   executable is missing, not a regular file, or not executable. No
    ///   process is started.
    /// - [`AppError::Spawn`] — the platform refused to start the process.
    pub fn launch(&mut self) -> Result<ProcessOutput> {
        if *self.state_rx.borrow() != ProcessState::NotStarted {
            return Err(AppError::Launch("engine process already launched".into()));
        }

        if let Err(err) = preflight(&self.executable) {
            advance(&self.state_tx, ProcessState::Failed {
                error: err.to_string(),
            });
            return Err(err);
        }

        advance(&self.state_tx, ProcessState::Starting);
        info!(
            session_id = self.session_id,
            executable = %self.executable.display(),
            working_dir = %self.working_dir.display(),
            "spawning engine process"
        );

        let mut cmd = Command::new(&self.executable);
        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| self.fail(format!("engine spawn error: {err}")))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            child.start_kill().ok();
            return Err(self.fail("failed to capture engine stdio".into()));
        };

        self.pid = child.id();
        advance(&self.state_tx, ProcessState::Running);
        info!(session_id = self.session_id, pid = ?self.pid, "engine process running");

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        self.stdin_tx = Some(stdin_tx);
        tokio::spawn(run_writer(
            self.session_id.clone(),
            stdin,
            stdin_rx,
            self.kill.clone(),
        ));

        // Detached: the monitor owns `child` and finishes once it is reaped.
        let _monitor = monitor_exit(
            self.session_id.clone(),
            child,
            Arc::clone(&self.state_tx),
            self.kill.clone(),
        );

        Ok(ProcessOutput { stdout, stderr })
    }

    /// Queue `line` for the engine's stdin.
    ///
    /// Never blocks. Returns `false` without side effects when the process is
    /// not `Running`; an in-flight teardown makes that an expected case.
    pub fn write(&self, line: &str) -> bool {
        if *self.state_rx.borrow() != ProcessState::Running {
            debug!(session_id = self.session_id, "dropping engine write: process not running");
            return false;
        }
        let Some(tx) = &self.stdin_tx else {
            return false;
        };
        if tx.send(line.to_owned()).is_err() {
            let err = AppError::Write("engine stdin closed".into());
            warn!(session_id = self.session_id, %err, "engine write suppressed");
            return false;
        }
        true
    }

    /// Request termination.
    ///
    /// Idempotent: returns `true` only for the call that actually requested
    /// the kill. Calls in `NotStarted`, `Exited` or `Failed` are no-ops.
    pub fn terminate(&self) -> bool {
        let live = matches!(
            *self.state_rx.borrow(),
            ProcessState::Starting | ProcessState::Running
        );
        if !live || self.kill.is_cancelled() {
            return false;
        }
        info!(session_id = self.session_id, pid = ?self.pid, "terminating engine process");
        self.kill.cancel();
        true
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to lifecycle changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state_rx.clone()
    }

    /// OS process id, once spawned.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Executable this handle launches.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Wait up to `timeout` for `Exited`/`Failed`, returning the state seen last.
    pub async fn wait_terminal(&self, timeout: Duration) -> ProcessState {
        let mut rx = self.state_rx.clone();
        match tokio::time::timeout(timeout, terminal_state(&mut rx)).await {
            Ok(state) => state,
            Err(_elapsed) => {
                warn!(session_id = self.session_id, ?timeout, "engine did not exit within teardown timeout");
                rx.borrow().clone()
            }
        }
    }

    fn fail(&self, error: String) -> AppError {
        warn!(session_id = self.session_id, error, "engine launch failed");
        advance(&self.state_tx, ProcessState::Failed {
            error: error.clone(),
        });
        AppError::Spawn(error)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // The monitor task owns the child; wake it so the process is reaped.
        self.kill.cancel();
    }
}

/// Resolve once `rx` holds a terminal state.
///
/// If the handle and its monitor are both gone the last published value is
/// returned as-is.
pub async fn terminal_state(rx: &mut watch::Receiver<ProcessState>) -> ProcessState {
    let seen = rx
        .wait_for(ProcessState::is_terminal)
        .await
        .map(|state| state.clone());
    match seen {
        Ok(state) => state,
        Err(_closed) => rx.borrow().clone(),
    }
}

fn preflight(executable: &Path) -> Result<()> {
    let meta = std::fs::metadata(executable).map_err(|err| {
        AppError::Launch(format!(
            "engine executable {}: {err}",
            executable.display()
        ))
    })?;

    if !meta.is_file() {
        return Err(AppError::Launch(format!(
            "engine executable {} is not a regular file",
            executable.display()
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(AppError::Launch(format!(
                "engine executable {} is not executable",
                executable.display()
            )));
        }
    }

    Ok(())
}

fn advance(state_tx: &watch::Sender<ProcessState>, next: ProcessState) {
    state_tx.send_if_modified(|current| {
        if current.can_transition_to(&next) {
            *current = next;
            true
        } else {
            warn!(from = ?current, to = ?next, "ignoring illegal engine state transition");
            false
        }
    });
}

/// Await child exit, killing it first if `kill` fires, then publish the
/// terminal state and cancel `kill` so the writer stops.
fn monitor_exit(
    session_id: String,
    mut child: Child,
    state_tx: Arc<watch::Sender<ProcessState>>,
    kill: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let exited = tokio::select! {
            result = child.wait() => Some(result),
            () = kill.cancelled() => None,
        };

        let result = match exited {
            Some(result) => result,
            None => {
                if let Err(err) = child.start_kill() {
                    debug!(session_id, %err, "engine kill failed; process may have exited");
                }
                child.wait().await
            }
        };

        let next = match result {
            Ok(status) => {
                let code = status.code();
                info!(
                    session_id,
                    code = ?code,
                    "engine process exited"
                );
                ProcessState::Exited { code }
            }
            Err(err) => {
                warn!(session_id, %err, "error waiting for engine process");
                ProcessState::Failed {
                    error: format!("wait error: {err}"),
                }
            }
        };

        advance(&state_tx, next);
        kill.cancel();
    })
}
