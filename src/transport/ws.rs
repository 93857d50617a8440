//! WebSocket listener.
//!
//! `GET /` upgrades to a WebSocket; each connection gets a UUID, a tracing
//! span, and its own [`SessionBridge`]. `GET /health` answers `ok` without
//! starting an engine.
//!
//! The connection task only moves frames: text (and UTF-8 binary) frames go
//! to the bridge's inbound channel, bridge events go out as JSON text frames.
//! A close frame, socket error, or end of stream drops the inbound sender,
//! which the bridge reads as a disconnect.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bridge::session::{SessionBridge, SessionSettings};
use crate::config::GlobalConfig;
use crate::engine::assets::AssetResolver;
use crate::models::client::ClientEvent;
use crate::{AppError, Result};

/// Frames buffered in each direction per connection.
const CHANNEL_CAPACITY: usize = 64;

/// Diagnostic sent when `max_sessions` engines are already running.
pub const SESSION_LIMIT_MESSAGE: &str = "session limit reached";

/// Shared state for every connection accepted by the listener.
pub struct ListenerState {
    resolver: Arc<dyn AssetResolver>,
    settings: SessionSettings,
    sessions: Arc<Semaphore>,
}

impl ListenerState {
    /// Build listener state from configuration and an asset resolver.
    #[must_use]
    pub fn new(config: &GlobalConfig, resolver: Arc<dyn AssetResolver>) -> Self {
        let permits = usize::try_from(config.max_sessions).unwrap_or(usize::MAX);
        Self {
            resolver,
            settings: SessionSettings::from(config),
            sessions: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Sessions that can still be opened.
    #[must_use]
    pub fn available_sessions(&self) -> usize {
        self.sessions.available_permits()
    }
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

/// Build the axum router.
pub fn router(state: Arc<ListenerState>) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind `config.listen_addr()` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Transport` if the listener fails to bind or serve.
pub async fn serve(
    config: &GlobalConfig,
    resolver: Arc<dyn AssetResolver>,
    ct: CancellationToken,
) -> Result<()> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Transport(format!("failed to bind {addr}: {err}")))?;
    let state = Arc::new(ListenerState::new(config, resolver));
    serve_on(listener, state, ct).await
}

/// Serve on an already bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Transport` if the server fails.
pub async fn serve_on(
    listener: TcpListener,
    state: Arc<ListenerState>,
    ct: CancellationToken,
) -> Result<()> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?local, "websocket listener ready");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("listener failed: {err}")))?;

    info!("websocket listener stopped");
    Ok(())
}

async fn upgrade(State(state): State<Arc<ListenerState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| {
        let connection_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("connection", connection_id = %connection_id);
        run_connection(state, socket, connection_id).instrument(span)
    })
}

async fn run_connection(state: Arc<ListenerState>, socket: WebSocket, connection_id: String) {
    info!(session_id = connection_id, "client connected");
    let (mut sink, mut stream) = socket.split();

    let Ok(permit) = Arc::clone(&state.sessions).try_acquire_owned() else {
        warn!(session_id = connection_id, "rejecting connection: session limit reached");
        let event = ClientEvent::error(SESSION_LIMIT_MESSAGE);
        if let Ok(text) = event.to_json() {
            let _ = sink.send(Message::Text(text.into())).await;
        }
        let _ = sink.close().await;
        return;
    };

    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(CHANNEL_CAPACITY);

    let bridge = SessionBridge::new(
        connection_id.clone(),
        Arc::clone(&state.resolver),
        state.settings.clone(),
    );
    let bridge_task = tokio::spawn(bridge.run(inbound_rx, outbound_tx).in_current_span());

    loop {
        tokio::select! {
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(session_id = connection_id, %err, "ignoring non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!(session_id = connection_id, %err, "websocket error");
                        break;
                    }
                };
                if inbound_tx.send(text).await.is_err() {
                    // Bridge already closed; its remaining events are still flushed below.
                    debug!(session_id = connection_id, "bridge stopped accepting frames");
                }
            }

            event = outbound_rx.recv() => {
                let Some(event) = event else {
                    debug!(session_id = connection_id, "bridge closed, closing socket");
                    break;
                };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(session_id = connection_id, %err, "dropping unserialisable event");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    debug!(session_id = connection_id, "client sink failed");
                    break;
                }
            }
        }
    }

    drop(inbound_tx);
    drop(outbound_rx);
    match bridge_task.await {
        Ok(outcome) => info!(
            session_id = connection_id,
            reason = ?outcome.reason,
            pid = ?outcome.pid,
            "connection finished"
        ),
        Err(err) => warn!(session_id = connection_id, %err, "session task failed"),
    }
    drop(permit);
    let _ = sink.close().await;
}
