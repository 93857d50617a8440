//! Integration tests for the WebSocket connection listener.
//!
//! Each test binds an ephemeral port, serves a `ListenerState` on it and
//! talks to it with a real `tokio-tungstenite` client.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use uci_bridge::config::GlobalConfig;
use uci_bridge::engine::assets::AssetResolver;
use uci_bridge::models::client::ClientEvent;
use uci_bridge::transport::ws::{serve_on, ListenerState, SESSION_LIMIT_MESSAGE};
use uci_bridge::Result;

use super::test_helpers::{getmove, missing_assets, FakeEngine, ENGINE_SCRIPT, EVENT_TIMEOUT};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Listener {
    addr: SocketAddr,
    state: Arc<ListenerState>,
    ct: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl Listener {
    async fn start(max_sessions: u32, resolver: Arc<dyn AssetResolver>) -> Self {
        let config = GlobalConfig {
            max_sessions,
            ..GlobalConfig::default()
        };
        let state = Arc::new(ListenerState::new(&config, resolver));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let ct = CancellationToken::new();
        let task = tokio::spawn(serve_on(listener, Arc::clone(&state), ct.clone()));
        Self {
            addr,
            state,
            ct,
            task,
        }
    }

    async fn connect(&self) -> Client {
        let (client, _response) = tokio_tungstenite::connect_async(format!("ws://{}/", self.addr))
            .await
            .expect("websocket handshake");
        client
    }

    async fn stop(self) {
        self.ct.cancel();
        let _ = tokio::time::timeout(EVENT_TIMEOUT, self.task).await;
    }
}

/// Next JSON event, skipping control frames. `None` once the server closes.
async fn next_event(client: &mut Client) -> Option<ClientEvent> {
    loop {
        let frame = tokio::time::timeout(EVENT_TIMEOUT, client.next())
            .await
            .expect("frame within timeout");
        match frame {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).expect("valid event json"));
            }
            Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
            Some(Ok(_)) => {}
        }
    }
}

#[tokio::test]
async fn getmove_round_trip_over_websocket() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let listener = Listener::start(4, engine.resolver()).await;
    let mut client = listener.connect().await;

    client
        .send(Message::text(getmove(Some(100))))
        .await
        .expect("send getmove");
    assert_eq!(
        next_event(&mut client).await,
        Some(ClientEvent::engine_move("h2e2"))
    );

    client.close(None).await.expect("close");
    listener.stop().await;
}

#[tokio::test]
async fn binary_frames_are_treated_as_text() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let listener = Listener::start(4, engine.resolver()).await;
    let mut client = listener.connect().await;

    client
        .send(Message::binary(getmove(Some(100)).into_bytes()))
        .await
        .expect("send getmove");
    assert_eq!(
        next_event(&mut client).await,
        Some(ClientEvent::engine_move("h2e2"))
    );

    client.close(None).await.expect("close");
    listener.stop().await;
}

#[tokio::test]
async fn missing_engine_reports_error_then_closes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let listener = Listener::start(4, missing_assets(dir.path())).await;
    let mut client = listener.connect().await;

    match next_event(&mut client).await {
        Some(ClientEvent::Error { data }) => assert!(data.starts_with("launch:"), "{data}"),
        other => panic!("expected error event, got: {other:?}"),
    }
    assert_eq!(next_event(&mut client).await, None, "socket closes after launch failure");

    listener.stop().await;
}

#[tokio::test]
async fn session_limit_rejects_extra_connections() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let listener = Listener::start(1, engine.resolver()).await;

    let mut first = listener.connect().await;
    first
        .send(Message::text(getmove(Some(10))))
        .await
        .expect("send getmove");
    assert_eq!(
        next_event(&mut first).await,
        Some(ClientEvent::engine_move("h2e2"))
    );
    assert_eq!(listener.state.available_sessions(), 0);

    let mut second = listener.connect().await;
    assert_eq!(
        next_event(&mut second).await,
        Some(ClientEvent::error(SESSION_LIMIT_MESSAGE))
    );
    assert_eq!(next_event(&mut second).await, None);

    first.close(None).await.expect("close");
    let freed = tokio::time::timeout(EVENT_TIMEOUT, async {
        while listener.state.available_sessions() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(freed.is_ok(), "permit is released once the session closes");

    listener.stop().await;
}

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let listener = Listener::start(1, engine.resolver()).await;

    let mut stream = TcpStream::connect(listener.addr).await.expect("connect");
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .expect("write request");
    let mut response = String::new();
    tokio::time::timeout(EVENT_TIMEOUT, stream.read_to_string(&mut response))
        .await
        .expect("response within timeout")
        .expect("read response");

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("ok"), "{response}");
    assert_eq!(listener.state.available_sessions(), 1, "health does not use a session");

    listener.stop().await;
}

#[tokio::test]
async fn cancellation_stops_the_listener() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let listener = Listener::start(1, engine.resolver()).await;

    listener.ct.cancel();
    let result = tokio::time::timeout(EVENT_TIMEOUT, listener.task)
        .await
        .expect("listener stops within timeout")
        .expect("listener task completes");
    assert!(result.is_ok(), "graceful stop: {result:?}");
}
