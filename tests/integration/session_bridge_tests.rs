//! Integration tests for the per-connection session bridge.
//!
//! Each test drives a `SessionBridge` through its public channels against
//! a fake shell-script engine from `test_helpers`.

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use uci_bridge::bridge::session::SessionSettings;
use uci_bridge::models::bridge::{BridgeState, CloseReason};
use uci_bridge::models::client::ClientEvent;
use uci_bridge::models::engine::ProcessState;

use super::test_helpers::{
    getmove, missing_assets, start_session, start_session_buffered, start_session_with,
    FakeEngine, SessionHarness, ENGINE_SCRIPT, EVENT_TIMEOUT, EXITING_ENGINE_SCRIPT,
    FLOODING_ENGINE_SCRIPT, LONG_LINE_ENGINE_SCRIPT, NOISY_ENGINE_SCRIPT, START_FEN,
};

// ── Request / response ───────────────────────────────────────────────────────

#[tokio::test]
async fn getmove_yields_engine_move() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let mut session = start_session("s-move", engine.resolver());

    session.send(getmove(Some(500))).await;
    assert_eq!(session.next_event().await, ClientEvent::engine_move("h2e2"));

    let outcome = session.disconnect().await;
    assert_eq!(outcome.session_id, "s-move");
    assert_eq!(outcome.state, BridgeState::Closed);
    assert_eq!(outcome.reason, CloseReason::ClientDisconnected);
    assert_eq!(outcome.requests_forwarded, 1);
}

#[tokio::test]
async fn engine_receives_handshake_then_request() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let mut session = start_session("s-seq", engine.resolver());

    session.send(getmove(Some(500))).await;
    session.next_event().await;

    assert_eq!(
        engine.commands(),
        vec![
            "uci".to_owned(),
            format!("setoption name EvalFile value {}", engine.eval_file().display()),
            "isready".to_owned(),
            format!("position fen {START_FEN}"),
            "go movetime 500".to_owned(),
        ]
    );
    session.disconnect().await;
}

#[tokio::test]
async fn missing_movetime_sends_default_budget() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let mut session = start_session("s-default", engine.resolver());

    session.send(getmove(None)).await;
    session.next_event().await;

    assert_eq!(
        engine.commands().last().map(String::as_str),
        Some("go movetime 2000")
    );
    session.disconnect().await;
}

#[tokio::test]
async fn bad_client_messages_do_not_end_the_session() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let mut session = start_session("s-bad", engine.resolver());

    session.send("not json").await;
    session.send(r#"{"type":"newgame"}"#).await;
    session.send(r#"{"type":"getmove","movetime":100}"#).await;
    session.send(getmove(Some(50))).await;

    assert_eq!(session.next_event().await, ClientEvent::engine_move("h2e2"));
    let outcome = session.disconnect().await;
    assert_eq!(outcome.requests_forwarded, 1);
}

#[tokio::test]
async fn sequential_requests_each_get_a_result() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let mut session = start_session("s-two", engine.resolver());

    session.send(getmove(Some(10))).await;
    assert_eq!(session.next_event().await, ClientEvent::engine_move("h2e2"));
    session.send(getmove(Some(20))).await;
    assert_eq!(session.next_event().await, ClientEvent::engine_move("h2e2"));

    let outcome = session.disconnect().await;
    assert_eq!(outcome.requests_forwarded, 2);
}

// ── Diagnostics ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn stderr_output_reaches_client_verbatim() {
    let engine = FakeEngine::install(NOISY_ENGINE_SCRIPT);
    let mut session = start_session("s-stderr", engine.resolver());

    assert_eq!(
        session.next_event().await,
        ClientEvent::error("NNUE evaluation using engine.nnue")
    );

    session.send(getmove(None)).await;
    assert_eq!(session.next_event().await, ClientEvent::engine_move("b0c2"));
    session.disconnect().await;
}

// ── Launch failures ──────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_assets_send_one_error_and_close() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = start_session("s-missing", missing_assets(dir.path()));

    match session.next_event().await {
        ClientEvent::Error { data } => {
            assert!(data.starts_with("launch: asset not found"), "{data}");
        }
        other => panic!("expected error event, got: {other:?}"),
    }

    let outcome = tokio::time::timeout(EVENT_TIMEOUT, &mut session.task)
        .await
        .expect("session closes")
        .expect("session task completes");
    assert!(session.events.recv().await.is_none(), "exactly one event");

    assert_eq!(outcome.state, BridgeState::Closed);
    assert_eq!(outcome.reason, CloseReason::LaunchFailed);
    assert_eq!(outcome.process, None, "no process was ever created");
    assert_eq!(outcome.pid, None);
    assert!(!outcome.terminate_requested);
    assert_eq!(outcome.requests_forwarded, 0);
}

#[tokio::test]
async fn non_executable_engine_fails_before_spawn() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    std::fs::set_permissions(engine.executable(), std::fs::Permissions::from_mode(0o644))
        .expect("chmod");
    let mut session = start_session("s-noexec", engine.resolver());

    match session.next_event().await {
        ClientEvent::Error { data } => assert!(data.contains("not executable"), "{data}"),
        other => panic!("expected error event, got: {other:?}"),
    }

    let outcome = session.disconnect().await;
    assert_eq!(outcome.reason, CloseReason::LaunchFailed);
    assert!(matches!(outcome.process, Some(ProcessState::Failed { .. })));
    assert_eq!(outcome.pid, None);
    assert!(engine.commands().is_empty(), "nothing was written");
}

// ── Teardown ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_terminates_a_flooding_engine() {
    let engine = FakeEngine::install(FLOODING_ENGINE_SCRIPT);
    let mut session = start_session("s-flood", engine.resolver());

    session.send(getmove(Some(1))).await;
    for _ in 0..3 {
        assert_eq!(session.next_event().await, ClientEvent::engine_move("a0a1"));
    }

    let outcome = session.disconnect().await;
    assert_eq!(outcome.reason, CloseReason::ClientDisconnected);
    assert!(outcome.terminate_requested);
    assert!(
        matches!(outcome.process, Some(ProcessState::Exited { .. })),
        "got: {:?}",
        outcome.process
    );
}

#[tokio::test]
async fn no_events_arrive_after_disconnect_from_a_flooding_engine() {
    const CAPACITY: usize = 4;
    let engine = FakeEngine::install(FLOODING_ENGINE_SCRIPT);
    let SessionHarness {
        inbound,
        mut events,
        task,
    } = start_session_buffered("s-quiet", engine.resolver(), CAPACITY);

    inbound
        .send(getmove(Some(1)))
        .await
        .expect("bridge accepts frames");
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while events.len() < CAPACITY {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("engine output fills the client channel");

    let buffered = events.len();
    drop(inbound);

    let outcome = tokio::time::timeout(EVENT_TIMEOUT, task)
        .await
        .expect("session closes without the client reading")
        .expect("session task completes");
    assert_eq!(outcome.reason, CloseReason::ClientDisconnected);
    assert!(outcome.terminate_requested);

    let mut received = 0;
    while let Some(event) = events.recv().await {
        assert_eq!(event, ClientEvent::engine_move("a0a1"));
        received += 1;
    }
    assert_eq!(received, buffered, "only events queued before disconnect are delivered");
}

#[tokio::test]
async fn engine_exit_closes_session_without_events() {
    let engine = FakeEngine::install(EXITING_ENGINE_SCRIPT);
    let mut session = start_session("s-exit", engine.resolver());

    let outcome = tokio::time::timeout(EVENT_TIMEOUT, &mut session.task)
        .await
        .expect("session closes")
        .expect("session task completes");

    assert!(session.events.recv().await.is_none(), "no events for a clean exit");
    assert_eq!(outcome.reason, CloseReason::EngineExited);
    assert_eq!(outcome.process, Some(ProcessState::Exited { code: Some(3) }));
    assert!(!outcome.terminate_requested, "nothing left to terminate");
    assert_eq!(
        engine.commands(),
        vec![
            "uci".to_owned(),
            format!("setoption name EvalFile value {}", engine.eval_file().display()),
            "isready".to_owned(),
        ]
    );
}

#[tokio::test]
async fn overlong_engine_line_fails_the_session() {
    let engine = FakeEngine::install(LONG_LINE_ENGINE_SCRIPT);
    let settings = SessionSettings {
        max_line_bytes: 1024,
        teardown_timeout: Duration::from_secs(5),
    };
    let mut session = start_session_with("s-long", engine.resolver(), settings);

    match session.next_event().await {
        ClientEvent::Error { data } => assert!(data.contains("line too long"), "{data}"),
        other => panic!("expected error event, got: {other:?}"),
    }

    let outcome = session.disconnect().await;
    assert_eq!(outcome.reason, CloseReason::StreamFailed);
    assert!(outcome.terminate_requested);
}

// ── Isolation ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_sessions_own_separate_engines() {
    let engine = FakeEngine::install(ENGINE_SCRIPT);
    let mut first = start_session("s-a", engine.resolver());
    let mut second = start_session("s-b", engine.resolver());

    first.send(getmove(Some(10))).await;
    second.send(getmove(Some(10))).await;
    assert_eq!(first.next_event().await, ClientEvent::engine_move("h2e2"));
    assert_eq!(second.next_event().await, ClientEvent::engine_move("h2e2"));

    let first_outcome = first.disconnect().await;
    assert!(first_outcome.terminate_requested);

    second.send(getmove(Some(10))).await;
    assert_eq!(
        second.next_event().await,
        ClientEvent::engine_move("h2e2"),
        "closing one session must not disturb the other"
    );

    let second_outcome = second.disconnect().await;
    assert!(first_outcome.pid.is_some());
    assert!(second_outcome.pid.is_some());
    assert_ne!(first_outcome.pid, second_outcome.pid);
    assert_eq!(second_outcome.requests_forwarded, 2);
}
