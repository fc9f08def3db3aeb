mod common;

use std::sync::Arc;

use tokio::time::timeout;

use beach_chat_core::protocol::{SignalingEnvelope, UserRef};
use beach_chat_core::session::{ConnectionStatus, SessionHandle};
use beach_chat_core::transport::TransportError;
use beach_chat_core::transport::signaling::{SignalingDialer, SignalingEvent, WebSocketDialer};

use common::relay::RelayServer;
use common::{FakeEngines, WAIT, init_tracing, test_config, wait_status, wait_until};

fn session_on(relay: &RelayServer, engines: &FakeEngines) -> SessionHandle {
    let mut config = test_config();
    config.signaling_url = relay.url.clone();
    SessionHandle::with_parts(config, Arc::new(WebSocketDialer), Arc::new(engines.clone()))
}

#[test_timeout::tokio_timeout_test]
async fn websocket_link_logs_in_and_closes() {
    init_tracing();
    let relay = RelayServer::start().await;

    let (mut link, mut events) = WebSocketDialer
        .open(&relay.url)
        .await
        .expect("open signaling link");
    assert!(link.is_open());

    link.send(&SignalingEnvelope::login("alice"))
        .expect("send login");
    let event = timeout(WAIT, events.recv())
        .await
        .expect("login reply")
        .expect("event stream open");
    assert_eq!(
        event,
        SignalingEvent::Envelope(SignalingEnvelope::LoginSuccess {
            payload: Some(UserRef {
                user_id: "alice".into()
            })
        })
    );
    relay.wait_online("alice", true).await;

    link.close().await;
    assert!(!link.is_open());
    assert_eq!(
        link.send(&SignalingEnvelope::login("alice")),
        Err(TransportError::NotOpen)
    );
    relay.wait_online("alice", false).await;
}

#[test_timeout::tokio_timeout_test]
async fn relay_side_close_is_reported() {
    init_tracing();
    let relay = RelayServer::start().await;
    let (link, mut events) = WebSocketDialer.open(&relay.url).await.expect("open");
    link.send(&SignalingEnvelope::login("alice"))
        .expect("send login");
    assert!(matches!(
        timeout(WAIT, events.recv()).await.expect("login reply"),
        Some(SignalingEvent::Envelope(SignalingEnvelope::LoginSuccess { .. }))
    ));

    assert!(relay.kick("alice"));

    match timeout(WAIT, events.recv()).await.expect("close reported") {
        Some(SignalingEvent::Closed { .. }) => {}
        other => panic!("expected close, got {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn unreachable_relay_fails_to_open() {
    init_tracing();
    let result = WebSocketDialer.open("ws://127.0.0.1:9/").await;
    assert!(matches!(result, Err(TransportError::Setup(_))));

    let result = WebSocketDialer.open("ftp://relay.test/").await;
    assert!(matches!(result, Err(TransportError::Setup(_))));
}

#[test_timeout::tokio_timeout_test]
async fn sessions_negotiate_through_the_relay() {
    init_tracing();
    let relay = RelayServer::start().await;
    let bob_engines = FakeEngines::default();
    let alice_engines = FakeEngines::default();
    let bob = session_on(&relay, &bob_engines);
    let alice = session_on(&relay, &alice_engines);

    bob.listen("bob").await.expect("bob listens");
    relay.wait_online("bob", true).await;
    alice.connect("alice", "bob").await.expect("alice dials");

    let bob_engine = bob_engines.wait_for_engine(1).await;
    let alice_engine = alice_engines.wait_for_engine(1).await;
    wait_until(|| {
        alice_engine
            .calls()
            .iter()
            .any(|call| call == "set_remote:answer")
    })
    .await;
    assert_eq!(
        bob_engine.calls(),
        vec!["set_remote:offer", "create_answer", "set_local:answer"]
    );

    alice_engine.emit_candidate(serde_json::json!({
        "candidate": "candidate:alice",
        "sdpMid": "0",
        "sdpMLineIndex": 0
    }));
    wait_until(|| {
        bob_engine
            .calls()
            .iter()
            .any(|call| call == "candidate:candidate:alice")
    })
    .await;

    alice_engine.open_channel();
    bob_engine.attach_remote_channel();
    wait_status(&alice, ConnectionStatus::Connected).await;
    let bob_view = wait_status(&bob, ConnectionStatus::Connected).await;
    assert_eq!(bob_view.remote_id.as_deref(), Some("alice"));

    let routed: Vec<String> = relay
        .received()
        .iter()
        .filter_map(|frame| frame["type"].as_str())
        .filter(|kind| matches!(*kind, "offer" | "answer"))
        .map(str::to_string)
        .collect();
    assert_eq!(routed, vec!["offer", "answer"]);

    alice.disconnect().await;
    let bob_view = wait_status(&bob, ConnectionStatus::Error).await;
    assert_eq!(bob_view.last_error.as_deref(), Some("peer disconnected"));
}

#[test_timeout::tokio_timeout_test]
async fn dialing_an_unknown_peer_surfaces_the_relay_error() {
    init_tracing();
    let relay = RelayServer::start().await;
    let engines = FakeEngines::default();
    let alice = session_on(&relay, &engines);

    alice.connect("alice", "nobody").await.expect("connect accepted");

    let snapshot = wait_status(&alice, ConnectionStatus::Error).await;
    assert_eq!(snapshot.last_error.as_deref(), Some("user nobody not found"));
    assert_eq!(engines.live(), 0);
}
