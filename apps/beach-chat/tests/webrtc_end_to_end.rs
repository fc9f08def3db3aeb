mod common;

use std::time::Duration;

use tokio::time::timeout;

use beach_chat_core::protocol::{ApplicationMessage, ReactionKind};
use beach_chat_core::session::{ConnectionStatus, SessionEvent, SessionHandle};
use beach_chat_core::transport::webrtc::config::WebRtcConfig;

use common::relay::RelayServer;
use common::{init_tracing, test_config};

const CONNECT_WAIT: Duration = Duration::from_secs(20);

fn session_on(relay: &RelayServer) -> SessionHandle {
    let mut config = test_config();
    config.signaling_url = relay.url.clone();
    config.answer_timeout = Duration::from_secs(10);
    config.step_timeout = Duration::from_secs(5);
    config.webrtc = WebRtcConfig::localhost();
    SessionHandle::new(config)
}

async fn connected(session: &SessionHandle) {
    timeout(
        CONNECT_WAIT,
        session.wait_for(|snapshot| snapshot.status == ConnectionStatus::Connected),
    )
    .await
    .unwrap_or_else(|_| panic!("never connected: {:?}", session.snapshot()))
    .expect("session actor alive");
}

async fn next_message(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> ApplicationMessage {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::MessageReceived(message)) => return message,
                Ok(_) => continue,
                Err(err) => panic!("event stream failed: {err}"),
            }
        }
    })
    .await
    .expect("message not delivered")
}

#[test_timeout::tokio_timeout_test(secs = 60, worker_threads = 2)]
async fn two_peers_chat_over_a_real_data_channel() {
    init_tracing();
    let relay = RelayServer::start().await;
    let bob = session_on(&relay);
    let alice = session_on(&relay);
    let mut bob_events = bob.subscribe();
    let mut alice_events = alice.subscribe();

    bob.listen("bob").await.expect("bob listens");
    relay.wait_online("bob", true).await;
    alice.connect("alice", "bob").await.expect("alice dials");

    connected(&alice).await;
    connected(&bob).await;
    assert_eq!(bob.snapshot().remote_id.as_deref(), Some("alice"));

    for index in 0..5 {
        alice
            .send_message(ApplicationMessage::text(format!("hello {index}")))
            .await
            .expect("alice sends");
    }
    for index in 0..5 {
        match next_message(&mut bob_events).await {
            ApplicationMessage::Text { content, .. } => assert_eq!(content, format!("hello {index}")),
            other => panic!("unexpected message {other:?}"),
        }
    }

    let gif = ApplicationMessage::from_input("https://tenor.com/view/happy-cat-12345")
        .expect("gif message");
    bob.send_message(gif.clone()).await.expect("bob sends gif");
    let received = next_message(&mut alice_events).await;
    assert_eq!(received, gif);

    let reaction = ApplicationMessage::reaction(
        received.id().expect("gif carries an id"),
        ReactionKind::Thumbsup,
    );
    alice
        .send_message(reaction.clone())
        .await
        .expect("alice reacts");
    assert_eq!(next_message(&mut bob_events).await, reaction);

    alice.disconnect().await;
    assert!(alice.snapshot().resources.is_empty());
    let bob_view = timeout(
        CONNECT_WAIT,
        bob.wait_for(|snapshot| snapshot.status != ConnectionStatus::Connected),
    )
    .await
    .expect("bob noticed the hangup")
    .expect("session actor alive");
    assert!(matches!(
        bob_view.status,
        ConnectionStatus::Error | ConnectionStatus::Disconnected | ConnectionStatus::Failed
    ));

    bob.shutdown().await;
    alice.shutdown().await;
}
