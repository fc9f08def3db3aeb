#![allow(dead_code)]

pub mod relay;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

use beach_chat_core::config::ChatConfig;
use beach_chat_core::protocol::{RoutedSignal, SignalingEnvelope, UserRef};
use beach_chat_core::session::{ConnectionStatus, SessionHandle, SessionSnapshot};
use beach_chat_core::transport::signaling::{LocalDialer, LocalRelayEnd};
use beach_chat_core::transport::webrtc::config::WebRtcConfig;
use beach_chat_core::transport::webrtc::{
    ChannelError, ChannelEvent, ChatChannel, EngineEvent, EngineEvents, EngineFactory,
    NegotiationError, PeerEngine, SessionDescription,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

pub fn test_config() -> ChatConfig {
    ChatConfig {
        signaling_url: "ws://relay.test".into(),
        login_timeout: Duration::from_secs(2),
        answer_timeout: Duration::from_secs(2),
        step_timeout: Duration::from_secs(2),
        webrtc: WebRtcConfig::localhost(),
    }
}

/// Knobs applied to every engine the factory creates from now on.
#[derive(Debug, Clone, Default)]
pub struct EngineScript {
    pub fail_create: Option<NegotiationError>,
    pub stall_offer: bool,
    pub reject_remote: bool,
}

#[derive(Default)]
struct FactoryState {
    script: Mutex<EngineScript>,
    engines: Mutex<Vec<Arc<FakeEngine>>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

/// Scripted engine factory. Keeps every engine it created so tests can
/// drive callbacks and inspect calls.
#[derive(Clone, Default)]
pub struct FakeEngines {
    state: Arc<FactoryState>,
}

impl FakeEngines {
    pub fn script(&self, update: impl FnOnce(&mut EngineScript)) {
        update(&mut self.state.script.lock());
    }

    pub fn created(&self) -> usize {
        self.state.engines.lock().len()
    }

    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Highest number of engines that were ever open at the same time.
    pub fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }

    pub fn latest(&self) -> Arc<FakeEngine> {
        self.state
            .engines
            .lock()
            .last()
            .cloned()
            .expect("no engine created yet")
    }

    pub fn engine(&self, index: usize) -> Arc<FakeEngine> {
        Arc::clone(&self.state.engines.lock()[index])
    }

    pub async fn wait_for_engine(&self, count: usize) -> Arc<FakeEngine> {
        timeout(WAIT, async {
            loop {
                if self.created() >= count {
                    return self.engine(count - 1);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("engine was not created in time")
    }
}

#[async_trait]
impl EngineFactory for FakeEngines {
    async fn create(&self, events: EngineEvents) -> Result<Arc<dyn PeerEngine>, NegotiationError> {
        let script = self.state.script.lock().clone();
        if let Some(err) = script.fail_create.clone() {
            return Err(err);
        }
        let index = self.created();
        let engine = Arc::new(FakeEngine {
            index,
            events,
            script,
            calls: Mutex::new(Vec::new()),
            channel: Mutex::new(None),
            remote_set: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            factory: Arc::clone(&self.state),
        });
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live.fetch_max(live, Ordering::SeqCst);
        self.state.engines.lock().push(Arc::clone(&engine));
        Ok(engine)
    }
}

pub struct FakeEngine {
    index: usize,
    events: EngineEvents,
    script: EngineScript,
    calls: Mutex<Vec<String>>,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    remote_set: AtomicBool,
    closed: AtomicBool,
    factory: Arc<FactoryState>,
}

impl FakeEngine {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channel
            .lock()
            .clone()
            .expect("engine has no data channel")
    }

    pub fn emit(&self, event: EngineEvent) {
        self.events.emit(event);
    }

    pub fn emit_candidate(&self, candidate: Value) {
        self.emit(EngineEvent::LocalCandidate(Some(candidate)));
    }

    /// Caller side: the channel created for the offer becomes ready.
    pub fn open_channel(&self) {
        self.channel().open.store(true, Ordering::SeqCst);
        self.emit(EngineEvent::Channel(ChannelEvent::Open));
    }

    /// Callee side: the remote peer's channel arrives already open.
    pub fn attach_remote_channel(&self) -> Arc<FakeChannel> {
        let channel = Arc::new(FakeChannel::new("chat-data-channel", self.events.clone()));
        channel.open.store(true, Ordering::SeqCst);
        *self.channel.lock() = Some(Arc::clone(&channel));
        self.emit(EngineEvent::DataChannel(
            Arc::clone(&channel) as Arc<dyn ChatChannel>
        ));
        channel
    }

    pub fn deliver(&self, payload: impl Into<Bytes>) {
        self.emit(EngineEvent::Channel(ChannelEvent::Message(payload.into())));
    }
}

#[async_trait]
impl PeerEngine for FakeEngine {
    async fn create_data_channel(&self) -> Result<Arc<dyn ChatChannel>, NegotiationError> {
        self.record("create_data_channel");
        let channel = Arc::new(FakeChannel::new("chat-data-channel", self.events.clone()));
        *self.channel.lock() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record("create_offer");
        if self.script.stall_offer {
            std::future::pending::<()>().await;
        }
        Ok(SessionDescription(
            json!({"type": "offer", "sdp": format!("offer-{}", self.index)}),
        ))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record("create_answer");
        Ok(SessionDescription(
            json!({"type": "answer", "sdp": format!("answer-{}", self.index)}),
        ))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(format!("set_local:{}", desc.0["type"].as_str().unwrap_or("?")));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(format!("set_remote:{}", desc.0["type"].as_str().unwrap_or("?")));
        if self.script.reject_remote || desc.0.get("sdp").is_none() {
            return Err(NegotiationError::InvalidDescription("missing sdp".into()));
        }
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Value) -> Result<(), NegotiationError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(NegotiationError::NoRemoteDescription);
        }
        self.record(format!(
            "candidate:{}",
            candidate["candidate"].as_str().unwrap_or("?")
        ));
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.record("close");
            if let Some(channel) = self.channel.lock().as_ref() {
                channel.open.store(false, Ordering::SeqCst);
            }
            self.factory.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct FakeChannel {
    label: String,
    open: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<String>>,
    events: EngineEvents,
}

impl FakeChannel {
    fn new(label: &str, events: EngineEvents) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatChannel for FakeChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::Send("sctp stream reset".into()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.events.emit(EngineEvent::Channel(ChannelEvent::Closed));
        }
    }
}

/// One session wired to an in-memory relay and scripted engines.
pub struct Harness {
    pub session: SessionHandle,
    pub dialer: Arc<LocalDialer>,
    pub relays: mpsc::UnboundedReceiver<LocalRelayEnd>,
    pub engines: FakeEngines,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ChatConfig) -> Self {
        init_tracing();
        let (dialer, relays) = LocalDialer::new();
        let dialer = Arc::new(dialer);
        let engines = FakeEngines::default();
        let session = SessionHandle::with_parts(
            config,
            dialer.clone(),
            Arc::new(engines.clone()),
        );
        Self {
            session,
            dialer,
            relays,
            engines,
        }
    }

    pub async fn next_relay(&mut self) -> LocalRelayEnd {
        timeout(WAIT, self.relays.recv())
            .await
            .expect("session did not dial the relay")
            .expect("dialer dropped")
    }

    /// Connects (or listens, without `remote`), answers the login and
    /// returns the relay end.
    pub async fn logged_in(&mut self, local: &str, remote: Option<&str>) -> LocalRelayEnd {
        let accepted = match remote {
            Some(remote) => self.session.connect(local, remote).await,
            None => self.session.listen(local).await,
        };
        accepted.expect("connect accepted");
        let mut relay = self.next_relay().await;
        assert_eq!(
            next_envelope(&mut relay).await,
            SignalingEnvelope::login(local)
        );
        relay.deliver(&login_success(local));
        relay
    }

    /// Runs the caller path up to an open data channel with `remote`.
    pub async fn connected_caller(
        &mut self,
        local: &str,
        remote: &str,
    ) -> (LocalRelayEnd, Arc<FakeEngine>) {
        let mut relay = self.logged_in(local, Some(remote)).await;
        let offer = next_envelope(&mut relay).await;
        assert_eq!(offer.kind(), "offer");
        relay.deliver(&routed_answer(remote, local));
        let engine = self.engines.latest();
        wait_until(|| engine.calls().iter().any(|call| call == "set_remote:answer")).await;
        engine.open_channel();
        wait_status(&self.session, ConnectionStatus::Connected).await;
        (relay, engine)
    }
}

pub async fn next_envelope(relay: &mut LocalRelayEnd) -> SignalingEnvelope {
    timeout(WAIT, relay.recv())
        .await
        .expect("no envelope from session")
        .expect("session closed the relay link")
}

pub async fn wait_status(session: &SessionHandle, status: ConnectionStatus) -> SessionSnapshot {
    timeout(WAIT, session.wait_for(|snapshot| snapshot.status == status))
        .await
        .unwrap_or_else(|_| {
            panic!(
                "status never reached {status}; last snapshot {:?}",
                session.snapshot()
            )
        })
        .expect("session actor gone")
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Lets the actor drain whatever is queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn login_success(user: &str) -> SignalingEnvelope {
    SignalingEnvelope::LoginSuccess {
        payload: Some(UserRef {
            user_id: user.to_string(),
        }),
    }
}

fn routed(sender: &str, target: &str, payload: Value) -> RoutedSignal {
    RoutedSignal {
        sender: Some(sender.to_string()),
        target: Some(target.to_string()),
        payload: Some(payload),
    }
}

pub fn routed_offer(sender: &str, target: &str) -> SignalingEnvelope {
    SignalingEnvelope::Offer(routed(
        sender,
        target,
        json!({"type": "offer", "sdp": "remote-offer"}),
    ))
}

pub fn routed_answer(sender: &str, target: &str) -> SignalingEnvelope {
    SignalingEnvelope::Answer(routed(
        sender,
        target,
        json!({"type": "answer", "sdp": "remote-answer"}),
    ))
}

pub fn routed_candidate(sender: &str, target: &str, candidate: &str) -> SignalingEnvelope {
    SignalingEnvelope::Candidate(routed(
        sender,
        target,
        json!({"candidate": candidate, "sdpMid": "0", "sdpMLineIndex": 0}),
    ))
}

pub fn user_left(user: &str) -> SignalingEnvelope {
    SignalingEnvelope::UserLeft {
        payload: Some(UserRef {
            user_id: user.to_string(),
        }),
    }
}
