use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chat_proto::{ApplicationMessage, RoutedSignal, SignalingEnvelope, UserRef};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::SessionError;
use super::state::{
    ConnectionStatus, ResourceState, SessionEvent, SessionSnapshot, StatusAction, action_for,
};
use crate::config::ChatConfig;
use crate::transport::signaling::{SignalingDialer, SignalingEvent, SignalingEvents, SignalingLink};
use crate::transport::webrtc::{
    ChannelError, ChannelEvent, ChatChannel, EngineEvent, EngineEvents, EngineFactory,
    EngineState, NegotiationError, PeerEngine, SessionDescription,
};
use crate::transport::TransportError;

pub(super) enum Command {
    Connect {
        local_id: String,
        remote_id: Option<String>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        message: ApplicationMessage,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Input {
    Signaling { generation: u64, event: SignalingEvent },
    Deadline { id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Login,
    Answer,
}

impl Phase {
    fn timeout_message(self) -> &'static str {
        match self {
            Phase::Login => "timed out waiting for login confirmation from relay",
            Phase::Answer => "timed out waiting for answer from peer",
        }
    }
}

struct Deadline {
    id: u64,
    phase: Phase,
    timer: JoinHandle<()>,
}

struct LinkSlot {
    link: SignalingLink,
    pump: JoinHandle<()>,
}

#[derive(Debug)]
enum StepError {
    Cancelled,
    TimedOut(&'static str),
    Negotiation(NegotiationError),
    Transport(TransportError),
}

impl From<NegotiationError> for StepError {
    fn from(err: NegotiationError) -> Self {
        StepError::Negotiation(err)
    }
}

impl From<TransportError> for StepError {
    fn from(err: TransportError) -> Self {
        StepError::Transport(err)
    }
}

/// Bounds one suspending call by the step timeout and abandons it as soon
/// as a disconnect is requested.
struct StepGuard {
    cancel: watch::Receiver<u64>,
    seen: u64,
    limit: Duration,
}

impl StepGuard {
    async fn run<T, E, F>(&mut self, what: &'static str, fut: F) -> Result<T, StepError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<StepError>,
    {
        if *self.cancel.borrow_and_update() != self.seen {
            return Err(StepError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.changed() => Err(StepError::Cancelled),
            result = tokio::time::timeout(self.limit, fut) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(err.into()),
                Err(_) => Err(StepError::TimedOut(what)),
            },
        }
    }
}

/// Owns every resource of one session and applies all transitions, one
/// input at a time.
pub(super) struct SessionActor {
    config: ChatConfig,
    dialer: Arc<dyn SignalingDialer>,
    engines: Arc<dyn EngineFactory>,

    commands: mpsc::UnboundedReceiver<Command>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs: mpsc::UnboundedReceiver<Input>,
    engine_tx: mpsc::UnboundedSender<(u64, EngineEvent)>,
    engine_rx: mpsc::UnboundedReceiver<(u64, EngineEvent)>,
    cancel: watch::Receiver<u64>,
    cancel_seen: u64,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,

    status: ConnectionStatus,
    local_id: Option<String>,
    remote_id: Option<String>,
    dial_target: Option<String>,
    last_error: Option<String>,
    last_received: Option<ApplicationMessage>,

    link: Option<LinkSlot>,
    link_generation: u64,
    engine: Option<Arc<dyn PeerEngine>>,
    engine_generation: u64,
    channel: Option<Arc<dyn ChatChannel>>,
    channel_open: bool,
    deadline: Option<Deadline>,
    deadline_seq: u64,
}

impl SessionActor {
    pub(super) fn new(
        config: ChatConfig,
        dialer: Arc<dyn SignalingDialer>,
        engines: Arc<dyn EngineFactory>,
        commands: mpsc::UnboundedReceiver<Command>,
        cancel: watch::Receiver<u64>,
        snapshot_tx: watch::Sender<SessionSnapshot>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (inputs_tx, inputs) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let cancel_seen = *cancel.borrow();
        Self {
            config,
            dialer,
            engines,
            commands,
            inputs_tx,
            inputs,
            engine_tx,
            engine_rx,
            cancel,
            cancel_seen,
            snapshot_tx,
            events,
            status: ConnectionStatus::Disconnected,
            local_id: None,
            remote_id: None,
            dial_target: None,
            last_error: None,
            last_received: None,
            link: None,
            link_generation: 0,
            engine: None,
            engine_generation: 0,
            channel: None,
            channel_open: false,
            deadline: None,
            deadline_seq: 0,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            if self.cancel_requested() {
                self.reset().await;
            }
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.reset().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.reset().await;
                        break;
                    }
                },
                Some(input) = self.inputs.recv() => self.handle_input(input).await,
                Some((generation, event)) = self.engine_rx.recv() => {
                    self.handle_engine_event(generation, event).await;
                }
            }
            self.publish();
        }
        tracing::debug!(target: "beach_chat::session", "session actor stopped");
    }

    fn cancel_requested(&self) -> bool {
        *self.cancel.borrow() != self.cancel_seen
    }

    fn guard(&self) -> StepGuard {
        StepGuard {
            cancel: self.cancel.clone(),
            seen: self.cancel_seen,
            limit: self.config.step_timeout,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                local_id,
                remote_id,
                reply,
            } => {
                let result = if self.status.is_active() {
                    tracing::warn!(
                        target: "beach_chat::session",
                        status = %self.status,
                        "connect ignored: session already active"
                    );
                    Err(SessionError::AlreadyActive)
                } else {
                    self.connect(local_id, remote_id).await
                };
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.reset().await;
                let _ = reply.send(());
            }
            Command::Send { message, reply } => {
                let result = self.send_message(message).await;
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                self.reset().await;
                let _ = reply.send(());
            }
        }
    }

    async fn connect(
        &mut self,
        local_id: String,
        remote_id: Option<String>,
    ) -> Result<(), SessionError> {
        self.release_resources().await;
        self.local_id = Some(local_id.clone());
        self.remote_id = remote_id.clone();
        self.dial_target = remote_id;
        self.last_error = None;
        self.set_status(ConnectionStatus::Connecting);
        tracing::info!(
            target: "beach_chat::session",
            local_id = %local_id,
            remote_id = ?self.dial_target,
            url = %self.config.signaling_url,
            "connecting to signaling relay"
        );

        let url = self.config.signaling_url.clone();
        let dialer = Arc::clone(&self.dialer);
        let (link, events) = match self.guard().run("signaling open", dialer.open(&url)).await {
            Ok(opened) => opened,
            Err(StepError::Cancelled) => {
                return Err(SessionError::Failed("cancelled by disconnect".into()));
            }
            Err(err) => {
                let message = describe("failed to open signaling connection", &err);
                self.fail(ConnectionStatus::Error, message.clone()).await;
                return Err(SessionError::Failed(message));
            }
        };
        self.install_link(link, events);

        if let Err(err) = self.send_signal(SignalingEnvelope::login(local_id)) {
            let message = format!("failed to send login: {err}");
            self.fail(ConnectionStatus::Error, message.clone()).await;
            return Err(SessionError::Failed(message));
        }
        self.arm_deadline(Phase::Login, self.config.login_timeout);
        Ok(())
    }

    /// Teardown shared by `disconnect` and shutdown.
    async fn reset(&mut self) {
        self.cancel_seen = *self.cancel.borrow();
        self.release_resources().await;
        self.local_id = None;
        self.remote_id = None;
        self.dial_target = None;
        self.last_error = None;
        self.set_status(ConnectionStatus::Disconnected);
        self.publish();
    }

    async fn fail(&mut self, status: ConnectionStatus, message: String) {
        tracing::error!(
            target: "beach_chat::session",
            status = %status,
            remote_id = ?self.remote_id,
            error = %message,
            "session failed"
        );
        self.last_error = Some(message.clone());
        self.set_status(status);
        let _ = self.events.send(SessionEvent::Error(message));
        self.release_resources().await;
        self.publish();
    }

    /// The peer link ended without an error. Nothing is left to negotiate,
    /// so the relay link goes too and `connect` is available again.
    async fn close_by_peer(&mut self, source: &'static str) {
        if self.status.is_terminal() {
            return;
        }
        tracing::info!(
            target: "beach_chat::session",
            source,
            remote_id = ?self.remote_id,
            "peer link closed"
        );
        self.release_resources().await;
        self.dial_target = None;
        self.set_status(ConnectionStatus::Disconnected);
        self.publish();
    }

    async fn release_resources(&mut self) {
        self.clear_deadline();
        self.teardown_engine().await;
        if let Some(slot) = self.link.take() {
            close_link(slot).await;
        }
        self.link_generation += 1;
    }

    /// Closes channel then engine and waits for both before returning, so a
    /// successor engine never overlaps with its predecessor.
    async fn teardown_engine(&mut self) {
        self.engine_generation += 1;
        self.channel_open = false;
        let limit = self.config.step_timeout;
        if let Some(channel) = self.channel.take() {
            if tokio::time::timeout(limit, channel.close()).await.is_err() {
                tracing::warn!(target: "beach_chat::session", "data channel close timed out");
            }
        }
        if let Some(engine) = self.engine.take() {
            if tokio::time::timeout(limit, engine.close()).await.is_err() {
                tracing::warn!(target: "beach_chat::session", "peer engine close timed out");
            }
            tracing::debug!(
                target: "beach_chat::session",
                generation = self.engine_generation,
                "peer engine released"
            );
        }
    }

    fn install_link(&mut self, link: SignalingLink, mut events: SignalingEvents) {
        self.link_generation += 1;
        let generation = self.link_generation;
        let inputs = self.inputs_tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if inputs.send(Input::Signaling { generation, event }).is_err() {
                    break;
                }
            }
        });
        self.link = Some(LinkSlot { link, pump });
        self.publish();
    }

    fn send_signal(&self, envelope: SignalingEnvelope) -> Result<(), TransportError> {
        let slot = self.link.as_ref().ok_or(TransportError::NotOpen)?;
        tracing::debug!(
            target: "beach_chat::session",
            kind = envelope.kind(),
            "sending signaling envelope"
        );
        slot.link.send(&envelope)
    }

    fn arm_deadline(&mut self, phase: Phase, after: Duration) {
        self.clear_deadline();
        self.deadline_seq += 1;
        let id = self.deadline_seq;
        let inputs = self.inputs_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = inputs.send(Input::Deadline { id });
        });
        self.deadline = Some(Deadline { id, phase, timer });
    }

    fn clear_deadline(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.timer.abort();
        }
    }

    fn awaiting(&self, phase: Phase) -> bool {
        self.deadline.as_ref().is_some_and(|d| d.phase == phase)
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Deadline { id } => {
                let phase = match &self.deadline {
                    Some(deadline) if deadline.id == id => deadline.phase,
                    _ => return,
                };
                self.deadline = None;
                self.fail(ConnectionStatus::Error, phase.timeout_message().to_string())
                    .await;
            }
            Input::Signaling { generation, event } => {
                if generation != self.link_generation || self.link.is_none() {
                    tracing::trace!(
                        target: "beach_chat::session",
                        generation,
                        current = self.link_generation,
                        "dropping event from stale signaling link"
                    );
                    return;
                }
                match event {
                    SignalingEvent::Closed { reason } => self.on_signaling_closed(reason).await,
                    SignalingEvent::Envelope(envelope) => {
                        if self.status.is_terminal() {
                            tracing::debug!(
                                target: "beach_chat::session",
                                kind = envelope.kind(),
                                status = %self.status,
                                "dropping envelope after session ended"
                            );
                            return;
                        }
                        self.handle_envelope(envelope).await;
                    }
                }
            }
        }
    }

    async fn on_signaling_closed(&mut self, reason: Option<String>) {
        match self.status {
            ConnectionStatus::Connecting => {
                tracing::debug!(target: "beach_chat::session", reason = ?reason, "relay closed");
                self.fail(
                    ConnectionStatus::Error,
                    "signaling connection closed".to_string(),
                )
                .await;
            }
            _ => {
                tracing::warn!(
                    target: "beach_chat::session",
                    reason = ?reason,
                    status = %self.status,
                    "signaling relay closed; peer link kept, reconnect requires a new connect"
                );
                self.clear_deadline();
                if let Some(slot) = self.link.take() {
                    close_link(slot).await;
                }
                self.link_generation += 1;
            }
        }
    }

    async fn handle_envelope(&mut self, envelope: SignalingEnvelope) {
        tracing::debug!(
            target: "beach_chat::session",
            kind = envelope.kind(),
            status = %self.status,
            "signaling envelope received"
        );
        match envelope {
            SignalingEnvelope::LoginSuccess { payload } => self.on_login_success(payload).await,
            SignalingEnvelope::Offer(signal) => self.on_offer(signal).await,
            SignalingEnvelope::Answer(signal) => self.on_answer(signal).await,
            SignalingEnvelope::Candidate(signal) => self.on_candidate(signal).await,
            SignalingEnvelope::UserLeft { payload } => self.on_user_left(payload).await,
            SignalingEnvelope::Error { payload } => {
                let message = payload
                    .message
                    .unwrap_or_else(|| "signaling server error".to_string());
                self.fail(ConnectionStatus::Error, message).await;
            }
            SignalingEnvelope::Login { .. } | SignalingEnvelope::Unknown => {
                tracing::debug!(
                    target: "beach_chat::session",
                    "ignoring relay message without a handler"
                );
            }
        }
    }

    async fn on_login_success(&mut self, payload: Option<UserRef>) {
        if !self.awaiting(Phase::Login) {
            tracing::debug!(target: "beach_chat::session", "ignoring repeated login_success");
            return;
        }
        self.clear_deadline();
        if let (Some(confirmed), Some(local)) = (&payload, &self.local_id) {
            if &confirmed.user_id != local {
                tracing::warn!(
                    target: "beach_chat::session",
                    confirmed = %confirmed.user_id,
                    local = %local,
                    "relay confirmed a different user id"
                );
            }
        }
        tracing::info!(target: "beach_chat::session", local_id = ?self.local_id, "logged in");

        let Some(target) = self.dial_target.clone() else {
            tracing::info!(target: "beach_chat::session", "waiting for an incoming offer");
            return;
        };
        match self.negotiate_offer(&target).await {
            Ok(()) => self.arm_deadline(Phase::Answer, self.config.answer_timeout),
            Err(err) => self.on_step_error("error initiating peer connection", err).await,
        }
    }

    async fn negotiate_offer(&mut self, target: &str) -> Result<(), StepError> {
        self.teardown_engine().await;
        let engine = self.create_engine().await?;
        let channel = self
            .guard()
            .run("create data channel", engine.create_data_channel())
            .await?;
        self.channel = Some(channel);
        self.publish();

        let offer = self.guard().run("create offer", engine.create_offer()).await?;
        self.guard()
            .run(
                "set local description",
                engine.set_local_description(offer.clone()),
            )
            .await?;
        self.send_signal(SignalingEnvelope::offer(target, offer.into_value()))?;
        tracing::info!(target: "beach_chat::session", remote_id = %target, "offer sent");
        Ok(())
    }

    async fn on_offer(&mut self, signal: RoutedSignal) {
        let (Some(sender), Some(payload)) = (signal.sender, signal.payload) else {
            tracing::warn!(
                target: "beach_chat::session",
                "dropping offer without sender or payload"
            );
            return;
        };
        if let Err(err) = self.negotiate_answer(sender, payload).await {
            self.on_step_error("error handling offer", err).await;
        }
    }

    async fn negotiate_answer(&mut self, sender: String, payload: Value) -> Result<(), StepError> {
        self.teardown_engine().await;
        self.clear_deadline();
        self.remote_id = Some(sender.clone());
        self.set_status(ConnectionStatus::Connecting);

        let engine = self.create_engine().await?;
        self.guard()
            .run(
                "set remote description",
                engine.set_remote_description(SessionDescription(payload)),
            )
            .await?;
        let answer = self.guard().run("create answer", engine.create_answer()).await?;
        self.guard()
            .run(
                "set local description",
                engine.set_local_description(answer.clone()),
            )
            .await?;
        self.send_signal(SignalingEnvelope::answer(&sender, answer.into_value()))?;
        tracing::info!(target: "beach_chat::session", remote_id = %sender, "answer sent");
        Ok(())
    }

    async fn on_answer(&mut self, signal: RoutedSignal) {
        let Some(engine) = self.engine.clone() else {
            tracing::warn!(
                target: "beach_chat::session",
                "dropping answer: no live peer engine"
            );
            return;
        };
        if !self.awaiting(Phase::Answer) {
            tracing::warn!(
                target: "beach_chat::session",
                sender = ?signal.sender,
                "dropping unexpected answer"
            );
            return;
        }
        if let (Some(sender), Some(remote)) = (&signal.sender, &self.remote_id) {
            if sender != remote {
                tracing::warn!(
                    target: "beach_chat::session",
                    sender = %sender,
                    remote_id = %remote,
                    "dropping answer from another peer"
                );
                return;
            }
        }
        let Some(payload) = signal.payload else {
            tracing::warn!(target: "beach_chat::session", "dropping answer without payload");
            return;
        };
        self.clear_deadline();
        let applied = self
            .guard()
            .run(
                "set remote description",
                engine.set_remote_description(SessionDescription(payload)),
            )
            .await;
        match applied {
            Ok(()) => tracing::debug!(target: "beach_chat::session", "remote answer applied"),
            Err(err) => self.on_step_error("error handling answer", err).await,
        }
    }

    async fn on_candidate(&mut self, signal: RoutedSignal) {
        let Some(engine) = self.engine.clone() else {
            tracing::warn!(
                target: "beach_chat::session",
                sender = ?signal.sender,
                "dropping candidate: no live peer engine"
            );
            return;
        };
        let Some(payload) = signal.payload else {
            tracing::warn!(target: "beach_chat::session", "dropping candidate without payload");
            return;
        };
        match self
            .guard()
            .run("add ice candidate", engine.add_ice_candidate(payload))
            .await
        {
            Ok(()) => tracing::trace!(target: "beach_chat::session", "remote candidate added"),
            Err(StepError::Negotiation(NegotiationError::NoRemoteDescription)) => {
                tracing::debug!(
                    target: "beach_chat::session",
                    "candidate arrived before remote description; ignored"
                );
            }
            Err(StepError::Cancelled) => {}
            Err(err) => {
                tracing::warn!(
                    target: "beach_chat::session",
                    error = ?err,
                    "failed to add remote candidate"
                );
            }
        }
    }

    async fn on_user_left(&mut self, payload: Option<UserRef>) {
        let departed = payload.map(|user| user.user_id);
        if departed.is_some() && departed == self.remote_id {
            self.fail(ConnectionStatus::Error, "peer disconnected".to_string())
                .await;
        } else {
            tracing::debug!(
                target: "beach_chat::session",
                departed = ?departed,
                "unrelated user left"
            );
        }
    }

    async fn on_step_error(&mut self, context: &str, err: StepError) {
        if matches!(err, StepError::Cancelled) {
            tracing::debug!(
                target: "beach_chat::session",
                context,
                "negotiation step abandoned for disconnect"
            );
            return;
        }
        let message = describe(context, &err);
        self.fail(ConnectionStatus::Error, message).await;
    }

    async fn create_engine(&mut self) -> Result<Arc<dyn PeerEngine>, StepError> {
        let events = EngineEvents::new(self.engine_generation, self.engine_tx.clone());
        let engines = Arc::clone(&self.engines);
        let engine = self
            .guard()
            .run("create peer engine", engines.create(events))
            .await?;
        self.engine = Some(Arc::clone(&engine));
        self.publish();
        tracing::debug!(
            target: "beach_chat::session",
            generation = self.engine_generation,
            "peer engine created"
        );
        Ok(engine)
    }

    async fn handle_engine_event(&mut self, generation: u64, event: EngineEvent) {
        if generation != self.engine_generation || self.engine.is_none() {
            tracing::trace!(
                target: "beach_chat::session",
                generation,
                current = self.engine_generation,
                ?event,
                "dropping event from stale peer engine"
            );
            return;
        }
        match event {
            EngineEvent::LocalCandidate(Some(candidate)) => self.forward_candidate(candidate).await,
            EngineEvent::LocalCandidate(None) => {
                tracing::debug!(target: "beach_chat::session", "local candidate gathering complete");
            }
            EngineEvent::DataChannel(channel) => {
                tracing::debug!(
                    target: "beach_chat::session",
                    label = %channel.label(),
                    "remote data channel attached"
                );
                if let Some(previous) = self.channel.replace(Arc::clone(&channel)) {
                    previous.close().await;
                }
                self.channel_open = false;
                // The open callback may have fired before the channel reached us.
                if channel.is_open() {
                    self.on_channel_open();
                }
            }
            EngineEvent::IceConnectionState(state) => self.apply_engine_state("ICE", state).await,
            EngineEvent::ConnectionState(state) => {
                self.apply_engine_state("connection state", state).await;
            }
            EngineEvent::Channel(event) => self.handle_channel_event(event).await,
        }
    }

    async fn forward_candidate(&mut self, candidate: Value) {
        let Some(remote) = self.remote_id.clone() else {
            tracing::debug!(
                target: "beach_chat::session",
                "dropping local candidate: no remote peer"
            );
            return;
        };
        if let Err(err) = self.send_signal(SignalingEnvelope::candidate(remote, candidate)) {
            if self.status == ConnectionStatus::Connected {
                tracing::debug!(
                    target: "beach_chat::session",
                    error = %err,
                    "relay gone; local candidate not forwarded"
                );
            } else {
                self.fail(
                    ConnectionStatus::Error,
                    format!("failed to send ice candidate: {err}"),
                )
                .await;
            }
        }
    }

    async fn apply_engine_state(&mut self, source: &'static str, state: EngineState) {
        match action_for(state) {
            StatusAction::Set(status) => self.set_status(status),
            StatusAction::Hold => {
                // Recovered from a transient disconnect with the channel still up.
                if self.channel_open && self.status == ConnectionStatus::Connecting {
                    self.set_status(ConnectionStatus::Connected);
                }
            }
            StatusAction::Fail => {
                self.fail(
                    ConnectionStatus::Failed,
                    format!("peer connection failed ({source})"),
                )
                .await;
            }
            StatusAction::Close => self.close_by_peer(source).await,
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => self.on_channel_open(),
            ChannelEvent::Message(data) => match ApplicationMessage::decode(&data) {
                Ok(message) => {
                    tracing::debug!(
                        target: "beach_chat::session",
                        kind = message.kind(),
                        "message received"
                    );
                    self.last_received = Some(message.clone());
                    let _ = self.events.send(SessionEvent::MessageReceived(message));
                }
                Err(err) => {
                    tracing::error!(
                        target: "beach_chat::session",
                        error = %err,
                        len = data.len(),
                        "dropping undecodable data channel payload"
                    );
                }
            },
            ChannelEvent::Closed => {
                self.channel_open = false;
                self.close_by_peer("data channel").await;
            }
            ChannelEvent::Error(detail) => {
                self.fail(
                    ConnectionStatus::Error,
                    format!("data channel error: {detail}"),
                )
                .await;
            }
        }
    }

    fn on_channel_open(&mut self) {
        if self.channel.is_none() || self.channel_open {
            return;
        }
        self.channel_open = true;
        self.last_error = None;
        self.clear_deadline();
        tracing::info!(
            target: "beach_chat::session",
            remote_id = ?self.remote_id,
            "data channel open"
        );
        self.set_status(ConnectionStatus::Connected);
    }

    async fn send_message(&mut self, message: ApplicationMessage) -> Result<(), SessionError> {
        let channel = match &self.channel {
            Some(channel) if self.channel_open && channel.is_open() => Arc::clone(channel),
            _ => return self.reject(SessionError::ChannelNotOpen),
        };
        let text = match message.encode() {
            Ok(text) => text,
            Err(err) => return self.reject(SessionError::Encode(err.to_string())),
        };
        match tokio::time::timeout(self.config.step_timeout, channel.send_text(&text)).await {
            Ok(Ok(())) => {
                tracing::trace!(
                    target: "beach_chat::session",
                    kind = message.kind(),
                    len = text.len(),
                    "message sent"
                );
                Ok(())
            }
            Ok(Err(ChannelError::NotOpen)) => self.reject(SessionError::ChannelNotOpen),
            Ok(Err(err)) => self.reject(SessionError::Send(err.to_string())),
            Err(_) => self.reject(SessionError::Send("timed out".into())),
        }
    }

    fn reject(&self, err: SessionError) -> Result<(), SessionError> {
        tracing::warn!(
            target: "beach_chat::session",
            error = %err,
            status = %self.status,
            "message not sent"
        );
        let _ = self.events.send(SessionEvent::SendRejected(err.to_string()));
        Err(err)
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status == status {
            return;
        }
        tracing::info!(
            target: "beach_chat::session",
            from = %self.status,
            to = %status,
            "status changed"
        );
        self.status = status;
        let _ = self.events.send(SessionEvent::StatusChanged(status));
        self.publish();
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            status: self.status,
            local_id: self.local_id.clone(),
            remote_id: self.remote_id.clone(),
            last_error: self.last_error.clone(),
            last_received_message: self.last_received.clone(),
            resources: ResourceState {
                signaling: self.link.is_some(),
                engine: self.engine.is_some(),
                channel: self.channel.is_some(),
            },
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn close_link(mut slot: LinkSlot) {
    slot.pump.abort();
    slot.link.close().await;
}

fn describe(context: &str, err: &StepError) -> String {
    match err {
        StepError::Cancelled => format!("{context}: cancelled"),
        StepError::TimedOut(what) => format!("{context}: timed out during {what}"),
        StepError::Negotiation(err) => format!("{context}: {err}"),
        StepError::Transport(err) => format!("{context}: {err}"),
    }
}
