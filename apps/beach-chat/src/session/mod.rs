//! Session orchestration.
//!
//! A session is a single actor task that owns the signaling link, the peer
//! engine and the data channel. [`SessionHandle`] is the only way in: its
//! methods enqueue commands, and observers read state through
//! [`SessionHandle::watch`] and [`SessionHandle::subscribe`].
//!
//! Callbacks from the engine and the relay are tagged with the generation of
//! the resource that produced them; anything from a resource that has since
//! been torn down is dropped. `disconnect` also interrupts whichever
//! negotiation step the actor is currently awaiting.

mod actor;
pub mod state;

use std::sync::Arc;

use chat_proto::ApplicationMessage;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::ChatConfig;
use crate::transport::signaling::{SignalingDialer, WebSocketDialer};
use crate::transport::webrtc::{EngineFactory, WebRtcEngineFactory};
use actor::{Command, SessionActor};

pub use state::{ConnectionStatus, ResourceState, SessionEvent, SessionSnapshot};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session is already connecting or connected")]
    AlreadyActive,
    #[error("data channel is not open")]
    ChannelNotOpen,
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to send message: {0}")]
    Send(String),
    #[error("connect failed: {0}")]
    Failed(String),
    #[error("session task has stopped")]
    ActorGone,
}

/// Cloneable front end of a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    cancel: Arc<watch::Sender<u64>>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Spawns a session that dials the relay over WebSocket and negotiates
    /// with the `webrtc` crate. Must be called from within a Tokio runtime.
    pub fn new(config: ChatConfig) -> Self {
        let engines = Arc::new(WebRtcEngineFactory::new(config.webrtc.clone()));
        Self::with_parts(config, Arc::new(WebSocketDialer), engines)
    }

    pub fn with_parts(
        config: ChatConfig,
        dialer: Arc<dyn SignalingDialer>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (cancel, cancel_rx) = watch::channel(0u64);
        let (snapshot_tx, snapshot) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let actor = SessionActor::new(
            config,
            dialer,
            engines,
            command_rx,
            cancel_rx,
            snapshot_tx,
            events.clone(),
        );
        tokio::spawn(actor.run());

        Self {
            commands,
            cancel: Arc::new(cancel),
            snapshot,
            events,
        }
    }

    /// Logs in as `local_id` and dials `remote_id` once the relay confirms.
    pub async fn connect(
        &self,
        local_id: impl Into<String>,
        remote_id: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.request_connect(local_id.into(), Some(remote_id.into()))
            .await
    }

    /// Logs in as `local_id` and waits for a peer to send an offer.
    pub async fn listen(&self, local_id: impl Into<String>) -> Result<(), SessionError> {
        self.request_connect(local_id.into(), None).await
    }

    async fn request_connect(
        &self,
        local_id: String,
        remote_id: Option<String>,
    ) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                local_id,
                remote_id,
                reply,
            })
            .map_err(|_| SessionError::ActorGone)?;
        rx.await.map_err(|_| SessionError::ActorGone)?
    }

    /// Releases every resource and returns to `disconnected`. Interrupts any
    /// negotiation step in flight. Safe to call in any state.
    pub async fn disconnect(&self) {
        self.cancel.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Sends one message over the data channel. Rejected with
    /// [`SessionError::ChannelNotOpen`] unless the channel is open; the
    /// session itself is unaffected.
    pub async fn send_message(&self, message: ApplicationMessage) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { message, reply })
            .map_err(|_| SessionError::ActorGone)?;
        rx.await.map_err(|_| SessionError::ActorGone)?
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot.borrow().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshot.borrow().last_error.clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Resolves with the first snapshot matching `predicate`, including the
    /// current one.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SessionSnapshot, SessionError>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| SessionError::ActorGone)?;
        Ok(snapshot.clone())
    }

    /// Disconnects and stops the actor. Further calls fail with
    /// [`SessionError::ActorGone`].
    pub async fn shutdown(&self) {
        self.cancel.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}
