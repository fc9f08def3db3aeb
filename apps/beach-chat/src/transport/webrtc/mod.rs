//! Peer negotiation engine and data channel.
//!
//! The session drives negotiation through [`PeerEngine`] and sends through
//! [`ChatChannel`]; everything the engine reports comes back as
//! [`EngineEvent`]s tagged with the generation the engine was created for.
//! [`WebRtcEngineFactory`] is the production implementation on top of the
//! `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

pub mod config;
mod channel;
mod engine;

pub use engine::WebRtcEngineFactory;

/// Opaque session description. Produced and consumed by the engine; the
/// session only moves it between the engine and the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescription(pub Value);

impl SessionDescription {
    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Connection state as reported by the engine, for either the ICE agent or
/// the aggregate peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    New,
    Checking,
    Connecting,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Open,
    Message(Bytes),
    Closed,
    Error(String),
}

pub enum EngineEvent {
    /// A gathered local candidate; `None` marks the end of gathering.
    LocalCandidate(Option<Value>),
    /// The remote side opened a channel (callee role only).
    DataChannel(Arc<dyn ChatChannel>),
    IceConnectionState(EngineState),
    ConnectionState(EngineState),
    Channel(ChannelEvent),
}

impl std::fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::LocalCandidate(candidate) => f
                .debug_tuple("LocalCandidate")
                .field(&candidate.is_some())
                .finish(),
            EngineEvent::DataChannel(channel) => {
                f.debug_tuple("DataChannel").field(&channel.label()).finish()
            }
            EngineEvent::IceConnectionState(state) => {
                f.debug_tuple("IceConnectionState").field(state).finish()
            }
            EngineEvent::ConnectionState(state) => {
                f.debug_tuple("ConnectionState").field(state).finish()
            }
            EngineEvent::Channel(event) => f.debug_tuple("Channel").field(event).finish(),
        }
    }
}

/// Event sink handed to an engine at construction. Every event is stamped
/// with the engine's generation so the session can discard late callbacks
/// from an engine it already tore down.
#[derive(Clone)]
pub struct EngineEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, EngineEvent)>,
}

impl EngineEvents {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, EngineEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` when the session is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    #[error("peer engine setup failed: {0}")]
    Setup(String),
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("remote description is not set")]
    NoRemoteDescription,
    #[error("invalid ice candidate: {0}")]
    InvalidCandidate(String),
    #[error("peer engine error: {0}")]
    Engine(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("data channel is not open")]
    NotOpen,
    #[error("data channel send failed: {0}")]
    Send(String),
}

#[async_trait]
pub trait ChatChannel: Send + Sync {
    fn label(&self) -> String;

    /// Local notion of readiness; true only between open and close.
    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<(), ChannelError>;

    async fn close(&self);
}

/// One peer connection. Data-only: no media is ever negotiated.
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Creates the ordered, reliable chat channel (caller role). Must run
    /// before `create_offer` so the offer advertises it.
    async fn create_data_channel(&self) -> Result<Arc<dyn ChatChannel>, NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;

    /// `NegotiationError::NoRemoteDescription` is the expected error for a
    /// candidate that beat the remote description.
    async fn add_ice_candidate(&self, candidate: Value) -> Result<(), NegotiationError>;

    /// Releases the connection. Returns once the engine's own close has
    /// completed.
    async fn close(&self);
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, events: EngineEvents) -> Result<Arc<dyn PeerEngine>, NegotiationError>;
}
