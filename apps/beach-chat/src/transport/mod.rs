pub mod signaling;
pub mod webrtc;

pub use signaling::{SignalingDialer, SignalingEvent, SignalingLink, WebSocketDialer};

/// Failures of the relay link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("signaling link not open")]
    NotOpen,
    #[error("failed to encode signaling envelope: {0}")]
    Encode(String),
}

fn to_setup_error<E: std::fmt::Display>(err: E) -> TransportError {
    TransportError::Setup(err.to_string())
}
