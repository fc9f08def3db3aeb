//! Wire definitions shared by beach-chat peers and the signaling relay.
//! Kept in a dedicated crate so relay implementations and other clients
//! can depend on the envelope shapes without pulling in the WebRTC stack.

mod message;
mod signaling;

pub use message::{ApplicationMessage, ReactionKind, UnknownReaction, tenor_gif_url};
pub use signaling::{ErrorPayload, RoutedSignal, SignalingEnvelope, UserRef};
