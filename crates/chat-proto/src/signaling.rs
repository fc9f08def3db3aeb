use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies a user on the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Offer, answer and candidate envelopes share the same routing shape.
/// The relay stamps `sender` on delivery; outbound envelopes only carry
/// `target`. `payload` is opaque to everything except the peer engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedSignal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl RoutedSignal {
    pub fn to(target: impl Into<String>, payload: Value) -> Self {
        Self {
            sender: None,
            target: Some(target.into()),
            payload: Some(payload),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingEnvelope {
    Login { payload: UserRef },
    LoginSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<UserRef>,
    },
    Offer(RoutedSignal),
    Answer(RoutedSignal),
    Candidate(RoutedSignal),
    UserLeft {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<UserRef>,
    },
    Error {
        #[serde(default)]
        payload: ErrorPayload,
    },
    /// Relay chatter this client does not act on (`info`, `push_registered`, ...).
    #[serde(other)]
    Unknown,
}

impl SignalingEnvelope {
    pub fn login(user_id: impl Into<String>) -> Self {
        SignalingEnvelope::Login {
            payload: UserRef {
                user_id: user_id.into(),
            },
        }
    }

    pub fn offer(target: impl Into<String>, payload: Value) -> Self {
        SignalingEnvelope::Offer(RoutedSignal::to(target, payload))
    }

    pub fn answer(target: impl Into<String>, payload: Value) -> Self {
        SignalingEnvelope::Answer(RoutedSignal::to(target, payload))
    }

    pub fn candidate(target: impl Into<String>, payload: Value) -> Self {
        SignalingEnvelope::Candidate(RoutedSignal::to(target, payload))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalingEnvelope::Login { .. } => "login",
            SignalingEnvelope::LoginSuccess { .. } => "login_success",
            SignalingEnvelope::Offer(_) => "offer",
            SignalingEnvelope::Answer(_) => "answer",
            SignalingEnvelope::Candidate(_) => "candidate",
            SignalingEnvelope::UserLeft { .. } => "user_left",
            SignalingEnvelope::Error { .. } => "error",
            SignalingEnvelope::Unknown => "unknown",
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
