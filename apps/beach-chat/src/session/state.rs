use std::fmt;

use chat_proto::ApplicationMessage;

use crate::transport::webrtc::EngineState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
            ConnectionStatus::Error => "error",
        }
    }

    /// `failed` and `error` absorb everything until the next `connect`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Failed | ConnectionStatus::Error)
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an engine-reported state does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Set(ConnectionStatus),
    /// Leave status alone; the data channel decides when we are connected.
    Hold,
    /// Mark the session failed and tear it down.
    Fail,
    /// Drop to disconnected unless already failed or errored.
    Close,
}

/// Same table for ICE state and aggregate connection state.
pub fn action_for(state: EngineState) -> StatusAction {
    match state {
        EngineState::Checking | EngineState::Connecting => {
            StatusAction::Set(ConnectionStatus::Connecting)
        }
        EngineState::Connected | EngineState::Completed | EngineState::New => StatusAction::Hold,
        EngineState::Disconnected => StatusAction::Set(ConnectionStatus::Connecting),
        EngineState::Failed => StatusAction::Fail,
        EngineState::Closed => StatusAction::Close,
    }
}

/// Which owned resources are live right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceState {
    pub signaling: bool,
    pub engine: bool,
    pub channel: bool,
}

impl ResourceState {
    pub fn is_empty(&self) -> bool {
        !(self.signaling || self.engine || self.channel)
    }
}

/// Everything an observer may read about a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub local_id: Option<String>,
    pub remote_id: Option<String>,
    pub last_error: Option<String>,
    pub last_received_message: Option<ApplicationMessage>,
    pub resources: ResourceState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged(ConnectionStatus),
    /// A fatal error; the session has already been torn down.
    Error(String),
    MessageReceived(ApplicationMessage),
    /// `send_message` was refused; the session is still alive.
    SendRejected(String),
}
