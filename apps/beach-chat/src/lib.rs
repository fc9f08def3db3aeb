pub mod chat;
pub mod config;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use chat_proto as protocol;
pub use config::ChatConfig;
pub use session::{
    ConnectionStatus, SessionError, SessionEvent, SessionHandle, SessionSnapshot,
};
