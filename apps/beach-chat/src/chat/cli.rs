use clap::{Args, Parser};
use std::path::PathBuf;

use crate::config::ChatConfig;
use crate::telemetry::logging::{LogConfig, LogLevel};
use crate::transport::webrtc::config::IceServer;

#[derive(Parser, Debug)]
#[command(
    name = "beach-chat",
    about = "💬 Peer-to-peer chat over a WebRTC data channel",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"))
)]
pub struct Cli {
    #[arg(
        long,
        env = "BEACH_CHAT_USER_ID",
        value_name = "ID",
        help = "Identifier to log in with at the signaling relay"
    )]
    pub id: String,

    #[arg(
        long,
        value_name = "ID",
        help = "Peer to call once logged in; omit to wait for an incoming call"
    )]
    pub peer: Option<String>,

    #[arg(
        long,
        value_name = "URL",
        help = "Signaling relay URL (overrides BEACH_CHAT_SIGNALING_URL)"
    )]
    pub signaling_url: Option<String>,

    #[arg(
        long = "ice-server",
        value_name = "URL",
        help = "STUN/TURN server URL; repeat to add several (replaces the defaults)"
    )]
    pub ice_servers: Vec<String>,

    #[arg(long, help = "Do not use any STUN server; host candidates only")]
    pub no_stun: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    /// Environment configuration with command line overrides applied.
    pub fn chat_config(&self) -> ChatConfig {
        let mut config = ChatConfig::from_env();
        if let Some(url) = self.signaling_url.as_deref() {
            config.signaling_url = url.trim().to_string();
        }
        if !self.ice_servers.is_empty() {
            config.webrtc.ice_servers = self.ice_servers.iter().map(IceServer::stun).collect();
        }
        if self.no_stun {
            config.webrtc.ice_servers.clear();
        }
        config
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "BEACH_CHAT_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "BEACH_CHAT_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
