use std::env;
use std::time::Duration;

use crate::transport::webrtc::config::{IceServer, WebRtcConfig};

pub const SIGNALING_URL_ENV: &str = "BEACH_CHAT_SIGNALING_URL";
pub const ICE_SERVERS_ENV: &str = "BEACH_CHAT_ICE_SERVERS";
pub const DISABLE_STUN_ENV: &str = "BEACH_CHAT_DISABLE_STUN";
pub const LOGIN_TIMEOUT_ENV: &str = "BEACH_CHAT_LOGIN_TIMEOUT_MS";
pub const ANSWER_TIMEOUT_ENV: &str = "BEACH_CHAT_ANSWER_TIMEOUT_MS";
pub const STEP_TIMEOUT_ENV: &str = "BEACH_CHAT_STEP_TIMEOUT_MS";

const DEFAULT_SIGNALING_URL: &str = "ws://localhost:8080";
const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Chat session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// WebSocket URL of the signaling relay
    pub signaling_url: String,
    /// How long to wait for `login_success` after sending `login`
    pub login_timeout: Duration,
    /// How long the caller waits for an `answer` after sending its offer
    pub answer_timeout: Duration,
    /// Upper bound on any single engine call (create/set description, create channel)
    pub step_timeout: Duration,
    pub webrtc: WebRtcConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            answer_timeout: DEFAULT_ANSWER_TIMEOUT,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            webrtc: WebRtcConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var(SIGNALING_URL_ENV) {
            if !url.trim().is_empty() {
                config.signaling_url = url.trim().to_string();
            }
        }

        if let Ok(list) = env::var(ICE_SERVERS_ENV) {
            config.webrtc.ice_servers = parse_ice_servers(&list);
        }

        if env_truthy(DISABLE_STUN_ENV) {
            config.webrtc.ice_servers.clear();
        }

        if let Some(timeout) = env_millis(LOGIN_TIMEOUT_ENV) {
            config.login_timeout = timeout;
        }
        if let Some(timeout) = env_millis(ANSWER_TIMEOUT_ENV) {
            config.answer_timeout = timeout;
        }
        if let Some(timeout) = env_millis(STEP_TIMEOUT_ENV) {
            config.step_timeout = timeout;
        }

        config
    }
}

/// Splits a comma separated list of ICE server URLs. Each entry becomes its
/// own server; blank entries are skipped.
pub fn parse_ice_servers(list: &str) -> Vec<IceServer> {
    list.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(IceServer::stun)
        .collect()
}

/// Unset, empty, `0` and `false` (any case) read as off.
pub(crate) fn env_truthy(var: &str) -> bool {
    env::var(var)
        .map(|value| {
            let value = value.trim();
            !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

fn env_millis(var: &str) -> Option<Duration> {
    let raw = env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            tracing::warn!(
                target: "beach_chat::config",
                var,
                value = %raw,
                "ignoring invalid timeout"
            );
            None
        }
    }
}
