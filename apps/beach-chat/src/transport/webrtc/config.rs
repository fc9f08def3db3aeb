use webrtc::ice_transport::ice_server::RTCIceServer;

pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "chat-data-channel";

const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// A discovery or relay server handed to the ICE agent. TURN entries carry
/// credentials; STUN entries leave them empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    pub fn with_credentials(
        urls: Vec<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls,
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    pub(crate) fn to_rtc(&self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls.clone(),
            username: self.username.clone().unwrap_or_default(),
            credential: self.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Configuration for the WebRTC peer engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebRtcConfig {
    /// ICE servers for connection establishment
    pub ice_servers: Vec<IceServer>,
    /// Data channel label
    pub data_channel_label: String,
    /// Whether the data channel should be ordered
    pub ordered: bool,
    /// Gather 127.0.0.1 candidates; needed when peers share a host without
    /// any other interface.
    pub include_loopback_candidates: bool,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            ordered: true,
            include_loopback_candidates: false,
        }
    }
}

impl WebRtcConfig {
    /// Host candidates only, loopback included. Used by tests and for two
    /// peers on the same machine.
    pub fn localhost() -> Self {
        Self {
            ice_servers: Vec::new(),
            include_loopback_candidates: true,
            ..Default::default()
        }
    }

    pub fn builder() -> WebRtcConfigBuilder {
        WebRtcConfigBuilder::new()
    }

    pub(crate) fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers.iter().map(IceServer::to_rtc).collect()
    }
}

pub fn default_ice_servers() -> Vec<IceServer> {
    DEFAULT_STUN_SERVERS.iter().map(|url| IceServer::stun(*url)).collect()
}

/// Builder for WebRTC configuration
#[derive(Default)]
pub struct WebRtcConfigBuilder {
    ice_servers: Vec<IceServer>,
    without_defaults: bool,
    data_channel_label: Option<String>,
    ordered: Option<bool>,
    include_loopback_candidates: Option<bool>,
}

impl WebRtcConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ice_server(mut self, urls: Vec<String>) -> Self {
        self.ice_servers.push(IceServer {
            urls,
            ..Default::default()
        });
        self
    }

    pub fn add_ice_server_with_credentials(
        mut self,
        urls: Vec<String>,
        username: String,
        credential: String,
    ) -> Self {
        self.ice_servers
            .push(IceServer::with_credentials(urls, username, credential));
        self
    }

    /// Drops the default STUN servers even when no explicit server was added.
    pub fn without_default_servers(mut self) -> Self {
        self.without_defaults = true;
        self
    }

    pub fn data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = Some(label.into());
        self
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = Some(ordered);
        self
    }

    pub fn include_loopback_candidates(mut self, include: bool) -> Self {
        self.include_loopback_candidates = Some(include);
        self
    }

    pub fn build(self) -> WebRtcConfig {
        let mut config = WebRtcConfig::default();

        if !self.ice_servers.is_empty() || self.without_defaults {
            config.ice_servers = self.ice_servers;
        }

        if let Some(label) = self.data_channel_label {
            config.data_channel_label = label;
        }

        if let Some(ordered) = self.ordered {
            config.ordered = ordered;
        }

        if let Some(include) = self.include_loopback_candidates {
            config.include_loopback_candidates = include;
        }

        config
    }
}
