use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::channel::{WebRtcChannel, attach_channel_events};
use super::config::WebRtcConfig;
use super::{
    ChatChannel, EngineEvent, EngineEvents, EngineFactory, EngineState, NegotiationError,
    PeerEngine, SessionDescription,
};

/// Builds one `webrtc` peer connection per session generation.
#[derive(Clone, Debug, Default)]
pub struct WebRtcEngineFactory {
    config: WebRtcConfig,
}

impl WebRtcEngineFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebRtcConfig {
        &self.config
    }
}

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn create(&self, events: EngineEvents) -> Result<Arc<dyn PeerEngine>, NegotiationError> {
        let mut setting = SettingEngine::default();
        if self.config.include_loopback_candidates {
            setting.set_include_loopback_candidate(true);
        }
        let api = build_api(setting)?;
        let rtc_config = RTCConfiguration {
            ice_servers: self.config.rtc_ice_servers(),
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(to_setup_error)?,
        );
        install_peer_handlers(&pc, &events);
        tracing::debug!(
            target: "beach_chat::webrtc",
            generation = events.generation(),
            ice_servers = self.config.ice_servers.len(),
            "peer connection created"
        );
        Ok(Arc::new(WebRtcEngine {
            pc,
            events,
            config: self.config.clone(),
        }))
    }
}

fn build_api(setting: SettingEngine) -> Result<API, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_setting_engine(setting)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn install_peer_handlers(pc: &Arc<RTCPeerConnection>, events: &EngineEvents) {
    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        Box::pin(async move {
            let payload = match candidate {
                Some(candidate) => match candidate
                    .to_json()
                    .map_err(|err| err.to_string())
                    .and_then(|init| serde_json::to_value(init).map_err(|err| err.to_string()))
                {
                    Ok(value) => Some(value),
                    Err(err) => {
                        tracing::warn!(
                            target: "beach_chat::webrtc",
                            error = %err,
                            "failed to serialize local candidate"
                        );
                        return;
                    }
                },
                None => None,
            };
            events.emit(EngineEvent::LocalCandidate(payload));
        })
    }));

    let ice_events = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let events = ice_events.clone();
        Box::pin(async move {
            if let Some(state) = map_ice_state(state) {
                tracing::debug!(
                    target: "beach_chat::webrtc",
                    generation = events.generation(),
                    ?state,
                    "ice connection state changed"
                );
                events.emit(EngineEvent::IceConnectionState(state));
            }
        })
    }));

    let pc_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = pc_events.clone();
        Box::pin(async move {
            if let Some(state) = map_peer_state(state) {
                tracing::debug!(
                    target: "beach_chat::webrtc",
                    generation = events.generation(),
                    ?state,
                    "peer connection state changed"
                );
                events.emit(EngineEvent::ConnectionState(state));
            }
        })
    }));

    let dc_events = events.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let events = dc_events.clone();
        Box::pin(async move {
            tracing::debug!(
                target: "beach_chat::webrtc",
                generation = events.generation(),
                label = dc.label(),
                "remote data channel received"
            );
            attach_channel_events(&dc, &events);
            let channel: Arc<dyn ChatChannel> = Arc::new(WebRtcChannel::new(dc));
            events.emit(EngineEvent::DataChannel(channel));
        })
    }));
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<EngineState> {
    match state {
        RTCIceConnectionState::New => Some(EngineState::New),
        RTCIceConnectionState::Checking => Some(EngineState::Checking),
        RTCIceConnectionState::Connected => Some(EngineState::Connected),
        RTCIceConnectionState::Completed => Some(EngineState::Completed),
        RTCIceConnectionState::Disconnected => Some(EngineState::Disconnected),
        RTCIceConnectionState::Failed => Some(EngineState::Failed),
        RTCIceConnectionState::Closed => Some(EngineState::Closed),
        _ => None,
    }
}

fn map_peer_state(state: RTCPeerConnectionState) -> Option<EngineState> {
    match state {
        RTCPeerConnectionState::New => Some(EngineState::New),
        RTCPeerConnectionState::Connecting => Some(EngineState::Connecting),
        RTCPeerConnectionState::Connected => Some(EngineState::Connected),
        RTCPeerConnectionState::Disconnected => Some(EngineState::Disconnected),
        RTCPeerConnectionState::Failed => Some(EngineState::Failed),
        RTCPeerConnectionState::Closed => Some(EngineState::Closed),
        _ => None,
    }
}

struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    events: EngineEvents,
    config: WebRtcConfig,
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    async fn create_data_channel(&self) -> Result<Arc<dyn ChatChannel>, NegotiationError> {
        let init = RTCDataChannelInit {
            ordered: Some(self.config.ordered),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(&self.config.data_channel_label, Some(init))
            .await
            .map_err(to_setup_error)?;
        attach_channel_events(&dc, &self.events);
        Ok(Arc::new(WebRtcChannel::new(dc)))
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| NegotiationError::Engine(err.to_string()))?;
        description_to_value(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|err| NegotiationError::Engine(err.to_string()))?;
        description_to_value(&answer)
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let description = description_from_value(desc)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|err| NegotiationError::Engine(err.to_string()))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let description = description_from_value(desc)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|err| NegotiationError::InvalidDescription(err.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: Value) -> Result<(), NegotiationError> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate)
            .map_err(|err| NegotiationError::InvalidCandidate(err.to_string()))?;
        match self.pc.add_ice_candidate(init).await {
            Ok(()) => Ok(()),
            Err(webrtc::Error::ErrNoRemoteDescription) => {
                Err(NegotiationError::NoRemoteDescription)
            }
            Err(err) => Err(NegotiationError::Engine(err.to_string())),
        }
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            tracing::debug!(
                target: "beach_chat::webrtc",
                generation = self.events.generation(),
                error = %err,
                "peer connection close reported an error"
            );
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WebRtcSdpPayload {
    sdp: String,
    #[serde(rename = "type")]
    typ: String,
}

fn payload_from_description(desc: &RTCSessionDescription) -> WebRtcSdpPayload {
    WebRtcSdpPayload {
        sdp: desc.sdp.clone(),
        typ: desc.sdp_type.to_string(),
    }
}

fn session_description_from_payload(
    payload: &WebRtcSdpPayload,
) -> Result<RTCSessionDescription, NegotiationError> {
    let invalid = |err: webrtc::Error| NegotiationError::InvalidDescription(err.to_string());
    let description = match RTCSdpType::from(payload.typ.as_str()) {
        RTCSdpType::Offer => RTCSessionDescription::offer(payload.sdp.clone()).map_err(invalid)?,
        RTCSdpType::Answer => RTCSessionDescription::answer(payload.sdp.clone()).map_err(invalid)?,
        RTCSdpType::Pranswer => {
            RTCSessionDescription::pranswer(payload.sdp.clone()).map_err(invalid)?
        }
        RTCSdpType::Rollback | RTCSdpType::Unspecified => {
            return Err(NegotiationError::InvalidDescription(format!(
                "unsupported sdp type {}",
                payload.typ
            )));
        }
    };
    Ok(description)
}

fn description_to_value(desc: &RTCSessionDescription) -> Result<SessionDescription, NegotiationError> {
    serde_json::to_value(payload_from_description(desc))
        .map(SessionDescription)
        .map_err(|err| NegotiationError::InvalidDescription(err.to_string()))
}

fn description_from_value(desc: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let payload: WebRtcSdpPayload = serde_json::from_value(desc.into_value())
        .map_err(|err| NegotiationError::InvalidDescription(err.to_string()))?;
    session_description_from_payload(&payload)
}

fn to_setup_error<E: std::fmt::Display>(err: E) -> NegotiationError {
    NegotiationError::Setup(err.to_string())
}
