use std::sync::Arc;

use async_trait::async_trait;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

use super::{ChannelError, ChannelEvent, ChatChannel, EngineEvent, EngineEvents};

/// Routes the channel's callbacks into the engine's event sink.
pub(super) fn attach_channel_events(dc: &Arc<RTCDataChannel>, events: &EngineEvents) {
    let open_events = events.clone();
    let label = dc.label().to_string();
    dc.on_open(Box::new(move || {
        let events = open_events.clone();
        Box::pin(async move {
            tracing::debug!(
                target: "beach_chat::webrtc",
                generation = events.generation(),
                label = %label,
                "data channel opened"
            );
            events.emit(EngineEvent::Channel(ChannelEvent::Open));
        })
    }));

    let message_events = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = message_events.clone();
        Box::pin(async move {
            tracing::trace!(
                target: "beach_chat::webrtc",
                len = msg.data.len(),
                is_string = msg.is_string,
                "data channel frame received"
            );
            events.emit(EngineEvent::Channel(ChannelEvent::Message(msg.data)));
        })
    }));

    let close_events = events.clone();
    dc.on_close(Box::new(move || {
        let events = close_events.clone();
        Box::pin(async move {
            tracing::debug!(
                target: "beach_chat::webrtc",
                generation = events.generation(),
                "data channel closed"
            );
            events.emit(EngineEvent::Channel(ChannelEvent::Closed));
        })
    }));

    let error_events = events.clone();
    dc.on_error(Box::new(move |err: webrtc::Error| {
        let events = error_events.clone();
        Box::pin(async move {
            events.emit(EngineEvent::Channel(ChannelEvent::Error(err.to_string())));
        })
    }));
}

pub(super) struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
}

impl WebRtcChannel {
    pub(super) fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self { dc }
    }
}

#[async_trait]
impl ChatChannel for WebRtcChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        self.dc
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|err| ChannelError::Send(err.to_string()))
    }

    async fn close(&self) {
        if let Err(err) = self.dc.close().await {
            tracing::debug!(
                target: "beach_chat::webrtc",
                error = %err,
                "data channel close reported an error"
            );
        }
    }
}
