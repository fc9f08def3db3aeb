use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chat_proto::SignalingEnvelope;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{LinkFrame, SignalingDialer, SignalingEvent, SignalingEvents, SignalingLink, forward_frame};
use crate::transport::TransportError;

/// In-process relay. Every `open` hands the far end of the new link to the
/// receiver returned by [`LocalDialer::new`].
pub struct LocalDialer {
    relays: mpsc::UnboundedSender<LocalRelayEnd>,
    refusals: Mutex<VecDeque<String>>,
}

impl LocalDialer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LocalRelayEnd>) {
        let (relays, relay_rx) = mpsc::unbounded_channel();
        (
            Self {
                relays,
                refusals: Mutex::new(VecDeque::new()),
            },
            relay_rx,
        )
    }

    /// Makes the next `open` fail with `reason`.
    pub fn refuse_next(&self, reason: impl Into<String>) {
        self.refusals.lock().push_back(reason.into());
    }
}

#[async_trait]
impl SignalingDialer for LocalDialer {
    async fn open(&self, url: &str) -> Result<(SignalingLink, SignalingEvents), TransportError> {
        if let Some(reason) = self.refusals.lock().pop_front() {
            return Err(TransportError::Setup(reason));
        }

        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<LinkFrame>();
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<LinkFrame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<SignalingEvent>();
        let open = Arc::new(AtomicBool::new(true));

        let reader_open = Arc::clone(&open);
        let reader = tokio::spawn(async move {
            while let Some(frame) = inbound_rx.recv().await {
                match frame {
                    LinkFrame::Text(text) => {
                        if !forward_frame(&event_tx, &text) {
                            return;
                        }
                    }
                    LinkFrame::Close => break,
                }
            }
            if reader_open.swap(false, Ordering::SeqCst) {
                let _ = event_tx.send(SignalingEvent::Closed { reason: None });
            }
        });

        let relay = LocalRelayEnd {
            url: url.to_string(),
            inbound: inbound_tx,
            outbound: frame_rx,
        };
        self.relays
            .send(relay)
            .map_err(|_| TransportError::Setup("local relay is gone".into()))?;

        Ok((
            SignalingLink::new(url, frame_tx, open, None, vec![reader]),
            event_rx,
        ))
    }
}

/// The relay's side of a [`LocalDialer`] link.
pub struct LocalRelayEnd {
    url: String,
    inbound: mpsc::UnboundedSender<LinkFrame>,
    outbound: mpsc::UnboundedReceiver<LinkFrame>,
}

impl LocalRelayEnd {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn deliver(&self, envelope: &SignalingEnvelope) -> bool {
        match envelope.to_text() {
            Ok(text) => self.deliver_raw(text),
            Err(_) => false,
        }
    }

    /// Sends a frame exactly as given, valid or not.
    pub fn deliver_raw(&self, text: impl Into<String>) -> bool {
        self.inbound.send(LinkFrame::Text(text.into())).is_ok()
    }

    /// Next envelope the client sent; `None` once the client closed the link.
    pub async fn recv(&mut self) -> Option<SignalingEnvelope> {
        loop {
            match self.outbound.recv().await {
                Some(LinkFrame::Text(text)) => {
                    if let Ok(envelope) = SignalingEnvelope::from_text(&text) {
                        return Some(envelope);
                    }
                }
                Some(LinkFrame::Close) | None => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<SignalingEnvelope> {
        while let Ok(frame) = self.outbound.try_recv() {
            match frame {
                LinkFrame::Text(text) => {
                    if let Ok(envelope) = SignalingEnvelope::from_text(&text) {
                        return Some(envelope);
                    }
                }
                LinkFrame::Close => return None,
            }
        }
        None
    }

    /// Drops the connection from the relay side.
    pub fn close(&self) {
        let _ = self.inbound.send(LinkFrame::Close);
    }
}
