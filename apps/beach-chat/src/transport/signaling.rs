use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chat_proto::SignalingEnvelope;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use url::Url;

use super::{TransportError, to_setup_error};

#[cfg(any(test, feature = "test-support"))]
mod local;
#[cfg(any(test, feature = "test-support"))]
pub use local::{LocalDialer, LocalRelayEnd};

const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Inbound side of an open link, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Envelope(SignalingEnvelope),
    /// The relay went away. Never emitted after a local `close()`.
    Closed { reason: Option<String> },
}

pub type SignalingEvents = mpsc::UnboundedReceiver<SignalingEvent>;

#[derive(Debug)]
enum LinkFrame {
    Text(String),
    Close,
}

#[async_trait]
pub trait SignalingDialer: Send + Sync {
    /// Establishes a fresh link to the relay at `url`.
    async fn open(&self, url: &str) -> Result<(SignalingLink, SignalingEvents), TransportError>;
}

/// Outbound half of a relay connection plus the tasks pumping it.
pub struct SignalingLink {
    url: String,
    outbound: Option<mpsc::UnboundedSender<LinkFrame>>,
    open: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SignalingLink {
    fn new(
        url: &str,
        outbound: mpsc::UnboundedSender<LinkFrame>,
        open: Arc<AtomicBool>,
        writer: Option<JoinHandle<()>>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            url: url.to_string(),
            outbound: Some(outbound),
            open,
            writer,
            tasks,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_some() && self.open.load(Ordering::SeqCst)
    }

    /// Queues one envelope for the relay. Fails immediately when the link
    /// is not open; nothing is buffered for later.
    pub fn send(&self, envelope: &SignalingEnvelope) -> Result<(), TransportError> {
        let outbound = match &self.outbound {
            Some(outbound) if self.open.load(Ordering::SeqCst) => outbound,
            _ => return Err(TransportError::NotOpen),
        };
        let text = envelope
            .to_text()
            .map_err(|err| TransportError::Encode(err.to_string()))?;
        tracing::trace!(
            target: "beach_chat::signaling",
            event = "ws_out",
            kind = envelope.kind(),
            len = text.len()
        );
        outbound.send(LinkFrame::Text(text)).map_err(|_| {
            self.open.store(false, Ordering::SeqCst);
            TransportError::NotOpen
        })
    }

    /// Closes the link. Safe to call any number of times.
    pub async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        let Some(outbound) = self.outbound.take() else {
            return;
        };
        let _ = outbound.send(LinkFrame::Close);
        drop(outbound);
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                tracing::debug!(
                    target: "beach_chat::signaling",
                    url = %self.url,
                    "signaling writer did not drain before close"
                );
                writer.abort();
            }
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::debug!(target: "beach_chat::signaling", url = %self.url, "signaling link closed");
    }
}

impl Drop for SignalingLink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Decodes one relay frame and forwards it. Returns `false` once nobody is
/// listening any more.
fn forward_frame(events: &mpsc::UnboundedSender<SignalingEvent>, text: &str) -> bool {
    match SignalingEnvelope::from_text(text) {
        Ok(envelope) => events.send(SignalingEvent::Envelope(envelope)).is_ok(),
        Err(err) => {
            tracing::warn!(
                target: "beach_chat::signaling",
                error = %err,
                len = text.len(),
                "dropping malformed signaling frame"
            );
            true
        }
    }
}

/// Dials the relay over a WebSocket.
#[derive(Clone, Debug, Default)]
pub struct WebSocketDialer;

#[async_trait]
impl SignalingDialer for WebSocketDialer {
    async fn open(&self, url: &str) -> Result<(SignalingLink, SignalingEvents), TransportError> {
        let websocket_url = websocket_url(url)?;
        let (ws_stream, _) = connect_async(websocket_url.as_str())
            .await
            .map_err(|err| TransportError::Setup(format!("websocket connect failed: {err}")))?;
        tracing::debug!(
            target: "beach_chat::signaling",
            url = %websocket_url,
            "signaling websocket connected"
        );
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<LinkFrame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<SignalingEvent>();
        let open = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                match frame {
                    LinkFrame::Text(text) => {
                        if let Err(err) = ws_write.send(Message::Text(text)).await {
                            tracing::debug!(
                                target: "beach_chat::signaling",
                                error = %err,
                                "signaling write failed"
                            );
                            break;
                        }
                    }
                    LinkFrame::Close => {
                        let _ = ws_write.send(Message::Close(None)).await;
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        });

        let reader_open = Arc::clone(&open);
        let reader = tokio::spawn(async move {
            let reason = loop {
                match ws_read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        tracing::trace!(
                            target: "beach_chat::signaling",
                            event = "ws_in",
                            kind = "text",
                            len = text.len()
                        );
                        if !forward_frame(&event_tx, &text) {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => {
                            if !forward_frame(&event_tx, &text) {
                                return;
                            }
                        }
                        Err(_) => tracing::warn!(
                            target: "beach_chat::signaling",
                            "dropping non-utf8 signaling frame"
                        ),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|frame| frame.reason.to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                tracing::debug!(
                                    target: "beach_chat::signaling",
                                    "signaling websocket closed: {err}"
                                );
                            }
                            _ => {
                                tracing::warn!(
                                    target: "beach_chat::signaling",
                                    "signaling websocket error: {err}"
                                );
                            }
                        }
                        break Some(err.to_string());
                    }
                    None => break None,
                }
            };
            if reader_open.swap(false, Ordering::SeqCst) {
                let _ = event_tx.send(SignalingEvent::Closed { reason });
            }
        });

        Ok((
            SignalingLink::new(url, frame_tx, open, Some(writer), vec![reader]),
            event_rx,
        ))
    }
}

/// Accepts `ws`/`wss` URLs as-is and maps `http`/`https` onto them.
pub fn websocket_url(signaling_url: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(signaling_url).map_err(|err| {
        TransportError::Setup(format!("invalid signaling url {signaling_url}: {err}"))
    })?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(TransportError::Setup(format!(
                "unsupported signaling url scheme {other}"
            )));
        }
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| to_setup_error(format!("invalid websocket scheme for {signaling_url}")))?;
    }
    url.set_fragment(None);
    Ok(url)
}
