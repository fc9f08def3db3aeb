//! Minimal signaling relay speaking the chat envelope protocol over axum
//! WebSockets: registers users on `login`, stamps `sender` on routed
//! envelopes and announces `user_left` when a socket goes away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc, oneshot};

#[derive(Clone)]
struct Peer {
    tx: mpsc::UnboundedSender<WsMessage>,
    kick: Arc<Notify>,
}

#[derive(Clone, Default)]
struct RelayState {
    peers: Arc<Mutex<HashMap<String, Peer>>>,
    frames: Arc<Mutex<Vec<Value>>>,
}

pub struct RelayServer {
    pub url: String,
    state: RelayState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RelayServer {
    pub async fn start() -> Self {
        let state = RelayState::default();
        let router = Router::new()
            .route("/", get(ws_handler))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener bind");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });
        Self {
            url: format!("http://{addr}/"),
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    /// Every envelope the relay received, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.state.frames.lock().clone()
    }

    pub fn is_online(&self, user: &str) -> bool {
        self.state.peers.lock().contains_key(user)
    }

    pub async fn wait_online(&self, user: &str, online: bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.is_online(user) != online {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("relay presence did not change");
    }

    /// Closes `user`'s socket from the relay side.
    pub fn kick(&self, user: &str) -> bool {
        match self.state.peers.lock().get(user) {
            Some(peer) => {
                peer.kick.notify_one();
                true
            }
            None => false,
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn send_json(tx: &mpsc::UnboundedSender<WsMessage>, value: Value) {
    let _ = tx.send(WsMessage::Text(value.to_string()));
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let kick = Arc::new(Notify::new());

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, WsMessage::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let mut user: Option<String> = None;
    loop {
        let message = tokio::select! {
            _ = kick.notified() => {
                let _ = tx.send(WsMessage::Close(None));
                break;
            }
            message = receiver.next() => message,
        };
        let Some(Ok(message)) = message else {
            break;
        };
        match message {
            WsMessage::Text(text) => {
                let Ok(mut value) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                state.frames.lock().push(value.clone());
                match value.get("type").and_then(Value::as_str) {
                    Some("login") => {
                        let id = value["payload"]["userId"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string();
                        state.peers.lock().insert(
                            id.clone(),
                            Peer {
                                tx: tx.clone(),
                                kick: Arc::clone(&kick),
                            },
                        );
                        send_json(&tx, json!({"type": "login_success", "payload": {"userId": id}}));
                        user = Some(id);
                    }
                    Some("offer" | "answer" | "candidate") => {
                        let target = value["target"].as_str().unwrap_or_default().to_string();
                        value["sender"] = json!(user);
                        let peer = state.peers.lock().get(&target).cloned();
                        match peer {
                            Some(peer) => send_json(&peer.tx, value),
                            None => send_json(
                                &tx,
                                json!({
                                    "type": "error",
                                    "payload": {"message": format!("user {target} not found")}
                                }),
                            ),
                        }
                    }
                    _ => {}
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    if let Some(id) = user {
        let others: Vec<Peer> = {
            let mut peers = state.peers.lock();
            peers.remove(&id);
            peers.values().cloned().collect()
        };
        for peer in others {
            send_json(&peer.tx, json!({"type": "user_left", "payload": {"userId": id}}));
        }
    }
    drop(tx);
    let _ = tokio::time::timeout(Duration::from_secs(1), send_task).await;
}
