//! Server side of the presence channel: fans out events to every connected
//! WebSocket client.

use crate::error::PresenceError;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use presence_audio::encode_pcm;
use presence_core::{Emotion, InboundEvent, SessionState};
use std::net::SocketAddr;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_CLIENTS: usize = 10_000;

/// Publishes presence events to all connected clients
#[derive(Debug, Clone)]
pub struct PresenceBroadcaster {
    sender: broadcast::Sender<String>,
}

impl PresenceBroadcaster {
    /// `capacity` is how many messages a client may fall behind before it
    /// starts skipping
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Send an event to every client. Returns how many clients it was queued
    /// for; zero clients is not an error.
    pub fn send(&self, event: &InboundEvent) -> Result<usize, PresenceError> {
        let json = event.to_json()?;
        Ok(self.sender.send(json).unwrap_or(0))
    }

    pub fn state(&self, value: SessionState) -> Result<usize, PresenceError> {
        self.send(&InboundEvent::State { value })
    }

    pub fn emotion(&self, value: Emotion) -> Result<usize, PresenceError> {
        self.send(&InboundEvent::Emotion { value })
    }

    pub fn intensity(&self, value: f64) -> Result<usize, PresenceError> {
        self.send(&InboundEvent::Intensity { value })
    }

    pub fn tts_begin(&self, sample_rate: u32, id: &str) -> Result<usize, PresenceError> {
        self.send(&InboundEvent::TtsBegin {
            id: id.to_string(),
            sr: f64::from(sample_rate),
        })
    }

    /// Send float samples as a base64 chunk
    pub fn tts_chunk(&self, id: &str, ts: f64, samples: &[f32]) -> Result<usize, PresenceError> {
        self.send(&InboundEvent::TtsChunk {
            id: id.to_string(),
            ts,
            pcm: encode_pcm(samples),
        })
    }

    pub fn tts_end(&self, id: &str) -> Result<usize, PresenceError> {
        self.send(&InboundEvent::TtsEnd { id: id.to_string() })
    }

    /// Serve `GET /` as the WebSocket endpoint on `addr`
    pub async fn bind(&self, addr: &str) -> Result<BroadcasterHandle, PresenceError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| PresenceError::Network(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = Router::new().route("/", get(websocket_handler)).with_state(BroadcastState {
            sender: self.sender.clone(),
            shutdown: shutdown_rx.clone(),
        });

        let mut server_shutdown = shutdown_rx;
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stopped(&mut server_shutdown).await })
                .await
                .map_err(|e| PresenceError::Network(format!("Broadcaster server error: {}", e)))
        });

        info!("Presence broadcaster listening on {}", local_addr);
        Ok(BroadcasterHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// Running broadcaster server
#[derive(Debug)]
pub struct BroadcasterHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<(), PresenceError>>,
}

impl BroadcasterHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL clients can connect to
    pub fn url(&self) -> String {
        format!("ws://{}/", self.local_addr)
    }

    /// Disconnect all clients and stop accepting new ones
    pub async fn shutdown(self) -> Result<(), PresenceError> {
        let _ = self.shutdown_tx.send(true);
        self.task
            .await
            .map_err(|e| PresenceError::Network(format!("Broadcaster task failed: {}", e)))?
    }
}

/// Resolves once the flag is set or its sender is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[derive(Clone)]
struct BroadcastState {
    sender: broadcast::Sender<String>,
    shutdown: watch::Receiver<bool>,
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<BroadcastState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: BroadcastState) {
    let client_id = Uuid::new_v4();

    if state.sender.receiver_count() >= MAX_CLIENTS {
        warn!("Maximum client limit reached ({}), rejecting {}", MAX_CLIENTS, client_id);
        return;
    }
    let mut rx = state.sender.subscribe();
    info!(%client_id, "Presence client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.shutdown;

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                msg = rx.recv() => match msg {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!(%client_id, "WebSocket send failed, closing sender task");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%client_id, skipped, "Client lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    });

    // Inbound traffic is read and ignored
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        result = &mut send_task => {
            if let Err(e) = result {
                warn!(%client_id, "Send task panicked or was aborted: {}", e);
            }
            recv_task.abort();
        }
        result = &mut recv_task => {
            if let Err(e) = result {
                warn!(%client_id, "Receive task panicked or was aborted: {}", e);
            }
            send_task.abort();
        }
    }

    info!(%client_id, "Presence client disconnected");
}
