//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                      ┌── CanvasService ───┐
//!             ├── connection task ── SyncHub ── WorkflowService ──┼── RecordStore
//! Client B ──┘     │                └── ProjectService ──┘   (memory / RocksDB)
//!                  │                        │
//!                  │  Watch(topic)          ▼
//!                  └──────────────── ChangeBroadcaster ── forwarder task per topic
//! ```
//!
//! A connection runs its calls one at a time, in arrival order. Each
//! watched topic gets a forwarder task that pushes change events into the
//! connection's outbound queue. A forwarder that falls behind sends a
//! `Lagged` marker in place of the events it missed. Replies and events go out in the encoding
//! of the most recent inbound frame (bincode for binary, JSON for text).

use futures_util::{Sink, SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::broadcast::{Notification, Subscription, Topic};
use crate::dispatch::SyncHub;
use crate::error::SyncResult;
use crate::protocol::{ClientMessage, ErrorCode, RemoteError, ServerMessage};
use crate::repository::RepositoryConfig;
use crate::storage::{RocksStore, StoreConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Per-topic event buffer before observers lag
    pub broadcast_capacity: usize,
    /// Compare-and-swap attempts per commit
    pub max_commit_attempts: u32,
    /// Topics one connection may watch at once
    pub max_watches_per_connection: usize,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            max_commit_attempts: RepositoryConfig::default().max_commit_attempts,
            max_watches_per_connection: 64,
            storage_path: None,
        }
    }
}

impl ServerConfig {
    fn repository_config(&self) -> RepositoryConfig {
        RepositoryConfig {
            max_commit_attempts: self.max_commit_attempts,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub active_watches: u64,
}

/// Frame encoding of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Binary,
    Json,
}

/// The sync server.
#[derive(Clone)]
pub struct SyncServer {
    config: ServerConfig,
    hub: SyncHub,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server, opening the RocksDB store when `storage_path` is
    /// set and an in-memory store otherwise.
    pub fn new(config: ServerConfig) -> SyncResult<Self> {
        let hub = match &config.storage_path {
            Some(path) => {
                let store = RocksStore::open(StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                })?;
                SyncHub::new(
                    Arc::new(store),
                    config.broadcast_capacity,
                    config.repository_config(),
                )
            }
            None => SyncHub::new(
                Arc::new(crate::storage::MemoryStore::new()),
                config.broadcast_capacity,
                config.repository_config(),
            ),
        };
        Ok(Self::with_hub(config, hub))
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        let config = ServerConfig::default();
        let hub = SyncHub::new(
            Arc::new(crate::storage::MemoryStore::new()),
            config.broadcast_capacity,
            config.repository_config(),
        );
        Self::with_hub(config, hub)
    }

    /// Serve an existing hub.
    pub fn with_hub(config: ServerConfig, hub: SyncHub) -> Self {
        Self {
            config,
            hub,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Sync server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = self.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (event_tx, mut event_rx) =
            mpsc::channel::<ServerMessage>(self.config.broadcast_capacity.max(1));
        let mut watches: HashMap<Topic, JoinHandle<()>> = HashMap::new();
        let mut encoding = Encoding::Binary;

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let (decoded, frame_len) = match msg {
                            Some(Ok(Message::Binary(data))) => {
                                encoding = Encoding::Binary;
                                (ClientMessage::decode(&data), data.len())
                            }
                            Some(Ok(Message::Text(text))) => {
                                encoding = Encoding::Json;
                                (ClientMessage::from_json(text.as_str()), text.len())
                            }
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                                continue;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        {
                            let mut s = self.stats.write().await;
                            s.total_messages += 1;
                            s.total_bytes += frame_len as u64;
                        }

                        let message = match decoded {
                            Ok(message) => message,
                            Err(e) => {
                                log::warn!("Failed to decode message from {addr}: {e}");
                                let error = RemoteError::new(ErrorCode::BadRequest, e.to_string());
                                let reply = ServerMessage::Reply {
                                    request_id: 0,
                                    result: Err(error),
                                };
                                send(&mut ws_sender, &reply, encoding).await?;
                                continue;
                            }
                        };

                        match message {
                            ClientMessage::Call { request_id, editor, request } => {
                                let result = self.hub.dispatch(editor.as_ref(), request).await;
                                {
                                    let mut s = self.stats.write().await;
                                    s.total_calls += 1;
                                    if result.is_err() {
                                        s.failed_calls += 1;
                                    }
                                }
                                let reply = ServerMessage::Reply { request_id, result };
                                send(&mut ws_sender, &reply, encoding).await?;
                            }
                            ClientMessage::Watch(topic) => {
                                if watches.contains_key(&topic) {
                                    continue;
                                }
                                if watches.len() >= self.config.max_watches_per_connection {
                                    log::warn!("{addr} hit the watch limit, ignoring {topic}");
                                    continue;
                                }
                                let subscription = self.hub.subscribe(topic.clone()).await;
                                let handle = forward(subscription, event_tx.clone());
                                watches.insert(topic.clone(), handle);
                                self.stats.write().await.active_watches += 1;
                                log::debug!("{addr} watching {topic}");
                            }
                            ClientMessage::Unwatch(topic) => {
                                if let Some(handle) = watches.remove(&topic) {
                                    handle.abort();
                                    self.stats.write().await.active_watches -= 1;
                                    log::debug!("{addr} stopped watching {topic}");
                                }
                            }
                            ClientMessage::Ping => {
                                send(&mut ws_sender, &ServerMessage::Pong, encoding).await?;
                            }
                        }
                    }

                    Some(event) = event_rx.recv() => {
                        send(&mut ws_sender, &event, encoding).await?;
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        let watched = watches.len() as u64;
        for (_, handle) in watches.drain() {
            handle.abort();
        }
        {
            let mut s = self.stats.write().await;
            s.active_connections -= 1;
            s.active_watches -= watched;
        }

        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &SyncHub {
        &self.hub
    }
}

/// Forward `subscription` into a connection's outbound queue until the
/// handle is aborted or the queue closes.
fn forward(mut subscription: Subscription, events: mpsc::Sender<ServerMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = subscription.recv().await {
            let message = match notification {
                Notification::Changed(event) => ServerMessage::Changed(event),
                Notification::Lagged(missed) => ServerMessage::Lagged {
                    topic: subscription.topic().clone(),
                    missed,
                },
            };
            if events.send(message).await.is_err() {
                break;
            }
        }
    })
}

async fn send<S>(sink: &mut S, message: &ServerMessage, encoding: Encoding) -> Result<(), BoxError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = match encoding {
        Encoding::Binary => Message::Binary(message.encode()?.into()),
        Encoding::Json => Message::Text(message.to_json()?.into()),
    };
    sink.send(frame).await?;
    Ok(())
}
