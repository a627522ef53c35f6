//! WebSocket client for the sync server.
//!
//! Provides:
//! - request/reply calls matched by request id
//! - topic watches whose change events arrive on a channel
//! - ping/pong liveness checks
//!
//! The client always speaks binary (bincode) frames. Events are hints to
//! re-read: when the event channel is full they are dropped rather than
//! holding up replies. Once either socket task stops, every outstanding and
//! later call fails with [`ProtocolError::ConnectionClosed`].

use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use trellis_core::EditorId;

use crate::broadcast::{ChangeEvent, Topic};
use crate::protocol::{ClientMessage, ProtocolError, RemoteError, Request, Response, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// What a watch delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Changed(ChangeEvent),
    /// The server dropped `missed` events on `topic`
    Lagged { topic: Topic, missed: u64 },
}

/// A failed call.
#[derive(Debug, Clone)]
pub enum ClientError {
    /// The request never got an answer
    Protocol(ProtocolError),
    /// The server answered with an error
    Remote(RemoteError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Protocol(e) => write!(f, "{e}"),
            ClientError::Remote(e) => write!(f, "Remote error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        ClientError::Protocol(e)
    }
}

impl From<RemoteError> for ClientError {
    fn from(e: RemoteError) -> Self {
        ClientError::Remote(e)
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Response, RemoteError>>>>>;
type PongWaiters = Arc<Mutex<VecDeque<oneshot::Sender<()>>>>;

/// State shared by the client and its socket tasks.
#[derive(Clone)]
struct Link {
    state: Arc<RwLock<ConnectionState>>,
    /// Calls awaiting their reply
    pending: Pending,
    pong_waiters: PongWaiters,
}

impl Link {
    fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Connected)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            pong_waiters: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    async fn is_closed(&self) -> bool {
        *self.state.read().await == ConnectionState::Disconnected
    }

    /// Mark the link closed, then drop every waiter so their calls fail.
    /// The state flips first: a waiter registered after the clear sees it.
    async fn close(&self) {
        *self.state.write().await = ConnectionState::Disconnected;
        self.pending.lock().await.clear();
        self.pong_waiters.lock().await.clear();
    }
}

/// The sync client.
pub struct SyncClient {
    /// Identity attached to every call
    editor: Option<EditorId>,
    link: Link,
    /// Channel to the WebSocket writer task
    outgoing_tx: mpsc::Sender<Vec<u8>>,
    next_request_id: AtomicU64,
    event_rx: Option<mpsc::Receiver<RemoteEvent>>,
}

impl SyncClient {
    /// Connect to `url` (e.g. `ws://127.0.0.1:9090`). Calls carry `editor`.
    pub async fn connect(url: &str, editor: Option<EditorId>) -> Result<Self, ProtocolError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let link = Link::new();
        let (event_tx, event_rx) = mpsc::channel::<RemoteEvent>(256);

        // Writer task: forward outgoing channel to WebSocket
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Vec<u8>>(256);
        {
            let link = link.clone();
            tokio::spawn(async move {
                while let Some(data) = outgoing_rx.recv().await {
                    if let Err(e) = ws_writer.send(Message::Binary(data.into())).await {
                        log::debug!("Sync connection write failed: {e}");
                        link.close().await;
                        break;
                    }
                }
                let _ = ws_writer.close().await;
            });
        }

        // Reader task: route replies, events and pongs
        {
            let link = link.clone();
            tokio::spawn(async move {
                while let Some(msg) = ws_reader.next().await {
                    let bytes = match msg {
                        Ok(Message::Binary(data)) => data,
                        Ok(Message::Close(_)) | Err(_) => break,
                        Ok(_) => continue,
                    };
                    let message = match ServerMessage::decode(&bytes) {
                        Ok(message) => message,
                        Err(e) => {
                            log::warn!("Dropping undecodable server frame: {e}");
                            continue;
                        }
                    };
                    match message {
                        ServerMessage::Reply { request_id, result } => {
                            match link.pending.lock().await.remove(&request_id) {
                                Some(waiter) => {
                                    let _ = waiter.send(result);
                                }
                                None => log::warn!("Reply for unknown request {request_id}"),
                            }
                        }
                        ServerMessage::Changed(event) => {
                            deliver(&event_tx, RemoteEvent::Changed(event));
                        }
                        ServerMessage::Lagged { topic, missed } => {
                            deliver(&event_tx, RemoteEvent::Lagged { topic, missed });
                        }
                        ServerMessage::Pong => {
                            if let Some(waiter) = link.pong_waiters.lock().await.pop_front() {
                                let _ = waiter.send(());
                            }
                        }
                    }
                }

                link.close().await;
                log::info!("Sync connection closed");
            });
        }

        log::info!("Connected to sync server at {url}");

        Ok(Self {
            editor,
            link,
            outgoing_tx,
            next_request_id: AtomicU64::new(1),
            event_rx: Some(event_rx),
        })
    }

    /// Take the change event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RemoteEvent>> {
        self.event_rx.take()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.link.state.read().await
    }

    pub fn editor(&self) -> Option<&EditorId> {
        self.editor.as_ref()
    }

    /// Send `request` and wait for its reply.
    pub async fn call(&self, request: Request) -> Result<Response, ClientError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.link.pending.lock().await.insert(request_id, tx);
        if self.link.is_closed().await {
            self.link.pending.lock().await.remove(&request_id);
            return Err(ProtocolError::ConnectionClosed.into());
        }

        let message = ClientMessage::Call {
            request_id,
            editor: self.editor.clone(),
            request,
        };
        if let Err(e) = self.send(&message).await {
            self.link.pending.lock().await.remove(&request_id);
            return Err(e.into());
        }

        match rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProtocolError::ConnectionClosed.into()),
        }
    }

    /// Start receiving change events for `topic`.
    pub async fn watch(&self, topic: Topic) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Watch(topic)).await
    }

    pub async fn unwatch(&self, topic: Topic) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Unwatch(topic)).await
    }

    /// Round-trip a ping. Every frame sent before it has been handled by the
    /// server once this returns.
    pub async fn ping(&self) -> Result<(), ProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.link.pong_waiters.lock().await.push_back(tx);
        if self.link.is_closed().await {
            self.link.pong_waiters.lock().await.clear();
            return Err(ProtocolError::ConnectionClosed);
        }
        self.send(&ClientMessage::Ping).await?;
        rx.await.map_err(|_| ProtocolError::ConnectionClosed)
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), ProtocolError> {
        let encoded = message.encode()?;
        self.outgoing_tx
            .send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

/// Hand `event` to the watcher without waiting on it.
fn deliver(events: &mpsc::Sender<RemoteEvent>, event: RemoteEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => log::debug!("Event channel full, dropping {event:?}"),
        // Nobody took the receiver, or it was dropped
        Err(TrySendError::Closed(_)) => {}
    }
}
