//! Connection seam of the real-time channel.
//!
//! A [`Transport`] opens one bidirectional text connection per client and
//! event. [`MemoryHub`] is the in-process implementation: a relay that fans
//! every frame a client sends out to all clients of the same event,
//! including the sender, the way a broadcast server does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Close code of an orderly shutdown; anything else is abnormal.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when a connection vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

const FRAME_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(u16),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("connection closed")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// An open connection: frames to the server go out through `outbound`,
/// frames from the server arrive on `inbound`. Dropping `outbound` hangs up.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, event_id: &str, client_id: &str) -> Result<Connection, ChannelError>;
}

struct Peer {
    id: u64,
    client_id: String,
    to_client: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct HubInner {
    rooms: Mutex<HashMap<String, Vec<Peer>>>,
    refuse: AtomicBool,
    connects: AtomicUsize,
    next_peer: AtomicU64,
}

/// In-process broadcast relay, one room per event.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every connect attempt fails.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Connect attempts seen so far, refused ones included.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub async fn peer_count(&self, event_id: &str) -> usize {
        self.inner
            .rooms
            .lock()
            .await
            .get(event_id)
            .map_or(0, Vec::len)
    }

    pub async fn client_ids(&self, event_id: &str) -> Vec<String> {
        self.inner
            .rooms
            .lock()
            .await
            .get(event_id)
            .map(|peers| peers.iter().map(|peer| peer.client_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Close every live connection with `code`.
    pub async fn drop_all(&self, code: u16) {
        let rooms = std::mem::take(&mut *self.inner.rooms.lock().await);
        for peer in rooms.into_values().flatten() {
            let _ = peer.to_client.try_send(Frame::Close(code));
        }
    }

    /// Push a raw frame to every client of an event, as the server would.
    pub async fn inject(&self, event_id: &str, text: impl Into<String>) {
        self.inner.relay(event_id, text.into()).await;
    }
}

impl HubInner {
    async fn relay(&self, event_id: &str, text: String) {
        let rooms = self.rooms.lock().await;
        let Some(peers) = rooms.get(event_id) else {
            return;
        };
        for peer in peers {
            if peer.to_client.try_send(Frame::Text(text.clone())).is_err() {
                tracing::debug!(client_id = %peer.client_id, "Hub dropped frame for slow client");
            }
        }
    }

    async fn leave(&self, event_id: &str, peer_id: u64) {
        let mut rooms = self.rooms.lock().await;
        if let Some(peers) = rooms.get_mut(event_id) {
            peers.retain(|peer| peer.id != peer_id);
            if peers.is_empty() {
                rooms.remove(event_id);
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryHub {
    async fn connect(&self, event_id: &str, client_id: &str) -> Result<Connection, ChannelError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::ConnectFailed("hub is refusing connections".to_string()));
        }

        let (outbound, mut from_client) = mpsc::channel(FRAME_BUFFER);
        let (to_client, inbound) = mpsc::channel(FRAME_BUFFER);
        let peer_id = self.inner.next_peer.fetch_add(1, Ordering::SeqCst);
        self.inner
            .rooms
            .lock()
            .await
            .entry(event_id.to_string())
            .or_default()
            .push(Peer {
                id: peer_id,
                client_id: client_id.to_string(),
                to_client,
            });

        let hub = Arc::clone(&self.inner);
        let event_id = event_id.to_string();
        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                match frame {
                    Frame::Text(text) => hub.relay(&event_id, text).await,
                    Frame::Close(_) => break,
                }
            }
            hub.leave(&event_id, peer_id).await;
        });

        Ok(Connection { outbound, inbound })
    }
}
