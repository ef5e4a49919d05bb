//! Live WebSocket connections.
//!
//! Every connection is owned by exactly one writer task holding the socket
//! sink. Other components never touch the socket; they push [`Outbound`]
//! items into the entry's channel and the writer drains it in order.
//!
//! ```text
//! BroadcastQueue ──┐
//!                  ├──► ConnectionEntry.tx ──► writer task ──► socket
//! ACK (reader)  ───┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// An item queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Pre-encoded binary frame; clones share one buffer.
    Frame(Bytes),
    /// Close the socket and stop writing.
    Close,
}

/// One registered connection.
#[derive(Debug)]
pub struct ConnectionEntry {
    id: Uuid,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
    open: AtomicBool,
}

impl ConnectionEntry {
    /// Create an entry and the receiving half its writer task drains.
    pub fn new(addr: SocketAddr) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let entry = Arc::new(Self {
            id: Uuid::new_v4(),
            addr,
            tx,
            open: AtomicBool::new(true),
        });
        (entry, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a frame. Returns false once the writer is gone.
    pub fn send(&self, frame: Bytes) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    /// Mark closed and ask the writer to close the socket.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }
}

/// Connection id → entry.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<Uuid, Arc<ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, entry: Arc<ConnectionEntry>) {
        let mut entries = self.entries.write().await;
        entries.insert(entry.id(), entry);
        log::debug!("Registry: {} connections", entries.len());
    }

    pub async fn remove(&self, id: &Uuid) -> Option<Arc<ConnectionEntry>> {
        let removed = self.entries.write().await.remove(id);
        if let Some(ref entry) = removed {
            entry.close();
        }
        removed
    }

    /// Visit every open entry. Closed entries and entries for which `f`
    /// returns false are returned so the caller can evict them.
    pub async fn for_each<F>(&self, mut f: F) -> Vec<Uuid>
    where
        F: FnMut(&ConnectionEntry) -> bool,
    {
        let entries = self.entries.read().await;
        let mut failed = Vec::new();
        for entry in entries.values() {
            if !entry.is_open() {
                failed.push(entry.id());
                continue;
            }
            if !f(entry) {
                failed.push(entry.id());
            }
        }
        failed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every connection and empty the registry.
    pub async fn close_all(&self) {
        let mut entries = self.entries.write().await;
        for entry in entries.values() {
            entry.close();
        }
        entries.clear();
    }
}
