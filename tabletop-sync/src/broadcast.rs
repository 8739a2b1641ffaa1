//! Connection registry and best-effort fan-out.
//!
//! Every live push connection owns a bounded outbox. Fan-out walks the
//! registry and `try_send`s a shared pre-encoded frame into each outbox;
//! nothing here ever awaits a peer. A full or closed outbox counts as a
//! failed delivery and the peer is pruned, which closes its outbox and
//! ends its connection task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use crate::protocol::{ConnectionId, Frame};

/// Snapshot of fan-out health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub peers_pruned: u64,
    pub active_peers: usize,
}

/// Atomic counters so fan-out never takes a second lock for bookkeeping.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    peers_pruned: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            peers_pruned: AtomicU64::new(0),
        }
    }
}

/// Who receives a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every registered connection.
    All,
    /// Every connection except the originator of the update.
    AllExcept(ConnectionId),
}

impl Audience {
    /// Updates from the request/response path have no originating peer.
    pub fn excluding(origin: Option<ConnectionId>) -> Self {
        match origin {
            Some(id) => Audience::AllExcept(id),
            None => Audience::All,
        }
    }

    fn includes(&self, peer: &ConnectionId) -> bool {
        match self {
            Audience::All => true,
            Audience::AllExcept(origin) => origin != peer,
        }
    }
}

/// Set of currently open push connections.
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<ConnectionId, mpsc::Sender<Frame>>>,
    /// Frames buffered per peer before it counts as unreachable
    capacity: usize,
    stats: AtomicBroadcastStats,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            stats: AtomicBroadcastStats::new(),
        }
    }

    /// Register a connection, returning the receiving end of its outbox.
    pub async fn register(&self, id: ConnectionId) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.peers.write().await.insert(id, tx);
        log::debug!("Registered connection {id}");
        rx
    }

    /// Remove a connection. Returns whether it was still registered.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.peers.write().await.remove(id).is_some();
        if removed {
            log::debug!("Unregistered connection {id}");
        }
        removed
    }

    /// Deliver `frame` to every peer in `audience`.
    ///
    /// Returns the number of peers the frame was queued for. Peers whose
    /// outbox is full or closed are removed; no error leaves this call.
    pub async fn fanout(&self, audience: Audience, frame: &Frame) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;
        {
            let peers = self.peers.read().await;
            for (id, outbox) in peers.iter().filter(|(id, _)| audience.includes(id)) {
                match outbox.try_send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        log::warn!("Connection {id} outbox full, pruning");
                        failed.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::debug!("Connection {id} outbox closed, pruning");
                        failed.push(*id);
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut peers = self.peers.write().await;
            for id in &failed {
                peers.remove(id);
            }
            self.stats
                .peers_pruned
                .fetch_add(failed.len() as u64, Ordering::Relaxed);
        }

        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        log::trace!("Fan-out reached {delivered} peers, pruned {}", failed.len());
        delivered
    }

    /// Queue a frame for a single peer, e.g. an error reply.
    pub async fn send_to(&self, id: &ConnectionId, frame: Frame) -> bool {
        let peers = self.peers.read().await;
        match peers.get(id) {
            Some(outbox) => outbox.try_send(frame).is_ok(),
            None => false,
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.peers.read().await.contains_key(id)
    }

    pub async fn connection_ids(&self) -> Vec<ConnectionId> {
        self.peers.read().await.keys().copied().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            peers_pruned: self.stats.peers_pruned.load(Ordering::Relaxed),
            active_peers: self.peer_count().await,
        }
    }
}
