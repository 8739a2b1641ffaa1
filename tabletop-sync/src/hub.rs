//! Store + registry, shared by both transport adapters.
//!
//! ```text
//!  PUT /cards/{id} ──┐                         ┌──► peer B outbox
//!                    ├──► SyncHub ──► Store ───┤
//!  updatePlacement ──┘     (write lock held    └──► peer C outbox
//!   (from peer A)           across fan-out)
//! ```
//!
//! Fan-out frames are queued while the store write lock is held. Two updates
//! to the same entity therefore reach every outbox in store order, and a
//! joining peer's initial snapshot lines up exactly with the first frame in
//! its outbox.

use std::sync::atomic::{AtomicU64, Ordering};
use tabletop_core::{PlacementUpdate, Snapshot};
use tokio::sync::mpsc;

use crate::broadcast::{Audience, BroadcastStats, ConnectionRegistry};
use crate::protocol::{ConnectionId, Frame, ProtocolError, ServerMessage};
use crate::store::{PlacementStore, StateView};

/// Hub counters, exposed through the stats endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubStats {
    pub placements_applied: u64,
    pub resets: u64,
    pub broadcast: BroadcastStats,
}

/// A newly registered push peer.
pub struct Joined {
    pub id: ConnectionId,
    pub outbox: mpsc::Receiver<Frame>,
    /// Store contents at registration time
    pub snapshot: Snapshot,
}

pub struct SyncHub {
    store: PlacementStore,
    registry: ConnectionRegistry,
    placements_applied: AtomicU64,
    resets: AtomicU64,
}

impl SyncHub {
    pub fn new(store: PlacementStore, outbox_capacity: usize) -> Self {
        Self {
            store,
            registry: ConnectionRegistry::new(outbox_capacity),
            placements_applied: AtomicU64::new(0),
            resets: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &PlacementStore {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.store.get().await
    }

    pub async fn view(&self) -> StateView {
        self.store.view().await
    }

    /// Apply one placement and fan it out to every peer but `origin`.
    ///
    /// `origin` is `None` for request/response writes, which reach every
    /// push peer.
    pub async fn update_placement(
        &self,
        origin: Option<ConnectionId>,
        update: PlacementUpdate,
    ) -> Result<PlacementUpdate, ProtocolError> {
        update.validate()?;
        let frame = ServerMessage::PlacementChanged(update.clone()).encode_shared()?;

        let mut table = self.store.write().await;
        table.set(&update)?;
        self.registry
            .fanout(Audience::excluding(origin), &frame)
            .await;
        drop(table);

        self.placements_applied.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "{} -> {} ({}, {})",
            update.entity_id,
            update.placement.container_id,
            update.placement.position.left,
            update.placement.position.top
        );
        Ok(update)
    }

    /// Replace the table and tell every peer, the initiator included.
    pub async fn reset(&self, snapshot: Option<Snapshot>) -> Result<Snapshot, ProtocolError> {
        let snapshot = snapshot.unwrap_or_default();
        snapshot.validate()?;
        let frame = ServerMessage::StateReset(snapshot.clone()).encode_shared()?;

        let mut table = self.store.write().await;
        table.reset(Some(snapshot.clone()))?;
        let delivered = self.registry.fanout(Audience::All, &frame).await;
        drop(table);

        self.resets.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "State reset to {} cards, broadcast to {delivered} peers",
            snapshot.len()
        );
        Ok(snapshot)
    }

    /// Register a push peer and capture the snapshot it must start from.
    pub async fn join(&self) -> Joined {
        let id = ConnectionId::new();
        // Holding the write side keeps updates from slipping in between the
        // snapshot and the registration.
        let table = self.store.write().await;
        let outbox = self.registry.register(id).await;
        let snapshot = table.snapshot();
        drop(table);

        Joined {
            id,
            outbox,
            snapshot,
        }
    }

    pub async fn leave(&self, id: &ConnectionId) -> bool {
        self.registry.unregister(id).await
    }

    /// Reply to one peer only.
    pub async fn send_to(&self, id: &ConnectionId, message: &ServerMessage) -> bool {
        match message.encode_shared() {
            Ok(frame) => self.registry.send_to(id, frame).await,
            Err(e) => {
                log::error!("Failed to encode {} for {id}: {e}", message.kind());
                false
            }
        }
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            placements_applied: self.placements_applied.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            broadcast: self.registry.stats().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletop_core::Position;

    fn hub() -> SyncHub {
        SyncHub::new(PlacementStore::new(), 32)
    }

    fn decode(frame: &Frame) -> ServerMessage {
        ServerMessage::decode(frame).unwrap()
    }

    #[tokio::test]
    async fn test_update_reaches_others_not_origin() {
        let hub = hub();
        let mut a = hub.join().await;
        let mut b = hub.join().await;
        let mut c = hub.join().await;

        let update = PlacementUpdate::new("E1", "suitX", Position::new(10.0, 20.0));
        hub.update_placement(Some(a.id), update.clone()).await.unwrap();

        for peer in [&mut b, &mut c] {
            match decode(&peer.outbox.recv().await.unwrap()) {
                ServerMessage::PlacementChanged(got) => assert_eq!(got, update),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(a.outbox.try_recv().is_err());

        let placement = hub.snapshot().await.get("E1").cloned().unwrap();
        assert_eq!(placement.container_id.as_str(), "suitX");
    }

    #[tokio::test]
    async fn test_request_path_update_reaches_everyone() {
        let hub = hub();
        let mut a = hub.join().await;
        let mut b = hub.join().await;

        let update = PlacementUpdate::new("E1", "C1", Position::default());
        hub.update_placement(None, update).await.unwrap();

        assert!(a.outbox.recv().await.is_some());
        assert!(b.outbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_reset_reaches_everyone() {
        let hub = hub();
        let mut a = hub.join().await;
        let mut b = hub.join().await;
        hub.update_placement(Some(a.id), PlacementUpdate::new("E1", "C1", Position::default()))
            .await
            .unwrap();
        let _ = b.outbox.recv().await;

        hub.reset(None).await.unwrap();

        for peer in [&mut a, &mut b] {
            match decode(&peer.outbox.recv().await.unwrap()) {
                ServerMessage::StateReset(snapshot) => assert!(snapshot.is_empty()),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(hub.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_snapshot_matches_store() {
        let hub = hub();
        hub.update_placement(None, PlacementUpdate::new("E1", "C1", Position::new(1.0, 1.0)))
            .await
            .unwrap();

        let mut joined = hub.join().await;
        assert_eq!(joined.snapshot, hub.snapshot().await);
        // Nothing queued before the snapshot was taken.
        assert!(joined.outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_update_not_broadcast() {
        let hub = hub();
        let mut a = hub.join().await;

        let bad = PlacementUpdate::new("E1", "", Position::default());
        assert!(hub.update_placement(None, bad).await.is_err());
        assert!(a.outbox.try_recv().is_err());
        assert!(hub.snapshot().await.is_empty());
        assert_eq!(hub.stats().await.placements_applied, 0);
    }

    #[tokio::test]
    async fn test_same_entity_fanout_order_matches_store_order() {
        let hub = hub();
        let mut watcher = hub.join().await;

        hub.update_placement(None, PlacementUpdate::new("E1", "C1", Position::default()))
            .await
            .unwrap();
        hub.update_placement(None, PlacementUpdate::new("E1", "C2", Position::default()))
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let frame = watcher.outbox.recv().await.unwrap();
            if let ServerMessage::PlacementChanged(u) = decode(&frame) {
                seen.push(u.placement.container_id.to_string());
            }
        }
        assert_eq!(seen, vec!["C1", "C2"]);
        assert_eq!(
            hub.snapshot().await.get("E1").unwrap().container_id.as_str(),
            "C2"
        );
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let hub = hub();
        let a = hub.join().await;
        assert!(hub.leave(&a.id).await);
        assert_eq!(hub.registry().peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let hub = hub();
        hub.update_placement(None, PlacementUpdate::new("E1", "C1", Position::default()))
            .await
            .unwrap();
        hub.reset(None).await.unwrap();

        let stats = hub.stats().await;
        assert_eq!(stats.placements_applied, 1);
        assert_eq!(stats.resets, 1);
    }
}
