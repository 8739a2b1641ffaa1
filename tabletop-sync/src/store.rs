//! Authoritative entity → placement store.
//!
//! One `tokio::sync::RwLock` guards the whole table, so every `set` and
//! `reset` is serialized and a `get` always copies a consistent snapshot.
//! Last write wins; arrival order at the lock is the only ordering.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tabletop_core::{EntityId, ModelError, Placement, PlacementUpdate, Snapshot};
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Table contents behind the store lock.
#[derive(Debug, Clone)]
pub struct Table {
    cards: HashMap<EntityId, Placement>,
    last_update: DateTime<Utc>,
}

impl Table {
    fn new(snapshot: Snapshot) -> Self {
        Self {
            cards: snapshot.cards,
            last_update: Utc::now(),
        }
    }

    /// Upsert one placement. Rejected updates leave the table untouched.
    pub fn set(&mut self, update: &PlacementUpdate) -> Result<(), ModelError> {
        update.validate()?;
        self.cards
            .insert(update.entity_id.clone(), update.placement.clone());
        self.last_update = Utc::now();
        Ok(())
    }

    /// Replace the whole mapping; `None` empties it.
    pub fn reset(&mut self, snapshot: Option<Snapshot>) -> Result<(), ModelError> {
        let snapshot = snapshot.unwrap_or_default();
        snapshot.validate()?;
        self.cards = snapshot.cards;
        self.last_update = Utc::now();
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            cards: self.cards.clone(),
        }
    }

    pub fn placement(&self, entity_id: &str) -> Option<&Placement> {
        self.cards.get(entity_id)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }
}

/// Point-in-time copy of the table plus its last mutation time.
#[derive(Debug, Clone)]
pub struct StateView {
    pub snapshot: Snapshot,
    pub last_update: DateTime<Utc>,
}

/// Single-writer placement store shared by both transports.
#[derive(Debug)]
pub struct PlacementStore {
    table: RwLock<Table>,
}

impl Default for PlacementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlacementStore {
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::default())
    }

    /// Create pre-populated, e.g. from the initial deal.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            table: RwLock::new(Table::new(snapshot)),
        }
    }

    pub async fn get(&self) -> Snapshot {
        self.table.read().await.snapshot()
    }

    pub async fn view(&self) -> StateView {
        let table = self.table.read().await;
        StateView {
            snapshot: table.snapshot(),
            last_update: table.last_update(),
        }
    }

    pub async fn placement(&self, entity_id: &str) -> Option<Placement> {
        self.table.read().await.placement(entity_id).cloned()
    }

    pub async fn set(&self, update: &PlacementUpdate) -> Result<(), ModelError> {
        // Validate before queueing for the write lock.
        update.validate()?;
        self.table.write().await.set(update)
    }

    pub async fn reset(&self, snapshot: Option<Snapshot>) -> Result<(), ModelError> {
        if let Some(s) = &snapshot {
            s.validate()?;
        }
        self.table.write().await.reset(snapshot)
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    /// Exclusive access for callers that must act while the write is held.
    pub async fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().await
    }
}
