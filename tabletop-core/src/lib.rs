//! # tabletop-core: shared table model
//!
//! Entities (cards) sit in containers at a [`Position`]. The pair
//! (container, position) is a [`Placement`]; the whole table is a
//! [`Snapshot`]. The [`deck`] module seeds the initial snapshot.

pub mod deck;
pub mod model;

pub use deck::{
    accepts_drop, can_pick_up, deal, top_of_pool, CardId, Suit, POOL_CONTAINER, STACK_OFFSET,
};
pub use model::{
    ContainerId, EntityId, ModelError, Placement, PlacementUpdate, Position, Snapshot,
};
