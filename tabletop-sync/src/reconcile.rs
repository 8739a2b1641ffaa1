//! Client-side reconciliation of remote placements.
//!
//! The presentation layer is external; it only has to accept "entity moved
//! to this placement". A local drag owns its entity: remote updates for that
//! one entity are held back until the drag ends. A release sends the local
//! drop, which wins by arriving at the store last, so the held update is
//! dropped. A cancelled drag sends nothing, so the held update is applied.

use std::collections::HashMap;
use tabletop_core::{EntityId, Placement, PlacementUpdate, Snapshot};

/// Seam to whatever draws the table.
pub trait Presentation {
    fn place(&mut self, entity_id: &EntityId, placement: &Placement);
}

/// In-memory presentation for headless clients and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tableau {
    cards: HashMap<EntityId, Placement>,
}

impl Tableau {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_id: &str) -> Option<&Placement> {
        self.cards.get(entity_id)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            cards: self.cards.clone(),
        }
    }
}

impl Presentation for Tableau {
    fn place(&mut self, entity_id: &EntityId, placement: &Placement) {
        self.cards.insert(entity_id.clone(), placement.clone());
    }
}

pub struct Reconciler<P> {
    presentation: P,
    /// Last placement handed to the presentation, per entity
    table: Snapshot,
    dragging: Option<EntityId>,
    /// Latest remote placement that arrived for the dragged entity
    deferred: Option<Placement>,
}

impl<P: Presentation> Reconciler<P> {
    pub fn new(presentation: P) -> Self {
        Self {
            presentation,
            table: Snapshot::new(),
            dragging: None,
            deferred: None,
        }
    }

    /// Apply every placement of a snapshot. Idempotent.
    pub fn apply(&mut self, snapshot: &Snapshot) -> usize {
        let mut applied = 0;
        for (entity_id, placement) in &snapshot.cards {
            if self.place_unless_dragged(entity_id, placement) {
                applied += 1;
            }
        }
        applied
    }

    /// Apply one remote placement, touching no other entity.
    ///
    /// Returns `false` if the entity is being dragged locally.
    pub fn apply_one(&mut self, update: &PlacementUpdate) -> bool {
        self.place_unless_dragged(&update.entity_id, &update.placement)
    }

    fn place_unless_dragged(&mut self, entity_id: &EntityId, placement: &Placement) -> bool {
        if self.dragging.as_ref() == Some(entity_id) {
            log::debug!("Deferring remote placement of {entity_id}: local drag in progress");
            self.deferred = Some(placement.clone());
            return false;
        }
        self.place(entity_id, placement);
        true
    }

    fn place(&mut self, entity_id: &EntityId, placement: &Placement) {
        self.presentation.place(entity_id, placement);
        self.table.cards.insert(entity_id.clone(), placement.clone());
    }

    pub fn begin_drag(&mut self, entity_id: impl Into<EntityId>) {
        self.cancel_drag();
        self.dragging = Some(entity_id.into());
    }

    /// Abandon a drag without sending anything.
    ///
    /// A remote placement that arrived during the drag is applied now.
    pub fn cancel_drag(&mut self) -> Option<EntityId> {
        let entity_id = self.dragging.take()?;
        if let Some(placement) = self.deferred.take() {
            self.place(&entity_id, &placement);
        }
        Some(entity_id)
    }

    /// Finish a local move: apply it locally and hand back the update to send.
    ///
    /// The local drop supersedes any remote placement deferred during the drag.
    pub fn release(&mut self, update: PlacementUpdate) -> PlacementUpdate {
        if self.dragging.as_ref() == Some(&update.entity_id) {
            self.dragging = None;
            self.deferred = None;
        }
        self.place(&update.entity_id, &update.placement);
        update
    }

    /// Placements as last shown, including local moves.
    pub fn table(&self) -> &Snapshot {
        &self.table
    }

    pub fn deferred(&self) -> Option<&Placement> {
        self.deferred.as_ref()
    }

    pub fn dragging(&self) -> Option<&EntityId> {
        self.dragging.as_ref()
    }

    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    pub fn presentation_mut(&mut self) -> &mut P {
        &mut self.presentation
    }

    pub fn into_presentation(self) -> P {
        self.presentation
    }
}
