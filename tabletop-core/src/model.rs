//! Shared table model: entities, containers, positions and placements.
//!
//! Every type here is the unit of both storage and wire transfer, so the
//! serde shapes are part of the public contract:
//!
//! ```text
//! Placement        {"containerId": "hearts", "position": {"left": 10, "top": 20}}
//! PlacementUpdate  {"entityId": "card-hearts-7", "containerId": ..., "position": ...}
//! Snapshot         {"cards": {"card-hearts-7": Placement, ...}}
//! ```

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("entity id must not be empty")]
    EmptyEntityId,
    #[error("container id must not be empty")]
    EmptyContainerId,
    #[error("position coordinates must be finite, got ({left}, {top})")]
    NonFinitePosition { left: f64, top: f64 },
    #[error("not a card id: {0}")]
    UnknownCard(String),
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Stable identifier of one entity (a card), e.g. `card-hearts-7`.
    EntityId
);

string_id!(
    /// Label of a container. Membership is derived by scanning placements.
    ContainerId
);

/// Offset of an entity relative to its container's origin.
///
/// No bounds are enforced; negative and off-screen values are legal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(deserialize_with = "deserialize_length")]
    pub left: f64,
    #[serde(deserialize_with = "deserialize_length")]
    pub top: f64,
}

impl Position {
    pub fn new(left: f64, top: f64) -> Self {
        Self { left, top }
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite() && self.top.is_finite()
    }
}

/// Accepts `12`, `12.5`, `"12px"` or `"12"`.
fn deserialize_length<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    struct LengthVisitor;

    impl Visitor<'_> for LengthVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or a pixel length such as \"120px\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            let trimmed = v.trim();
            let number = trimmed.strip_suffix("px").unwrap_or(trimmed).trim_end();
            match number.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(n),
                _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
            }
        }
    }

    deserializer.deserialize_any(LengthVisitor)
}

/// The (container, position) assignment currently held by one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub container_id: ContainerId,
    pub position: Position,
}

impl Placement {
    pub fn new(container_id: impl Into<ContainerId>, position: Position) -> Self {
        Self {
            container_id: container_id.into(),
            position,
        }
    }
}

/// One entity moved to a position in a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementUpdate {
    pub entity_id: EntityId,
    #[serde(flatten)]
    pub placement: Placement,
}

impl PlacementUpdate {
    pub fn new(
        entity_id: impl Into<EntityId>,
        container_id: impl Into<ContainerId>,
        position: Position,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            placement: Placement::new(container_id, position),
        }
    }

    /// Shape check applied by every transport before touching the store.
    ///
    /// Unknown containers and out-of-bounds positions are accepted.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.entity_id.is_empty() {
            return Err(ModelError::EmptyEntityId);
        }
        validate_placement(&self.placement)
    }
}

pub(crate) fn validate_placement(placement: &Placement) -> Result<(), ModelError> {
    if placement.container_id.is_empty() {
        return Err(ModelError::EmptyContainerId);
    }
    if !placement.position.is_finite() {
        return Err(ModelError::NonFinitePosition {
            left: placement.position.left,
            top: placement.position.top,
        });
    }
    Ok(())
}

/// The full entity → placement mapping at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub cards: HashMap<EntityId, Placement>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn get(&self, entity_id: &str) -> Option<&Placement> {
        self.cards.get(entity_id)
    }

    pub fn insert(&mut self, update: PlacementUpdate) -> Option<Placement> {
        self.cards.insert(update.entity_id, update.placement)
    }

    /// Entities currently in `container`, derived by scanning.
    pub fn members<'a>(&'a self, container: &'a str) -> impl Iterator<Item = &'a EntityId> + 'a {
        self.cards
            .iter()
            .filter(move |(_, p)| p.container_id.as_str() == container)
            .map(|(id, _)| id)
    }

    /// Iterate placements as wire updates.
    pub fn updates(&self) -> impl Iterator<Item = PlacementUpdate> + '_ {
        self.cards.iter().map(|(id, placement)| PlacementUpdate {
            entity_id: id.clone(),
            placement: placement.clone(),
        })
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        for (id, placement) in &self.cards {
            if id.is_empty() {
                return Err(ModelError::EmptyEntityId);
            }
            validate_placement(placement)?;
        }
        Ok(())
    }
}

impl FromIterator<PlacementUpdate> for Snapshot {
    fn from_iter<I: IntoIterator<Item = PlacementUpdate>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for update in iter {
            snapshot.insert(update);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_placement_update_wire_shape() {
        let update = PlacementUpdate::new("E1", "suitX", Position::new(10.0, 20.0));
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(
            value,
            json!({
                "entityId": "E1",
                "containerId": "suitX",
                "position": {"left": 10.0, "top": 20.0}
            })
        );
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let snapshot: Snapshot = [PlacementUpdate::new("E1", "pool", Position::new(0.0, 0.0))]
            .into_iter()
            .collect();
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["cards"]["E1"]["containerId"], "pool");
        assert_eq!(value["cards"]["E1"]["position"]["left"], 0.0);
    }

    #[test]
    fn test_empty_snapshot_defaults_cards() {
        let snapshot: Snapshot = serde_json::from_str("{}").unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_position_accepts_pixel_strings() {
        let pos: Position =
            serde_json::from_value(json!({"left": "120px", "top": "-4.5px"})).unwrap();
        assert_eq!(pos, Position::new(120.0, -4.5));

        let pos: Position = serde_json::from_value(json!({"left": "7", "top": 3})).unwrap();
        assert_eq!(pos, Position::new(7.0, 3.0));
    }

    #[test]
    fn test_position_rejects_malformed() {
        assert!(serde_json::from_value::<Position>(json!({"left": "50%", "top": 0})).is_err());
        assert!(serde_json::from_value::<Position>(json!({"left": "abc", "top": 0})).is_err());
        assert!(serde_json::from_value::<Position>(json!({"left": 1})).is_err());
        assert!(serde_json::from_value::<Position>(json!([1, 2])).is_err());
        assert!(serde_json::from_value::<Position>(json!("10px")).is_err());
    }

    #[test]
    fn test_update_missing_field_rejected() {
        let missing_position = json!({"entityId": "E1", "containerId": "pool"});
        assert!(serde_json::from_value::<PlacementUpdate>(missing_position).is_err());

        let missing_container = json!({"entityId": "E1", "position": {"left": 0, "top": 0}});
        assert!(serde_json::from_value::<PlacementUpdate>(missing_container).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_ids() {
        let update = PlacementUpdate::new("", "pool", Position::default());
        assert_eq!(update.validate(), Err(ModelError::EmptyEntityId));

        let update = PlacementUpdate::new("E1", "", Position::default());
        assert_eq!(update.validate(), Err(ModelError::EmptyContainerId));
    }

    #[test]
    fn test_validate_accepts_unknown_container_and_offscreen() {
        let update = PlacementUpdate::new("E1", "nowhere", Position::new(-9000.0, 1e9));
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let update = PlacementUpdate::new("E1", "pool", Position::new(f64::NAN, 0.0));
        assert!(matches!(
            update.validate(),
            Err(ModelError::NonFinitePosition { .. })
        ));
    }

    #[test]
    fn test_members_scans_placements() {
        let snapshot: Snapshot = [
            PlacementUpdate::new("a", "hearts", Position::default()),
            PlacementUpdate::new("b", "deck", Position::default()),
            PlacementUpdate::new("c", "hearts", Position::default()),
        ]
        .into_iter()
        .collect();

        let mut hearts: Vec<&str> = snapshot.members("hearts").map(|id| id.as_str()).collect();
        hearts.sort();
        assert_eq!(hearts, vec!["a", "c"]);
        assert_eq!(snapshot.members("spades").count(), 0);
    }
}
