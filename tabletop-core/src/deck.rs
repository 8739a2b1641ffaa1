//! Deck construction and the initial deal.
//!
//! 48 cards: four suits with ranks 1..=12. Every card is dealt face-up into
//! the pool container, stacked left to right in shuffled order.

use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use std::str::FromStr;

use crate::model::{ContainerId, EntityId, ModelError, Placement, Position, Snapshot};

/// Container every card starts in.
pub const POOL_CONTAINER: &str = "deck";

/// Horizontal offset between two consecutive cards of the dealt stack.
pub const STACK_OFFSET: f64 = 20.0;

pub const RANKS: std::ops::RangeInclusive<u8> = 1..=12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Suit {
    Diamonds,
    Hearts,
    Spades,
    Clubs,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Diamonds, Suit::Hearts, Suit::Spades, Suit::Clubs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Suit::Diamonds => "diamonds",
            Suit::Hearts => "hearts",
            Suit::Spades => "spades",
            Suit::Clubs => "clubs",
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            Suit::Diamonds => '♦',
            Suit::Hearts => '♥',
            Suit::Spades => '♠',
            Suit::Clubs => '♣',
        }
    }

    /// The container collecting this suit.
    pub fn container(&self) -> ContainerId {
        ContainerId::from(self.as_str())
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Suit {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Suit::ALL
            .into_iter()
            .find(|suit| suit.as_str() == s)
            .ok_or_else(|| ModelError::UnknownCard(s.to_string()))
    }
}

/// A card identity, encoded in entity ids as `card-<suit>-<rank>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CardId {
    pub suit: Suit,
    pub rank: u8,
}

impl CardId {
    pub fn new(suit: Suit, rank: u8) -> Self {
        Self { suit, rank }
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::new(self.to_string())
    }

    pub fn parse(id: &str) -> Result<Self, ModelError> {
        let unknown = || ModelError::UnknownCard(id.to_string());
        let rest = id.strip_prefix("card-").ok_or_else(unknown)?;
        let (suit, rank) = rest.rsplit_once('-').ok_or_else(unknown)?;
        let suit = suit.parse::<Suit>().map_err(|_| unknown())?;
        let rank = rank.parse::<u8>().map_err(|_| unknown())?;
        if !RANKS.contains(&rank) {
            return Err(unknown());
        }
        Ok(Self { suit, rank })
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "card-{}-{}", self.suit, self.rank)
    }
}

/// All 48 cards in suit-major order.
pub fn full_deck() -> Vec<CardId> {
    Suit::ALL
        .into_iter()
        .flat_map(|suit| RANKS.map(move |rank| CardId::new(suit, rank)))
        .collect()
}

/// Every container a table has: the pool plus one per suit.
pub fn containers() -> Vec<ContainerId> {
    std::iter::once(ContainerId::from(POOL_CONTAINER))
        .chain(Suit::ALL.into_iter().map(|suit| suit.container()))
        .collect()
}

/// Shuffle a fresh deck and stack it in the pool.
///
/// Pure apart from `rng`: a seeded generator always yields the same deal.
pub fn deal<R: Rng + ?Sized>(rng: &mut R) -> Snapshot {
    let mut deck = full_deck();
    deck.shuffle(rng);

    let snapshot = Snapshot {
        cards: deck
            .iter()
            .enumerate()
            .map(|(index, card)| {
                let position = Position::new(index as f64 * STACK_OFFSET, 0.0);
                (card.entity_id(), Placement::new(POOL_CONTAINER, position))
            })
            .collect(),
    };
    log::debug!("Dealt {} cards into '{POOL_CONTAINER}'", snapshot.len());
    snapshot
}

/// Drop rule: a card lands on its own suit's container or back on the pool.
pub fn accepts_drop(container: &str, card: &CardId) -> bool {
    container == POOL_CONTAINER || container == card.suit.as_str()
}

/// Card on top of the pool stack.
///
/// The stack grows to the right, each card overlapping the previous one, so
/// the top card is the rightmost pool member.
pub fn top_of_pool(snapshot: &Snapshot) -> Option<&EntityId> {
    snapshot
        .members(POOL_CONTAINER)
        .filter_map(|id| snapshot.get(id.as_str()).map(|p| (id, p.position.left)))
        .max_by(|(a_id, a_left), (b_id, b_left)| {
            a_left.total_cmp(b_left).then_with(|| a_id.cmp(b_id))
        })
        .map(|(id, _)| id)
}

/// Drag-start rule: inside the pool only the top card may be picked up.
///
/// Entities outside the pool, or unknown to `snapshot`, are always free.
pub fn can_pick_up(snapshot: &Snapshot, entity_id: &str) -> bool {
    match snapshot.get(entity_id) {
        Some(placement) if placement.container_id.as_str() == POOL_CONTAINER => {
            top_of_pool(snapshot).map(EntityId::as_str) == Some(entity_id)
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_full_deck_unique() {
        let deck = full_deck();
        assert_eq!(deck.len(), 48);
        let ids: HashSet<String> = deck.iter().map(|c| c.to_string()).collect();
        assert_eq!(ids.len(), 48);
    }

    #[test]
    fn test_card_id_format_and_parse() {
        let card = CardId::new(Suit::Hearts, 7);
        assert_eq!(card.to_string(), "card-hearts-7");
        assert_eq!(CardId::parse("card-hearts-7").unwrap(), card);
        assert_eq!(CardId::parse("card-clubs-12").unwrap(), CardId::new(Suit::Clubs, 12));
    }

    #[test]
    fn test_card_id_parse_rejects() {
        let bad_ids = [
            "hearts-7",
            "card-hearts",
            "card-cups-3",
            "card-hearts-13",
            "card-hearts-0",
            "card-hearts-x",
        ];
        for bad in bad_ids {
            assert!(CardId::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_deal_places_everything_in_pool() {
        let mut rng = StdRng::seed_from_u64(7);
        let snapshot = deal(&mut rng);

        assert_eq!(snapshot.len(), 48);
        assert_eq!(snapshot.members(POOL_CONTAINER).count(), 48);
        for card in full_deck() {
            assert!(snapshot.get(card.entity_id().as_str()).is_some());
        }
    }

    #[test]
    fn test_deal_stacks_with_fixed_offset() {
        let mut rng = StdRng::seed_from_u64(11);
        let snapshot = deal(&mut rng);

        let mut lefts: Vec<f64> = snapshot.cards.values().map(|p| p.position.left).collect();
        lefts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let expected: Vec<f64> = (0..48).map(|i| i as f64 * STACK_OFFSET).collect();
        assert_eq!(lefts, expected);
        assert!(snapshot.cards.values().all(|p| p.position.top == 0.0));
    }

    #[test]
    fn test_deal_deterministic_for_seed() {
        let a = deal(&mut StdRng::seed_from_u64(42));
        let b = deal(&mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);

        let c = deal(&mut StdRng::seed_from_u64(43));
        assert_ne!(a, c);
    }

    #[test]
    fn test_accepts_drop() {
        let card = CardId::new(Suit::Spades, 3);
        assert!(accepts_drop("spades", &card));
        assert!(accepts_drop(POOL_CONTAINER, &card));
        assert!(!accepts_drop("hearts", &card));
    }

    #[test]
    fn test_containers() {
        let all = containers();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].as_str(), POOL_CONTAINER);
    }

    #[test]
    fn test_top_of_pool_is_rightmost() {
        let snapshot = deal(&mut StdRng::seed_from_u64(5));
        let top = top_of_pool(&snapshot).unwrap();
        let top_left = snapshot.get(top.as_str()).unwrap().position.left;
        assert_eq!(top_left, 47.0 * STACK_OFFSET);

        assert!(can_pick_up(&snapshot, top.as_str()));
        let buried = snapshot
            .cards
            .iter()
            .find(|(_, p)| p.position.left == 0.0)
            .map(|(id, _)| id.clone())
            .unwrap();
        assert!(!can_pick_up(&snapshot, buried.as_str()));
    }

    #[test]
    fn test_pick_up_outside_pool_is_free() {
        let mut snapshot = deal(&mut StdRng::seed_from_u64(5));
        let card = CardId::new(Suit::Diamonds, 1).entity_id();
        snapshot.insert(crate::model::PlacementUpdate {
            entity_id: card.clone(),
            placement: Placement::new("diamonds", Position::new(0.0, 0.0)),
        });

        assert!(can_pick_up(&snapshot, card.as_str()));
        assert!(can_pick_up(&snapshot, "not-on-the-table"));
        assert!(top_of_pool(&Snapshot::new()).is_none());
    }
}
