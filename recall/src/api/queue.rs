//! Queue selection as a pure function over the store, the clock, the ledger,
//! the session bury set, and the deck scope. Ordering is deterministic:
//! learning before review before new, tie-broken by `(due, id)` ascending.

use crate::Error;
use crate::ledger::{RemainingCapacity, remaining_capacity};
use crate::model::{CardId, CardQueue, DayNumber, DeckId, NewCardOrder, NoteId};
use crate::store::Store;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Result of one selection pass. When no card comes back, the flags say
/// whether a daily cap (rather than an empty queue) was the cause; that is an
/// internal signal, not a user-facing error.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Selection {
    pub card_id: Option<CardId>,
    pub new_cap_reached: bool,
    pub review_cap_reached: bool,
}

/// Per-deck remaining capacity, computed once per selection pass. A deck's
/// capacity compares its own caps against the usage of its whole subtree.
struct CapCache<'a> {
    store: &'a Store,
    today: DayNumber,
    new_limit_overrides: &'a IndexMap<DeckId, u32>,
    cached: HashMap<DeckId, RemainingCapacity>,
}

impl CapCache<'_> {
    fn get(&mut self, deck_id: DeckId) -> Result<RemainingCapacity, Error> {
        if let Some(capacity) = self.cached.get(&deck_id) {
            return Ok(*capacity);
        }
        let subtree = self.store.deck_and_descendants(deck_id)?;
        let usage = self.store.today_usage().subtree_usage(subtree, self.today);
        let config_id = self.store.deck(deck_id)?.config_id;
        let config = self.store.deck_config(config_id)?;
        let new_per_day = self
            .new_limit_overrides
            .get(&deck_id)
            .copied()
            .unwrap_or(u32::MAX)
            .min(config.new.per_day);
        let capacity = remaining_capacity(usage, new_per_day, config.rev.per_day);
        self.cached.insert(deck_id, capacity);
        Ok(capacity)
    }
}

#[allow(clippy::too_many_arguments, reason = "mirrors the selection inputs")]
pub fn select(
    store: &Store,
    scope: Option<DeckId>,
    now_seconds: i64,
    today: DayNumber,
    buried_notes: &HashSet<NoteId>,
    new_limit_overrides: &IndexMap<DeckId, u32>,
    position: usize,
) -> Result<Selection, Error> {
    let scope_decks: Option<HashSet<DeckId>> = match scope {
        Some(deck_id) => Some(store.deck_and_descendants(deck_id)?.into_iter().collect()),
        None => None,
    };
    let mut caps = CapCache {
        store,
        today,
        new_limit_overrides,
        cached: HashMap::new(),
    };

    let mut learning: Vec<(i64, CardId)> = Vec::new();
    let mut review: Vec<(i64, CardId)> = Vec::new();
    let mut fresh: Vec<(i64, CardId)> = Vec::new();
    let mut selection = Selection::default();

    for card in store.cards().values() {
        if let Some(scope) = &scope_decks {
            if !scope.contains(&card.deck_id) {
                continue;
            }
        }
        if card.queue.is_excluded_from_selection() || buried_notes.contains(&card.note_id) {
            continue;
        }
        match card.queue {
            CardQueue::Learning | CardQueue::DayLearn => {
                if card.due <= now_seconds {
                    learning.push((card.due, card.id));
                }
            }
            CardQueue::Review => {
                if card.due <= today {
                    if caps.get(card.deck_id)?.can_show_review {
                        review.push((card.due, card.id));
                    } else {
                        selection.review_cap_reached = true;
                    }
                }
            }
            CardQueue::New => {
                if caps.get(card.deck_id)?.can_show_new {
                    let order = store.config_for_card(card)?.new.order;
                    let key = match order {
                        NewCardOrder::Sequential => card.due,
                        NewCardOrder::Random => dispersed_position(card.id, today),
                    };
                    fresh.push((key, card.id));
                } else {
                    selection.new_cap_reached = true;
                }
            }
            _ => {}
        }
    }

    learning.sort_unstable();
    review.sort_unstable();
    fresh.sort_unstable();
    // A deck with one review slot left should offer exactly one review card,
    // so peeking cannot promise more than the caps allow.
    let review = take_within_capacity(review, store, &mut caps, |cap| cap.review_remaining)?;
    let fresh = take_within_capacity(fresh, store, &mut caps, |cap| cap.new_remaining)?;

    selection.card_id = learning
        .into_iter()
        .chain(review)
        .chain(fresh)
        .map(|(_, card_id)| card_id)
        .nth(position);
    Ok(selection)
}

fn take_within_capacity(
    sorted: Vec<(i64, CardId)>,
    store: &Store,
    caps: &mut CapCache<'_>,
    remaining_of: impl Fn(&RemainingCapacity) -> u32,
) -> Result<Vec<(i64, CardId)>, Error> {
    let mut taken: HashMap<DeckId, u32> = HashMap::new();
    let mut kept = Vec::with_capacity(sorted.len());
    for (key, card_id) in sorted {
        let deck_id = store.card(card_id)?.deck_id;
        let capacity = caps.get(deck_id)?;
        let count = taken.entry(deck_id).or_insert(0);
        if *count < remaining_of(&capacity) {
            *count += 1;
            kept.push((key, card_id));
        }
    }
    Ok(kept)
}

/// Deterministic pseudo-random position for decks with random new-card
/// order: stable within a day, reshuffled across days.
fn dispersed_position(card_id: CardId, today: DayNumber) -> i64 {
    let mut z = (card_id as u64) ^ (today as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (z >> 33) as i64
}
