//! Deck statistics for the host: card counts by state, what is due today
//! under the caps, and today's study activity from the review log.

use super::review::Scheduler;
use crate::Error;
use crate::ledger::remaining_capacity;
use crate::model::{CardQueue, DeckId, ReviewLogEntry};
use crate::timing::day_start;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeckStats {
    pub total_cards: u32,
    /// New cards that selection could still show today.
    pub new_due: u32,
    /// Learning cards whose step has elapsed.
    pub learning_due: u32,
    /// Review cards due today that fit the remaining capacity.
    pub review_due: u32,
    pub new_remaining: u32,
    pub review_remaining: u32,
    pub studied_today: u32,
    pub study_time_ms: u64,
    pub suspended: u32,
    pub buried: u32,
}

impl Scheduler {
    /// What the daily caps still allow for a deck subtree right now.
    pub fn remaining_capacity(
        &self,
        deck_id: DeckId,
    ) -> Result<crate::ledger::RemainingCapacity, Error> {
        self.capacity_of(deck_id, self.today())
    }

    pub fn stats(&self, deck_id: Option<DeckId>) -> Result<DeckStats, Error> {
        let store = self.store();
        let today = self.today();
        let now_seconds = self.clock().now_seconds();
        let scope: Option<HashSet<DeckId>> = match deck_id {
            Some(deck_id) => Some(store.deck_and_descendants(deck_id)?.into_iter().collect()),
            None => None,
        };

        let mut stats = DeckStats::default();
        let mut new_by_deck: HashMap<DeckId, u32> = HashMap::new();
        let mut review_by_deck: HashMap<DeckId, u32> = HashMap::new();
        for card in store.cards().values() {
            if let Some(scope) = &scope {
                if !scope.contains(&card.deck_id) {
                    continue;
                }
            }
            stats.total_cards += 1;
            match card.queue {
                CardQueue::Suspended => stats.suspended += 1,
                CardQueue::UserBuried | CardQueue::SchedBuried => stats.buried += 1,
                CardQueue::Learning | CardQueue::DayLearn => {
                    if card.due <= now_seconds {
                        stats.learning_due += 1;
                    }
                }
                CardQueue::Review => {
                    if card.due <= today {
                        *review_by_deck.entry(card.deck_id).or_insert(0) += 1;
                    }
                }
                CardQueue::New => {
                    *new_by_deck.entry(card.deck_id).or_insert(0) += 1;
                }
            }
        }

        for (deck_id, count) in &new_by_deck {
            let capacity = self.capacity_of(*deck_id, today)?;
            stats.new_due += (*count).min(capacity.new_remaining);
        }
        for (deck_id, count) in &review_by_deck {
            let capacity = self.capacity_of(*deck_id, today)?;
            stats.review_due += (*count).min(capacity.review_remaining);
        }

        // Remaining capacity is reported for the requested deck, or summed
        // over top-level decks for a whole-collection view.
        let capacity_roots: Vec<DeckId> = match deck_id {
            Some(deck_id) => vec![deck_id],
            None => store
                .decks()
                .values()
                .filter(|deck| deck.parent_name().is_none())
                .map(|deck| deck.id)
                .collect(),
        };
        for root in capacity_roots {
            let capacity = self.capacity_of(root, today)?;
            stats.new_remaining += capacity.new_remaining;
            stats.review_remaining += capacity.review_remaining;
        }

        let window_start = day_start(&store.col, today).timestamp_millis();
        let window_end = day_start(&store.col, today + 1).timestamp_millis();
        let studied: Vec<&ReviewLogEntry> = store
            .revlog()
            .iter()
            .filter(|entry| entry.id >= window_start && entry.id < window_end)
            .filter(|entry| match &scope {
                Some(scope) => store
                    .cards()
                    .get(&entry.card_id)
                    .is_some_and(|card| scope.contains(&card.deck_id)),
                None => true,
            })
            .collect();
        stats.study_time_ms = studied
            .iter()
            .map(|entry| u64::from(entry.response_time_ms))
            .sum();
        stats.studied_today = studied.iter().unique_by(|entry| entry.card_id).count() as u32;
        Ok(stats)
    }

    fn capacity_of(
        &self,
        deck_id: DeckId,
        today: crate::model::DayNumber,
    ) -> Result<crate::ledger::RemainingCapacity, Error> {
        let store = self.store();
        let subtree = store.deck_and_descendants(deck_id)?;
        let usage = store.today_usage().subtree_usage(subtree, today);
        let config_id = store.deck(deck_id)?.config_id;
        let config = store.deck_config(config_id)?;
        Ok(remaining_capacity(
            usage,
            config.new.per_day,
            config.rev.per_day,
        ))
    }
}
