//! Today-usage ledger: how many new cards were introduced and reviews done
//! per deck per logical day. The day key rolls over exactly once per 24h,
//! after the collection's configured rollover hour (see `timing`).

use crate::model::{DayNumber, DeckId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayUsage {
    pub new_introduced: u32,
    pub review_done: u32,
}

/// Counts keyed by `(deck, dayKey)`. Entries for past days are retained; the
/// scheduler only ever aggregates the current day.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TodayLedger {
    entries: IndexMap<DeckId, IndexMap<DayNumber, TodayUsage>>,
}

impl TodayLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_new_introduced(&mut self, deck_id: DeckId, day_key: DayNumber) {
        self.entry_mut(deck_id, day_key).new_introduced += 1;
    }

    pub fn increment_review_done(&mut self, deck_id: DeckId, day_key: DayNumber) {
        self.entry_mut(deck_id, day_key).review_done += 1;
    }

    /// Usage recorded against a single deck, not including descendants.
    pub fn deck_usage(&self, deck_id: DeckId, day_key: DayNumber) -> TodayUsage {
        self.entries
            .get(&deck_id)
            .and_then(|days| days.get(&day_key))
            .copied()
            .unwrap_or_default()
    }

    /// Aggregate usage over a deck subtree for the given day.
    pub fn subtree_usage(
        &self,
        deck_ids: impl IntoIterator<Item = DeckId>,
        day_key: DayNumber,
    ) -> TodayUsage {
        deck_ids
            .into_iter()
            .map(|deck_id| self.deck_usage(deck_id, day_key))
            .fold(TodayUsage::default(), |acc, usage| TodayUsage {
                new_introduced: acc.new_introduced + usage.new_introduced,
                review_done: acc.review_done + usage.review_done,
            })
    }

    fn entry_mut(&mut self, deck_id: DeckId, day_key: DayNumber) -> &mut TodayUsage {
        self.entries
            .entry(deck_id)
            .or_default()
            .entry(day_key)
            .or_default()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RemainingCapacity {
    pub can_show_new: bool,
    pub can_show_review: bool,
    pub new_remaining: u32,
    pub review_remaining: u32,
}

/// Capacity left under the daily caps given the usage recorded so far.
pub fn remaining_capacity(
    usage: TodayUsage,
    new_per_day: u32,
    rev_per_day: u32,
) -> RemainingCapacity {
    let new_remaining = new_per_day.saturating_sub(usage.new_introduced);
    let review_remaining = rev_per_day.saturating_sub(usage.review_done);
    RemainingCapacity {
        can_show_new: new_remaining > 0,
        can_show_review: review_remaining > 0,
        new_remaining,
        review_remaining,
    }
}
