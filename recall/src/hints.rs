//! Read-only contract to the hint subsystem. Hint text is produced by an
//! external generator and stored keyed by card id; the scheduler only looks
//! entries up and detects staleness by re-hashing the note content the hints
//! were generated from.

use crate::model::CardId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardHints {
    pub hint_l1: String,
    pub hint_l2: String,
    pub hint_l3: String,
    pub tip: String,
    pub obstacle: Option<String>,
    pub version: u32,
    pub content_hash: String,
}

/// Key/value view over generated hints. The generator writes; everything
/// else reads.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HintStore {
    entries: IndexMap<CardId, CardHints>,
}

impl HintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, card_id: CardId, hints: CardHints) {
        self.entries.insert(card_id, hints);
    }

    pub fn remove(&mut self, card_id: CardId) -> Option<CardHints> {
        self.entries.shift_remove(&card_id)
    }

    pub fn hints_for_card(&self, card_id: CardId) -> Option<&CardHints> {
        self.entries.get(&card_id)
    }

    /// A missing entry counts as stale: the host should request generation.
    pub fn is_stale(&self, card_id: CardId, front: &str, back: &str, cloze: &str) -> bool {
        self.entries
            .get(&card_id)
            .is_none_or(|hints| hints.content_hash != content_hash(front, back, cloze))
    }
}

/// Hash of the card content the hints were generated from.
pub fn content_hash(front: &str, back: &str, cloze: &str) -> String {
    sha256::digest(format!("{front}|{back}|{cloze}"))
}
