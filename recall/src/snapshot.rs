//! Whole-store persistence as versioned JSON. Saving validates first, so an
//! invariant violation surfaces with diagnostics instead of reaching disk;
//! loading replaces the store atomically or not at all. Debouncing is a host
//! concern.

use crate::ledger::TodayLedger;
use crate::model::{
    Card, CardId, Collection, Deck, DeckConfig, DeckConfigId, DeckId, Grave, Model, ModelId, Note,
    NoteId, ReviewLogEntry,
};
use crate::store::Store;
use crate::timing::IdGenerator;
use crate::{Error, SnapshotErrorKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDoc {
    schema_version: u32,
    col: Collection,
    decks: IndexMap<DeckId, Deck>,
    deck_configs: IndexMap<DeckConfigId, DeckConfig>,
    models: IndexMap<ModelId, Model>,
    notes: IndexMap<NoteId, Note>,
    cards: IndexMap<CardId, Card>,
    revlog: Vec<ReviewLogEntry>,
    graves: Vec<Grave>,
    media: IndexMap<String, String>,
    today_usage: TodayLedger,
}

pub fn save(store: &Store) -> Result<String, Error> {
    store.validate()?;
    let doc = SnapshotDoc {
        schema_version: SCHEMA_VERSION,
        col: store.col.clone(),
        decks: store.decks.clone(),
        deck_configs: store.deck_configs.clone(),
        models: store.models.clone(),
        notes: store.notes.clone(),
        cards: store.cards.clone(),
        revlog: store.revlog.clone(),
        graves: store.graves.clone(),
        media: store.media.clone(),
        today_usage: store.today_usage.clone(),
    };
    serde_json::to_string_pretty(&doc).map_err(|e| {
        SnapshotErrorKind::Parse {
            description: e.to_string(),
        }
        .into()
    })
}

/// Write failures are not fatal for the collection: the in-memory store
/// stays the source of truth and the host retries on the next debounce.
pub fn save_to_path(store: &Store, path: &Path) -> Result<(), Error> {
    let data = save(store)?;
    std::fs::write(path, data).map_err(|source| {
        log::warn!("snapshot write to `{}` failed: {}", path.display(), source);
        Error::Io {
            description: format!("failed to write snapshot to `{}`", path.display()),
            source,
        }
    })
}

pub fn load(data: &str) -> Result<Store, Error> {
    let doc: SnapshotDoc = serde_json::from_str(data).map_err(|e| {
        Error::from(SnapshotErrorKind::Parse {
            description: e.to_string(),
        })
    })?;
    if doc.schema_version != SCHEMA_VERSION {
        return Err(SnapshotErrorKind::UnsupportedVersion {
            found: doc.schema_version,
            expected: SCHEMA_VERSION,
        }
        .into());
    }
    let ids = IdGenerator::starting_after(highest_seen_id(&doc));
    let store = Store {
        col: doc.col,
        decks: doc.decks,
        deck_configs: doc.deck_configs,
        models: doc.models,
        notes: doc.notes,
        cards: doc.cards,
        revlog: doc.revlog,
        graves: doc.graves,
        media: doc.media,
        today_usage: doc.today_usage,
        ids,
    };
    store.validate()?;
    Ok(store)
}

/// Read failures are fatal: there is no collection to fall back on.
pub fn load_from_path(path: &Path) -> Result<Store, Error> {
    let data = std::fs::read_to_string(path).map_err(|source| Error::Io {
        description: format!("failed to read snapshot from `{}`", path.display()),
        source,
    })?;
    load(&data)
}

/// Fresh ids must stay above everything the snapshot already used, including
/// tombstoned rows.
fn highest_seen_id(doc: &SnapshotDoc) -> i64 {
    let mut highest = 0;
    for id in doc.decks.keys().chain(doc.deck_configs.keys()) {
        highest = highest.max(*id);
    }
    for id in doc.models.keys().chain(doc.notes.keys()).chain(doc.cards.keys()) {
        highest = highest.max(*id);
    }
    for entry in &doc.revlog {
        highest = highest.max(entry.id);
    }
    for grave in &doc.graves {
        highest = highest.max(grave.oid);
    }
    highest
}
