//! In-memory store: typed repositories over the entity maps. Every write
//! bumps the row's modification time, stamps the current USN, and emits a
//! tombstone on delete. Single-threaded; owned by the scheduler.

use crate::ledger::TodayLedger;
use crate::model::{
    Card, CardId, Collection, DEFAULT_DECK_CONFIG_ID, DEFAULT_DECK_ID, Deck, DeckConfig,
    DeckConfigId, DeckId, Grave, GraveKind, MINIMUM_EASE_FACTOR, Model, ModelId, ModelKind, Note,
    NoteId, ReviewLogEntry, Usn,
};
use crate::timing::IdGenerator;
use crate::{EntityKind, Error, StoreErrorKind};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;

/// Row modification times never move backwards, even when the clock does.
fn bump_time(prev: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    std::cmp::max(prev + Duration::seconds(1), now)
}

#[derive(Clone, Debug)]
pub struct Store {
    pub(crate) col: Collection,
    pub(crate) decks: IndexMap<DeckId, Deck>,
    pub(crate) deck_configs: IndexMap<DeckConfigId, DeckConfig>,
    pub(crate) models: IndexMap<ModelId, Model>,
    pub(crate) notes: IndexMap<NoteId, Note>,
    pub(crate) cards: IndexMap<CardId, Card>,
    pub(crate) revlog: Vec<ReviewLogEntry>,
    pub(crate) graves: Vec<Grave>,
    pub(crate) media: IndexMap<String, String>,
    pub(crate) today_usage: TodayLedger,
    pub(crate) ids: IdGenerator,
}

// Equality covers the persisted fields; the id generator is runtime state
// reconstructed on load.
impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        self.col == other.col
            && self.decks == other.decks
            && self.deck_configs == other.deck_configs
            && self.models == other.models
            && self.notes == other.notes
            && self.cards == other.cards
            && self.revlog == other.revlog
            && self.graves == other.graves
            && self.media == other.media
            && self.today_usage == other.today_usage
    }
}

impl Store {
    /// A fresh collection with the reserved default deck and config.
    pub fn new(created_at: DateTime<Utc>, rollover_offset_seconds: u32) -> Self {
        let mut deck_configs = IndexMap::new();
        deck_configs.insert(
            DEFAULT_DECK_CONFIG_ID,
            DeckConfig::new(DEFAULT_DECK_CONFIG_ID, "Default", created_at),
        );
        let mut decks = IndexMap::new();
        decks.insert(
            DEFAULT_DECK_ID,
            Deck {
                id: DEFAULT_DECK_ID,
                name: "Default".to_string(),
                config_id: DEFAULT_DECK_CONFIG_ID,
                updated_at: created_at,
                usn: 0,
            },
        );
        Self {
            col: Collection::new(created_at, rollover_offset_seconds),
            decks,
            deck_configs,
            models: IndexMap::new(),
            notes: IndexMap::new(),
            cards: IndexMap::new(),
            revlog: Vec::new(),
            graves: Vec::new(),
            media: IndexMap::new(),
            today_usage: TodayLedger::new(),
            ids: IdGenerator::new(),
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.col
    }

    pub fn cards(&self) -> &IndexMap<CardId, Card> {
        &self.cards
    }

    pub fn notes(&self) -> &IndexMap<NoteId, Note> {
        &self.notes
    }

    pub fn decks(&self) -> &IndexMap<DeckId, Deck> {
        &self.decks
    }

    pub fn deck_configs(&self) -> &IndexMap<DeckConfigId, DeckConfig> {
        &self.deck_configs
    }

    pub fn models(&self) -> &IndexMap<ModelId, Model> {
        &self.models
    }

    pub fn revlog(&self) -> &[ReviewLogEntry] {
        &self.revlog
    }

    pub fn graves(&self) -> &[Grave] {
        &self.graves
    }

    pub fn today_usage(&self) -> &TodayLedger {
        &self.today_usage
    }

    fn bump_usn(&mut self) -> Usn {
        self.col.usn += 1;
        self.col.usn
    }

    fn touch_collection(&mut self, now: DateTime<Utc>) {
        self.col.updated_at = bump_time(self.col.updated_at, now);
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn card(&self, id: CardId) -> Result<&Card, Error> {
        self.cards.get(&id).ok_or_else(|| {
            StoreErrorKind::NotFound {
                entity: EntityKind::Card,
                id,
            }
            .into()
        })
    }

    pub fn note(&self, id: NoteId) -> Result<&Note, Error> {
        self.notes.get(&id).ok_or_else(|| {
            StoreErrorKind::NotFound {
                entity: EntityKind::Note,
                id,
            }
            .into()
        })
    }

    pub fn model(&self, id: ModelId) -> Result<&Model, Error> {
        self.models.get(&id).ok_or_else(|| {
            StoreErrorKind::NotFound {
                entity: EntityKind::Model,
                id,
            }
            .into()
        })
    }

    pub fn deck(&self, id: DeckId) -> Result<&Deck, Error> {
        self.decks.get(&id).ok_or_else(|| {
            StoreErrorKind::NotFound {
                entity: EntityKind::Deck,
                id,
            }
            .into()
        })
    }

    pub fn deck_config(&self, id: DeckConfigId) -> Result<&DeckConfig, Error> {
        self.deck_configs.get(&id).ok_or_else(|| {
            StoreErrorKind::NotFound {
                entity: EntityKind::DeckConfig,
                id,
            }
            .into()
        })
    }

    /// Policy governing a card, resolved through its deck.
    pub fn config_for_card(&self, card: &Card) -> Result<&DeckConfig, Error> {
        let deck = self.deck(card.deck_id)?;
        self.deck_config(deck.config_id)
    }

    /// Note type governing a card, resolved through its note.
    pub fn model_for_card(&self, card: &Card) -> Result<&Model, Error> {
        let note = self.note(card.note_id)?;
        self.model(note.model_id)
    }

    /// The deck itself plus every deck underneath it in the tree.
    pub fn deck_and_descendants(&self, deck_id: DeckId) -> Result<Vec<DeckId>, Error> {
        let root = self.deck(deck_id)?;
        Ok(self
            .decks
            .values()
            .filter(|deck| deck.is_under(root))
            .map(|deck| deck.id)
            .collect())
    }

    pub fn find_deck_by_name(&self, name: &str) -> Option<&Deck> {
        self.decks.values().find(|deck| deck.name == name)
    }

    /// Most recent review of a card, if any.
    pub fn last_review_for_card(&self, card_id: CardId) -> Option<&ReviewLogEntry> {
        self.revlog.iter().rev().find(|r| r.card_id == card_id)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub fn add_deck_config(&mut self, name: &str, now: DateTime<Utc>) -> DeckConfigId {
        let id = self.ids.next(now.timestamp_millis());
        let usn = self.bump_usn();
        let mut config = DeckConfig::new(id, name, now);
        config.usn = usn;
        self.deck_configs.insert(id, config);
        self.touch_collection(now);
        id
    }

    pub fn update_deck_config(&mut self, config: DeckConfig, now: DateTime<Utc>) -> Result<(), Error> {
        let previous = self.deck_config(config.id)?.updated_at;
        let usn = self.bump_usn();
        let mut config = config;
        config.updated_at = bump_time(previous, now);
        config.usn = usn;
        self.deck_configs.insert(config.id, config);
        self.touch_collection(now);
        Ok(())
    }

    /// Create a deck (and any missing ancestors) under the given config.
    pub fn add_deck(
        &mut self,
        name: &str,
        config_id: DeckConfigId,
        now: DateTime<Utc>,
    ) -> Result<DeckId, Error> {
        self.deck_config(config_id)?;
        if self.find_deck_by_name(name).is_some() {
            return Err(StoreErrorKind::DuplicateDeckName(name.to_string()).into());
        }
        // Materialize missing ancestors so the parent/child name invariant
        // holds for every deck in the tree.
        let components: Vec<&str> = name.split(crate::model::DECK_NAME_DELIMITER).collect();
        let mut path = String::new();
        let mut deck_id = DEFAULT_DECK_ID;
        for component in components {
            if path.is_empty() {
                path = component.to_string();
            } else {
                path = format!("{}{}{}", path, crate::model::DECK_NAME_DELIMITER, component);
            }
            if let Some(existing) = self.find_deck_by_name(&path) {
                deck_id = existing.id;
                continue;
            }
            let id = self.ids.next(now.timestamp_millis());
            let usn = self.bump_usn();
            self.decks.insert(
                id,
                Deck {
                    id,
                    name: path.clone(),
                    config_id,
                    updated_at: now,
                    usn,
                },
            );
            deck_id = id;
        }
        self.touch_collection(now);
        Ok(deck_id)
    }

    pub fn add_model(
        &mut self,
        name: &str,
        kind: ModelKind,
        fields: Vec<String>,
        templates: Vec<crate::model::CardTemplate>,
        now: DateTime<Utc>,
    ) -> ModelId {
        let id = self.ids.next(now.timestamp_millis());
        let usn = self.bump_usn();
        self.models.insert(
            id,
            Model {
                id,
                name: name.to_string(),
                kind,
                fields,
                templates,
                updated_at: now,
                usn,
            },
        );
        self.touch_collection(now);
        id
    }

    /// Create a note and one card per template of its model. Returns the note
    /// id and the new card ids in template order.
    pub fn add_note(
        &mut self,
        model_id: ModelId,
        deck_id: DeckId,
        field_values: &[impl AsRef<str>],
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<(NoteId, Vec<CardId>), Error> {
        let template_ords: Vec<u32> = self
            .model(model_id)?
            .templates
            .iter()
            .map(|t| t.ord)
            .collect();
        self.deck(deck_id)?;

        let note_id = self.ids.next(now.timestamp_millis());
        let usn = self.bump_usn();
        let mut note = Note {
            id: note_id,
            model_id,
            fields: String::new(),
            tags,
            updated_at: now,
            usn,
        };
        note.set_field_values(field_values);
        self.notes.insert(note_id, note);

        let mut card_ids = Vec::with_capacity(template_ords.len());
        for ord in template_ords {
            let card_id = self.ids.next(now.timestamp_millis());
            let position = self.col.next_pos;
            self.col.next_pos += 1;
            let usn = self.bump_usn();
            let mut card = Card::new(card_id, note_id, deck_id, ord, position, now);
            card.usn = usn;
            self.cards.insert(card_id, card);
            card_ids.push(card_id);
        }
        self.touch_collection(now);
        Ok((note_id, card_ids))
    }

    /// Replace a card's row, stamping modification time and USN.
    pub fn update_card(&mut self, card: Card, now: DateTime<Utc>) -> Result<(), Error> {
        let previous = self.card(card.id)?.updated_at;
        let usn = self.bump_usn();
        let mut card = card;
        card.updated_at = bump_time(previous, now);
        card.usn = usn;
        self.cards.insert(card.id, card);
        self.touch_collection(now);
        Ok(())
    }

    pub fn update_note(&mut self, note: Note, now: DateTime<Utc>) -> Result<(), Error> {
        let previous = self.note(note.id)?.updated_at;
        let usn = self.bump_usn();
        let mut note = note;
        note.updated_at = bump_time(previous, now);
        note.usn = usn;
        self.notes.insert(note.id, note);
        self.touch_collection(now);
        Ok(())
    }

    /// Delete a card, emitting a tombstone. Deleting the last sibling of a
    /// note deletes the note as well.
    pub fn remove_card(&mut self, card_id: CardId, now: DateTime<Utc>) -> Result<(), Error> {
        let note_id = self.card(card_id)?.note_id;
        self.cards.shift_remove(&card_id);
        let usn = self.bump_usn();
        self.graves.push(Grave {
            usn,
            oid: card_id,
            kind: GraveKind::Card,
        });
        let orphaned = !self.cards.values().any(|c| c.note_id == note_id);
        if orphaned && self.notes.shift_remove(&note_id).is_some() {
            let usn = self.bump_usn();
            self.graves.push(Grave {
                usn,
                oid: note_id,
                kind: GraveKind::Note,
            });
        }
        self.touch_collection(now);
        Ok(())
    }

    /// Delete a deck and its descendants; their cards move to the default
    /// deck rather than being destroyed.
    pub fn remove_deck(&mut self, deck_id: DeckId, now: DateTime<Utc>) -> Result<(), Error> {
        if deck_id == DEFAULT_DECK_ID {
            return Err(StoreErrorKind::DefaultDeckProtected.into());
        }
        let removed = self.deck_and_descendants(deck_id)?;
        let rehomed: Vec<CardId> = self
            .cards
            .values()
            .filter(|card| removed.contains(&card.deck_id))
            .map(|card| card.id)
            .collect();
        for card_id in rehomed {
            let mut card = self.cards[&card_id].clone();
            card.deck_id = DEFAULT_DECK_ID;
            self.update_card(card, now)?;
        }
        for id in removed {
            self.decks.shift_remove(&id);
            let usn = self.bump_usn();
            self.graves.push(Grave {
                usn,
                oid: id,
                kind: GraveKind::Deck,
            });
        }
        self.touch_collection(now);
        Ok(())
    }

    /// Record that scheduler-buried cards were restored for `day`.
    pub fn set_last_unbury_day(&mut self, day: crate::model::DayNumber, now: DateTime<Utc>) {
        self.col.last_unbury_day = day;
        self.bump_usn();
        self.touch_collection(now);
    }

    /// Append a review-log entry. The id is assigned here so entries stay
    /// unique and strictly increasing.
    pub fn add_revlog(&mut self, entry: ReviewLogEntry, now_millis: i64) -> i64 {
        let id = self.ids.next(now_millis);
        let usn = self.bump_usn();
        let mut entry = entry;
        entry.id = id;
        entry.usn = usn;
        self.revlog.push(entry);
        id
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Serialization-time validation: referential integrity plus the
    /// arithmetic invariants on every card.
    pub fn validate(&self) -> Result<(), Error> {
        if self.col.rollover_offset_seconds > 86_399 {
            return Err(invariant(format!(
                "rollover offset `{}` outside [0, 86399]",
                self.col.rollover_offset_seconds
            )));
        }
        for deck in self.decks.values() {
            if !self.deck_configs.contains_key(&deck.config_id) {
                return Err(invariant(format!(
                    "deck `{}` references missing config `{}`",
                    deck.id, deck.config_id
                )));
            }
            if let Some(parent) = deck.parent_name() {
                if self.find_deck_by_name(parent).is_none() {
                    return Err(invariant(format!(
                        "deck `{}` has no parent deck `{}`",
                        deck.name, parent
                    )));
                }
            }
        }
        for note in self.notes.values() {
            if !self.models.contains_key(&note.model_id) {
                return Err(invariant(format!(
                    "note `{}` references missing model `{}`",
                    note.id, note.model_id
                )));
            }
        }
        for card in self.cards.values() {
            if !self.decks.contains_key(&card.deck_id) {
                return Err(invariant(format!(
                    "card `{}` references missing deck `{}`",
                    card.id, card.deck_id
                )));
            }
            if !self.notes.contains_key(&card.note_id) {
                return Err(invariant(format!(
                    "card `{}` references missing note `{}`",
                    card.id, card.note_id
                )));
            }
            if card.factor < MINIMUM_EASE_FACTOR {
                return Err(invariant(format!(
                    "card `{}` has ease factor `{}` below {}",
                    card.id, card.factor, MINIMUM_EASE_FACTOR
                )));
            }
            let max_ivl = self.config_for_card(card)?.rev.max_ivl;
            if card.ivl > max_ivl {
                return Err(invariant(format!(
                    "card `{}` has interval `{}` above the deck maximum `{}`",
                    card.id, card.ivl, max_ivl
                )));
            }
        }
        let mut last_revlog_id = 0;
        for entry in &self.revlog {
            if entry.id <= last_revlog_id {
                return Err(invariant(format!(
                    "review log id `{}` is not strictly increasing",
                    entry.id
                )));
            }
            last_revlog_id = entry.id;
        }
        Ok(())
    }
}

fn invariant(description: String) -> Error {
    StoreErrorKind::InvariantViolation {
        description,
        advice: None,
    }
    .into()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::CardTemplate;
    use chrono::TimeZone;

    pub(crate) fn test_store() -> Store {
        Store::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap(), 4 * 3600)
    }

    pub(crate) fn basic_model(store: &mut Store, now: DateTime<Utc>) -> ModelId {
        store.add_model(
            "Basic",
            ModelKind::Standard,
            vec!["Front".to_string(), "Back".to_string()],
            vec![
                CardTemplate {
                    name: "Card 1".to_string(),
                    ord: 0,
                },
                CardTemplate {
                    name: "Card 2".to_string(),
                    ord: 1,
                },
            ],
            now,
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_100, 0).unwrap()
    }

    #[test]
    fn fresh_store_has_default_deck_and_config() {
        let store = test_store();
        assert_eq!(store.deck(DEFAULT_DECK_ID).unwrap().name, "Default");
        assert_eq!(
            store.deck_config(DEFAULT_DECK_CONFIG_ID).unwrap().name,
            "Default"
        );
    }

    #[test]
    fn add_note_creates_one_card_per_template() {
        let mut store = test_store();
        let model_id = basic_model(&mut store, now());
        let (note_id, card_ids) = store
            .add_note(model_id, DEFAULT_DECK_ID, &["f", "b"], vec![], now())
            .unwrap();
        assert_eq!(card_ids.len(), 2);
        let first = store.card(card_ids[0]).unwrap();
        let second = store.card(card_ids[1]).unwrap();
        assert_eq!(first.note_id, note_id);
        assert_eq!(first.template_ord, 0);
        assert_eq!(second.template_ord, 1);
        // Positions follow the collection counter.
        assert_eq!(first.due + 1, second.due);
    }

    #[test]
    fn add_note_requires_live_model_and_deck() {
        let mut store = test_store();
        let missing_model = store.add_note(999, DEFAULT_DECK_ID, &["f"], vec![], now());
        assert!(matches!(
            missing_model,
            Err(Error::Library(crate::LibraryError::Store(
                StoreErrorKind::NotFound { .. }
            )))
        ));
        let model_id = basic_model(&mut store, now());
        let missing_deck = store.add_note(model_id, 999, &["f"], vec![], now());
        assert!(missing_deck.is_err());
    }

    #[test]
    fn duplicate_deck_names_are_rejected() {
        let mut store = test_store();
        store
            .add_deck("Languages", DEFAULT_DECK_CONFIG_ID, now())
            .unwrap();
        let duplicate = store.add_deck("Languages", DEFAULT_DECK_CONFIG_ID, now());
        assert!(matches!(
            duplicate,
            Err(Error::Library(crate::LibraryError::Store(
                StoreErrorKind::DuplicateDeckName(_)
            )))
        ));
    }

    #[test]
    fn nested_deck_creation_materializes_ancestors() {
        let mut store = test_store();
        let leaf = store
            .add_deck("A::B::C", DEFAULT_DECK_CONFIG_ID, now())
            .unwrap();
        assert!(store.find_deck_by_name("A").is_some());
        assert!(store.find_deck_by_name("A::B").is_some());
        let ids = store
            .deck_and_descendants(store.find_deck_by_name("A").unwrap().id)
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&leaf));
    }

    #[test]
    fn removing_last_sibling_removes_note_with_tombstones() {
        let mut store = test_store();
        let model_id = basic_model(&mut store, now());
        let (note_id, card_ids) = store
            .add_note(model_id, DEFAULT_DECK_ID, &["f", "b"], vec![], now())
            .unwrap();

        store.remove_card(card_ids[0], now()).unwrap();
        assert!(store.note(note_id).is_ok());
        assert_eq!(store.graves().len(), 1);

        store.remove_card(card_ids[1], now()).unwrap();
        assert!(store.note(note_id).is_err());
        let kinds: Vec<GraveKind> = store.graves().iter().map(|g| g.kind).collect();
        assert_eq!(kinds, vec![GraveKind::Card, GraveKind::Card, GraveKind::Note]);
    }

    #[test]
    fn remove_deck_rehomes_cards_to_default() {
        let mut store = test_store();
        let model_id = basic_model(&mut store, now());
        let deck_id = store
            .add_deck("Doomed", DEFAULT_DECK_CONFIG_ID, now())
            .unwrap();
        let (_, card_ids) = store
            .add_note(model_id, deck_id, &["f", "b"], vec![], now())
            .unwrap();
        store.remove_deck(deck_id, now()).unwrap();
        assert!(store.deck(deck_id).is_err());
        assert_eq!(store.card(card_ids[0]).unwrap().deck_id, DEFAULT_DECK_ID);
        assert!(
            store
                .graves()
                .iter()
                .any(|g| g.kind == GraveKind::Deck && g.oid == deck_id)
        );
    }

    #[test]
    fn default_deck_cannot_be_removed() {
        let mut store = test_store();
        assert!(store.remove_deck(DEFAULT_DECK_ID, now()).is_err());
    }

    #[test]
    fn every_write_bumps_usn_and_mod() {
        let mut store = test_store();
        let model_id = basic_model(&mut store, now());
        let (_, card_ids) = store
            .add_note(model_id, DEFAULT_DECK_ID, &["f", "b"], vec![], now())
            .unwrap();
        let before = store.card(card_ids[0]).unwrap().clone();
        let col_usn_before = store.collection().usn;

        store.update_card(before.clone(), now()).unwrap();
        let after = store.card(card_ids[0]).unwrap();
        assert!(after.usn > before.usn);
        assert!(after.updated_at > before.updated_at);
        assert!(store.collection().usn > col_usn_before);
    }

    #[test]
    fn modification_time_is_monotonic_when_clock_regresses() {
        let mut store = test_store();
        let model_id = basic_model(&mut store, now());
        let (_, card_ids) = store
            .add_note(model_id, DEFAULT_DECK_ID, &["f", "b"], vec![], now())
            .unwrap();
        let card = store.card(card_ids[0]).unwrap().clone();
        let past = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        store.update_card(card.clone(), past).unwrap();
        assert!(store.card(card_ids[0]).unwrap().updated_at > card.updated_at);
    }

    #[test]
    fn revlog_ids_are_unique_within_a_millisecond() {
        let mut store = test_store();
        let entry = ReviewLogEntry {
            id: 0,
            card_id: 1,
            grade: crate::model::Grade::Good,
            ivl: 1,
            last_ivl: 0,
            factor: 2500,
            response_time_ms: 1200,
            kind: crate::model::RevlogKind::Learn,
            usn: 0,
        };
        let a = store.add_revlog(entry.clone(), 1_700_000_000_000);
        let b = store.add_revlog(entry, 1_700_000_000_000);
        assert!(b > a);
    }

    #[test]
    fn validate_flags_low_ease_factor() {
        let mut store = test_store();
        let model_id = basic_model(&mut store, now());
        let (_, card_ids) = store
            .add_note(model_id, DEFAULT_DECK_ID, &["f", "b"], vec![], now())
            .unwrap();
        assert!(store.validate().is_ok());
        let mut card = store.card(card_ids[0]).unwrap().clone();
        card.factor = 1000;
        store.update_card(card, now()).unwrap();
        assert!(matches!(
            store.validate(),
            Err(Error::Library(crate::LibraryError::Store(
                StoreErrorKind::InvariantViolation { .. }
            )))
        ));
    }
}
