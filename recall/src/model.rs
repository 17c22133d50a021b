//! Entity types for the collection. These types match the snapshot schema
//! (see `snapshot.rs`), so persisted field names are stable.

use chrono::{DateTime, Utc, serde::ts_seconds};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumIter};

pub type DeckId = i64;
pub type DeckConfigId = i64;
pub type ModelId = i64;
pub type NoteId = i64;
pub type CardId = i64;
pub type Usn = i64;
/// Logical day number since collection creation, adjusted by the rollover hour.
pub type DayNumber = i64;

pub const INITIAL_EASE_FACTOR: u32 = 2500;
pub const MINIMUM_EASE_FACTOR: u32 = 1300;
pub const DECK_NAME_DELIMITER: &str = "::";
pub const DEFAULT_DECK_ID: DeckId = 1;
pub const DEFAULT_DECK_CONFIG_ID: DeckConfigId = 1;
/// Unit separator, matching the classic flashcard field encoding.
pub const FIELD_SEPARATOR: char = '\u{1f}';
pub const LEECH_TAG: &str = "leech";

/// Collection header. There is exactly one per store; it is mutated on every
/// write and never destroyed.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    /// Creation time; the origin of all logical day arithmetic.
    #[serde(rename = "creationEpoch", with = "ts_seconds")]
    pub created_at: DateTime<Utc>,
    /// Seconds past midnight UTC at which the logical day rolls over.
    /// Always in `[0, 86399]`.
    pub rollover_offset_seconds: u32,
    /// Update sequence number stamped on every mutated row.
    pub usn: Usn,
    /// Next insertion position for new cards.
    pub next_pos: u32,
    /// Last day on which scheduler-buried cards were restored.
    pub last_unbury_day: DayNumber,
    #[serde(with = "ts_seconds")]
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    pub fn new(created_at: DateTime<Utc>, rollover_offset_seconds: u32) -> Self {
        Self {
            created_at,
            rollover_offset_seconds: rollover_offset_seconds.min(86_399),
            usn: 0,
            next_pos: 1,
            last_unbury_day: 0,
            updated_at: created_at,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: DeckId,
    /// Hierarchical name; components separated by [`DECK_NAME_DELIMITER`].
    pub name: String,
    pub config_id: DeckConfigId,
    #[serde(with = "ts_seconds")]
    pub updated_at: DateTime<Utc>,
    pub usn: Usn,
}

impl Deck {
    /// Name of the immediate parent, if this deck is not top-level.
    pub fn parent_name(&self) -> Option<&str> {
        self.name
            .rfind(DECK_NAME_DELIMITER)
            .map(|idx| &self.name[..idx])
    }

    /// Whether `self` is `other` or lives underneath it in the deck tree.
    pub fn is_under(&self, other: &Deck) -> bool {
        self.name == other.name
            || self
                .name
                .starts_with(&format!("{}{}", other.name, DECK_NAME_DELIMITER))
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NewCardOrder {
    Sequential,
    Random,
}

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeechAction {
    Suspend,
    Tag,
}

/// Algorithm selector. Adding a variant is a compile-error-driven refactor:
/// `schedulers::resolve` must match it.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    Sm2,
    Fsrs,
    Leitner,
    #[serde(rename = "ai")]
    Adaptive,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCardPolicy {
    pub per_day: u32,
    /// Learning step delays, in minutes.
    pub delays: Vec<u32>,
    /// `[graduating, easy, lapsed]`, in days. The third entry is carried for
    /// schema compatibility; lapse intervals are governed by `LapsePolicy`.
    pub ints: [u32; 3],
    pub order: NewCardOrder,
}

impl Default for NewCardPolicy {
    fn default() -> Self {
        Self {
            per_day: 20,
            delays: vec![1, 10],
            ints: [1, 4, 7],
            order: NewCardOrder::Sequential,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPolicy {
    pub per_day: u32,
    /// Global interval multiplier.
    pub ivl_fct: f64,
    /// Easy bonus, in permille.
    pub ease4: u32,
    /// Maximum interval, in days.
    pub max_ivl: u32,
    /// Fuzz fraction applied to computed intervals.
    pub fuzz: f64,
    pub hard_factor: f64,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            per_day: 200,
            ivl_fct: 1.0,
            ease4: 1300,
            max_ivl: 36_500,
            fuzz: 0.05,
            hard_factor: 1.2,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LapsePolicy {
    /// Relearning step delays, in minutes.
    pub delays: Vec<u32>,
    /// Multiplier applied to the pre-lapse interval.
    pub mult: f64,
    /// Floor for the post-lapse interval, in days.
    pub min_int: u32,
    pub leech_fails: u32,
    pub leech_action: LeechAction,
}

impl Default for LapsePolicy {
    fn default() -> Self {
        Self {
            delays: vec![10],
            mult: 0.0,
            min_int: 1,
            leech_fails: 8,
            leech_action: LeechAction::Suspend,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FsrsParams {
    /// Values between 70% and 97% are considered reasonable.
    pub target_retention: f64,
    /// Model weights; empty means the upstream defaults.
    pub weights: Vec<f64>,
}

impl Default for FsrsParams {
    fn default() -> Self {
        Self {
            target_retention: 0.9,
            weights: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeitnerParams {
    /// Interval, in days, for each box.
    pub box_intervals: Vec<u32>,
    /// How many boxes a failed card falls.
    pub drop_boxes: u32,
}

impl Default for LeitnerParams {
    fn default() -> Self {
        Self {
            box_intervals: vec![1, 2, 5, 8, 14],
            drop_boxes: 1,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveParams {
    pub target_retention: f64,
    /// Review-time budget the daily control loop solves against.
    pub daily_minutes: u32,
    pub goal: Option<String>,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            target_retention: 0.9,
            daily_minutes: 20,
            goal: None,
        }
    }
}

/// Per-deck scheduling policy.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckConfig {
    pub id: DeckConfigId,
    pub name: String,
    pub algo: AlgorithmKind,
    pub new: NewCardPolicy,
    pub rev: ReviewPolicy,
    pub lapse: LapsePolicy,
    pub fsrs: FsrsParams,
    pub leitner: LeitnerParams,
    pub adaptive: AdaptiveParams,
    #[serde(with = "ts_seconds")]
    pub updated_at: DateTime<Utc>,
    pub usn: Usn,
}

impl DeckConfig {
    pub fn new(id: DeckConfigId, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            algo: AlgorithmKind::Sm2,
            new: NewCardPolicy::default(),
            rev: ReviewPolicy::default(),
            lapse: LapsePolicy::default(),
            fsrs: FsrsParams::default(),
            leitner: LeitnerParams::default(),
            adaptive: AdaptiveParams::default(),
            updated_at: created_at,
            usn: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelKind {
    Standard,
    Cloze,
    ImageOcclusion,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTemplate {
    pub name: String,
    pub ord: u32,
}

/// Note type. Determines how a note renders into one or more sibling cards.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub kind: ModelKind,
    pub fields: Vec<String>,
    pub templates: Vec<CardTemplate>,
    #[serde(with = "ts_seconds")]
    pub updated_at: DateTime<Utc>,
    pub usn: Usn,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub model_id: ModelId,
    /// Field values joined with [`FIELD_SEPARATOR`].
    pub fields: String,
    pub tags: Vec<String>,
    #[serde(with = "ts_seconds")]
    pub updated_at: DateTime<Utc>,
    pub usn: Usn,
}

impl Note {
    pub fn field_values(&self) -> Vec<&str> {
        self.fields.split(FIELD_SEPARATOR).collect()
    }

    pub fn set_field_values(&mut self, values: &[impl AsRef<str>]) {
        self.fields = values
            .iter()
            .map(|v| v.as_ref())
            .collect::<Vec<_>>()
            .join(&FIELD_SEPARATOR.to_string());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_string());
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CardType {
    #[default]
    New,
    Learning,
    Review,
    Relearning,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CardQueue {
    #[default]
    New,
    /// Intraday learning; `due` is wall-clock seconds.
    Learning,
    /// Learning step of a day or more; selection treats it like `Learning`.
    DayLearn,
    Review,
    Suspended,
    UserBuried,
    SchedBuried,
}

impl CardQueue {
    pub fn is_buried(self) -> bool {
        matches!(self, CardQueue::UserBuried | CardQueue::SchedBuried)
    }

    /// Queues that selection must never return.
    pub fn is_excluded_from_selection(self) -> bool {
        matches!(
            self,
            CardQueue::Suspended | CardQueue::UserBuried | CardQueue::SchedBuried
        )
    }
}

impl CardType {
    /// The canonical queue for a card of this type, used to self-heal
    /// type/queue mismatches.
    pub fn canonical_queue(self) -> CardQueue {
        match self {
            CardType::New => CardQueue::New,
            CardType::Learning | CardType::Relearning => CardQueue::Learning,
            CardType::Review => CardQueue::Review,
        }
    }
}

/// One card generated from a note by a template.
///
/// The unit of `due` depends on `ctype`:
/// - `New`: insertion position.
/// - `Learning`/`Relearning`: wall-clock seconds.
/// - `Review`: logical day number since collection creation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    pub note_id: NoteId,
    pub deck_id: DeckId,
    /// Which sibling of the note this card renders; 0-based template ordinal.
    pub template_ord: u32,
    pub ctype: CardType,
    pub queue: CardQueue,
    pub due: i64,
    /// Interval in days, meaningful for review cards. During relearning it
    /// holds the post-lapse interval applied at graduation.
    pub ivl: u32,
    /// Ease factor in permille. Never below [`MINIMUM_EASE_FACTOR`].
    pub factor: u32,
    pub reps: u32,
    pub lapses: u32,
    /// Learning steps remaining.
    pub left: u32,
    /// FSRS memory stability; zero until the first FSRS review.
    pub stability: f64,
    /// FSRS memory difficulty; zero until the first FSRS review.
    pub difficulty: f64,
    #[serde(with = "ts_seconds")]
    pub updated_at: DateTime<Utc>,
    pub usn: Usn,
    /// JSON object for per-algorithm extension state (e.g. the Leitner box).
    pub custom_data: Value,
}

impl Card {
    pub fn new(
        id: CardId,
        note_id: NoteId,
        deck_id: DeckId,
        template_ord: u32,
        position: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            note_id,
            deck_id,
            template_ord,
            ctype: CardType::New,
            queue: CardQueue::New,
            due: i64::from(position),
            ivl: 0,
            factor: INITIAL_EASE_FACTOR,
            reps: 0,
            lapses: 0,
            left: 0,
            stability: 0.0,
            difficulty: 0.0,
            updated_at: created_at,
            usn: 0,
            custom_data: Value::Object(Map::new()),
        }
    }
}

/// Self-reported recall quality.
#[derive(Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Grade {
    Again,
    Hard,
    Good,
    Easy,
}

impl Grade {
    /// Wire value submitted by clients: `Again=1, Hard=2, Good=3, Easy=4`.
    pub fn from_wire(value: u32) -> Option<Grade> {
        match value {
            1 => Some(Grade::Again),
            2 => Some(Grade::Hard),
            3 => Some(Grade::Good),
            4 => Some(Grade::Easy),
            _ => None,
        }
    }

    pub fn wire_value(self) -> u32 {
        match self {
            Grade::Again => 1,
            Grade::Hard => 2,
            Grade::Good => 3,
            Grade::Easy => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RevlogKind {
    Learn,
    Review,
    Relearn,
}

/// One row per review ever done; append-only.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLogEntry {
    /// Millisecond timestamp; unique across the log.
    pub id: i64,
    pub card_id: CardId,
    pub grade: Grade,
    /// Signed: negative seconds while (re)learning, positive days for reviews.
    pub ivl: i64,
    /// Previous interval, same encoding as `ivl`.
    pub last_ivl: i64,
    pub factor: u32,
    pub response_time_ms: u32,
    pub kind: RevlogKind,
    pub usn: Usn,
}

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GraveKind {
    Card,
    Note,
    Deck,
}

/// Tombstone retained for eventual sync reconciliation.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grave {
    pub usn: Usn,
    pub oid: i64,
    pub kind: GraveKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use strum::IntoEnumIterator;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn grade_wire_values_round_trip() {
        for grade in Grade::iter() {
            assert_eq!(Grade::from_wire(grade.wire_value()), Some(grade));
        }
        assert_eq!(Grade::from_wire(0), None);
        assert_eq!(Grade::from_wire(5), None);
    }

    #[test]
    fn deck_parent_name() {
        let deck = |name: &str| Deck {
            id: 2,
            name: name.to_string(),
            config_id: 1,
            updated_at: at(0),
            usn: 0,
        };
        assert_eq!(deck("A").parent_name(), None);
        assert_eq!(deck("A::B").parent_name(), Some("A"));
        assert_eq!(deck("A::B::C").parent_name(), Some("A::B"));
    }

    #[test]
    fn deck_is_under_requires_full_component() {
        let parent = Deck {
            id: 1,
            name: "Japanese".to_string(),
            config_id: 1,
            updated_at: at(0),
            usn: 0,
        };
        let child = Deck {
            id: 2,
            name: "Japanese::Vocab".to_string(),
            config_id: 1,
            updated_at: at(0),
            usn: 0,
        };
        let lookalike = Deck {
            id: 3,
            name: "JapaneseHistory".to_string(),
            config_id: 1,
            updated_at: at(0),
            usn: 0,
        };
        assert!(child.is_under(&parent));
        assert!(parent.is_under(&parent));
        assert!(!lookalike.is_under(&parent));
        assert!(!parent.is_under(&child));
    }

    #[test]
    fn note_field_values_round_trip() {
        let mut note = Note {
            id: 1,
            model_id: 1,
            fields: String::new(),
            tags: vec![],
            updated_at: at(0),
            usn: 0,
        };
        note.set_field_values(&["front", "back"]);
        assert_eq!(note.field_values(), vec!["front", "back"]);
    }

    #[test]
    fn note_tags_deduplicate() {
        let mut note = Note {
            id: 1,
            model_id: 1,
            fields: String::new(),
            tags: vec![],
            updated_at: at(0),
            usn: 0,
        };
        note.add_tag(LEECH_TAG);
        note.add_tag(LEECH_TAG);
        assert_eq!(note.tags, vec![LEECH_TAG.to_string()]);
    }

    #[test]
    fn canonical_queue_heals_mismatches() {
        assert_eq!(CardType::New.canonical_queue(), CardQueue::New);
        assert_eq!(CardType::Learning.canonical_queue(), CardQueue::Learning);
        assert_eq!(CardType::Relearning.canonical_queue(), CardQueue::Learning);
        assert_eq!(CardType::Review.canonical_queue(), CardQueue::Review);
    }

    #[test]
    fn new_card_defaults() {
        let card = Card::new(1, 1, 1, 0, 5, at(0));
        assert_eq!(card.ctype, CardType::New);
        assert_eq!(card.queue, CardQueue::New);
        assert_eq!(card.due, 5);
        assert_eq!(card.factor, INITIAL_EASE_FACTOR);
        assert!(card.custom_data.is_object());
    }
}
