//! Scheduling strategies behind one contract. The selector is a closed enum
//! (`model::AlgorithmKind`), so adding a strategy is a compile-error-driven
//! refactor rather than a runtime lookup.

use crate::Error;
use crate::model::{
    AlgorithmKind, Card, CardQueue, CardType, Collection, DayNumber, DeckConfig, Grade,
    ReviewLogEntry,
};
use crate::timing;
use chrono::{DateTime, Utc};
use rand::{Rng, rngs::StdRng};
use serde_json::Value;

pub mod adaptive;
pub mod fsrs;
pub mod leitner;
pub mod sm2;

/// Everything an algorithm may consult besides the card and policy.
pub struct SchedulingContext<'a> {
    pub now: DateTime<Utc>,
    pub today: DayNumber,
    pub col: &'a Collection,
    pub rng: &'a mut StdRng,
}

impl SchedulingContext<'_> {
    pub fn now_seconds(&self) -> i64 {
        self.now.timestamp()
    }

    /// Wall-clock due stamp `minutes` from now, for learning steps.
    pub fn due_in_minutes(&self, minutes: u32) -> i64 {
        self.now_seconds() + i64::from(minutes) * 60
    }

    pub fn day_number_of(&self, at: DateTime<Utc>) -> DayNumber {
        timing::day_number(self.col, at)
    }

    pub fn day_start(&self, day: DayNumber) -> DateTime<Utc> {
        timing::day_start(self.col, day)
    }
}

/// The delta an algorithm produces for an answered card. Identity and
/// bookkeeping fields (ids, timestamps, USN) stay with the store.
#[derive(Clone, Debug, PartialEq)]
pub struct CardPatch {
    pub ctype: CardType,
    pub queue: CardQueue,
    pub due: i64,
    pub ivl: u32,
    pub factor: u32,
    pub reps: u32,
    pub lapses: u32,
    pub left: u32,
    pub stability: f64,
    pub difficulty: f64,
    pub custom_data: Value,
}

impl CardPatch {
    /// Start from the card's current state; algorithms override what changes.
    pub fn from_card(card: &Card) -> Self {
        Self {
            ctype: card.ctype,
            queue: card.queue,
            due: card.due,
            ivl: card.ivl,
            factor: card.factor,
            reps: card.reps,
            lapses: card.lapses,
            left: card.left,
            stability: card.stability,
            difficulty: card.difficulty,
            custom_data: card.custom_data.clone(),
        }
    }

    pub fn apply_to(self, card: &mut Card) {
        card.ctype = self.ctype;
        card.queue = self.queue;
        card.due = self.due;
        card.ivl = self.ivl;
        card.factor = self.factor;
        card.reps = self.reps;
        card.lapses = self.lapses;
        card.left = self.left;
        card.stability = self.stability;
        card.difficulty = self.difficulty;
        card.custom_data = self.custom_data;
    }
}

pub trait SrsAlgorithm {
    fn name(&self) -> &'static str;

    /// Compute the card delta for one graded answer. Pure with respect to the
    /// store: the only inputs are the card, its latest review, the policy,
    /// and the context.
    fn schedule_answer(
        &self,
        card: &Card,
        previous_review: Option<&ReviewLogEntry>,
        grade: Grade,
        policy: &DeckConfig,
        ctx: &mut SchedulingContext<'_>,
    ) -> Result<CardPatch, Error>;
}

pub fn resolve(kind: AlgorithmKind) -> &'static dyn SrsAlgorithm {
    match kind {
        AlgorithmKind::Sm2 => &sm2::Sm2,
        AlgorithmKind::Fsrs => &fsrs::Fsrs,
        AlgorithmKind::Leitner => &leitner::Leitner,
        AlgorithmKind::Adaptive => &adaptive::Adaptive,
    }
}

/// Randomized perturbation of a computed interval, in days, so sibling
/// reviews drift apart. Small intervals stay within one day of the input;
/// larger ones within the policy's fuzz fraction. Capped at `max_ivl`.
pub fn fuzzed_interval(ivl: u32, fuzz: f64, max_ivl: u32, rng: &mut StdRng) -> u32 {
    let ivl = ivl.clamp(1, max_ivl.max(1));
    if fuzz <= f64::EPSILON || ivl < 2 {
        return ivl;
    }
    let spread: f64 = rng.gen_range(-fuzz..=fuzz);
    let proposed = (f64::from(ivl) * (1.0 + spread)).round() as i64;
    let lower = (f64::from(ivl) * (1.0 - fuzz)).floor() as i64;
    let upper = (f64::from(ivl) * (1.0 + fuzz)).ceil() as i64;
    let (lower, upper) = if upper - lower < 2 {
        ((i64::from(ivl) - 1).max(1), i64::from(ivl) + 1)
    } else {
        (lower.max(1), upper)
    };
    u32::try_from(proposed.clamp(lower, upper).min(i64::from(max_ivl.max(1)))).unwrap_or(1)
}
