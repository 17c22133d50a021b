//! Classic ease-factor scheduling. Learning and relearning cards walk their
//! configured step delays; review cards grow by the ease factor, with the
//! hard/easy multipliers and the lapse path below.

use super::{CardPatch, SchedulingContext, SrsAlgorithm, fuzzed_interval};
use crate::Error;
use crate::model::{
    Card, CardQueue, CardType, DeckConfig, Grade, INITIAL_EASE_FACTOR, MINIMUM_EASE_FACTOR,
    ReviewLogEntry,
};

const HARD_FACTOR_DROP: u32 = 150;
const EASY_FACTOR_BONUS: u32 = 150;
const LAPSE_FACTOR_DROP: u32 = 200;

pub struct Sm2;

impl SrsAlgorithm for Sm2 {
    fn name(&self) -> &'static str {
        "sm2"
    }

    fn schedule_answer(
        &self,
        card: &Card,
        _previous_review: Option<&ReviewLogEntry>,
        grade: Grade,
        policy: &DeckConfig,
        ctx: &mut SchedulingContext<'_>,
    ) -> Result<CardPatch, Error> {
        let mut patch = CardPatch::from_card(card);
        match card.ctype {
            CardType::New | CardType::Learning | CardType::Relearning => {
                answer_learning(card, grade, policy, ctx, &mut patch);
            }
            CardType::Review => answer_review(card, grade, policy, ctx, &mut patch),
        }
        Ok(patch)
    }
}

pub(crate) fn learning_delays(ctype: CardType, policy: &DeckConfig) -> &[u32] {
    if ctype == CardType::Relearning {
        &policy.lapse.delays
    } else {
        &policy.new.delays
    }
}

fn answer_learning(
    card: &Card,
    grade: Grade,
    policy: &DeckConfig,
    ctx: &mut SchedulingContext<'_>,
    patch: &mut CardPatch,
) {
    let delays = learning_delays(card.ctype, policy);
    let relearning = card.ctype == CardType::Relearning;
    let mut left = card.left;
    if card.ctype == CardType::New {
        patch.ctype = CardType::Learning;
        patch.queue = CardQueue::Learning;
        left = delays.len() as u32;
    }

    match grade {
        Grade::Again => {
            if delays.is_empty() {
                graduate(card, policy, ctx, patch, relearning, false);
            } else {
                patch.left = delays.len() as u32;
                patch.due = ctx.due_in_minutes(delays[0]);
                patch.queue = CardQueue::Learning;
            }
        }
        // Three-button learning surface: Hard folds into Good.
        Grade::Hard | Grade::Good => {
            if left > 1 && !delays.is_empty() {
                let index = delays.len().saturating_sub(left as usize).min(delays.len() - 1);
                patch.due = ctx.due_in_minutes(delays[index]);
                patch.left = left - 1;
                patch.queue = CardQueue::Learning;
            } else {
                graduate(card, policy, ctx, patch, relearning, false);
            }
        }
        Grade::Easy => graduate(card, policy, ctx, patch, relearning, true),
    }
}

/// Leave the (re)learning phase for the review queue.
fn graduate(
    card: &Card,
    policy: &DeckConfig,
    ctx: &mut SchedulingContext<'_>,
    patch: &mut CardPatch,
    relearning: bool,
    easy: bool,
) {
    let ivl = if relearning {
        // The post-lapse interval was fixed when the card lapsed.
        card.ivl.max(policy.lapse.min_int).max(1)
    } else if easy {
        policy.new.ints[1]
    } else {
        policy.new.ints[0]
    };
    patch.ivl = fuzzed_interval(ivl, policy.rev.fuzz, policy.rev.max_ivl, ctx.rng);
    if !relearning {
        patch.factor = patch.factor.max(INITIAL_EASE_FACTOR);
    }
    patch.ctype = CardType::Review;
    patch.queue = CardQueue::Review;
    patch.due = ctx.today + i64::from(patch.ivl);
    patch.reps = card.reps + 1;
    patch.left = 0;
}

fn answer_review(
    card: &Card,
    grade: Grade,
    policy: &DeckConfig,
    ctx: &mut SchedulingContext<'_>,
    patch: &mut CardPatch,
) {
    patch.reps = card.reps + 1;
    match grade {
        Grade::Again => lapse(card, policy, ctx, patch),
        Grade::Hard => {
            let next = (f64::from(card.ivl) * policy.rev.hard_factor * policy.rev.ivl_fct).floor();
            patch.ivl = constrain_and_fuzz(next, card.ivl, policy, ctx);
            patch.factor = card
                .factor
                .saturating_sub(HARD_FACTOR_DROP)
                .max(MINIMUM_EASE_FACTOR);
            patch.due = ctx.today + i64::from(patch.ivl);
        }
        Grade::Good => {
            let base = elapsed_adjusted_interval(card, ctx);
            let next = (base * (f64::from(card.factor) / 1000.0) * policy.rev.ivl_fct).floor();
            patch.ivl = constrain_and_fuzz(next, card.ivl, policy, ctx);
            patch.due = ctx.today + i64::from(patch.ivl);
        }
        Grade::Easy => {
            let base = elapsed_adjusted_interval(card, ctx);
            let next = (base
                * (f64::from(card.factor) / 1000.0)
                * (f64::from(policy.rev.ease4) / 1000.0)
                * policy.rev.ivl_fct)
                .floor();
            patch.ivl = constrain_and_fuzz(next, card.ivl, policy, ctx);
            patch.factor = card.factor + EASY_FACTOR_BONUS;
            patch.due = ctx.today + i64::from(patch.ivl);
        }
    }
}

/// Credit reviews answered late: the growth formulas start from the interval
/// the card actually survived.
fn elapsed_adjusted_interval(card: &Card, ctx: &SchedulingContext<'_>) -> f64 {
    let overdue = (ctx.today - card.due).max(0);
    f64::from(card.ivl) + overdue as f64
}

/// Successful reviews always gain at least one day, never exceed the deck
/// maximum, and are fuzzed afterwards.
fn constrain_and_fuzz(
    next: f64,
    previous_ivl: u32,
    policy: &DeckConfig,
    ctx: &mut SchedulingContext<'_>,
) -> u32 {
    let next = (next as i64)
        .max(i64::from(previous_ivl) + 1)
        .min(i64::from(policy.rev.max_ivl));
    fuzzed_interval(
        u32::try_from(next).unwrap_or(1),
        policy.rev.fuzz,
        policy.rev.max_ivl,
        ctx.rng,
    )
}

fn lapse(card: &Card, policy: &DeckConfig, ctx: &mut SchedulingContext<'_>, patch: &mut CardPatch) {
    patch.lapses = card.lapses + 1;
    patch.factor = card
        .factor
        .saturating_sub(LAPSE_FACTOR_DROP)
        .max(MINIMUM_EASE_FACTOR);
    let post_lapse = ((f64::from(card.ivl) * policy.lapse.mult).floor() as u32)
        .max(policy.lapse.min_int)
        .max(1)
        .min(policy.rev.max_ivl);
    patch.ivl = post_lapse;
    if policy.lapse.delays.is_empty() {
        // No relearning steps configured: straight back to review.
        patch.ctype = CardType::Review;
        patch.queue = CardQueue::Review;
        patch.due = ctx.today + i64::from(post_lapse);
        patch.left = 0;
    } else {
        patch.ctype = CardType::Relearning;
        patch.queue = CardQueue::Learning;
        patch.due = ctx.due_in_minutes(policy.lapse.delays[0]);
        patch.left = policy.lapse.delays.len() as u32;
    }
}
