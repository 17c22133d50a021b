//! FSRS strategy, backed by the `rs-fsrs` reference implementation. The
//! card's memory state (stability, difficulty) lives on the card row; this
//! module only converts between the domain card and the `rs_fsrs` card.

use super::{CardPatch, SchedulingContext, SrsAlgorithm};
use crate::model::{Card, CardQueue, CardType, DeckConfig, Grade, ReviewLogEntry};
use crate::{Error, SchedulerErrorKind};
use chrono::{DateTime, Utc};
use rs_fsrs::{Card as FsrsCard, FSRS, Parameters, Rating as FsrsRating, State as FsrsState};

pub struct Fsrs;

impl SrsAlgorithm for Fsrs {
    fn name(&self) -> &'static str {
        "fsrs"
    }

    fn schedule_answer(
        &self,
        card: &Card,
        previous_review: Option<&ReviewLogEntry>,
        grade: Grade,
        policy: &DeckConfig,
        ctx: &mut SchedulingContext<'_>,
    ) -> Result<CardPatch, Error> {
        schedule_with_retention(
            card,
            previous_review,
            grade,
            policy,
            policy.fsrs.target_retention,
            ctx,
        )
    }
}

/// Shared by the plain FSRS tier and the adaptive tier, which only differs in
/// where its target retention comes from.
pub(crate) fn schedule_with_retention(
    card: &Card,
    previous_review: Option<&ReviewLogEntry>,
    grade: Grade,
    policy: &DeckConfig,
    target_retention: f64,
    ctx: &mut SchedulingContext<'_>,
) -> Result<CardPatch, Error> {
    let fsrs = FSRS::new(parameters(policy, target_retention));
    let fsrs_card = to_fsrs_card(card, previous_review, ctx);
    // Four candidate next states, one per rating; pick the graded one.
    let mut record_log = fsrs.repeat(fsrs_card, ctx.now);
    let info = record_log
        .remove(&to_fsrs_rating(grade))
        .ok_or_else(|| Error::from(SchedulerErrorKind::InvalidGrade(grade.wire_value())))?;

    let mut patch = CardPatch::from_card(card);
    patch.stability = info.card.stability;
    patch.difficulty = info.card.difficulty;
    patch.reps = card.reps + 1;
    if card.ctype == CardType::Review && grade == Grade::Again {
        patch.lapses = card.lapses + 1;
    }
    match info.card.state {
        FsrsState::New | FsrsState::Learning => {
            patch.ctype = CardType::Learning;
            patch.queue = CardQueue::Learning;
            patch.due = info.card.due.timestamp();
            patch.left = 1;
        }
        FsrsState::Relearning => {
            patch.ctype = CardType::Relearning;
            patch.queue = CardQueue::Learning;
            patch.due = info.card.due.timestamp();
            patch.left = 1;
        }
        FsrsState::Review => {
            patch.ctype = CardType::Review;
            patch.queue = CardQueue::Review;
            patch.ivl = u32::try_from(info.card.scheduled_days)
                .unwrap_or(1)
                .clamp(1, policy.rev.max_ivl);
            patch.due = ctx.day_number_of(info.card.due).max(ctx.today);
            patch.left = 0;
        }
    }
    Ok(patch)
}

fn parameters(policy: &DeckConfig, target_retention: f64) -> Parameters {
    let mut parameters = Parameters {
        request_retention: target_retention,
        maximum_interval: i32::try_from(policy.rev.max_ivl).unwrap_or(i32::MAX),
        ..Parameters::default()
    };
    if let Ok(weights) = <[f64; 19]>::try_from(policy.fsrs.weights.clone()) {
        parameters.w = weights;
    }
    parameters
}

fn to_fsrs_rating(grade: Grade) -> FsrsRating {
    match grade {
        Grade::Again => FsrsRating::Again,
        Grade::Hard => FsrsRating::Hard,
        Grade::Good => FsrsRating::Good,
        Grade::Easy => FsrsRating::Easy,
    }
}

fn to_fsrs_card(
    card: &Card,
    previous_review: Option<&ReviewLogEntry>,
    ctx: &SchedulingContext<'_>,
) -> FsrsCard {
    let state = match card.ctype {
        CardType::New => FsrsState::New,
        CardType::Learning => FsrsState::Learning,
        CardType::Review => FsrsState::Review,
        CardType::Relearning => FsrsState::Relearning,
    };
    let due = match card.ctype {
        CardType::Review => ctx.day_start(card.due),
        CardType::Learning | CardType::Relearning => {
            DateTime::from_timestamp(card.due, 0).unwrap_or(ctx.now)
        }
        CardType::New => ctx.now,
    };
    let last_review = previous_review
        .and_then(|r| DateTime::from_timestamp_millis(r.id))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    FsrsCard {
        due,
        stability: card.stability,
        difficulty: card.difficulty,
        // Only used as outputs by the reference scheduler; elapsed time is
        // derived from `last_review`.
        elapsed_days: 0,
        scheduled_days: 0,
        reps: 0,
        lapses: 0,
        state,
        last_review,
    }
}
