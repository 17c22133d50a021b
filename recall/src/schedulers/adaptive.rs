//! Adaptive tier: FSRS scheduling plus a daily control loop that sizes the
//! new-card intake so predicted review time fits the configured minute
//! budget. The per-card math is identical to the FSRS strategy; only the
//! retention target and the intake planning differ.

use super::fsrs::schedule_with_retention;
use super::{CardPatch, SchedulingContext, SrsAlgorithm};
use crate::Error;
use crate::model::{Card, DeckConfig, Grade, ReviewLogEntry};

/// Fallback when the review log carries no timing data yet.
const DEFAULT_REVIEW_SECONDS: f64 = 8.0;
/// A freshly introduced card costs roughly this many reviews on day one.
const NEW_CARD_COST_MULTIPLIER: f64 = 3.0;

pub struct Adaptive;

impl SrsAlgorithm for Adaptive {
    fn name(&self) -> &'static str {
        "ai"
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
            policy.adaptive.target_retention,
            ctx,
        )
    }
}

/// Solve for today's new-card limit: spend whatever is left of the minute
/// budget after the predicted review load. Never plans below one card, and
/// never above the deck's own configured cap.
pub fn plan_new_limit(
    policy: &DeckConfig,
    due_reviews_today: u32,
    average_review_seconds: Option<f64>,
) -> u32 {
    let avg = average_review_seconds
        .filter(|avg| *avg > 0.0)
        .unwrap_or(DEFAULT_REVIEW_SECONDS);
    let budget = f64::from(policy.adaptive.daily_minutes) * 60.0;
    let predicted_review_time = f64::from(due_reviews_today) * avg;
    let remaining = (budget - predicted_review_time).max(0.0);
    let per_new_card = avg * NEW_CARD_COST_MULTIPLIER;
    let solved = (remaining / per_new_card).floor() as u32;
    solved.clamp(1, policy.new.per_day.max(1))
}

/// Mean observed answer time, in seconds.
pub fn average_review_seconds(revlog: &[ReviewLogEntry]) -> Option<f64> {
    if revlog.is_empty() {
        return None;
    }
    let total_ms: u64 = revlog.iter().map(|r| u64::from(r.response_time_ms)).sum();
    Some(total_ms as f64 / revlog.len() as f64 / 1000.0)
}
