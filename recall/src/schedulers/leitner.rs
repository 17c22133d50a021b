//! Fixed-box scheduling. The card's current box is kept in its
//! `custom_data`, so the strategy needs no extra columns.

use super::{CardPatch, SchedulingContext, SrsAlgorithm, fuzzed_interval};
use crate::model::{Card, CardQueue, CardType, DeckConfig, Grade, ReviewLogEntry};
use crate::{Error, LibraryError};
use serde_json::{Map, Value};

const BOX_KEY: &str = "box";

pub struct Leitner;

fn current_box(card: &Card) -> u32 {
    card.custom_data
        .get(BOX_KEY)
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(0)
}

impl SrsAlgorithm for Leitner {
    fn name(&self) -> &'static str {
        "leitner"
    }

    fn schedule_answer(
        &self,
        card: &Card,
        _previous_review: Option<&ReviewLogEntry>,
        grade: Grade,
        policy: &DeckConfig,
        ctx: &mut SchedulingContext<'_>,
    ) -> Result<CardPatch, Error> {
        let boxes = &policy.leitner.box_intervals;
        if boxes.is_empty() {
            return Err(Error::Library(LibraryError::InvalidConfig(
                "Leitner box intervals must not be empty.".to_string(),
            )));
        }
        let last = (boxes.len() - 1) as u32;
        let current = current_box(card).min(last);

        let mut patch = CardPatch::from_card(card);
        let next_box = match grade {
            Grade::Again => {
                patch.lapses = card.lapses + 1;
                current.saturating_sub(policy.leitner.drop_boxes)
            }
            Grade::Hard => current,
            Grade::Good | Grade::Easy => (current + 1).min(last),
        };
        let ivl = boxes[next_box as usize].max(1);
        patch.ivl = fuzzed_interval(ivl, policy.rev.fuzz, policy.rev.max_ivl, ctx.rng);
        patch.ctype = CardType::Review;
        patch.queue = CardQueue::Review;
        patch.due = ctx.today + i64::from(patch.ivl);
        patch.reps = card.reps + 1;
        patch.left = 0;

        let mut data = match patch.custom_data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        data.insert(BOX_KEY.to_string(), Value::from(next_box));
        patch.custom_data = Value::Object(data);
        Ok(patch)
    }
}
