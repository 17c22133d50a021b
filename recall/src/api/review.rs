//! The scheduler core: queue selection, answer processing, revlog emission,
//! daily-cap gating, and session-scoped sibling burying.

use super::queue::{self, Selection};
use crate::ledger::TodayUsage;
use crate::model::{
    Card, CardId, CardQueue, CardType, DayNumber, DeckId, Grade, LEECH_TAG, LeechAction,
    ModelKind, NoteId, RevlogKind, ReviewLogEntry,
};
use crate::schedulers::{self, SchedulingContext, sm2};
use crate::store::Store;
use crate::timing::{Clock, day_number};
use crate::{Error, SchedulerErrorKind};
use indexmap::IndexMap;
use log::{debug, warn};
use rand::{SeedableRng, rngs::StdRng};
use std::collections::HashSet;

/// Owns the store and all session state. One per host process; tests build
/// one per case.
pub struct Scheduler {
    store: Store,
    clock: Clock,
    rng: StdRng,
    deck_scope: Option<DeckId>,
    /// Session-scoped sibling bury set. Never persisted; canonical card
    /// queues are not touched for sibling burying.
    buried_notes: HashSet<NoteId>,
    /// Daily new-card limits planned by the adaptive tier, keyed by deck.
    adaptive_new_limits: IndexMap<DeckId, (DayNumber, u32)>,
}

impl Scheduler {
    pub fn new(store: Store) -> Self {
        Self::with_clock_and_seed(store, Clock::System, rand::random())
    }

    /// Deterministic construction: a fixed clock and RNG seed reproduce the
    /// exact same card states and review log.
    pub fn with_clock_and_seed(store: Store, clock: Clock, seed: u64) -> Self {
        Self {
            store,
            clock,
            rng: StdRng::seed_from_u64(seed),
            deck_scope: None,
            buried_notes: HashSet::new(),
            adaptive_new_limits: IndexMap::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn into_store(self) -> Store {
        self.store
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    /// Swap in a freshly loaded store, dropping all session state.
    pub fn replace_store(&mut self, store: Store) {
        self.store = store;
        self.deck_scope = None;
        self.buried_notes.clear();
        self.adaptive_new_limits.clear();
    }

    /// Serialize the store, honouring the snapshot contract: the session
    /// bury set is cleared first so bury state never reaches disk.
    pub fn snapshot_json(&mut self) -> Result<String, Error> {
        self.clear_buried_siblings();
        crate::snapshot::save(&self.store)
    }

    /// Replace the store from snapshot JSON. On any error the current store
    /// is left untouched.
    pub fn load_snapshot_json(&mut self, data: &str) -> Result<(), Error> {
        let store = crate::snapshot::load(data)?;
        self.replace_store(store);
        Ok(())
    }

    pub fn today(&self) -> DayNumber {
        day_number(&self.store.col, self.clock.now())
    }

    /// Restrict selection to a deck subtree, or `None` for the whole
    /// collection. Switching scope starts a new session.
    pub fn set_deck(&mut self, deck_id: Option<DeckId>) -> Result<(), Error> {
        if let Some(deck_id) = deck_id {
            self.store.deck(deck_id)?;
        }
        self.deck_scope = deck_id;
        self.clear_buried_siblings();
        Ok(())
    }

    pub fn deck_scope(&self) -> Option<DeckId> {
        self.deck_scope
    }

    /// Drop the session bury set. Idempotent; callers must invoke this before
    /// snapshotting so bury state never reaches disk.
    pub fn clear_buried_siblings(&mut self) {
        self.buried_notes.clear();
    }

    pub fn buried_note_ids(&self) -> &HashSet<NoteId> {
        &self.buried_notes
    }

    /// Head of the queue, or `None` when nothing is eligible (possibly
    /// because a daily cap is exhausted).
    pub fn get_next(&mut self) -> Result<Option<Card>, Error> {
        self.select_at(0)
    }

    /// The card that would follow the head, under the same ordering.
    pub fn peek_next(&mut self) -> Result<Option<Card>, Error> {
        self.select_at(1)
    }

    fn select_at(&mut self, position: usize) -> Result<Option<Card>, Error> {
        self.unbury_on_day_rollover()?;
        let limits = self.plan_adaptive_limits()?;
        let now_seconds = self.clock.now_seconds();
        let today = self.today();
        let selection: Selection = queue::select(
            &self.store,
            self.deck_scope,
            now_seconds,
            today,
            &self.buried_notes,
            &limits,
            position,
        )?;
        if selection.card_id.is_none()
            && (selection.new_cap_reached || selection.review_cap_reached)
        {
            debug!(
                "selection exhausted by daily caps (new: {}, review: {})",
                selection.new_cap_reached, selection.review_cap_reached
            );
        }
        match selection.card_id {
            Some(card_id) => Ok(Some(self.store.card(card_id)?.clone())),
            None => Ok(None),
        }
    }

    /// Apply a graded answer: dispatch to the deck's algorithm, persist the
    /// delta, append a revlog entry, update the ledger, and bury siblings.
    pub fn answer(
        &mut self,
        card_id: CardId,
        grade: Grade,
        response_time_ms: u32,
    ) -> Result<Card, Error> {
        let now = self.clock.now();
        let today = self.today();
        let mut card = self.store.card(card_id)?.clone();
        if card.queue.is_excluded_from_selection() {
            return Err(SchedulerErrorKind::NotAnswerable {
                queue: card.queue.to_string(),
            }
            .into());
        }
        self.resync_queue_if_inconsistent(&mut card);

        let previous = card.clone();
        let policy = self.store.config_for_card(&card)?.clone();
        let previous_review = self.store.last_review_for_card(card_id).cloned();

        let algorithm = schedulers::resolve(policy.algo);
        let mut ctx = SchedulingContext {
            now,
            today,
            col: &self.store.col,
            rng: &mut self.rng,
        };
        let mut patch = algorithm.schedule_answer(
            &card,
            previous_review.as_ref(),
            grade,
            &policy,
            &mut ctx,
        )?;
        // Out-of-range algorithm output is clamped, never fatal.
        patch.ivl = patch.ivl.min(policy.rev.max_ivl);
        patch.factor = patch.factor.max(crate::model::MINIMUM_EASE_FACTOR);
        patch.apply_to(&mut card);
        self.store.update_card(card.clone(), now)?;

        if previous.ctype == CardType::Review
            && grade == Grade::Again
            && policy.lapse.leech_fails > 0
            && card.lapses >= policy.lapse.leech_fails
        {
            self.apply_leech_action(&mut card, policy.lapse.leech_action, now)?;
        }

        let entry = ReviewLogEntry {
            id: 0, // assigned by the store
            card_id,
            grade,
            ivl: scheduled_interval_encoded(&card, now.timestamp()),
            last_ivl: previous_interval_encoded(&previous, &policy),
            factor: card.factor,
            response_time_ms,
            kind: revlog_kind(previous.ctype),
            usn: 0,
        };
        self.store.add_revlog(entry, self.clock.now_millis());

        match previous.ctype {
            CardType::New => {
                self.store
                    .today_usage
                    .increment_new_introduced(card.deck_id, today);
            }
            CardType::Review | CardType::Relearning => {
                self.store
                    .today_usage
                    .increment_review_done(card.deck_id, today);
            }
            // Intraday learning steps are uncapped; only a card leaving a
            // day-long learning step consumes review capacity.
            CardType::Learning => {
                if previous.queue == CardQueue::DayLearn {
                    self.store
                        .today_usage
                        .increment_review_done(card.deck_id, today);
                }
            }
        }

        // Image-occlusion siblings stay visible: the remaining masks belong
        // to the same study moment.
        if self.store.model_for_card(&card)?.kind != ModelKind::ImageOcclusion {
            self.buried_notes.insert(card.note_id);
        }
        // Return the row as stored, with the stamped mod time and USN.
        Ok(self.store.card(card_id)?.clone())
    }

    /// Explicit user bury; unlike sibling burying this mutates the canonical
    /// queue and survives until the next day rollover or unbury.
    pub fn bury_card(&mut self, card_id: CardId) -> Result<(), Error> {
        let card = self.store.card(card_id)?.clone();
        match card.queue {
            CardQueue::Suspended => return Err(SchedulerErrorKind::Suspended.into()),
            CardQueue::UserBuried | CardQueue::SchedBuried => {
                return Err(SchedulerErrorKind::AlreadyBuried.into());
            }
            _ => {}
        }
        let mut card = card;
        card.queue = CardQueue::UserBuried;
        self.store.update_card(card, self.clock.now())
    }

    pub fn suspend_card(&mut self, card_id: CardId) -> Result<(), Error> {
        let mut card = self.store.card(card_id)?.clone();
        card.queue = CardQueue::Suspended;
        self.store.update_card(card, self.clock.now())
    }

    /// Return a suspended or buried card to its natural queue.
    pub fn restore_card(&mut self, card_id: CardId) -> Result<(), Error> {
        let mut card = self.store.card(card_id)?.clone();
        if !card.queue.is_excluded_from_selection() {
            return Ok(());
        }
        card.queue = card.ctype.canonical_queue();
        self.store.update_card(card, self.clock.now())
    }

    /// Restore every buried card. Suspended cards stay suspended.
    pub fn unbury_all(&mut self) -> Result<(), Error> {
        let buried: Vec<CardId> = self
            .store
            .cards()
            .values()
            .filter(|card| card.queue.is_buried())
            .map(|card| card.id)
            .collect();
        for card_id in buried {
            self.restore_card(card_id)?;
        }
        Ok(())
    }

    /// Cards whose lapse count has crossed their deck's leech threshold.
    pub fn leeches(&self) -> Result<Vec<&Card>, Error> {
        let mut leeches = Vec::new();
        for card in self.store.cards().values() {
            let policy = self.store.config_for_card(card)?;
            if policy.lapse.leech_fails > 0 && card.lapses >= policy.lapse.leech_fails {
                leeches.push(card);
            }
        }
        Ok(leeches)
    }

    /// Buried cards are restored once per logical day, like the overnight
    /// unbury of desktop clients.
    fn unbury_on_day_rollover(&mut self) -> Result<(), Error> {
        let today = self.today();
        if self.store.col.last_unbury_day < today {
            self.unbury_all()?;
            self.store.set_last_unbury_day(today, self.clock.now());
        }
        Ok(())
    }

    /// Solve the adaptive tier's new-card limits for today, one deck at a
    /// time, caching the result until the day changes.
    fn plan_adaptive_limits(&mut self) -> Result<IndexMap<DeckId, u32>, Error> {
        let today = self.today();
        let adaptive_decks: Vec<DeckId> = self
            .store
            .decks()
            .values()
            .filter_map(|deck| {
                let config = self.store.deck_configs().get(&deck.config_id)?;
                (config.algo == crate::model::AlgorithmKind::Adaptive).then_some(deck.id)
            })
            .collect();
        let mut limits = IndexMap::new();
        for deck_id in adaptive_decks {
            if let Some((planned_day, limit)) = self.adaptive_new_limits.get(&deck_id) {
                if *planned_day == today {
                    limits.insert(deck_id, *limit);
                    continue;
                }
            }
            let subtree: HashSet<DeckId> =
                self.store.deck_and_descendants(deck_id)?.into_iter().collect();
            let due_reviews = self
                .store
                .cards()
                .values()
                .filter(|card| {
                    subtree.contains(&card.deck_id)
                        && card.queue == CardQueue::Review
                        && card.due <= today
                })
                .count() as u32;
            let config_id = self.store.deck(deck_id)?.config_id;
            let policy = self.store.deck_config(config_id)?;
            let limit = schedulers::adaptive::plan_new_limit(
                policy,
                due_reviews,
                schedulers::adaptive::average_review_seconds(self.store.revlog()),
            );
            self.adaptive_new_limits.insert(deck_id, (today, limit));
            limits.insert(deck_id, limit);
        }
        Ok(limits)
    }

    fn resync_queue_if_inconsistent(&self, card: &mut Card) {
        let consistent = matches!(
            (card.ctype, card.queue),
            (CardType::New, CardQueue::New)
                | (CardType::Learning | CardType::Relearning, CardQueue::Learning | CardQueue::DayLearn)
                | (CardType::Review, CardQueue::Review)
        );
        if !consistent {
            warn!(
                "card {} queue {} does not match type {}; resyncing",
                card.id, card.queue, card.ctype
            );
            card.queue = card.ctype.canonical_queue();
        }
    }

    fn apply_leech_action(
        &mut self,
        card: &mut Card,
        action: LeechAction,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), Error> {
        match action {
            LeechAction::Suspend => {
                card.queue = CardQueue::Suspended;
                self.store.update_card(card.clone(), now)?;
            }
            LeechAction::Tag => {
                let mut note = self.store.note(card.note_id)?.clone();
                note.add_tag(LEECH_TAG);
                self.store.update_note(note, now)?;
            }
        }
        Ok(())
    }

    /// Aggregated today-usage for a deck subtree, for the host's capacity
    /// display.
    pub fn deck_today_counts(&self, deck_id: DeckId) -> Result<TodayUsage, Error> {
        let subtree = self.store.deck_and_descendants(deck_id)?;
        Ok(self.store.today_usage().subtree_usage(subtree, self.today()))
    }
}

/// Encode the interval a card was just scheduled to, for the review log:
/// negative seconds while (re)learning, positive days once in review.
fn scheduled_interval_encoded(card: &Card, now_seconds: i64) -> i64 {
    match card.ctype {
        CardType::Review => i64::from(card.ivl),
        CardType::Learning | CardType::Relearning => -((card.due - now_seconds).max(0)),
        CardType::New => 0,
    }
}

/// Encode the interval a card had before the answer, same convention.
fn previous_interval_encoded(card: &Card, policy: &crate::model::DeckConfig) -> i64 {
    match card.ctype {
        CardType::Review => i64::from(card.ivl),
        CardType::New => 0,
        CardType::Learning | CardType::Relearning => {
            let delays = sm2::learning_delays(card.ctype, policy);
            if delays.is_empty() {
                return 0;
            }
            let index = delays
                .len()
                .saturating_sub(card.left.max(1) as usize)
                .min(delays.len() - 1);
            -(i64::from(delays[index]) * 60)
        }
    }
}

fn revlog_kind(previous: CardType) -> RevlogKind {
    match previous {
        CardType::New | CardType::Learning => RevlogKind::Learn,
        CardType::Review => RevlogKind::Review,
        CardType::Relearning => RevlogKind::Relearn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CardTemplate, DEFAULT_DECK_CONFIG_ID, DEFAULT_DECK_ID, ModelId};
    use crate::timing::day_start;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    const SEED: u64 = 7;

    fn fresh_store() -> Store {
        let mut store = Store::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap(), 4 * 3600);
        let mut config = store.deck_config(DEFAULT_DECK_CONFIG_ID).unwrap().clone();
        config.new.delays = vec![1, 10];
        config.new.ints = [1, 4, 7];
        config.rev.ivl_fct = 1.0;
        config.rev.fuzz = 0.0;
        config.lapse.delays = vec![10];
        config.lapse.mult = 0.5;
        config.lapse.min_int = 1;
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        store.update_deck_config(config, now).unwrap();
        store
    }

    fn one_card_model(store: &mut Store, kind: ModelKind) -> ModelId {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        store.add_model(
            "One",
            kind,
            vec!["Front".to_string(), "Back".to_string()],
            vec![CardTemplate {
                name: "Card 1".to_string(),
                ord: 0,
            }],
            now,
        )
    }

    fn two_card_model(store: &mut Store, kind: ModelKind) -> ModelId {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        store.add_model(
            "Two",
            kind,
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

    fn scheduler_at_day(store: Store, day: i64) -> Scheduler {
        let now = day_start(&store.col, day) + Duration::seconds(3600);
        Scheduler::with_clock_and_seed(store, Clock::fixed(now), SEED)
    }

    fn make_review(scheduler: &mut Scheduler, card_id: CardId, ivl: u32, factor: u32, due: i64) {
        let now = scheduler.clock_mut().now();
        let mut card = scheduler.store().card(card_id).unwrap().clone();
        card.ctype = CardType::Review;
        card.queue = CardQueue::Review;
        card.ivl = ivl;
        card.factor = factor;
        card.due = due;
        scheduler.store_mut().update_card(card, now).unwrap();
    }

    #[test]
    fn graduating_a_new_card_through_the_scheduler() {
        let mut store = fresh_store();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let (_, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 3);

        let next = scheduler.get_next().unwrap().unwrap();
        assert_eq!(next.id, card_ids[0]);

        let card = scheduler.answer(card_ids[0], Grade::Good, 1500).unwrap();
        assert_eq!(card.ctype, CardType::Learning);
        assert_eq!(card.left, 1);
        assert_eq!(card.due, scheduler.clock_mut().now().timestamp() + 60);

        let card = scheduler.answer(card_ids[0], Grade::Good, 1500).unwrap();
        assert_eq!(card.ctype, CardType::Review);
        assert_eq!(card.ivl, 1);
        assert_eq!(card.due, 3 + 1);
        assert_eq!(card.reps, 1);
    }

    #[test]
    fn leech_suspension_after_the_final_lapse() {
        let mut store = fresh_store();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let (_, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 10);
        make_review(&mut scheduler, card_ids[0], 10, 2500, 10);
        let mut card = scheduler.store().card(card_ids[0]).unwrap().clone();
        card.lapses = 7;
        let now = scheduler.clock_mut().now();
        scheduler.store_mut().update_card(card, now).unwrap();

        let card = scheduler.answer(card_ids[0], Grade::Again, 2000).unwrap();
        assert_eq!(card.lapses, 8);
        assert_eq!(
            scheduler.store().card(card_ids[0]).unwrap().queue,
            CardQueue::Suspended
        );
    }

    #[test]
    fn leech_tag_action_marks_the_note() {
        let mut store = fresh_store();
        let mut config = store.deck_config(DEFAULT_DECK_CONFIG_ID).unwrap().clone();
        config.lapse.leech_action = LeechAction::Tag;
        config.lapse.leech_fails = 1;
        store
            .update_deck_config(config, Utc.timestamp_opt(1_700_000_000, 0).unwrap())
            .unwrap();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let (note_id, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 10);
        make_review(&mut scheduler, card_ids[0], 10, 2500, 10);

        scheduler.answer(card_ids[0], Grade::Again, 2000).unwrap();
        assert!(scheduler.store().note(note_id).unwrap().has_tag(LEECH_TAG));
        assert_ne!(
            scheduler.store().card(card_ids[0]).unwrap().queue,
            CardQueue::Suspended
        );
        assert_eq!(scheduler.leeches().unwrap().len(), 1);
    }

    #[test]
    fn sibling_burying_hides_the_other_card_until_cleared() {
        let mut store = fresh_store();
        let model_id = two_card_model(&mut store, ModelKind::Standard);
        let (_, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 10);
        make_review(&mut scheduler, card_ids[0], 5, 2500, 10);
        make_review(&mut scheduler, card_ids[1], 5, 2500, 10);

        scheduler.answer(card_ids[0], Grade::Good, 1000).unwrap();
        assert_eq!(scheduler.get_next().unwrap(), None);

        scheduler.clear_buried_siblings();
        let next = scheduler.get_next().unwrap().unwrap();
        assert_eq!(next.id, card_ids[1]);
    }

    #[test]
    fn image_occlusion_siblings_are_not_buried() {
        let mut store = fresh_store();
        let model_id = two_card_model(&mut store, ModelKind::ImageOcclusion);
        let (_, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 10);
        make_review(&mut scheduler, card_ids[0], 5, 2500, 10);
        make_review(&mut scheduler, card_ids[1], 5, 2500, 10);

        scheduler.answer(card_ids[0], Grade::Good, 1000).unwrap();
        let next = scheduler.get_next().unwrap().unwrap();
        assert_eq!(next.id, card_ids[1]);
    }

    #[test]
    fn the_daily_new_cap_exhausts_selection() {
        let mut store = fresh_store();
        let mut config = store.deck_config(DEFAULT_DECK_CONFIG_ID).unwrap().clone();
        config.new.per_day = 3;
        store
            .update_deck_config(config, Utc.timestamp_opt(1_700_000_000, 0).unwrap())
            .unwrap();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let mut card_ids = Vec::new();
        for i in 0..4 {
            let (_, ids) = store
                .add_note(
                    model_id,
                    DEFAULT_DECK_ID,
                    &[format!("f{i}"), format!("b{i}")],
                    vec![],
                    Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                )
                .unwrap();
            card_ids.extend(ids);
        }
        let mut scheduler = scheduler_at_day(store, 3);
        for _ in 0..3 {
            let next = scheduler.get_next().unwrap().unwrap();
            scheduler.answer(next.id, Grade::Good, 1000).unwrap();
        }
        // A fourth new card exists, but today's intake is spent.
        assert_eq!(scheduler.get_next().unwrap(), None);
        assert_eq!(
            scheduler.deck_today_counts(DEFAULT_DECK_ID).unwrap(),
            TodayUsage {
                new_introduced: 3,
                review_done: 0
            }
        );
    }

    #[test]
    fn learning_outranks_review_outranks_new() {
        let mut store = fresh_store();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let mut card_ids = Vec::new();
        for i in 0..3 {
            let (_, ids) = store
                .add_note(
                    model_id,
                    DEFAULT_DECK_ID,
                    &[format!("f{i}"), format!("b{i}")],
                    vec![],
                    Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                )
                .unwrap();
            card_ids.extend(ids);
        }
        let mut scheduler = scheduler_at_day(store, 10);
        // card 0: learning, due in the past; card 1: review due today.
        let now = scheduler.clock_mut().now();
        let mut learning = scheduler.store().card(card_ids[0]).unwrap().clone();
        learning.ctype = CardType::Learning;
        learning.queue = CardQueue::Learning;
        learning.due = now.timestamp() - 30;
        learning.left = 1;
        scheduler.store_mut().update_card(learning, now).unwrap();
        make_review(&mut scheduler, card_ids[1], 5, 2500, 9);

        assert_eq!(scheduler.get_next().unwrap().unwrap().id, card_ids[0]);
        assert_eq!(scheduler.peek_next().unwrap().unwrap().id, card_ids[1]);
    }

    #[test]
    fn review_ties_break_by_id() {
        let mut store = fresh_store();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let mut card_ids = Vec::new();
        for i in 0..2 {
            let (_, ids) = store
                .add_note(
                    model_id,
                    DEFAULT_DECK_ID,
                    &[format!("f{i}"), format!("b{i}")],
                    vec![],
                    Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                )
                .unwrap();
            card_ids.extend(ids);
        }
        let mut scheduler = scheduler_at_day(store, 10);
        make_review(&mut scheduler, card_ids[0], 5, 2500, 9);
        make_review(&mut scheduler, card_ids[1], 5, 2500, 9);
        assert!(card_ids[0] < card_ids[1]);
        assert_eq!(scheduler.get_next().unwrap().unwrap().id, card_ids[0]);
        assert_eq!(scheduler.peek_next().unwrap().unwrap().id, card_ids[1]);
    }

    #[test]
    fn suspended_and_buried_cards_are_never_selected() {
        let mut store = fresh_store();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let mut card_ids = Vec::new();
        for i in 0..2 {
            let (_, ids) = store
                .add_note(
                    model_id,
                    DEFAULT_DECK_ID,
                    &[format!("f{i}"), format!("b{i}")],
                    vec![],
                    Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                )
                .unwrap();
            card_ids.extend(ids);
        }
        let mut scheduler = scheduler_at_day(store, 10);
        make_review(&mut scheduler, card_ids[0], 5, 2500, 9);
        make_review(&mut scheduler, card_ids[1], 5, 2500, 9);
        scheduler.suspend_card(card_ids[0]).unwrap();
        scheduler.bury_card(card_ids[1]).unwrap();
        assert_eq!(scheduler.get_next().unwrap(), None);

        // Burying a suspended card, or re-burying, is rejected.
        assert!(matches!(
            scheduler.bury_card(card_ids[0]),
            Err(Error::Library(crate::LibraryError::Scheduler(
                SchedulerErrorKind::Suspended
            )))
        ));
        assert!(matches!(
            scheduler.bury_card(card_ids[1]),
            Err(Error::Library(crate::LibraryError::Scheduler(
                SchedulerErrorKind::AlreadyBuried
            )))
        ));

        scheduler.restore_card(card_ids[0]).unwrap();
        scheduler.restore_card(card_ids[1]).unwrap();
        assert!(scheduler.get_next().unwrap().is_some());
    }

    #[test]
    fn buried_cards_return_at_the_next_day_rollover() {
        let mut store = fresh_store();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let (_, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 10);
        make_review(&mut scheduler, card_ids[0], 5, 2500, 9);
        scheduler.get_next().unwrap();
        scheduler.bury_card(card_ids[0]).unwrap();
        assert_eq!(scheduler.get_next().unwrap(), None);

        scheduler.clock_mut().advance(Duration::days(1));
        assert_eq!(scheduler.get_next().unwrap().unwrap().id, card_ids[0]);
    }

    #[test]
    fn answering_an_unknown_card_is_not_found() {
        let store = fresh_store();
        let mut scheduler = scheduler_at_day(store, 3);
        assert!(matches!(
            scheduler.answer(12345, Grade::Good, 100),
            Err(Error::Library(crate::LibraryError::Store(
                crate::StoreErrorKind::NotFound { .. }
            )))
        ));
    }

    #[test]
    fn answering_a_suspended_card_is_rejected() {
        let mut store = fresh_store();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let (_, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 3);
        scheduler.suspend_card(card_ids[0]).unwrap();
        assert!(matches!(
            scheduler.answer(card_ids[0], Grade::Good, 100),
            Err(Error::Library(crate::LibraryError::Scheduler(
                SchedulerErrorKind::NotAnswerable { .. }
            )))
        ));
    }

    #[test]
    fn a_queue_type_mismatch_is_healed_before_answering() {
        let mut store = fresh_store();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let (_, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 10);
        make_review(&mut scheduler, card_ids[0], 10, 2500, 10);
        let now = scheduler.clock_mut().now();
        let mut card = scheduler.store().card(card_ids[0]).unwrap().clone();
        card.queue = CardQueue::New; // inconsistent with ctype == Review
        scheduler.store_mut().update_card(card, now).unwrap();

        let card = scheduler.answer(card_ids[0], Grade::Good, 100).unwrap();
        assert_eq!(card.ctype, CardType::Review);
        assert_eq!(card.queue, CardQueue::Review);
        assert!(card.ivl > 10);
    }

    #[test]
    fn revlog_encodes_learning_in_seconds_and_review_in_days() {
        let mut store = fresh_store();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let (_, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 3);
        scheduler.answer(card_ids[0], Grade::Good, 900).unwrap();
        let learn_entry = scheduler.store().revlog().last().unwrap().clone();
        assert_eq!(learn_entry.kind, RevlogKind::Learn);
        assert_eq!(learn_entry.ivl, -60);
        assert_eq!(learn_entry.last_ivl, 0);
        assert_eq!(learn_entry.grade, Grade::Good);
        assert_eq!(learn_entry.response_time_ms, 900);

        scheduler.clear_buried_siblings();
        make_review(&mut scheduler, card_ids[0], 10, 2500, 3);
        scheduler.answer(card_ids[0], Grade::Good, 1100).unwrap();
        let review_entry = scheduler.store().revlog().last().unwrap().clone();
        assert_eq!(review_entry.kind, RevlogKind::Review);
        assert_eq!(review_entry.ivl, 25); // floor(10 * 2.5)
        assert_eq!(review_entry.last_ivl, 10);
        assert!(review_entry.id > learn_entry.id);
    }

    #[test]
    fn ledger_counts_follow_the_previous_card_type() {
        let mut store = fresh_store();
        let model_id = one_card_model(&mut store, ModelKind::Standard);
        let (_, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 10);

        scheduler.answer(card_ids[0], Grade::Good, 100).unwrap();
        let counts = scheduler.deck_today_counts(DEFAULT_DECK_ID).unwrap();
        assert_eq!(counts.new_introduced, 1);
        assert_eq!(counts.review_done, 0);

        // The intraday learning step does not consume review capacity.
        let mut card = scheduler.store().card(card_ids[0]).unwrap().clone();
        card.due = scheduler.clock_mut().now().timestamp();
        let now = scheduler.clock_mut().now();
        scheduler.store_mut().update_card(card, now).unwrap();
        scheduler.answer(card_ids[0], Grade::Good, 100).unwrap();
        let counts = scheduler.deck_today_counts(DEFAULT_DECK_ID).unwrap();
        assert_eq!(counts.review_done, 0);

        make_review(&mut scheduler, card_ids[0], 10, 2500, 10);
        scheduler.answer(card_ids[0], Grade::Good, 100).unwrap();
        let counts = scheduler.deck_today_counts(DEFAULT_DECK_ID).unwrap();
        assert_eq!(counts.review_done, 1);
    }

    #[test]
    fn deck_scope_limits_selection_and_bury_crosses_decks() {
        let mut store = fresh_store();
        let model_id = two_card_model(&mut store, ModelKind::Standard);
        let other_deck = store
            .add_deck(
                "Other",
                DEFAULT_DECK_CONFIG_ID,
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let (_, card_ids) = store
            .add_note(
                model_id,
                DEFAULT_DECK_ID,
                &["f", "b"],
                vec![],
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .unwrap();
        let mut scheduler = scheduler_at_day(store, 10);
        make_review(&mut scheduler, card_ids[0], 5, 2500, 9);
        make_review(&mut scheduler, card_ids[1], 5, 2500, 9);
        // Move the sibling to the other deck.
        let now = scheduler.clock_mut().now();
        let mut sibling = scheduler.store().card(card_ids[1]).unwrap().clone();
        sibling.deck_id = other_deck;
        scheduler.store_mut().update_card(sibling, now).unwrap();

        scheduler.set_deck(Some(other_deck)).unwrap();
        assert_eq!(scheduler.get_next().unwrap().unwrap().id, card_ids[1]);

        // Answering in one deck buries the sibling by note id, regardless of
        // deck scope.
        scheduler.set_deck(None).unwrap();
        scheduler.answer(card_ids[0], Grade::Good, 100).unwrap();
        let next = scheduler.get_next().unwrap();
        assert_eq!(next, None);

        assert!(matches!(
            scheduler.set_deck(Some(99_999)),
            Err(Error::Library(crate::LibraryError::Store(
                crate::StoreErrorKind::NotFound { .. }
            )))
        ));
    }

    #[test]
    fn identical_seeds_produce_identical_histories() {
        let run = || {
            let mut store = fresh_store();
            let mut config = store.deck_config(DEFAULT_DECK_CONFIG_ID).unwrap().clone();
            config.rev.fuzz = 0.1;
            store
                .update_deck_config(config, Utc.timestamp_opt(1_700_000_000, 0).unwrap())
                .unwrap();
            let model_id = one_card_model(&mut store, ModelKind::Standard);
            let mut card_ids = Vec::new();
            for i in 0..3 {
                let (_, ids) = store
                    .add_note(
                        model_id,
                        DEFAULT_DECK_ID,
                        &[format!("f{i}"), format!("b{i}")],
                        vec![],
                        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                    )
                    .unwrap();
                card_ids.extend(ids);
            }
            let mut scheduler = scheduler_at_day(store, 10);
            for card_id in &card_ids {
                make_review(&mut scheduler, *card_id, 10, 2500, 10);
            }
            for (i, card_id) in card_ids.iter().enumerate() {
                let grade = [Grade::Good, Grade::Easy, Grade::Hard][i % 3];
                scheduler.answer(*card_id, grade, 1000).unwrap();
            }
            let store = scheduler.into_store();
            (
                store.revlog().to_vec(),
                store.cards().values().cloned().collect::<Vec<_>>(),
            )
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn invariants_hold_across_a_mixed_session() {
        let mut store = fresh_store();
        let model_id = two_card_model(&mut store, ModelKind::Standard);
        let mut card_ids = Vec::new();
        for i in 0..4 {
            let (_, ids) = store
                .add_note(
                    model_id,
                    DEFAULT_DECK_ID,
                    &[format!("f{i}"), format!("b{i}")],
                    vec![],
                    Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                )
                .unwrap();
            card_ids.extend(ids);
        }
        let mut scheduler = scheduler_at_day(store, 5);
        let grades = [Grade::Again, Grade::Hard, Grade::Good, Grade::Easy];
        let mut i = 0;
        while let Some(card) = scheduler.get_next().unwrap() {
            scheduler.answer(card.id, grades[i % 4], 800).unwrap();
            scheduler.clear_buried_siblings();
            i += 1;
            if i > 64 {
                break;
            }
        }
        let max_ivl = scheduler
            .store()
            .deck_config(DEFAULT_DECK_CONFIG_ID)
            .unwrap()
            .rev
            .max_ivl;
        let mut last_usn = 0;
        for card in scheduler.store().cards().values() {
            assert!(card.factor >= crate::model::MINIMUM_EASE_FACTOR);
            assert!(card.ivl <= max_ivl);
            assert!(card.usn >= 0);
            last_usn = last_usn.max(card.usn);
        }
        assert!(last_usn <= scheduler.store().collection().usn);
        assert!(scheduler.store().validate().is_ok());
    }
}
