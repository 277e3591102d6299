//! Study deck facade used by review and import flows.
//!
//! A [`StudyDeck`] owns the collection for one learner, reads it from a
//! [`CardStore`] when opened and writes it back after every change. Writes to
//! a key are serialized by `&mut self`; when several decks are opened over the
//! same store the last save wins.

use chrono::{DateTime, Utc};

use crate::adapter::{migrate_legacy, to_persisted, CardRecord, PersistedCard};
use crate::card::CardMemoryState;
use crate::clock::Clock;
use crate::config::SrsConfig;
use crate::error::{SrsError, SrsResult};
use crate::queue::{Collection, CollectionStats, QueueLimits};
use crate::scheduler::{IntervalPreview, ReviewResult, Scheduler};
use crate::store::CardStore;
use crate::types::Grade;

pub struct StudyDeck<C: Clock, S: CardStore> {
    collection: Collection,
    scheduler: Scheduler,
    clock: C,
    store: S,
    limits: QueueLimits,
    retention_threshold: f64,
}

impl<C: Clock, S: CardStore> StudyDeck<C, S> {
    /// Load the deck, migrating legacy records. A deck that contained legacy
    /// records is saved back immediately so the migration runs once.
    pub fn open(store: S, clock: C, config: &SrsConfig) -> SrsResult<Self> {
        let scheduler = Scheduler::new(config.scheduler.clone())?;
        let records = store.load()?;

        let mut migrated = 0usize;
        let mut collection = Collection::new();
        for record in &records {
            if matches!(record, CardRecord::Legacy(_)) {
                migrated += 1;
            }
            collection.insert(migrate_legacy(record)?)?;
        }

        let deck = Self {
            collection,
            scheduler,
            clock,
            store,
            limits: config.limits,
            retention_threshold: config.retention_threshold,
        };

        if migrated > 0 {
            tracing::info!(migrated, total = records.len(), "migrated legacy records");
            deck.persist()?;
        }
        tracing::debug!(cards = deck.collection.len(), "deck opened");
        Ok(deck)
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn card(&self, key: &str) -> Option<&CardMemoryState> {
        self.collection.get(key)
    }

    /// Register a newly imported learnable unit.
    pub fn import_card(&mut self, key: &str) -> SrsResult<CardMemoryState> {
        let card = CardMemoryState::try_new(key)?;
        self.collection.insert(card.clone())?;
        self.persist()?;
        tracing::info!(key, "card imported");
        Ok(card)
    }

    /// Explicitly drop a card from the deck.
    pub fn remove_card(&mut self, key: &str) -> SrsResult<CardMemoryState> {
        let removed = self
            .collection
            .remove(key)
            .ok_or_else(|| SrsError::UnknownCard(key.to_string()))?;
        self.persist()?;
        tracing::info!(key, "card removed");
        Ok(removed)
    }

    pub fn grade_review(&mut self, key: &str, grade: Grade) -> SrsResult<ReviewResult> {
        let now = self.clock.now();
        self.grade_review_at(key, grade, now)
    }

    /// Grade `key` at `now`. Nothing is stored when scheduling fails.
    pub fn grade_review_at(
        &mut self,
        key: &str,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> SrsResult<ReviewResult> {
        let current = self
            .collection
            .get(key)
            .ok_or_else(|| SrsError::UnknownCard(key.to_string()))?;

        let result = self.scheduler.review(current, grade, now).inspect_err(|err| {
            tracing::warn!(key, grade = %grade, error = %err, "review rejected");
        })?;

        let previous = self.collection.replace(result.state.clone())?;
        if let Err(err) = self.persist() {
            // keep memory and storage in step
            self.collection.replace(previous)?;
            return Err(err);
        }

        tracing::info!(
            key,
            grade = %grade,
            phase = %result.state.phase(),
            stability = result.state.stability(),
            difficulty = result.state.difficulty(),
            interval_secs = result.interval.num_seconds(),
            "review graded"
        );
        Ok(result)
    }

    pub fn preview(&self, key: &str) -> SrsResult<IntervalPreview> {
        let card = self
            .collection
            .get(key)
            .ok_or_else(|| SrsError::UnknownCard(key.to_string()))?;
        self.scheduler.preview(card, self.clock.now())
    }

    /// Current recall probability of `key`; 0 for a card never studied.
    pub fn retrievability(&self, key: &str) -> SrsResult<f64> {
        let card = self
            .collection
            .get(key)
            .ok_or_else(|| SrsError::UnknownCard(key.to_string()))?;
        Ok(self.scheduler.retrievability_at(card, self.clock.now()))
    }

    /// Study queue at the clock's current time with the configured limits.
    pub fn study_queue(&self) -> Vec<String> {
        self.get_study_queue(self.clock.now(), self.limits)
    }

    pub fn get_study_queue(&self, now: DateTime<Utc>, limits: QueueLimits) -> Vec<String> {
        self.collection
            .study_session(now, limits.max_due, limits.max_new)
    }

    pub fn retention_rate(&self) -> f64 {
        self.collection
            .retention_rate(self.clock.now(), self.retention_threshold)
    }

    pub fn stats(&self) -> CollectionStats {
        self.collection.stats(self.clock.now())
    }

    /// Current-layout records for every card, in insertion order.
    pub fn records(&self) -> Vec<PersistedCard> {
        self.collection.iter().map(to_persisted).collect()
    }

    fn persist(&self) -> SrsResult<()> {
        self.store.save(&self.records())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::LegacyCard;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::types::{CardPhase, CURRENT_FORMAT_VERSION, LEGACY_FORMAT_VERSION};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn open_empty() -> (StudyDeck<Arc<ManualClock>, MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let deck = StudyDeck::open(MemoryStore::new(), Arc::clone(&clock), &SrsConfig::default())
            .unwrap();
        (deck, clock)
    }

    #[test]
    fn test_import_then_queue() {
        let (mut deck, _clock) = open_empty();
        deck.import_card("hola").unwrap();
        deck.import_card("adiós").unwrap();
        assert_eq!(deck.study_queue(), vec!["hola", "adiós"]);
        assert!(matches!(
            deck.import_card("hola"),
            Err(SrsError::DuplicateCard(_))
        ));
    }

    #[test]
    fn test_grade_review_persists() {
        let (mut deck, clock) = open_empty();
        deck.import_card("hola").unwrap();
        let result = deck.grade_review("hola", Grade::Good).unwrap();
        assert_eq!(result.state.phase(), CardPhase::Learning);
        assert_eq!(deck.card("hola").unwrap(), &result.state);

        let saved = deck.store.records();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].format_version(), CURRENT_FORMAT_VERSION);

        // not due yet, and no longer new
        assert!(deck.study_queue().is_empty());
        clock.advance(Duration::minutes(10));
        assert_eq!(deck.study_queue(), vec!["hola"]);
    }

    #[test]
    fn test_temporal_order_leaves_store_untouched() {
        let (mut deck, clock) = open_empty();
        deck.import_card("hola").unwrap();
        deck.grade_review("hola", Grade::Good).unwrap();
        let saves = deck.store.save_count();
        let before = deck.card("hola").cloned();

        clock.set(start() - Duration::hours(1));
        let err = deck.grade_review("hola", Grade::Easy).unwrap_err();
        assert!(matches!(err, SrsError::TemporalOrder { .. }));
        assert_eq!(deck.store.save_count(), saves);
        assert_eq!(deck.card("hola").cloned(), before);
    }

    #[test]
    fn test_unknown_card() {
        let (mut deck, _clock) = open_empty();
        assert!(matches!(
            deck.grade_review("nada", Grade::Good),
            Err(SrsError::UnknownCard(_))
        ));
        assert!(deck.preview("nada").is_err());
        assert!(deck.remove_card("nada").is_err());
    }

    #[test]
    fn test_open_migrates_legacy_once() {
        let legacy = CardRecord::Legacy(LegacyCard {
            key: "viejo".to_string(),
            interval: 5,
            ease_factor: 2.5,
            repetitions: 3,
            due_date: Some("2024-06-30T12:00:00Z".to_string()),
            last_review_date: Some("2024-06-25T12:00:00Z".to_string()),
            format_version: LEGACY_FORMAT_VERSION,
        });
        let store = MemoryStore::with_records(vec![legacy]);
        let clock = Arc::new(ManualClock::new(start()));
        let deck = StudyDeck::open(store, Arc::clone(&clock), &SrsConfig::default()).unwrap();

        assert_eq!(deck.store.save_count(), 1);
        assert!(matches!(deck.store.records()[0], CardRecord::Current(_)));
        assert_eq!(deck.study_queue(), vec!["viejo"]);
        assert_eq!(deck.card("viejo").unwrap().phase(), CardPhase::Review);
    }

    #[test]
    fn test_open_without_legacy_does_not_save() {
        let card = to_persisted(&CardMemoryState::new("x"));
        let store = MemoryStore::with_records(vec![CardRecord::Current(card)]);
        let deck = StudyDeck::open(
            store,
            ManualClock::new(start()),
            &SrsConfig::default(),
        )
        .unwrap();
        assert_eq!(deck.store.save_count(), 0);
        assert_eq!(deck.collection().len(), 1);
    }

    #[test]
    fn test_remove_card() {
        let (mut deck, _clock) = open_empty();
        deck.import_card("a").unwrap();
        deck.import_card("b").unwrap();
        deck.remove_card("a").unwrap();
        assert_eq!(deck.study_queue(), vec!["b"]);
        assert_eq!(deck.store.records().len(), 1);
    }

    #[test]
    fn test_stats_and_retention() {
        let (mut deck, clock) = open_empty();
        deck.import_card("a").unwrap();
        deck.grade_review("a", Grade::Good).unwrap();
        clock.advance(Duration::minutes(10));
        deck.grade_review("a", Grade::Good).unwrap();

        let stats = deck.stats();
        assert_eq!(stats.review, 1);
        assert_eq!(stats.total_reviews, 2);
        assert_eq!(deck.retention_rate(), 1.0);

        let preview = deck.preview("a").unwrap();
        assert!(preview.easy.interval >= preview.hard.interval);

        assert_eq!(deck.retrievability("a").unwrap(), 1.0);
        clock.advance(Duration::days(3));
        assert!(deck.retrievability("a").unwrap() < 1.0);
        assert!(deck.retrievability("nada").is_err());
    }
}
