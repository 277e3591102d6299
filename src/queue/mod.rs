//! Collection and study-queue queries.
//!
//! A [`Collection`] owns every card state and remembers insertion order.
//! Queries borrow it and return keys; none of them mutate anything.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::card::CardMemoryState;
use crate::error::{SrsError, SrsResult};
use crate::scheduler::retrievability;
use crate::types::{CardPhase, PARALLEL_SCAN_THRESHOLD};

/// Caps applied when assembling a study session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueLimits {
    pub max_due: usize,
    pub max_new: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_due: 200,
            max_new: 20,
        }
    }
}

/// Aggregate counters over a collection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub total: usize,
    pub new: usize,
    pub learning: usize,
    pub review: usize,
    pub relearning: usize,
    /// Studied cards due at `now`
    pub due_now: usize,
    /// Studied cards due before the start of `now`'s day
    pub overdue: usize,
    pub mastered: usize,
    pub total_reviews: u64,
    pub total_lapses: u64,
    /// Mean recall probability of studied cards (0 when none)
    pub average_retrievability: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Collection {
    cards: Vec<CardMemoryState>,
    index: HashMap<String, usize>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cards(cards: impl IntoIterator<Item = CardMemoryState>) -> SrsResult<Self> {
        let mut collection = Self::new();
        for card in cards {
            collection.insert(card)?;
        }
        Ok(collection)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&CardMemoryState> {
        self.index.get(key).map(|&idx| &self.cards[idx])
    }

    /// Cards in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &CardMemoryState> {
        self.cards.iter()
    }

    /// Append a card; keys are unique.
    pub fn insert(&mut self, card: CardMemoryState) -> SrsResult<()> {
        if self.index.contains_key(card.key()) {
            return Err(SrsError::DuplicateCard(card.key().to_string()));
        }
        self.index.insert(card.key().to_string(), self.cards.len());
        self.cards.push(card);
        Ok(())
    }

    /// Swap in a successor state for an existing key, returning the old one.
    pub fn replace(&mut self, card: CardMemoryState) -> SrsResult<CardMemoryState> {
        let idx = *self
            .index
            .get(card.key())
            .ok_or_else(|| SrsError::UnknownCard(card.key().to_string()))?;
        Ok(std::mem::replace(&mut self.cards[idx], card))
    }

    pub fn remove(&mut self, key: &str) -> Option<CardMemoryState> {
        let idx = self.index.remove(key)?;
        let removed = self.cards.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    // ==================== Queries ====================

    /// Studied cards due at `now`: oldest due first, then higher difficulty,
    /// then insertion order.
    pub fn due_cards(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<&CardMemoryState> = self.cards.iter().filter(|c| c.is_due(now)).collect();
        due.sort_by(|a, b| compare_due(a, b));
        due.into_iter().map(|c| c.key().to_string()).collect()
    }

    /// Never-studied cards in insertion order, at most `limit`.
    pub fn new_cards(&self, limit: usize) -> Vec<String> {
        self.cards
            .iter()
            .filter(|c| c.is_new())
            .take(limit)
            .map(|c| c.key().to_string())
            .collect()
    }

    /// Due cards (capped at `max_due`) followed by new cards (capped at `max_new`).
    pub fn study_session(&self, now: DateTime<Utc>, max_due: usize, max_new: usize) -> Vec<String> {
        let mut session = self.due_cards(now);
        session.truncate(max_due);
        session.extend(self.new_cards(max_new));
        session
    }

    /// Share of Review-phase cards whose recall probability at `now` is above
    /// `threshold`; 0 when there are no Review cards.
    pub fn retention_rate(&self, now: DateTime<Utc>, threshold: f64) -> f64 {
        let above = |card: &&CardMemoryState| {
            retrievability(card.stability(), card.elapsed_days(now)) > threshold
        };
        let is_review = |card: &&CardMemoryState| card.phase() == CardPhase::Review;

        let (reviewed, retained) = if self.cards.len() >= PARALLEL_SCAN_THRESHOLD {
            let reviewed = self.cards.par_iter().filter(|c| is_review(c)).count();
            let retained = self
                .cards
                .par_iter()
                .filter(|c| is_review(c) && above(c))
                .count();
            (reviewed, retained)
        } else {
            let reviewed = self.cards.iter().filter(is_review).count();
            let retained = self.cards.iter().filter(|c| is_review(c) && above(c)).count();
            (reviewed, retained)
        };

        if reviewed == 0 {
            return 0.0;
        }
        retained as f64 / reviewed as f64
    }

    /// Recall probability at `now` of every studied card, in insertion order.
    pub fn retrievability_snapshot(&self, now: DateTime<Utc>) -> Vec<(String, f64)> {
        let entry = |card: &CardMemoryState| {
            (
                card.key().to_string(),
                retrievability(card.stability(), card.elapsed_days(now)),
            )
        };
        if self.cards.len() >= PARALLEL_SCAN_THRESHOLD {
            self.cards
                .par_iter()
                .filter(|c| !c.is_new())
                .map(entry)
                .collect()
        } else {
            self.cards.iter().filter(|c| !c.is_new()).map(entry).collect()
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> CollectionStats {
        let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let mut stats = CollectionStats {
            total: self.cards.len(),
            ..Default::default()
        };
        let mut retrievability_sum = 0.0;

        for card in &self.cards {
            match card.phase() {
                CardPhase::New => stats.new += 1,
                CardPhase::Learning => stats.learning += 1,
                CardPhase::Review => stats.review += 1,
                CardPhase::Relearning => stats.relearning += 1,
            }
            if card.is_due(now) {
                stats.due_now += 1;
            }
            if !card.is_new() && card.due_at().is_some_and(|due| due < start_of_day) {
                stats.overdue += 1;
            }
            if card.is_mastered() && !card.is_new() {
                stats.mastered += 1;
            }
            stats.total_reviews += u64::from(card.review_count());
            stats.total_lapses += u64::from(card.lapse_count());
            if !card.is_new() {
                retrievability_sum += retrievability(card.stability(), card.elapsed_days(now));
            }
        }

        let studied = stats.total - stats.new;
        if studied > 0 {
            stats.average_retrievability = retrievability_sum / studied as f64;
        }
        stats
    }
}

fn compare_due(a: &CardMemoryState, b: &CardMemoryState) -> Ordering {
    a.due_at()
        .cmp(&b.due_at())
        .then_with(|| b.difficulty().total_cmp(&a.difficulty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardFields;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 10, 15, 0, 0).unwrap()
    }

    fn studied(key: &str, due_offset_hours: i64, difficulty: f64, stability: f64) -> CardMemoryState {
        let due = now() + Duration::hours(due_offset_hours);
        let last = due - Duration::days(stability.round().max(1.0) as i64);
        CardMemoryState::try_from(CardFields {
            key: key.to_string(),
            stability,
            difficulty,
            phase: CardPhase::Review,
            due_at: Some(due),
            last_reviewed_at: Some(last),
            review_count: 3,
            lapse_count: 0,
            step: 0,
        })
        .unwrap()
    }

    fn sample() -> Collection {
        Collection::from_cards(vec![
            CardMemoryState::new("n1"),
            studied("late", -48, 4.0, 5.0),
            CardMemoryState::new("n2"),
            studied("future", 24, 5.0, 5.0),
            studied("tie-easy", -2, 3.0, 5.0),
            studied("tie-hard", -2, 8.0, 5.0),
            CardMemoryState::new("n3"),
        ])
        .unwrap()
    }

    #[test]
    fn test_due_cards_ordering() {
        let collection = sample();
        assert_eq!(
            collection.due_cards(now()),
            vec!["late", "tie-hard", "tie-easy"]
        );
    }

    #[test]
    fn test_new_cards_insertion_order() {
        let collection = sample();
        assert_eq!(collection.new_cards(2), vec!["n1", "n2"]);
        assert_eq!(collection.new_cards(10), vec!["n1", "n2", "n3"]);
        assert!(collection.new_cards(0).is_empty());
    }

    #[test]
    fn test_study_session_caps() {
        let collection = sample();
        assert_eq!(
            collection.study_session(now(), 2, 1),
            vec!["late", "tie-hard", "n1"]
        );
        assert_eq!(collection.study_session(now(), 0, 0), Vec::<String>::new());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut collection = sample();
        let err = collection.insert(CardMemoryState::new("n1")).unwrap_err();
        assert!(matches!(err, SrsError::DuplicateCard(key) if key == "n1"));
    }

    #[test]
    fn test_replace_and_remove() {
        let mut collection = sample();
        let replacement = studied("n2", -1, 6.0, 2.0);
        let old = collection.replace(replacement).unwrap();
        assert!(old.is_new());
        assert_eq!(collection.get("n2").unwrap().phase(), CardPhase::Review);

        assert!(collection.replace(CardMemoryState::new("ghost")).is_err());

        let removed = collection.remove("late").unwrap();
        assert_eq!(removed.key(), "late");
        assert!(!collection.contains("late"));
        assert_eq!(collection.get("n3").unwrap().key(), "n3");
        assert_eq!(collection.len(), 6);
        assert!(collection.remove("late").is_none());
    }

    #[test]
    fn test_retention_rate() {
        let collection = sample();
        // "late" is two days past a five-day stability; everything else is near due.
        let rate = collection.retention_rate(now(), 0.89);
        assert!((0.0..=1.0).contains(&rate));
        assert!((rate - 0.75).abs() < 1e-9);
        assert_eq!(Collection::new().retention_rate(now(), 0.8), 0.0);
    }

    #[test]
    fn test_stats() {
        let collection = sample();
        let stats = collection.stats(now());
        assert_eq!(stats.total, 7);
        assert_eq!(stats.new, 3);
        assert_eq!(stats.review, 4);
        assert_eq!(stats.due_now, 3);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.total_reviews, 12);
        assert!(stats.average_retrievability > 0.0 && stats.average_retrievability <= 1.0);
    }

    #[test]
    fn test_snapshot_skips_new_cards() {
        let collection = sample();
        let snapshot = collection.retrievability_snapshot(now());
        let keys: Vec<&str> = snapshot.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["late", "future", "tie-easy", "tie-hard"]);
    }

    #[test]
    fn test_large_collection_parallel_scan_matches() {
        let cards = (0..PARALLEL_SCAN_THRESHOLD + 10)
            .map(|i| studied(&format!("c{i}"), (i % 7) as i64 - 3, 5.0, 4.0));
        let collection = Collection::from_cards(cards).unwrap();
        let rate = collection.retention_rate(now(), 0.9);
        let expected = collection
            .iter()
            .filter(|c| retrievability(c.stability(), c.elapsed_days(now())) > 0.9)
            .count() as f64
            / collection.len() as f64;
        assert!((rate - expected).abs() < 1e-12);
        assert_eq!(
            collection.retrievability_snapshot(now()).len(),
            collection.len()
        );
    }
}
