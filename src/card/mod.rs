//! Card State Model
//!
//! The memory state of a single learnable item. Construction from raw
//! values validates every field; only the scheduler produces successor
//! states, and it never mutates an existing one.

use chrono::{DateTime, Utc};

use crate::error::{SrsError, SrsResult};
use crate::sanitize::is_finite;
use crate::types::{
    CardPhase, DEFAULT_DIFFICULTY, DEFAULT_STABILITY, MASTERY_MAX_LAPSES, MASTERY_STABILITY_DAYS,
    MAX_DIFFICULTY, MIN_DIFFICULTY, MIN_STABILITY, SECONDS_PER_DAY,
};

/// Raw field values used to build a [`CardMemoryState`].
///
/// Counters are signed so that values decoded from external records can be
/// rejected instead of wrapping.
#[derive(Debug, Clone, PartialEq)]
pub struct CardFields {
    pub key: String,
    pub stability: f64,
    pub difficulty: f64,
    pub phase: CardPhase,
    pub due_at: Option<DateTime<Utc>>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub review_count: i64,
    pub lapse_count: i64,
    pub step: u32,
}

/// Memory state of one card
#[derive(Debug, Clone, PartialEq)]
pub struct CardMemoryState {
    key: String,
    stability: f64,
    difficulty: f64,
    phase: CardPhase,
    due_at: Option<DateTime<Utc>>,
    last_reviewed_at: Option<DateTime<Utc>>,
    review_count: u32,
    lapse_count: u32,
    step: u32,
}

/// Memory fields written by the scheduler for a successor state.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemoryUpdate {
    pub stability: f64,
    pub difficulty: f64,
    pub phase: CardPhase,
    pub due_at: DateTime<Utc>,
    pub reviewed_at: DateTime<Utc>,
    pub lapsed: bool,
    pub step: u32,
}

impl CardMemoryState {
    /// Register a never-studied card.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            stability: DEFAULT_STABILITY,
            difficulty: DEFAULT_DIFFICULTY,
            phase: CardPhase::New,
            due_at: None,
            last_reviewed_at: None,
            review_count: 0,
            lapse_count: 0,
            step: 0,
        }
    }

    /// Like [`CardMemoryState::new`], rejecting a blank key.
    pub fn try_new(key: impl Into<String>) -> SrsResult<Self> {
        let card = Self::new(key);
        validate(&card.to_fields())?;
        Ok(card)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn stability(&self) -> f64 {
        self.stability
    }

    pub fn difficulty(&self) -> f64 {
        self.difficulty
    }

    pub fn phase(&self) -> CardPhase {
        self.phase
    }

    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.due_at
    }

    pub fn last_reviewed_at(&self) -> Option<DateTime<Utc>> {
        self.last_reviewed_at
    }

    pub fn review_count(&self) -> u32 {
        self.review_count
    }

    pub fn lapse_count(&self) -> u32 {
        self.lapse_count
    }

    /// Index into the learning or relearning step table; 0 outside those phases.
    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn is_new(&self) -> bool {
        self.phase == CardPhase::New
    }

    /// Studied card whose due date has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.phase != CardPhase::New && self.due_at.is_some_and(|due| due <= now)
    }

    /// Fractional days since the last review, or 0 if never reviewed.
    pub fn elapsed_days(&self, now: DateTime<Utc>) -> f64 {
        match self.last_reviewed_at {
            Some(last) => days_between(last, now),
            None => 0.0,
        }
    }

    /// Long-term mastery; tolerates a couple of lapses.
    pub fn is_mastered(&self) -> bool {
        self.stability >= MASTERY_STABILITY_DAYS && self.lapse_count <= MASTERY_MAX_LAPSES
    }

    pub fn is_strictly_mastered(&self) -> bool {
        self.stability >= MASTERY_STABILITY_DAYS && self.lapse_count == 0
    }

    pub fn to_fields(&self) -> CardFields {
        CardFields {
            key: self.key.clone(),
            stability: self.stability,
            difficulty: self.difficulty,
            phase: self.phase,
            due_at: self.due_at,
            last_reviewed_at: self.last_reviewed_at,
            review_count: i64::from(self.review_count),
            lapse_count: i64::from(self.lapse_count),
            step: self.step,
        }
    }

    /// Successor state carrying the same key.
    pub(crate) fn advance(&self, update: MemoryUpdate) -> Self {
        Self {
            key: self.key.clone(),
            stability: update.stability,
            difficulty: update.difficulty,
            phase: update.phase,
            due_at: Some(update.due_at),
            last_reviewed_at: Some(update.reviewed_at),
            review_count: self.review_count.saturating_add(1),
            lapse_count: if update.lapsed {
                self.lapse_count.saturating_add(1)
            } else {
                self.lapse_count
            },
            step: if update.phase.is_stepping() {
                update.step
            } else {
                0
            },
        }
    }
}

impl TryFrom<CardFields> for CardMemoryState {
    type Error = SrsError;

    fn try_from(fields: CardFields) -> SrsResult<Self> {
        validate(&fields)?;
        Ok(Self {
            key: fields.key,
            stability: fields.stability,
            difficulty: fields.difficulty,
            phase: fields.phase,
            due_at: fields.due_at,
            last_reviewed_at: fields.last_reviewed_at,
            review_count: to_counter("reviewCount", fields.review_count)?,
            lapse_count: to_counter("lapseCount", fields.lapse_count)?,
            step: fields.step,
        })
    }
}

fn validate(fields: &CardFields) -> SrsResult<()> {
    if fields.key.trim().is_empty() {
        return Err(SrsError::validation("key", "must not be empty"));
    }
    if !is_finite(fields.stability) || fields.stability < MIN_STABILITY {
        return Err(SrsError::validation(
            "stability",
            format!(
                "must be a finite number of at least {MIN_STABILITY} days, got {}",
                fields.stability
            ),
        ));
    }
    if !is_finite(fields.difficulty)
        || !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&fields.difficulty)
    {
        return Err(SrsError::validation(
            "difficulty",
            format!(
                "must lie in [{MIN_DIFFICULTY}, {MAX_DIFFICULTY}], got {}",
                fields.difficulty
            ),
        ));
    }
    if fields.review_count < 0 {
        return Err(SrsError::validation(
            "reviewCount",
            format!("must not be negative, got {}", fields.review_count),
        ));
    }
    if fields.lapse_count < 0 {
        return Err(SrsError::validation(
            "lapseCount",
            format!("must not be negative, got {}", fields.lapse_count),
        ));
    }
    if fields.lapse_count > fields.review_count {
        return Err(SrsError::validation(
            "lapseCount",
            format!(
                "{} lapses exceed {} reviews",
                fields.lapse_count, fields.review_count
            ),
        ));
    }

    match fields.phase {
        CardPhase::New => {
            if fields.due_at.is_some() {
                return Err(SrsError::validation("dueAt", "a new card has no due date"));
            }
        }
        _ => {
            let Some(last) = fields.last_reviewed_at else {
                return Err(SrsError::validation(
                    "lastReviewedAt",
                    format!("required once a card is {}", fields.phase),
                ));
            };
            let Some(due) = fields.due_at else {
                return Err(SrsError::validation(
                    "dueAt",
                    format!("required once a card is {}", fields.phase),
                ));
            };
            if due < last {
                return Err(SrsError::validation(
                    "dueAt",
                    format!("{due} precedes lastReviewedAt {last}"),
                ));
            }
        }
    }

    if fields.step != 0 && !fields.phase.is_stepping() {
        return Err(SrsError::validation(
            "learningStep",
            format!("must be 0 for a {} card", fields.phase),
        ));
    }

    Ok(())
}

fn to_counter(field: &'static str, value: i64) -> SrsResult<u32> {
    u32::try_from(value)
        .map_err(|_| SrsError::validation(field, format!("out of range: {value}")))
}

/// Fractional days from `from` to `to`; negative when `to` is earlier.
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to.signed_duration_since(from);
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0 / SECONDS_PER_DAY,
        None => delta.num_seconds() as f64 / SECONDS_PER_DAY,
    }
}
