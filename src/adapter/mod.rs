//! Persisted card records and legacy migration.
//!
//! Two record layouts coexist in stored decks, told apart by `formatVersion`:
//!
//! - v1: the older ease-factor scheduler (`interval`, `easeFactor`,
//!   `repetitions`, due/last-review dates). Records written before the tag
//!   existed carry no `formatVersion` and are read as v1.
//! - v2: the stability/difficulty layout produced by [`to_persisted`].
//!
//! This module is the only place that translates between those layouts and
//! [`CardMemoryState`].

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::card::{CardFields, CardMemoryState};
use crate::error::{SrsError, SrsResult};
use crate::sanitize::{clamp_difficulty, is_finite};
use crate::types::{
    CardPhase, CURRENT_FORMAT_VERSION, DEFAULT_DIFFICULTY, LEGACY_FORMAT_VERSION, MIN_STABILITY,
};

/// Ease factor the legacy scheduler assigned to fresh cards
const LEGACY_DEFAULT_EASE: f64 = 2.5;

/// Legacy ease floor; maps to the hardest difficulty
const LEGACY_MIN_EASE: f64 = 1.3;

/// Fields only the v2 layout has
const CURRENT_ONLY_FIELDS: [&str; 4] = ["stability", "difficulty", "state", "reviewCount"];

// ==================== Record Shapes ====================

/// Current (v2) persisted card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedCard {
    pub key: String,
    pub stability: f64,
    pub difficulty: f64,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reviewed_at: Option<String>,
    pub review_count: i64,
    pub lapse_count: i64,
    #[serde(default)]
    pub learning_step: u32,
    pub format_version: u32,
}

/// Legacy (v1) ease-factor record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCard {
    pub key: String,
    /// Last scheduled interval in days
    pub interval: i64,
    pub ease_factor: f64,
    pub repetitions: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_date: Option<String>,
    pub format_version: u32,
}

/// A stored record in either layout
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CardRecord {
    Legacy(LegacyCard),
    Current(PersistedCard),
}

impl CardRecord {
    pub fn key(&self) -> &str {
        match self {
            CardRecord::Legacy(card) => &card.key,
            CardRecord::Current(card) => &card.key,
        }
    }

    pub fn format_version(&self) -> u32 {
        match self {
            CardRecord::Legacy(_) => LEGACY_FORMAT_VERSION,
            CardRecord::Current(_) => CURRENT_FORMAT_VERSION,
        }
    }

    /// Decode a JSON object, naming the first missing or malformed field.
    pub fn from_json(value: &Value) -> SrsResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| SrsError::deserialization("record", "expected a JSON object"))?;

        let version = match obj.get("formatVersion") {
            // untagged records predate v2, so a v2-only field means the tag was lost
            None | Some(Value::Null)
                if CURRENT_ONLY_FIELDS.iter().any(|f| obj.contains_key(*f)) =>
            {
                return Err(SrsError::deserialization(
                    "formatVersion",
                    "missing on a record carrying stability/difficulty fields",
                ));
            }
            None | Some(Value::Null) => LEGACY_FORMAT_VERSION,
            Some(v) => v
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    SrsError::deserialization("formatVersion", format!("not a version: {v}"))
                })?,
        };

        match version {
            LEGACY_FORMAT_VERSION => Ok(CardRecord::Legacy(LegacyCard {
                key: str_field(obj, "key")?,
                interval: i64_field(obj, "interval")?,
                ease_factor: f64_field(obj, "easeFactor")?,
                repetitions: i64_field(obj, "repetitions")?,
                due_date: opt_str_field(obj, "dueDate")?,
                last_review_date: opt_str_field(obj, "lastReviewDate")?,
                format_version: LEGACY_FORMAT_VERSION,
            })),
            CURRENT_FORMAT_VERSION => Ok(CardRecord::Current(PersistedCard {
                key: str_field(obj, "key")?,
                stability: f64_field(obj, "stability")?,
                difficulty: f64_field(obj, "difficulty")?,
                state: str_field(obj, "state")?,
                due_at: opt_str_field(obj, "dueAt")?,
                last_reviewed_at: opt_str_field(obj, "lastReviewedAt")?,
                review_count: i64_field(obj, "reviewCount")?,
                lapse_count: i64_field(obj, "lapseCount")?,
                learning_step: match obj.get("learningStep") {
                    None | Some(Value::Null) => 0,
                    Some(_) => u32::try_from(i64_field(obj, "learningStep")?).map_err(|_| {
                        SrsError::deserialization("learningStep", "out of range")
                    })?,
                },
                format_version: CURRENT_FORMAT_VERSION,
            })),
            other => Err(SrsError::deserialization(
                "formatVersion",
                format!("unsupported version {other}"),
            )),
        }
    }

    pub fn to_json(&self) -> SrsResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| SrsError::deserialization("record", e.to_string()))
    }
}

// ==================== Current Layout ====================

pub fn to_persisted(state: &CardMemoryState) -> PersistedCard {
    PersistedCard {
        key: state.key().to_string(),
        stability: state.stability(),
        difficulty: state.difficulty(),
        state: state.phase().as_str().to_string(),
        due_at: state.due_at().map(format_timestamp),
        last_reviewed_at: state.last_reviewed_at().map(format_timestamp),
        review_count: i64::from(state.review_count()),
        lapse_count: i64::from(state.lapse_count()),
        learning_step: state.step(),
        format_version: CURRENT_FORMAT_VERSION,
    }
}

/// Rebuild a card from a v2 record.
///
/// Malformed tags and timestamps fail with `Deserialization`; well-formed but
/// out-of-range values fail card validation.
pub fn from_persisted(record: &PersistedCard) -> SrsResult<CardMemoryState> {
    if record.format_version != CURRENT_FORMAT_VERSION {
        return Err(SrsError::deserialization(
            "formatVersion",
            format!(
                "expected {CURRENT_FORMAT_VERSION}, got {}",
                record.format_version
            ),
        ));
    }
    let phase = CardPhase::parse(&record.state).ok_or_else(|| {
        SrsError::deserialization("state", format!("unknown state tag {:?}", record.state))
    })?;

    CardMemoryState::try_from(CardFields {
        key: record.key.clone(),
        stability: record.stability,
        difficulty: record.difficulty,
        phase,
        due_at: parse_optional("dueAt", record.due_at.as_deref())?,
        last_reviewed_at: parse_optional("lastReviewedAt", record.last_reviewed_at.as_deref())?,
        review_count: record.review_count,
        lapse_count: record.lapse_count,
        step: record.learning_step,
    })
}

// ==================== Legacy Migration ====================

/// Card state for a record of either layout.
///
/// v2 records decode unchanged, so migrating an already migrated record is a
/// no-op. v1 records go through a one-time estimate:
///
/// - stability ≈ last interval in days (floored at the minimum stability)
/// - difficulty falls linearly with ease: 2.5 maps to the midpoint, 1.3 to
///   the hardest end, clamped to the difficulty range
/// - a record with no repetitions and no interval becomes a new card
pub fn migrate_legacy(record: &CardRecord) -> SrsResult<CardMemoryState> {
    match record {
        CardRecord::Current(card) => from_persisted(card),
        CardRecord::Legacy(card) => migrate_v1(card),
    }
}

/// Rewrite a record into the current layout.
pub fn migrate_record(record: &CardRecord) -> SrsResult<CardRecord> {
    match record {
        CardRecord::Current(_) => Ok(record.clone()),
        CardRecord::Legacy(_) => Ok(CardRecord::Current(to_persisted(&migrate_legacy(record)?))),
    }
}

fn migrate_v1(card: &LegacyCard) -> SrsResult<CardMemoryState> {
    if card.interval < 0 {
        return Err(SrsError::validation(
            "interval",
            format!("must not be negative, got {}", card.interval),
        ));
    }
    if card.repetitions < 0 {
        return Err(SrsError::validation(
            "repetitions",
            format!("must not be negative, got {}", card.repetitions),
        ));
    }
    if !is_finite(card.ease_factor) || card.ease_factor <= 0.0 {
        return Err(SrsError::validation(
            "easeFactor",
            format!("must be a positive finite number, got {}", card.ease_factor),
        ));
    }

    if card.repetitions == 0 && card.interval == 0 {
        tracing::debug!(key = %card.key, "legacy record never studied; importing as new");
        return CardMemoryState::try_new(card.key.clone());
    }

    let due = parse_optional("dueDate", card.due_date.as_deref())?;
    let last = parse_optional("lastReviewDate", card.last_review_date.as_deref())?;
    let interval = Duration::try_days(card.interval)
        .ok_or_else(|| SrsError::validation("interval", "too large"))?;
    let (due_at, last_reviewed_at) = match (due, last) {
        (Some(due), Some(last)) => (due, last),
        (Some(due), None) => (due, due.checked_sub_signed(interval).unwrap_or(due)),
        (None, Some(last)) => (last.checked_add_signed(interval).unwrap_or(last), last),
        (None, None) => {
            return Err(SrsError::deserialization(
                "dueDate",
                "a studied legacy record needs dueDate or lastReviewDate",
            ))
        }
    };

    let stability = (card.interval as f64).max(MIN_STABILITY);
    let difficulty = ease_to_difficulty(card.ease_factor);
    tracing::debug!(
        key = %card.key,
        ease = card.ease_factor,
        interval = card.interval,
        stability,
        difficulty,
        "migrated legacy record"
    );

    CardMemoryState::try_from(CardFields {
        key: card.key.clone(),
        stability,
        difficulty,
        phase: CardPhase::Review,
        due_at: Some(due_at),
        last_reviewed_at: Some(last_reviewed_at),
        review_count: card.repetitions,
        lapse_count: 0,
        step: 0,
    })
}

/// Linear map from legacy ease to difficulty.
pub fn ease_to_difficulty(ease: f64) -> f64 {
    let slope = (10.0 - DEFAULT_DIFFICULTY) / (LEGACY_DEFAULT_EASE - LEGACY_MIN_EASE);
    clamp_difficulty(DEFAULT_DIFFICULTY - (ease - LEGACY_DEFAULT_EASE) * slope)
}

// ==================== Helpers ====================

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// RFC 3339 timestamps, or bare `YYYY-MM-DD` dates read as UTC midnight.
pub fn parse_timestamp(field: &'static str, raw: &str) -> SrsResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(SrsError::deserialization(
        field,
        format!("invalid timestamp {raw:?}"),
    ))
}

fn parse_optional(field: &'static str, raw: Option<&str>) -> SrsResult<Option<DateTime<Utc>>> {
    raw.map(|value| parse_timestamp(field, value)).transpose()
}

fn required<'a>(obj: &'a Map<String, Value>, field: &'static str) -> SrsResult<&'a Value> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(SrsError::deserialization(field, "missing")),
        Some(value) => Ok(value),
    }
}

fn str_field(obj: &Map<String, Value>, field: &'static str) -> SrsResult<String> {
    required(obj, field)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SrsError::deserialization(field, "expected a string"))
}

fn opt_str_field(obj: &Map<String, Value>, field: &'static str) -> SrsResult<Option<String>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(SrsError::deserialization(field, "expected a string")),
    }
}

fn f64_field(obj: &Map<String, Value>, field: &'static str) -> SrsResult<f64> {
    required(obj, field)?
        .as_f64()
        .ok_or_else(|| SrsError::deserialization(field, "expected a number"))
}

fn i64_field(obj: &Map<String, Value>, field: &'static str) -> SrsResult<i64> {
    required(obj, field)?
        .as_i64()
        .ok_or_else(|| SrsError::deserialization(field, "expected an integer"))
}
