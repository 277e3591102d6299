//! Common Types and Constants
//!
//! Shared data structures used across the scheduling modules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ==================== Constants ====================

/// Lower bound for stability (days); keeps the retrievability ratio finite
pub const MIN_STABILITY: f64 = 0.1;

/// Difficulty lower bound
pub const MIN_DIFFICULTY: f64 = 1.0;

/// Difficulty upper bound
pub const MAX_DIFFICULTY: f64 = 10.0;

/// Stability assigned to a freshly imported card
pub const DEFAULT_STABILITY: f64 = 1.0;

/// Difficulty assigned to a freshly imported card (midpoint of the range)
pub const DEFAULT_DIFFICULTY: f64 = 5.0;

/// Power-law forgetting curve decay
pub const DECAY: f64 = -0.5;

/// Chosen so that R(S, S) = 0.9
pub const FACTOR: f64 = 19.0 / 81.0;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Stability (days) above which a card counts as long-term mastered
pub const MASTERY_STABILITY_DAYS: f64 = 21.0;

/// Lapses tolerated by the relaxed mastery check
pub const MASTERY_MAX_LAPSES: u32 = 2;

/// Default retrievability threshold for the retention aggregate
pub const DEFAULT_RETENTION_THRESHOLD: f64 = 0.8;

/// Collections below this size are scanned sequentially
pub const PARALLEL_SCAN_THRESHOLD: usize = 1024;

/// Record layout written by the legacy ease-factor scheduler
pub const LEGACY_FORMAT_VERSION: u32 = 1;

/// Record layout written by this crate
pub const CURRENT_FORMAT_VERSION: u32 = 2;

// ==================== Grade ====================

/// Recall quality reported by the learner, worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Grade {
    pub const ALL: [Grade; 4] = [Grade::Again, Grade::Hard, Grade::Good, Grade::Easy];

    /// Derive a grade from an exercise outcome and the response latency.
    pub fn from_correct(is_correct: bool, response_time_ms: i64) -> Self {
        if !is_correct {
            return Self::Again;
        }
        if response_time_ms < 2000 {
            Self::Easy
        } else if response_time_ms < 5000 {
            Self::Good
        } else {
            Self::Hard
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Again),
            2 => Some(Self::Hard),
            3 => Some(Self::Good),
            4 => Some(Self::Easy),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Again => "again",
            Self::Hard => "hard",
            Self::Good => "good",
            Self::Easy => "easy",
        }
    }

    pub fn is_success(self) -> bool {
        self != Self::Again
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown grade: {0}")]
pub struct ParseGradeError(pub String);

impl FromStr for Grade {
    type Err = ParseGradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "again" | "1" => Ok(Self::Again),
            "hard" | "2" => Ok(Self::Hard),
            "good" | "3" => Ok(Self::Good),
            "easy" | "4" => Ok(Self::Easy),
            other => Err(ParseGradeError(other.to_string())),
        }
    }
}

// ==================== Card Phase ====================

/// Lifecycle tag of a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardPhase {
    New,
    Learning,
    Review,
    Relearning,
}

impl CardPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            CardPhase::New => "NEW",
            CardPhase::Learning => "LEARNING",
            CardPhase::Review => "REVIEW",
            CardPhase::Relearning => "RELEARNING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(CardPhase::New),
            "LEARNING" => Some(CardPhase::Learning),
            "REVIEW" => Some(CardPhase::Review),
            "RELEARNING" => Some(CardPhase::Relearning),
            _ => None,
        }
    }

    /// Phases that walk through short intra-day steps
    pub fn is_stepping(self) -> bool {
        matches!(self, CardPhase::Learning | CardPhase::Relearning)
    }

    /// Whether a graded review may move a card from `self` to `target`.
    pub fn can_transition_to(self, target: CardPhase) -> bool {
        matches!(
            (self, target),
            (CardPhase::New, CardPhase::Learning)
                | (CardPhase::Learning, CardPhase::Learning)
                | (CardPhase::Learning, CardPhase::Review)
                | (CardPhase::Review, CardPhase::Review)
                | (CardPhase::Review, CardPhase::Relearning)
                | (CardPhase::Relearning, CardPhase::Relearning)
                | (CardPhase::Relearning, CardPhase::Review)
        )
    }
}

impl fmt::Display for CardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
