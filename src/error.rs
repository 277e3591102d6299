use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the scheduling core and its collaborators.
#[derive(Debug, Error)]
pub enum SrsError {
    #[error("validation error on `{field}`: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("review of `{key}` at {now} precedes its last review at {last_reviewed_at}")]
    TemporalOrder {
        key: String,
        last_reviewed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("deserialization error on `{field}`: {reason}")]
    Deserialization { field: &'static str, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("unknown card: {0}")]
    UnknownCard(String),

    #[error("duplicate card: {0}")]
    DuplicateCard(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SrsError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn deserialization(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Deserialization {
            field,
            reason: reason.into(),
        }
    }

    /// Offending field for record-shaped errors.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation { field, .. } | Self::Deserialization { field, .. } => Some(*field),
            _ => None,
        }
    }
}

pub type SrsResult<T> = Result<T, SrsError>;
