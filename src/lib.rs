//! # lingo-srs - spaced-repetition scheduling core
//!
//! Decides when each learnable unit (a word, phrase or card) should be shown
//! again, from a memory model fed by graded reviews.
//!
//! - **Card State Model** - validated per-card memory state
//! - **Scheduler** - pure `(state, grade, now) -> state` transitions
//! - **Collection** - due queues, study sessions, retention statistics
//! - **Adapter** - persisted records and one-time legacy migration
//!
//! ## Modules
//!
//! - [`types`] - grades, card phases, shared constants
//! - [`card`] - [`CardMemoryState`] and its validation
//! - [`scheduler`] - memory model, learning steps, interval previews
//! - [`queue`] - [`Collection`] queries
//! - [`adapter`] - current (v2) and legacy (v1) record layouts
//! - [`store`] - persistence seam, in-memory and JSON file stores
//! - [`deck`] - [`StudyDeck`], the facade review and import flows call
//! - [`config`] / [`logging`] - environment configuration and tracing setup
//!
//! ## Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use lingo_srs::{CardMemoryState, CardPhase, Grade, Scheduler};
//!
//! let scheduler = Scheduler::default();
//! let now = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
//! let card = CardMemoryState::new("el perro");
//! let next = scheduler.schedule(&card, Grade::Good, now).unwrap();
//! assert_eq!(next.phase(), CardPhase::Learning);
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod adapter;
pub mod card;
pub mod clock;
pub mod config;
pub mod deck;
pub mod error;
pub mod logging;
pub mod queue;
pub mod sanitize;
pub mod scheduler;
pub mod store;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use types::*;

pub use adapter::{
    from_persisted, migrate_legacy, migrate_record, to_persisted, CardRecord, LegacyCard,
    PersistedCard,
};
pub use card::{CardFields, CardMemoryState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SrsConfig;
pub use deck::StudyDeck;
pub use error::{SrsError, SrsResult};
pub use queue::{Collection, CollectionStats, QueueLimits};
pub use scheduler::{format_interval, IntervalPreview, ReviewResult, Scheduler, SchedulerParams};
pub use store::{CardStore, JsonFileStore, MemoryStore};
