//! Persistence seam for a deck.
//!
//! The scheduling core never decides when or where data is written; it hands
//! current-layout records to a [`CardStore`] after each change.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;

use crate::adapter::{CardRecord, PersistedCard};
use crate::error::{SrsError, SrsResult};

pub trait CardStore {
    /// Every stored record, in stored order.
    fn load(&self) -> SrsResult<Vec<CardRecord>>;

    /// Replace the stored deck.
    fn save(&self, cards: &[PersistedCard]) -> SrsResult<()>;
}

/// In-memory store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<CardRecord>>,
    saves: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<CardRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            saves: Mutex::new(0),
        }
    }

    pub fn records(&self) -> Vec<CardRecord> {
        self.records.lock().clone()
    }

    /// Number of completed `save` calls.
    pub fn save_count(&self) -> u64 {
        *self.saves.lock()
    }
}

impl CardStore for MemoryStore {
    fn load(&self) -> SrsResult<Vec<CardRecord>> {
        Ok(self.records())
    }

    fn save(&self, cards: &[PersistedCard]) -> SrsResult<()> {
        *self.records.lock() = cards.iter().cloned().map(CardRecord::Current).collect();
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// Deck stored as a JSON array of records.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CardStore for JsonFileStore {
    fn load(&self) -> SrsResult<Vec<CardRecord>> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "deck file not found, starting empty");
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| SrsError::deserialization("deck", e.to_string()))?;
        let entries = value
            .as_array()
            .ok_or_else(|| SrsError::deserialization("deck", "expected a JSON array"))?;

        entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                CardRecord::from_json(entry).inspect_err(|err| {
                    tracing::warn!(index = idx, error = %err, "malformed deck record");
                })
            })
            .collect()
    }

    fn save(&self, cards: &[PersistedCard]) -> SrsResult<()> {
        let body = serde_json::to_string_pretty(cards)
            .map_err(|e| SrsError::Storage(e.to_string()))?;
        let tmp = self.temp_path();
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), cards = cards.len(), "deck saved");
        Ok(())
    }
}
