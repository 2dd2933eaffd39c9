//! Callsign directory boundary.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::net::normalize_callsign;

/// Licensee details returned by a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallsignRecord {
    /// Callsign as the directory knows it.
    pub callsign: String,
    /// Licensee name.
    pub name: String,
    /// City/state or grid, free text.
    pub location: String,
}

/// Directory lookup failure.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The directory could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    /// Any other directory error.
    #[error("directory error: {0}")]
    Other(String),
}

/// Best-effort callsign lookup. Called with an already-normalized callsign
/// from the blocking pool.
pub trait CallsignDirectory: Send + Sync {
    /// Record for `callsign`, if the directory knows it.
    fn lookup(&self, callsign: &str) -> Result<Option<CallsignRecord>, LookupError>;
}

/// Fixed in-memory directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    records: HashMap<String, CallsignRecord>,
}

impl MemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a record, keyed by its normalized callsign.
    pub fn insert(&mut self, record: CallsignRecord) {
        self.records.insert(normalize_callsign(&record.callsign), record);
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the directory has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<CallsignRecord> for MemoryDirectory {
    fn from_iter<I: IntoIterator<Item = CallsignRecord>>(iter: I) -> Self {
        let mut dir = Self::new();
        for record in iter {
            dir.insert(record);
        }
        dir
    }
}

impl CallsignDirectory for MemoryDirectory {
    fn lookup(&self, callsign: &str) -> Result<Option<CallsignRecord>, LookupError> {
        Ok(self.records.get(callsign).cloned())
    }
}
