use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::id::Id;

/// Number of collection outcomes kept per source.
pub const STATUS_RING_CAPACITY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Unix seconds.
    pub timestamp: i64,
    pub success: bool,
    pub message: String,
}

/// Rolling window of the latest outcomes, oldest first.
#[derive(Debug, Clone, Default)]
pub struct StatusRing {
    entries: VecDeque<StatusEntry>,
}

impl StatusRing {
    pub fn push(&mut self, entry: StatusEntry) {
        if self.entries.len() == STATUS_RING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<StatusEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Per-source status rings, shared between the collector and readers.
#[derive(Debug, Default)]
pub struct StatusBoard {
    rings: RwLock<HashMap<Id, StatusRing>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, source: Id, success: bool, message: impl Into<String>) {
        let entry = StatusEntry {
            timestamp: chrono::Utc::now().timestamp(),
            success,
            message: message.into(),
        };
        let mut rings = self.rings.write().unwrap_or_else(|e| e.into_inner());
        rings.entry(source).or_default().push(entry);
    }

    /// Entries for `source` in chronological order; empty if never recorded.
    pub fn get(&self, source: Id) -> Vec<StatusEntry> {
        let rings = self.rings.read().unwrap_or_else(|e| e.into_inner());
        rings.get(&source).map(StatusRing::entries).unwrap_or_default()
    }

    pub fn forget(&self, source: Id) {
        let mut rings = self.rings.write().unwrap_or_else(|e| e.into_inner());
        rings.remove(&source);
    }
}
