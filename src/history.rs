//! Newest-first log of answered questions.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::classifier::QueryType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub question: String,
    pub query_type: QueryType,
    pub elapsed_secs: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only (at the front) record list. With a capacity, the oldest records fall off
/// the back once it is exceeded.
pub struct HistoryLog {
    records: RwLock<VecDeque<HistoryRecord>>,
    capacity: Option<usize>,
}

impl HistoryLog {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn record(&self, record: HistoryRecord) {
        let mut records = self.records.write();
        records.push_front(record);
        if let Some(capacity) = self.capacity {
            records.truncate(capacity);
        }
    }

    /// Every retained record, newest first.
    pub fn snapshot(&self) -> Vec<HistoryRecord> {
        self.records.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(None)
    }
}
