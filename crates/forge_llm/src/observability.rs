//! Call log sink for reasoning service traffic.
//!
//! Every stage call produces one [`CallRecord`]. Where the records go is
//! decided by whoever builds the engine: a bounded in-memory ring for
//! debugging, or nothing at all.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::TokenUsage;

/// One tool invocation performed during a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub result: String,
}

/// Everything worth knowing about one reasoning service call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub label: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub tool_calls: Vec<ToolInvocation>,
    pub raw_response: Option<String>,
    pub parsed: Option<Value>,
    pub error: Option<String>,
    pub usage: TokenUsage,
}

impl CallRecord {
    pub fn new(label: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            model: model.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            tool_calls: Vec::new(),
            raw_response: None,
            parsed: None,
            error: None,
            usage: TokenUsage::default(),
        }
    }

    /// Stamp the elapsed time since `started_at`.
    pub fn finish(mut self) -> Self {
        let elapsed = Utc::now() - self.started_at;
        self.duration_ms = elapsed.num_milliseconds().max(0) as u64;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Observability sink for call records.
pub trait CallLog: Send + Sync {
    fn record(&self, record: CallRecord);

    /// Records currently held, oldest first.
    fn list(&self) -> Vec<CallRecord>;
}

/// Bounded ring of the most recent calls.
pub struct RingCallLog {
    capacity: usize,
    entries: Mutex<VecDeque<CallRecord>>,
}

impl RingCallLog {
    pub const DEFAULT_CAPACITY: usize = 50;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for RingCallLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl CallLog for RingCallLog {
    fn record(&self, record: CallRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    fn list(&self) -> Vec<CallRecord> {
        self.entries.lock().iter().cloned().collect()
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallLog;

impl CallLog for NoopCallLog {
    fn record(&self, _record: CallRecord) {}

    fn list(&self) -> Vec<CallRecord> {
        Vec::new()
    }
}
