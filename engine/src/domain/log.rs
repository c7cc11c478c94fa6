//! The Log Entry entity (spec §3) — an append-only, immutable event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_id: String,
    pub run_id: String,
    pub iteration_id: Option<String>,
    pub agent_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: i64,
    /// Tie-breaker for entries sharing `created_at` (spec §5 total order).
    pub sequence: u64,
}

impl LogEntry {
    pub fn new(run_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            log_id: generate_id(),
            run_id: run_id.into(),
            iteration_id: None,
            agent_id: None,
            level,
            message: message.into(),
            payload: None,
            created_at: now_ms(),
            sequence: SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn with_iteration(mut self, iteration_id: impl Into<String>) -> Self {
        self.iteration_id = Some(iteration_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

impl Record for LogEntry {
    fn id(&self) -> &str {
        &self.log_id
    }
    fn updated_at(&self) -> i64 {
        // Logs are append-only (spec §3); created_at is the only timestamp
        // that will ever exist for a given log_id.
        self.created_at
    }
    fn collection_name() -> &'static str {
        "logs"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("run_id".into(), IndexValue::String(self.run_id.clone()));
        fields.insert("level".into(), IndexValue::String(self.level.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_increases_monotonically() {
        let a = LogEntry::new("run-1", LogLevel::Info, "a");
        let b = LogEntry::new("run-1", LogLevel::Info, "b");
        assert!(b.sequence > a.sequence);
    }
}
