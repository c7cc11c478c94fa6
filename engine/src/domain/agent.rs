//! The Agent Record entity (spec §3) — one execution of one Micro, Meso,
//! or Meta agent.
//!
//! The record's id is the natural key `(run_id, iteration_id, agent_type,
//! subject_ref)`, not a freshly generated uuid: callers upsert on this key
//! so that at-least-once job delivery (spec §4.3) never creates duplicate
//! agent records for the same unit of work.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Micro,
    Meso,
    Meta,
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Micro => "micro",
            Self::Meso => "meso",
            Self::Meta => "meta",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub run_id: String,
    pub iteration_id: String,
    pub agent_type: AgentType,
    pub subject_ref: String,
    pub status: AgentStatus,
    pub attempts: u32,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub provider: Option<String>,
    pub latency_ms: Option<u64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AgentRecord {
    pub fn composite_key(run_id: &str, iteration_id: &str, agent_type: AgentType, subject_ref: &str) -> String {
        format!("{run_id}:{iteration_id}:{agent_type}:{subject_ref}")
    }

    pub fn new_queued(run_id: impl Into<String>, iteration_id: impl Into<String>, agent_type: AgentType, subject_ref: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let iteration_id = iteration_id.into();
        let subject_ref = subject_ref.into();
        let agent_id = Self::composite_key(&run_id, &iteration_id, agent_type, &subject_ref);
        let now = now_ms();
        Self {
            agent_id,
            run_id,
            iteration_id,
            agent_type,
            subject_ref,
            status: AgentStatus::Queued,
            attempts: 0,
            output: None,
            error: None,
            provider: None,
            latency_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start_attempt(&mut self) {
        self.status = AgentStatus::Running;
        self.attempts += 1;
        self.updated_at = now_ms();
    }

    pub fn succeed(&mut self, output: serde_json::Value, provider: impl Into<String>, latency_ms: u64) {
        self.status = AgentStatus::Succeeded;
        self.output = Some(output);
        self.provider = Some(provider.into());
        self.latency_ms = Some(latency_ms);
        self.error = None;
        self.updated_at = now_ms();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = AgentStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now_ms();
    }
}

impl Record for AgentRecord {
    fn id(&self) -> &str {
        &self.agent_id
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "agents"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("run_id".into(), IndexValue::String(self.run_id.clone()));
        fields.insert("iteration_id".into(), IndexValue::String(self.iteration_id.clone()));
        fields.insert("agent_type".into(), IndexValue::String(self.agent_type.to_string()));
        fields.insert("status".into(), IndexValue::String(self.status.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_is_stable_for_redelivery() {
        let a = AgentRecord::new_queued("run-1", "iter-1", AgentType::Micro, "paper-1");
        let b = AgentRecord::new_queued("run-1", "iter-1", AgentType::Micro, "paper-1");
        assert_eq!(a.agent_id, b.agent_id);
    }

    #[test]
    fn distinct_subjects_get_distinct_keys() {
        let a = AgentRecord::new_queued("run-1", "iter-1", AgentType::Micro, "paper-1");
        let b = AgentRecord::new_queued("run-1", "iter-1", AgentType::Micro, "paper-2");
        assert_ne!(a.agent_id, b.agent_id);
    }

    #[test]
    fn terminal_status_tracking() {
        let mut a = AgentRecord::new_queued("run-1", "iter-1", AgentType::Meta, "iter-1");
        assert!(!a.status.is_terminal());
        a.start_attempt();
        assert!(!a.status.is_terminal());
        a.succeed(serde_json::json!({}), "sandbox", 12);
        assert!(a.status.is_terminal());
    }
}
