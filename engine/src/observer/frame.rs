//! The wire shape published on the Observer Channel (spec §4.6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Status,
    Log,
    Iteration,
    Result,
}

/// One published update. `sequence` is per-run and monotonic; consumers
/// dedupe on `(entity_id, updated_at)` inside `payload`, not on
/// `sequence` itself (spec §5 ordering guarantees).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub run_id: String,
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub payload: serde_json::Value,
    pub sequence: u64,
}
