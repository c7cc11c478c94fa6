//! Per-queue tuning (spec §4.3): one concurrency/backoff profile per
//! named queue, mirroring the single scheduler config the teacher uses
//! for its one request scheduler.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_max_requests_per_window")]
    pub max_requests_per_window: u32,

    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
}

fn default_max_concurrent() -> usize {
    4
}
fn default_max_requests_per_window() -> u32 {
    50
}
fn default_rate_window_secs() -> u64 {
    60
}
fn default_base_backoff_ms() -> u64 {
    2_000
}
fn default_backoff_factor() -> u32 {
    2
}
fn default_max_backoff_ms() -> u64 {
    60_000
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_requests_per_window: default_max_requests_per_window(),
            rate_window_secs: default_rate_window_secs(),
            base_backoff_ms: default_base_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
            default_max_attempts: default_max_attempts(),
        }
    }
}

impl QueueConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    /// Exponential backoff for a just-failed attempt: base 2s, factor 2,
    /// capped at 60s (spec §4.3).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let ms = self.base_backoff_ms.saturating_mul(u64::from(self.backoff_factor.saturating_pow(exponent)));
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }

    /// Per-queue concurrency defaults (spec §4.3): `micro`=4, `meso`=2,
    /// `meta`=2, `orchestrator`=4.
    pub fn for_queue(name: &str) -> Self {
        match name {
            "meso" | "meta" => Self { max_concurrent: 2, ..Self::default() },
            _ => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = QueueConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_millis(2_000));
        assert_eq!(config.backoff_for(2), Duration::from_millis(4_000));
        assert_eq!(config.backoff_for(10), Duration::from_millis(60_000));
    }

    #[test]
    fn meso_and_meta_default_to_lower_concurrency() {
        assert_eq!(QueueConfig::for_queue("meso").max_concurrent, 2);
        assert_eq!(QueueConfig::for_queue("meta").max_concurrent, 2);
        assert_eq!(QueueConfig::for_queue("micro").max_concurrent, 4);
        assert_eq!(QueueConfig::for_queue("orchestrator").max_concurrent, 4);
    }
}
