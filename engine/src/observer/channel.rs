//! Pub/sub over run IDs (spec §4.6): a per-run `tokio::sync::broadcast`
//! channel behind an `RwLock`-guarded registry, lazily created on first
//! subscribe or publish. Best-effort fan-out — the Persistence Store
//! remains the source of truth; a frame that nobody was listening for is
//! simply dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use super::frame::{Frame, FrameType};

const CHANNEL_CAPACITY: usize = 256;

struct RunChannel {
    tx: broadcast::Sender<Frame>,
    sequence: AtomicU64,
}

#[derive(Clone, Default)]
pub struct ObserverChannel {
    runs: Arc<RwLock<HashMap<String, Arc<RunChannel>>>>,
}

impl ObserverChannel {
    pub fn new() -> Self {
        Self::default()
    }

    async fn channel_for(&self, run_id: &str) -> Arc<RunChannel> {
        if let Some(channel) = self.runs.read().await.get(run_id) {
            return channel.clone();
        }
        let mut runs = self.runs.write().await;
        runs.entry(run_id.to_string())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                Arc::new(RunChannel { tx, sequence: AtomicU64::new(0) })
            })
            .clone()
    }

    /// Subscribes to `run_id`'s frame stream. Safe to call before the run
    /// exists; the channel is created on demand.
    pub async fn subscribe(&self, run_id: &str) -> broadcast::Receiver<Frame> {
        self.channel_for(run_id).await.tx.subscribe()
    }

    /// Publishes one frame, stamping the next sequence number for this
    /// run. A `SendError` (no subscribers) is expected and silently
    /// dropped — at-least-once delivery only promises delivery to whoever
    /// is listening, not that someone is (spec §4.6).
    pub async fn publish(&self, run_id: &str, frame_type: FrameType, payload: serde_json::Value) {
        let channel = self.channel_for(run_id).await;
        let sequence = channel.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = Frame { run_id: run_id.to_string(), frame_type, payload, sequence };
        let _ = channel.tx.send(frame);
    }

    /// Drops a run's channel once it is known to be terminal, so the
    /// registry does not grow without bound across a long-lived process.
    pub async fn forget(&self, run_id: &str) {
        self.runs.write().await.remove(run_id);
    }
}
