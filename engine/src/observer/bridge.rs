//! Wires the Persistence Store's write notifications to the Observer
//! Channel (spec §4.6): "the orchestrator and workers publish frames as
//! a side effect of persistence writes, never as the primary write
//! path." Runs as a background task for the lifetime of the process.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::store::EngineStore;

use super::channel::ObserverChannel;
use super::frame::FrameType;

/// Spawns the bridge task and returns its handle. Dropping the handle
/// does not stop the task; call `.abort()` explicitly on shutdown.
pub fn spawn_bridge(store: Arc<EngineStore>, channel: ObserverChannel) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = store.subscribe();
        loop {
            match events.recv().await {
                Ok(event) => republish(&store, &channel, &event.run_id, event.collection).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer bridge lagged behind persistence store events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn republish(store: &EngineStore, channel: &ObserverChannel, run_id: &str, collection: &'static str) {
    match collection {
        "runs" => {
            if let Ok(Some(run)) = store.get_run(run_id).await {
                channel.publish(run_id, FrameType::Status, serde_json::to_value(run).unwrap_or_default()).await;
            }
        }
        "iterations" => {
            if let Ok(mut iterations) = store.list_iterations(run_id).await {
                iterations.sort_by_key(|i| i.updated_at);
                if let Some(latest) = iterations.pop() {
                    channel.publish(run_id, FrameType::Iteration, serde_json::to_value(latest).unwrap_or_default()).await;
                }
            }
        }
        "logs" => {
            if let Ok(mut logs) = store.list_logs(run_id).await {
                logs.sort_by_key(|l| (l.created_at, l.sequence));
                if let Some(latest) = logs.pop() {
                    channel.publish(run_id, FrameType::Log, serde_json::to_value(latest).unwrap_or_default()).await;
                }
            }
        }
        "results" => {
            if let Ok(Some(result)) = store.get_result(run_id).await {
                channel.publish(run_id, FrameType::Result, serde_json::to_value(result).unwrap_or_default()).await;
            }
        }
        // Papers and agent records are not part of the observer surface
        // (spec §4.6 frame types): they are covered transitively once an
        // iteration or run frame reflects their effect.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Run;
    use tempfile::tempdir;

    #[tokio::test]
    async fn run_update_republishes_a_status_frame() {
        let dir = tempdir().unwrap();
        let store = Arc::new(EngineStore::spawn(dir.path()).unwrap());
        let channel = ObserverChannel::new();
        let handle = spawn_bridge(store.clone(), channel.clone());

        let run = Run::new("ws", "user", "q", vec![], 3, 0.6);
        let run_id = run.run_id.clone();
        let mut rx = channel.subscribe(&run_id).await;
        store.create_run(run).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Status);
        assert_eq!(frame.payload["run_id"], run_id);

        handle.abort();
    }
}
