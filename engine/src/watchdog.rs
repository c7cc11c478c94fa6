//! Stuck-iteration watchdog (spec §5): a run whose active iteration sees
//! no agent state change for 10 minutes is failed outright, the same
//! poll-and-act idiom as the donor codebase's branch watcher.

use std::sync::Arc;
use std::time::Duration;

use taskstore::Filter;
use tracing::{error, info, warn};

use crate::domain::{IterationStatus, LogEntry, LogLevel, RunStatus};
use crate::store::EngineStore;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_STUCK_AFTER: Duration = Duration::from_secs(10 * 60);

pub struct Watchdog {
    store: Arc<EngineStore>,
    poll_interval: Duration,
    stuck_after: Duration,
}

impl Watchdog {
    pub fn new(store: Arc<EngineStore>) -> Self {
        Self { store, poll_interval: DEFAULT_POLL_INTERVAL, stuck_after: DEFAULT_STUCK_AFTER }
    }

    #[cfg(test)]
    fn with_intervals(store: Arc<EngineStore>, poll_interval: Duration, stuck_after: Duration) -> Self {
        Self { store, poll_interval, stuck_after }
    }

    /// Runs until the process exits. Never returns `Err`: a failed sweep
    /// is logged and retried on the next tick rather than killing the
    /// watchdog task itself.
    pub async fn run(self) {
        info!(poll_interval_secs = self.poll_interval.as_secs(), "watchdog started");
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if let Err(e) = self.sweep().await {
                error!(error = %e, "watchdog sweep failed");
            }
        }
    }

    async fn sweep(&self) -> Result<(), crate::store::StoreError> {
        let running = self.store.list_runs(vec![Filter::eq("status", RunStatus::Running.to_string())]).await?;
        for run in running {
            let iterations = self.store.list_iterations(&run.run_id).await?;
            let Some(active) = iterations.into_iter().find(|i| i.status == IterationStatus::Active) else {
                continue;
            };

            let agents = self.store.list_agents_for_iteration(&run.run_id, &active.iteration_id).await?;
            let last_activity = agents.iter().map(|a| a.updated_at).max().unwrap_or(active.started_at);
            let elapsed = taskstore::now_ms() - last_activity;
            if elapsed < self.stuck_after.as_millis() as i64 {
                continue;
            }

            warn!(run_id = %run.run_id, iteration = active.iteration_number, elapsed_ms = elapsed, "stuck iteration, failing run");
            let mut run = run;
            run.finish(RunStatus::Failed, run.results.clone());
            self.store.update_run(run.clone()).await?;
            self.store
                .append_log(LogEntry::new(
                    &run.run_id,
                    LogLevel::Error,
                    format!("run failed: iteration {} had no agent activity for over {} minutes", active.iteration_number, self.stuck_after.as_secs() / 60),
                ))
                .await?;
        }
        Ok(())
    }
}
