//! `EngineStore`: an actor that owns one `taskstore::Store` per entity
//! collection behind an mpsc command channel, plus a broadcast channel
//! signalling "something about this run changed" to the Observer
//! Channel (spec §4.1, §4.6).

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use taskstore::{Filter, Record, Store};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::domain::{AgentRecord, Iteration, LogEntry, Paper, ResultRecord, Run};

use super::messages::{Command, StoreError, StoreResponse};

/// Retry policy for transient backend failures (spec §4.1): exponential
/// backoff from a 250ms base, doubling each attempt, capped at 8s, with
/// ±20% jitter, up to 5 attempts total before the caller gives up.
const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 8_000;

fn backoff_for(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let base_ms = BASE_BACKOFF_MS.saturating_mul(2u64.saturating_pow(exponent)).min(MAX_BACKOFF_MS);
    let jitter = rand::rng().random_range(0.8..1.2);
    Duration::from_millis((base_ms as f64 * jitter) as u64)
}

/// Emitted whenever a write to any collection succeeds, so the
/// Observer Channel can republish without polling the store.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub run_id: String,
    pub collection: &'static str,
}

#[derive(Clone)]
pub struct EngineStore {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<StoreEvent>,
}

struct Collections {
    runs: Store<Run>,
    papers: Store<Paper>,
    iterations: Store<Iteration>,
    agents: Store<AgentRecord>,
    logs: Store<LogEntry>,
    results: Store<ResultRecord>,
}

impl EngineStore {
    pub fn spawn(base_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref();
        let collections = Collections {
            runs: Store::open(base_path.join("runs"))?,
            papers: Store::open(base_path.join("papers"))?,
            iterations: Store::open(base_path.join("iterations"))?,
            agents: Store::open(base_path.join("agents"))?,
            logs: Store::open(base_path.join("logs"))?,
            results: Store::open(base_path.join("results"))?,
        };

        let (tx, rx) = mpsc::channel(256);
        let (events, _) = broadcast::channel(1024);

        tokio::spawn(actor_loop(collections, rx, events.clone()));

        Ok(Self { tx, events })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Sends `build(reply)` to the actor and retries on a transient
    /// `StoreError` with exponential backoff (spec §4.1), up to
    /// `MAX_ATTEMPTS` total attempts. `build` must be callable more than
    /// once: it is re-invoked with a fresh reply channel on every retry.
    async fn call<T>(&self, build: impl Fn(oneshot::Sender<StoreResponse<T>>) -> Command) -> StoreResponse<T> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let (reply, rx) = oneshot::channel();
            self.tx.send(build(reply)).await.map_err(|_| StoreError::ChannelClosed)?;
            match rx.await.map_err(|_| StoreError::ChannelClosed)? {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let backoff = backoff_for(attempt);
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "transient store error, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn create_run(&self, run: Run) -> StoreResponse<()> {
        self.call(|reply| Command::CreateRun { run: run.clone(), reply }).await
    }

    pub async fn get_run(&self, run_id: &str) -> StoreResponse<Option<Run>> {
        self.call(|reply| Command::GetRun { run_id: run_id.to_string(), reply }).await
    }

    pub async fn update_run(&self, run: Run) -> StoreResponse<()> {
        self.call(|reply| Command::UpdateRun { run: run.clone(), reply }).await
    }

    pub async fn list_runs(&self, filters: Vec<Filter>) -> StoreResponse<Vec<Run>> {
        self.call(|reply| Command::ListRuns { filters: filters.clone(), reply }).await
    }

    pub async fn create_paper(&self, paper: Paper) -> StoreResponse<()> {
        self.call(|reply| Command::CreatePaper { paper: paper.clone(), reply }).await
    }

    pub async fn list_papers(&self, run_id: &str) -> StoreResponse<Vec<Paper>> {
        self.call(|reply| Command::ListPapers { filters: vec![Filter::eq("run_id", run_id)], reply }).await
    }

    pub async fn upsert_iteration(&self, iteration: Iteration) -> StoreResponse<()> {
        self.call(|reply| Command::UpsertIteration { iteration: iteration.clone(), reply }).await
    }

    pub async fn get_iteration(&self, iteration_id: &str) -> StoreResponse<Option<Iteration>> {
        self.call(|reply| Command::GetIteration { iteration_id: iteration_id.to_string(), reply }).await
    }

    pub async fn list_iterations(&self, run_id: &str) -> StoreResponse<Vec<Iteration>> {
        self.call(|reply| Command::ListIterations { filters: vec![Filter::eq("run_id", run_id)], reply }).await
    }

    pub async fn upsert_agent(&self, agent: AgentRecord) -> StoreResponse<()> {
        self.call(|reply| Command::UpsertAgent { agent: agent.clone(), reply }).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> StoreResponse<Option<AgentRecord>> {
        self.call(|reply| Command::GetAgent { agent_id: agent_id.to_string(), reply }).await
    }

    pub async fn list_agents_for_iteration(&self, run_id: &str, iteration_id: &str) -> StoreResponse<Vec<AgentRecord>> {
        self.call(|reply| {
            Command::ListAgents { filters: vec![Filter::eq("run_id", run_id), Filter::eq("iteration_id", iteration_id)], reply }
        })
        .await
    }

    pub async fn append_log(&self, entry: LogEntry) -> StoreResponse<()> {
        self.call(|reply| Command::AppendLog { entry: entry.clone(), reply }).await
    }

    pub async fn list_logs(&self, run_id: &str) -> StoreResponse<Vec<LogEntry>> {
        self.call(|reply| Command::ListLogs { filters: vec![Filter::eq("run_id", run_id)], reply }).await
    }

    pub async fn upsert_result(&self, result: ResultRecord) -> StoreResponse<()> {
        self.call(|reply| Command::UpsertResult { result: result.clone(), reply }).await
    }

    pub async fn get_result(&self, run_id: &str) -> StoreResponse<Option<ResultRecord>> {
        self.call(|reply| Command::GetResultByRun { run_id: run_id.to_string(), reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.tx.send(Command::Shutdown).await.map_err(|_| StoreError::ChannelClosed)
    }
}

fn notify(events: &broadcast::Sender<StoreEvent>, run_id: impl Into<String>, collection: &'static str) {
    let _ = events.send(StoreEvent { run_id: run_id.into(), collection });
}

async fn actor_loop(mut db: Collections, mut rx: mpsc::Receiver<Command>, events: broadcast::Sender<StoreEvent>) {
    debug!("persistence store actor started");
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::CreateRun { run, reply } => {
                let run_id = run.run_id.clone();
                let result = db.runs.create(&run).map_err(StoreError::from);
                if result.is_ok() {
                    notify(&events, run_id, Run::collection_name());
                }
                let _ = reply.send(result);
            }
            Command::GetRun { run_id, reply } => {
                let _ = reply.send(db.runs.get(&run_id).map_err(StoreError::from));
            }
            Command::UpdateRun { run, reply } => {
                let run_id = run.run_id.clone();
                let result = db.runs.update(&run).map_err(StoreError::from);
                if result.is_ok() {
                    notify(&events, run_id, Run::collection_name());
                }
                let _ = reply.send(result);
            }
            Command::ListRuns { filters, reply } => {
                let _ = reply.send(db.runs.list(&filters).map_err(StoreError::from));
            }

            Command::CreatePaper { paper, reply } => {
                let run_id = paper.run_id.clone();
                let result = db.papers.create(&paper).map_err(StoreError::from);
                if result.is_ok() {
                    notify(&events, run_id, Paper::collection_name());
                }
                let _ = reply.send(result);
            }
            Command::ListPapers { filters, reply } => {
                let _ = reply.send(db.papers.list(&filters).map_err(StoreError::from));
            }

            Command::UpsertIteration { iteration, reply } => {
                let run_id = iteration.run_id.clone();
                let result = db.iterations.upsert(&iteration).map_err(StoreError::from);
                if result.is_ok() {
                    notify(&events, run_id, Iteration::collection_name());
                }
                let _ = reply.send(result);
            }
            Command::GetIteration { iteration_id, reply } => {
                let _ = reply.send(db.iterations.get(&iteration_id).map_err(StoreError::from));
            }
            Command::ListIterations { filters, reply } => {
                let _ = reply.send(db.iterations.list(&filters).map_err(StoreError::from));
            }

            Command::UpsertAgent { agent, reply } => {
                let run_id = agent.run_id.clone();
                let result = db.agents.upsert(&agent).map_err(StoreError::from);
                if result.is_ok() {
                    notify(&events, run_id, AgentRecord::collection_name());
                }
                let _ = reply.send(result);
            }
            Command::GetAgent { agent_id, reply } => {
                let _ = reply.send(db.agents.get(&agent_id).map_err(StoreError::from));
            }
            Command::ListAgents { filters, reply } => {
                let _ = reply.send(db.agents.list(&filters).map_err(StoreError::from));
            }

            Command::AppendLog { entry, reply } => {
                let run_id = entry.run_id.clone();
                let result = db.logs.create(&entry).map_err(StoreError::from);
                if result.is_ok() {
                    notify(&events, run_id, LogEntry::collection_name());
                }
                let _ = reply.send(result);
            }
            Command::ListLogs { filters, reply } => {
                let _ = reply.send(db.logs.list(&filters).map_err(StoreError::from));
            }

            Command::UpsertResult { result: record, reply } => {
                let run_id = record.run_id.clone();
                let result = db.results.upsert(&record).map_err(StoreError::from);
                if result.is_ok() {
                    notify(&events, run_id, ResultRecord::collection_name());
                }
                let _ = reply.send(result);
            }
            Command::GetResultByRun { run_id, reply } => {
                let _ = reply.send(db.results.get(&run_id).map_err(StoreError::from));
            }

            Command::Shutdown => {
                debug!("persistence store actor shutting down");
                break;
            }
        }
    }
    warn!("persistence store actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_and_get_run_roundtrips() {
        let dir = tempdir().unwrap();
        let store = EngineStore::spawn(dir.path()).unwrap();
        let run = Run::new("ws", "user", "query", vec![], 3, 0.6);
        let run_id = run.run_id.clone();
        store.create_run(run).await.unwrap();
        let fetched = store.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(fetched.run_id, run_id);
    }

    #[tokio::test]
    async fn agent_upsert_is_idempotent_and_notifies_subscribers() {
        let dir = tempdir().unwrap();
        let store = EngineStore::spawn(dir.path()).unwrap();
        let mut events = store.subscribe();

        let agent = AgentRecord::new_queued("run-1", "iter-1", crate::domain::AgentType::Micro, "paper-1");
        store.upsert_agent(agent.clone()).await.unwrap();
        store.upsert_agent(agent.clone()).await.unwrap();

        let fetched = store.list_agents_for_iteration("run-1", "iter-1").await.unwrap();
        assert_eq!(fetched.len(), 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.run_id, "run-1");
    }

    #[tokio::test]
    async fn call_retries_a_transient_error_before_succeeding() {
        use taskstore::StoreError as TsError;

        let (tx, mut rx) = mpsc::channel::<Command>(8);
        let (events, _) = broadcast::channel(8);
        let store = EngineStore { tx, events };

        tokio::spawn(async move {
            let Some(Command::GetRun { reply, .. }) = rx.recv().await else { return };
            // First attempt: a transient conflicting-write error that must be retried.
            let _ = reply.send(Err(StoreError::Store(TsError::Conflict("run-1".to_string()))));
            let Some(Command::GetRun { reply, .. }) = rx.recv().await else { return };
            let _ = reply.send(Ok(None));
        });

        let result = store.call(|reply| Command::GetRun { run_id: "run-1".to_string(), reply }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn list_papers_filters_by_run() {
        let dir = tempdir().unwrap();
        let store = EngineStore::spawn(dir.path()).unwrap();
        store.create_paper(Paper::new("run-1", "A", None, None, 0)).await.unwrap();
        store.create_paper(Paper::new("run-2", "B", None, None, 0)).await.unwrap();

        let papers = store.list_papers("run-1").await.unwrap();
        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].title, "A");
    }
}
