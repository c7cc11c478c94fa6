//! The Orchestrator (spec §4.5): the state machine driving a Run through
//! its iterations, fencing concurrent drivers of the same run, fanning
//! Micro work out through the Job Queue, and sequencing Meso and Meta.

pub mod convergence;
pub mod fence;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{AgentRecord, AgentType, Iteration, LogEntry, LogLevel, Paper, ResultRecord, Run, RunStatus};
use crate::llm::Gateway;
use crate::queue::{Job, QueueRegistry};
use crate::store::{EngineStore, StoreError};
use crate::workers;

use fence::RunFence;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("run not found: {0}")]
    NotFound(String),
    #[error("ERR_NO_PAPERS: run has no ingested papers")]
    NoPapers,
    #[error("ERR_INVARIANT: fewer than the required number of Micro agents succeeded")]
    MicroInsufficient,
    #[error("ERR_INVARIANT: Meso synthesis produced no clusters")]
    MesoEmpty,
    #[error("{0}")]
    Meta(String),
    #[error("ERR_STORE: {0}")]
    Store(#[from] StoreError),
    #[error("ERR_CANCELLED: run was cancelled")]
    Cancelled,
}

/// What one `run_iteration` call accomplished, for the driver loop to
/// decide what to do next.
#[derive(Debug)]
pub enum IterationOutcome {
    Converged,
    Continue,
    MicroInsufficientRecoverable,
}

pub struct Orchestrator {
    store: Arc<EngineStore>,
    gateway: Arc<Gateway>,
    queues: Arc<QueueRegistry>,
    fence: RunFence,
}

impl Orchestrator {
    pub fn new(store: Arc<EngineStore>, gateway: Arc<Gateway>, queues: Arc<QueueRegistry>) -> Self {
        Self { store, gateway, queues, fence: RunFence::new() }
    }

    async fn log(&self, run_id: &str, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(run_id, level, message);
        if let Err(e) = self.store.append_log(entry).await {
            warn!(run_id, error = %e, "failed to persist log entry");
        }
    }

    /// Drives a run from its current state to a terminal state (or to a
    /// recoverable failure that has already consumed its one retry),
    /// running as many iterations as `run_iteration` calls for.
    pub async fn drive_run(&self, run_id: &str) -> Result<(), OrchestratorError> {
        let mut retried_once = false;
        loop {
            match self.run_iteration(run_id).await {
                Ok(IterationOutcome::Converged) => return Ok(()),
                Ok(IterationOutcome::Continue) => continue,
                Ok(IterationOutcome::MicroInsufficientRecoverable) => {
                    if retried_once {
                        self.fail_run(run_id, "ERR_INVARIANT: Micro insufficiency recurred after retry").await?;
                        return Err(OrchestratorError::MicroInsufficient);
                    }
                    retried_once = true;
                    self.log(run_id, LogLevel::Warn, "retrying iteration once after recoverable Micro insufficiency").await;
                    continue;
                }
                Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(e) => {
                    self.fail_run(run_id, &e.to_string()).await?;
                    return Err(e);
                }
            }
        }
    }

    async fn fail_run(&self, run_id: &str, reason: &str) -> Result<(), OrchestratorError> {
        self.log(run_id, LogLevel::Error, format!("run failed: {reason}")).await;
        if let Some(mut run) = self.store.get_run(run_id).await? {
            if !run.status.is_terminal() {
                run.finish(RunStatus::Failed, run.results.clone());
                self.store.update_run(run).await?;
            }
        }
        Ok(())
    }

    /// Runs exactly one Micro→Meso→Meta→convergence cycle for `run_id`,
    /// persisting the Run and Iteration transitions as it goes (spec
    /// §4.5).
    pub async fn run_iteration(&self, run_id: &str) -> Result<IterationOutcome, OrchestratorError> {
        let _guard = self.fence.acquire(run_id).await;

        let mut run = self.store.get_run(run_id).await?.ok_or_else(|| OrchestratorError::NotFound(run_id.to_string()))?;
        if run.status.is_terminal() {
            return Err(OrchestratorError::Cancelled);
        }
        if run.status == RunStatus::Pending {
            run.start();
            self.store.update_run(run.clone()).await?;
        }

        let papers = self.store.list_papers(run_id).await?;
        if papers.is_empty() {
            return Err(OrchestratorError::NoPapers);
        }

        let iteration_number = run.current_iteration + 1;
        let mut iteration = Iteration::new(run_id, iteration_number);
        self.store.upsert_iteration(iteration.clone()).await?;
        self.log(run_id, LogLevel::Info, format!("iteration {iteration_number} started")).await;

        let micro_gaps = match self.run_micro_fanout(&run, &iteration, &papers).await {
            Ok(gaps) => gaps,
            Err(OrchestratorError::MicroInsufficient) => {
                iteration.fail();
                self.store.upsert_iteration(iteration).await?;
                return Ok(IterationOutcome::MicroInsufficientRecoverable);
            }
            Err(e) => {
                iteration.fail();
                self.store.upsert_iteration(iteration).await?;
                return Err(e);
            }
        };

        let clusters = workers::meso::run(micro_gaps);
        if clusters.clusters.is_empty() {
            iteration.fail();
            self.store.upsert_iteration(iteration).await?;
            return Err(OrchestratorError::MesoEmpty);
        }
        let mut meso_agent = AgentRecord::new_queued(run_id, &iteration.iteration_id, AgentType::Meso, &iteration.iteration_id);
        meso_agent.start_attempt();
        meso_agent.succeed(serde_json::to_value(&clusters).unwrap_or_default(), "local", 0);
        self.store.upsert_agent(meso_agent).await?;

        let prior_result = self.store.get_result(run_id).await?;
        let prior_top10: Option<Vec<_>> = prior_result.as_ref().map(|r| r.data.ranked_gaps.iter().take(10).cloned().collect());

        let mut meta_agent = AgentRecord::new_queued(run_id, &iteration.iteration_id, AgentType::Meta, &iteration.iteration_id);
        meta_agent.start_attempt();
        let meta_outcome = match workers::meta::run(&self.gateway, &clusters, prior_top10.as_deref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                meta_agent.fail(e.clone());
                self.store.upsert_agent(meta_agent).await?;
                iteration.fail();
                self.store.upsert_iteration(iteration).await?;
                return Err(OrchestratorError::Meta(e));
            }
        };
        meta_agent.succeed(serde_json::to_value(&meta_outcome.result).unwrap_or_default(), meta_outcome.provider, meta_outcome.latency_ms);
        self.store.upsert_agent(meta_agent).await?;

        if meta_outcome.result.ranked_gaps.is_empty() {
            self.log(run_id, LogLevel::Warn, "Meta produced zero ranked gaps; run will still complete").await;
        }

        let convergence_score = if iteration_number == 1 {
            0.0
        } else {
            let prior_gaps = prior_result.map(|r| r.data.ranked_gaps).unwrap_or_default();
            convergence::score(&meta_outcome.result.ranked_gaps, &prior_gaps)
        };
        iteration.succeed(convergence_score);
        self.store.upsert_iteration(iteration).await?;

        self.store.upsert_result(ResultRecord::new(run_id, meta_outcome.result.clone())).await?;

        run.set_progress(iteration_number);
        let converged = convergence_score >= run.convergence_threshold;
        let exhausted = iteration_number >= run.max_iterations;
        if converged {
            run.finish(RunStatus::Converged, Some(meta_outcome.result));
            self.store.update_run(run).await?;
            self.log(run_id, LogLevel::Info, format!("converged at iteration {iteration_number} (score {convergence_score:.3})")).await;
            return Ok(IterationOutcome::Converged);
        }
        if exhausted {
            run.finish(RunStatus::Completed, Some(meta_outcome.result));
            self.store.update_run(run).await?;
            self.log(run_id, LogLevel::Info, format!("reached max iterations ({iteration_number}) without converging")).await;
            return Ok(IterationOutcome::Converged);
        }

        run.results = Some(meta_outcome.result);
        self.store.update_run(run).await?;
        Ok(IterationOutcome::Continue)
    }

    /// Enqueues one Micro job per paper into the `micro` queue and runs
    /// them concurrently, bounded by the queue's own concurrency limit:
    /// every task calls `Scheduler::next_job`, which only admits
    /// `max_concurrent` jobs at a time and suspends the rest (spec
    /// §4.3/§5). Persists an `AgentRecord` per outcome and succeeds once
    /// at least `⌈papers/2⌉ + 1` Micro agents succeed (spec §4.5
    /// tolerance).
    async fn run_micro_fanout(&self, run: &Run, iteration: &Iteration, papers: &[Paper]) -> Result<Vec<workers::MicroGap>, OrchestratorError> {
        let queue = self.queues.queue("micro").expect("micro queue is always registered");
        for paper in papers {
            let payload = serde_json::json!({ "paper_id": paper.paper_id });
            queue.enqueue(Job::new(paper.paper_id.clone(), run.run_id.clone(), payload, 3)).await;
        }

        let papers_by_id: Arc<HashMap<String, Paper>> = Arc::new(papers.iter().cloned().map(|p| (p.paper_id.clone(), p)).collect());
        let tasks: Vec<_> = (0..papers.len())
            .map(|_| {
                let queue = queue.clone();
                let store = self.store.clone();
                let gateway = self.gateway.clone();
                let run_id = run.run_id.clone();
                let iteration_id = iteration.iteration_id.clone();
                let papers_by_id = papers_by_id.clone();
                tokio::spawn(async move {
                    let job = queue.next_job().await;
                    let paper_id = job.payload.get("paper_id").and_then(|v| v.as_str()).unwrap_or_default();
                    let paper = papers_by_id.get(paper_id).cloned().expect("job payload references an enqueued paper");
                    let mut agent = AgentRecord::new_queued(&run_id, &iteration_id, AgentType::Micro, &paper.paper_id);
                    agent.start_attempt();

                    match workers::micro::run(&gateway, &paper).await {
                        Ok(outcome) => {
                            agent.succeed(serde_json::to_value(&outcome.output).unwrap_or_default(), outcome.provider, outcome.latency_ms);
                            store.upsert_agent(agent).await?;
                            queue.succeed(&job.job_id).await;
                            Ok::<_, OrchestratorError>((true, outcome.output.research_gaps))
                        }
                        Err(e) => {
                            agent.fail(e.clone());
                            store.upsert_agent(agent).await?;
                            queue.fail(&job.job_id, e).await;
                            Ok((false, Vec::new()))
                        }
                    }
                })
            })
            .collect();

        let required = papers.len().div_ceil(2) + 1;
        let mut succeeded = 0usize;
        let mut gaps = Vec::new();
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(Ok((true, worker_gaps))) => {
                    succeeded += 1;
                    gaps.extend(worker_gaps);
                }
                Ok(Ok((false, _))) => {}
                Ok(Err(e)) => return Err(e),
                Err(join_error) => warn!(run_id = %run.run_id, error = %join_error, "micro worker task panicked"),
            }
        }

        info!(run_id = %run.run_id, succeeded, required, total = papers.len(), "micro fan-out complete");
        if succeeded < required {
            return Err(OrchestratorError::MicroInsufficient);
        }
        Ok(gaps)
    }

    /// Cancels a run: drains its queued/running jobs and marks the Run
    /// terminal (spec §4.3, §4.5 cancellation).
    pub async fn cancel_run(&self, run_id: &str) -> Result<(), OrchestratorError> {
        let _guard = self.fence.acquire(run_id).await;
        let drained = self.queues.cancel_run(run_id).await;
        for job in &drained {
            self.log(run_id, LogLevel::Info, format!("drained job {} on cancellation", job.job_id)).await;
        }
        let mut run = self.store.get_run(run_id).await?.ok_or_else(|| OrchestratorError::NotFound(run_id.to_string()))?;
        if run.cancel() {
            self.store.update_run(run).await?;
            self.log(run_id, LogLevel::Info, "run cancelled").await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tempfile::tempdir;

    fn orchestrator(store: Arc<EngineStore>) -> Orchestrator {
        let gateway = Arc::new(Gateway::new(&EngineConfig { providers: vec![], sandbox_fallback: true, ..EngineConfig::default() }).unwrap());
        let queues = Arc::new(QueueRegistry::new());
        Orchestrator::new(store, gateway, queues)
    }

    async fn seeded_run(store: &EngineStore, papers: usize) -> Run {
        let run = Run::new("ws", "user", "query", vec![], 3, 0.99);
        store.create_run(run.clone()).await.unwrap();
        for i in 0..papers {
            store.create_paper(Paper::new(&run.run_id, format!("Paper {i}"), Some("An abstract.".into()), None, i as u32)).await.unwrap();
        }
        run
    }

    #[tokio::test]
    async fn run_iteration_fails_fast_without_papers() {
        let dir = tempdir().unwrap();
        let store = Arc::new(EngineStore::spawn(dir.path()).unwrap());
        let run = Run::new("ws", "user", "query", vec![], 3, 0.6);
        store.create_run(run.clone()).await.unwrap();

        let orchestrator = orchestrator(store);
        let result = orchestrator.run_iteration(&run.run_id).await;
        assert!(matches!(result, Err(OrchestratorError::NoPapers)));
    }

    #[tokio::test]
    async fn run_iteration_progresses_a_seeded_run_to_completion() {
        let dir = tempdir().unwrap();
        let store = Arc::new(EngineStore::spawn(dir.path()).unwrap());
        let run = seeded_run(&store, 3).await;

        let orchestrator = orchestrator(store.clone());
        let outcome = orchestrator.run_iteration(&run.run_id).await.unwrap();
        assert!(matches!(outcome, IterationOutcome::Continue | IterationOutcome::Converged));

        let updated = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(updated.current_iteration, 1);
        assert!(updated.status == RunStatus::Running || updated.status.is_terminal());

        let iterations = store.list_iterations(&run.run_id).await.unwrap();
        assert_eq!(iterations.len(), 1);
        assert_eq!(iterations[0].convergence_score, Some(0.0));
    }

    #[tokio::test]
    async fn cancel_run_drains_queue_and_marks_cancelled() {
        let dir = tempdir().unwrap();
        let store = Arc::new(EngineStore::spawn(dir.path()).unwrap());
        let run = seeded_run(&store, 2).await;

        let orchestrator = orchestrator(store.clone());
        orchestrator.cancel_run(&run.run_id).await.unwrap();

        let updated = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(updated.status, RunStatus::Cancelled);
    }
}
