//! Commands and responses for the Persistence Store actor (spec §4.1).

use taskstore::{Filter, StoreError as TsError};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{AgentRecord, Iteration, LogEntry, Paper, ResultRecord, Run};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] TsError),
    #[error("store actor is not running")]
    ChannelClosed,
}

impl StoreError {
    /// Whether a caller should retry this with backoff (spec §4.1). The
    /// actor being gone is fatal, not transient — there is nothing left
    /// to retry against.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::NotFound(_) | Self::ChannelClosed => false,
        }
    }
}

pub type StoreResponse<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum Command {
    CreateRun { run: Run, reply: oneshot::Sender<StoreResponse<()>> },
    GetRun { run_id: String, reply: oneshot::Sender<StoreResponse<Option<Run>>> },
    UpdateRun { run: Run, reply: oneshot::Sender<StoreResponse<()>> },
    ListRuns { filters: Vec<Filter>, reply: oneshot::Sender<StoreResponse<Vec<Run>>> },

    CreatePaper { paper: Paper, reply: oneshot::Sender<StoreResponse<()>> },
    ListPapers { filters: Vec<Filter>, reply: oneshot::Sender<StoreResponse<Vec<Paper>>> },

    UpsertIteration { iteration: Iteration, reply: oneshot::Sender<StoreResponse<()>> },
    GetIteration { iteration_id: String, reply: oneshot::Sender<StoreResponse<Option<Iteration>>> },
    ListIterations { filters: Vec<Filter>, reply: oneshot::Sender<StoreResponse<Vec<Iteration>>> },

    UpsertAgent { agent: AgentRecord, reply: oneshot::Sender<StoreResponse<()>> },
    GetAgent { agent_id: String, reply: oneshot::Sender<StoreResponse<Option<AgentRecord>>> },
    ListAgents { filters: Vec<Filter>, reply: oneshot::Sender<StoreResponse<Vec<AgentRecord>>> },

    AppendLog { entry: LogEntry, reply: oneshot::Sender<StoreResponse<()>> },
    ListLogs { filters: Vec<Filter>, reply: oneshot::Sender<StoreResponse<Vec<LogEntry>>> },

    UpsertResult { result: ResultRecord, reply: oneshot::Sender<StoreResponse<()>> },
    GetResultByRun { run_id: String, reply: oneshot::Sender<StoreResponse<Option<ResultRecord>>> },

    Shutdown,
}
