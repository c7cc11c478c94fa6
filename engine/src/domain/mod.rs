//! The five persisted entity types and the Result Record, per the
//! Run → Iteration → Agent Record ownership tree.

pub mod agent;
pub mod id;
pub mod iteration;
pub mod log;
pub mod paper;
pub mod result;
pub mod run;

pub use agent::{AgentRecord, AgentStatus, AgentType};
pub use id::generate_id;
pub use iteration::{Iteration, IterationStatus};
pub use log::{LogEntry, LogLevel};
pub use paper::Paper;
pub use result::{GapPriority, GapScores, RankedGap, ResultData, ResultRecord};
pub use run::{Run, RunStatus};
