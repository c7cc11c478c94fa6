//! The Recursive Multi-Resolution Integration (RMRI) engine: an
//! iterative multi-agent pipeline that turns a paper set and a research
//! question into a ranked, cross-domain list of research gaps.
//!
//! Six components, leaves-first: [`store`] (Persistence Store),
//! [`llm`] (LLM Gateway), [`queue`] (Job Queue), [`workers`] (Agent
//! Workers), [`orchestrator`] (the run state machine), and [`observer`]
//! (the pub/sub progress stream).

pub mod cli;
pub mod config;
pub mod domain;
pub mod llm;
pub mod observer;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod watchdog;
pub mod workers;

pub use config::EngineConfig;
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use store::EngineStore;
