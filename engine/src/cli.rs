//! CLI command definitions (spec §10): a local operator surface
//! mirroring the engine's HTTP contract (spec §6) one-to-one.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rmri", about = "Recursive Multi-Resolution Integration engine", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Submit papers and a query, then drive the run to completion
    Run {
        /// Workspace the run belongs to
        #[arg(long, default_value = "default")]
        workspace: String,

        /// Owner of the run
        #[arg(long, default_value = "cli")]
        owner: String,

        /// The research question
        query: String,

        /// Path to a JSON file of `[{title, abstract?, full_text?}]`
        #[arg(long)]
        papers: PathBuf,

        /// Cross-domain tags
        #[arg(long = "domain")]
        domains: Vec<String>,

        #[arg(long, default_value_t = 3)]
        max_iterations: u32,

        #[arg(long, default_value_t = 0.6)]
        convergence_threshold: f64,
    },

    /// Fetch a run's current state
    Status {
        run_id: String,
    },

    /// Fetch a run's terminal results
    Results {
        run_id: String,
    },

    /// Request cancellation of a run
    Cancel {
        run_id: String,
    },

    /// Stream observer frames for a run as they arrive
    Watch {
        run_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_required_fields() {
        let cli = Cli::parse_from(["rmri", "run", "what are the gaps?", "--papers", "papers.json"]);
        match cli.command {
            Command::Run { query, papers, max_iterations, .. } => {
                assert_eq!(query, "what are the gaps?");
                assert_eq!(papers, PathBuf::from("papers.json"));
                assert_eq!(max_iterations, 3);
            }
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn parses_status_subcommand() {
        let cli = Cli::parse_from(["rmri", "status", "run-123"]);
        assert!(matches!(cli.command, Command::Status { run_id } if run_id == "run-123"));
    }
}
