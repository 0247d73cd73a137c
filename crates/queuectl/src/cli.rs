//! CLI argument parsing

use crate::commands::{self, ConfigCommand, DlqCommand, ListArgs, WorkerCommand};
use clap::{Parser, Subcommand};

/// queuectl - persistent shell job queue with retries and a dead-letter queue
#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a job, e.g. '{"id":"job1","command":"echo hi","max_retries":3}'
    Enqueue {
        /// Job as a JSON object
        job_json: String,
    },

    /// Start, stop, or run workers
    #[command(subcommand)]
    Worker(WorkerCommand),

    /// Show job counts per state
    Status,

    /// List jobs as JSON lines
    List(ListArgs),

    /// Inspect and retry dead jobs
    #[command(subcommand)]
    Dlq(DlqCommand),

    /// Read or change settings
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Enqueue { job_json } => commands::enqueue(&job_json).await,
            Commands::Worker(cmd) => commands::worker(cmd).await,
            Commands::Status => commands::status().await,
            Commands::List(args) => commands::list(args).await,
            Commands::Dlq(cmd) => commands::dlq(cmd).await,
            Commands::Config(cmd) => commands::config(cmd),
        }
    }
}
