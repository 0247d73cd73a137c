//! CLI commands

mod config;
mod dlq;
mod enqueue;
mod list;
mod status;
mod worker;

pub use config::{config, ConfigCommand};
pub use dlq::{dlq, DlqCommand};
pub use enqueue::enqueue;
pub use list::{list, ListArgs};
pub use status::status;
pub use worker::{worker, WorkerCommand};

use anyhow::{Context, Result};
use queuectl_jobs::{Job, JobQueue, QueueConfig, SqliteBackend};

/// Resolved settings for this invocation.
fn load_config() -> Result<QueueConfig> {
    QueueConfig::load().context("failed to load configuration")
}

async fn open_queue(config: &QueueConfig) -> Result<JobQueue> {
    let backend = SqliteBackend::connect(&config.db_path)
        .await
        .with_context(|| format!("failed to open job store at {}", config.db_path.display()))?;
    Ok(JobQueue::new(backend).default_max_retries(config.default_max_retries))
}

/// One JSON object per line on stdout.
fn print_jobs(jobs: &[Job]) -> Result<()> {
    for job in jobs {
        println!("{}", serde_json::to_string(job)?);
    }
    Ok(())
}
