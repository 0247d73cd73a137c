use super::load_config;
use anyhow::{Context, Result};
use clap::Subcommand;
use console::style;
use queuectl_jobs::worker::cancel_on_termination;
use queuectl_jobs::{
    CancellationToken, PidRegistry, ProcessRegistry, ShellExecutor, SqliteBackend, WorkerLoop,
};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Start a pool of worker processes
    Start {
        /// Number of workers
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Return right away; worker output goes to the worker log
        #[arg(short, long)]
        background: bool,
    },

    /// Send SIGTERM to every recorded worker
    Stop,

    /// Run a single worker in this process
    #[command(hide = true)]
    Run,
}

pub async fn worker(cmd: WorkerCommand) -> Result<()> {
    let config = load_config()?;

    match cmd {
        WorkerCommand::Start { count, background } => {
            let registry = ProcessRegistry::new(
                PidRegistry::new(&config.pid_file),
                queuectl_jobs::WorkerCommand::current_exe()?,
            )
            .log_file(&config.worker_log);

            let pool = registry.spawn_pool(count, background)?;
            if background {
                println!(
                    "Started {} worker(s) in the background: {}",
                    style(pool.pids().len()).bold(),
                    join(pool.pids())
                );
                println!("Logs: {}", style(config.worker_log.display()).dim());
            } else {
                println!(
                    "Started {} worker(s) in the foreground: {}",
                    style(pool.pids().len()).bold(),
                    join(pool.pids())
                );
                println!("{}", style("Press Ctrl+C to stop").dim());
                pool.wait().await;
            }
        }
        WorkerCommand::Stop => {
            let registry = ProcessRegistry::new(
                PidRegistry::new(&config.pid_file),
                queuectl_jobs::WorkerCommand::current_exe()?,
            );
            let stopped = registry.stop_pool()?;
            if stopped.is_empty() {
                println!("{}", style("No running workers").yellow());
            } else {
                println!("Stopped {} worker(s): {}", style(stopped.len()).bold(), join(&stopped));
            }
        }
        WorkerCommand::Run => {
            let backend = SqliteBackend::connect(&config.db_path)
                .await
                .with_context(|| format!("failed to open job store at {}", config.db_path.display()))?;

            let shutdown = CancellationToken::new();
            cancel_on_termination(shutdown.clone())?;

            WorkerLoop::new(
                Arc::new(backend),
                Arc::new(ShellExecutor::new()),
                config.worker_options(),
                shutdown,
            )
            .run()
            .await;
        }
    }
    Ok(())
}

fn join(pids: &[u32]) -> String {
    pids.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
}
