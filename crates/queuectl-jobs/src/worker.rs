use crate::backend::JobBackend;
use crate::error::Result;
use crate::executor::Executor;
use crate::job::{self, Job};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tunables for a [`WorkerLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub backoff_base: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            backoff_base: 2,
        }
    }
}

/// What a single [`WorkerLoop::process_one`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Nothing was eligible.
    Idle,
    Completed(String),
    Failed { job_id: String, code: i32 },
}

/// Polls the store, runs claimed jobs, and feeds outcomes back into it.
///
/// Cancellation is only observed between iterations: a command that is
/// already running is left to finish or hit its own timeout.
pub struct WorkerLoop {
    backend: Arc<dyn JobBackend>,
    executor: Arc<dyn Executor>,
    options: WorkerOptions,
    shutdown: CancellationToken,
}

impl WorkerLoop {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        executor: Arc<dyn Executor>,
        options: WorkerOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backend,
            executor,
            options,
            shutdown,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Claim and execute at most one job.
    pub async fn process_one(&self) -> Result<Processed> {
        let Some(job) = self.backend.claim_next(job::now()).await? else {
            return Ok(Processed::Idle);
        };
        self.execute(job).await
    }

    async fn execute(&self, job: Job) -> Result<Processed> {
        tracing::info!(job_id = %job.id, attempts = job.attempts, "claimed job");

        let timeout = job.timeout_seconds.map(Duration::from_secs);
        let outcome = self.executor.run(&job.command, timeout).await;

        if outcome.success() {
            self.backend.mark_completed(&job.id).await?;
            tracing::info!(job_id = %job.id, "job completed");
            return Ok(Processed::Completed(job.id));
        }

        self.backend
            .mark_failed(
                &job.id,
                job.attempts,
                job.max_retries,
                self.options.backoff_base,
                &outcome.output,
            )
            .await?;
        tracing::warn!(
            job_id = %job.id,
            code = outcome.code,
            attempts = job.attempts.saturating_add(1),
            max_retries = job.max_retries,
            "job failed"
        );
        Ok(Processed::Failed {
            job_id: job.id,
            code: outcome.code,
        })
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Storage errors are logged and the loop retries after one poll interval.
    pub async fn run(&self) {
        tracing::info!(
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            backoff_base = self.options.backoff_base,
            "worker started"
        );

        while !self.shutdown.is_cancelled() {
            match self.process_one().await {
                Ok(Processed::Idle) => self.idle().await,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "worker error");
                    self.idle().await;
                }
            }
        }

        tracing::info!("worker stopped");
    }

    async fn idle(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.options.poll_interval) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}

/// Cancel `token` when the process receives SIGTERM or SIGINT (Ctrl+C elsewhere).
pub fn cancel_on_termination(token: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        let mut int = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = term.recv() => tracing::info!("received SIGTERM, finishing current job"),
                _ = int.recv() => tracing::info!("received SIGINT, finishing current job"),
            }
            token.cancel();
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received Ctrl+C, finishing current job");
            }
            token.cancel();
        });
    }
    Ok(())
}
