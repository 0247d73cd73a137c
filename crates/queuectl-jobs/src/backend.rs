use crate::error::Result;
use crate::job::{Job, JobState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub mod memory;
pub mod sqlite;

/// Job counts keyed by state. States without jobs are absent.
pub type JobStats = BTreeMap<JobState, u64>;

/// Durable job storage and the claim protocol.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Insert a new pending job.
    /// Returns `false` without touching storage if the id is already taken.
    async fn enqueue(&self, job: Job) -> Result<bool>;

    /// Atomically claim the oldest eligible pending job and mark it `processing`.
    /// Two concurrent callers never receive the same job.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>>;

    /// Mark a job as completed successfully. Repeating the call only bumps `updated_at`.
    async fn mark_completed(&self, job_id: &str) -> Result<()>;

    /// Record a failed execution.
    /// `attempts` is the count the job carried when claimed; the retry policy
    /// derived from `backoff_base` decides between re-queueing and the DLQ.
    async fn mark_failed(
        &self,
        job_id: &str,
        attempts: u32,
        max_retries: u32,
        backoff_base: u32,
        error: &str,
    ) -> Result<()>;

    /// Jobs ordered by creation, optionally restricted to one state.
    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>>;

    async fn stats(&self) -> Result<JobStats>;

    /// Reset a job to `pending` with zero attempts, whatever its current state.
    async fn requeue_from_dead(&self, job_id: &str) -> Result<()>;

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;
}
