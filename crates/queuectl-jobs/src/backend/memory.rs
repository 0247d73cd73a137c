use super::{JobBackend, JobStats};
use crate::error::{JobError, Result};
use crate::job::{self, Job, JobState};
use crate::retry::{RetryDecision, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory job backend (not persistent, for testing/dev)
///
/// Jobs are kept in insertion order, so a stable sort on `created_at`
/// reproduces the tie-breaking of the SQLite backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Job>>> {
        self.jobs
            .lock()
            .map_err(|_| JobError::WorkerError("Lock poisoned".to_string()))
    }

    fn with_job<T>(&self, job_id: &str, f: impl FnOnce(&mut Job) -> T) -> Result<T> {
        let mut jobs = self.lock()?;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        Ok(f(job))
    }
}

#[async_trait]
impl JobBackend for InMemoryBackend {
    async fn enqueue(&self, job: Job) -> Result<bool> {
        let mut jobs = self.lock()?;
        if jobs.iter().any(|j| j.id == job.id) {
            return Ok(false);
        }
        jobs.push(job);
        Ok(true)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        // The guard is the critical section: select and transition happen under it.
        let mut jobs = self.lock()?;
        let candidate = jobs
            .iter_mut()
            .filter(|j| j.is_eligible(now))
            .min_by_key(|j| j.created_at);

        Ok(candidate.map(|j| {
            j.state = JobState::Processing;
            j.updated_at = job::now();
            j.clone()
        }))
    }

    async fn mark_completed(&self, job_id: &str) -> Result<()> {
        self.with_job(job_id, |j| {
            j.state = JobState::Completed;
            j.updated_at = job::now();
        })
    }

    async fn mark_failed(
        &self,
        job_id: &str,
        attempts: u32,
        max_retries: u32,
        backoff_base: u32,
        error: &str,
    ) -> Result<()> {
        let now = job::now();
        let decision = RetryPolicy::new(backoff_base).on_failure(attempts, max_retries, now);
        self.with_job(job_id, |j| {
            j.state = decision.state();
            j.attempts = decision.attempts();
            j.last_error = Some(error.to_string());
            j.updated_at = now;
            if let RetryDecision::Retry { next_run_at, .. } = decision {
                j.next_run_at = next_run_at;
            }
        })
    }

    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let mut out: Vec<Job> = self
            .lock()?
            .iter()
            .filter(|j| state.map_or(true, |s| j.state == s))
            .cloned()
            .collect();
        out.sort_by_key(|j| j.created_at);
        Ok(out)
    }

    async fn stats(&self) -> Result<JobStats> {
        let mut stats = JobStats::new();
        for j in self.lock()?.iter() {
            *stats.entry(j.state).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn requeue_from_dead(&self, job_id: &str) -> Result<()> {
        let now = job::now();
        self.with_job(job_id, |j| {
            j.state = JobState::Pending;
            j.attempts = 0;
            j.next_run_at = now;
            j.updated_at = now;
        })
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.lock()?.iter().find(|j| j.id == job_id).cloned())
    }
}
