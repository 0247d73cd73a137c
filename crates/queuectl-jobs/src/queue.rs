use crate::backend::{JobBackend, JobStats};
use crate::error::Result;
use crate::job::{self, EnqueueRequest, Job, JobState};
use std::sync::Arc;

/// Client-facing operations on the job store.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn JobBackend>,
    default_max_retries: u32,
}

/// Result of [`JobQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    Inserted(String),
    /// A job with this id already exists and was left untouched.
    Duplicate(String),
}

impl Enqueued {
    pub fn id(&self) -> &str {
        match self {
            Self::Inserted(id) | Self::Duplicate(id) => id,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

impl JobQueue {
    /// Create a new job queue with a backend
    pub fn new<B: JobBackend + 'static>(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn JobBackend>) -> Self {
        Self {
            backend,
            default_max_retries: 3,
        }
    }

    /// Retry limit for requests that do not carry their own.
    pub fn default_max_retries(mut self, n: u32) -> Self {
        self.default_max_retries = n;
        self
    }

    pub fn backend(&self) -> Arc<dyn JobBackend> {
        Arc::clone(&self.backend)
    }

    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Enqueued> {
        let job = request.into_job(self.default_max_retries, job::now())?;
        let id = job.id.clone();
        if self.backend.enqueue(job).await? {
            tracing::info!(job_id = %id, "enqueued job");
            Ok(Enqueued::Inserted(id))
        } else {
            tracing::warn!(job_id = %id, "job id already exists");
            Ok(Enqueued::Duplicate(id))
        }
    }

    pub async fn stats(&self) -> Result<JobStats> {
        self.backend.stats().await
    }

    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        self.backend.list_jobs(state).await
    }

    /// Jobs in the dead-letter queue.
    pub async fn dlq(&self) -> Result<Vec<Job>> {
        self.backend.list_jobs(Some(JobState::Dead)).await
    }

    /// Move a job back to `pending` with a fresh retry budget.
    /// The current state is not checked.
    pub async fn retry_dead(&self, job_id: &str) -> Result<()> {
        self.backend.requeue_from_dead(job_id).await?;
        tracing::info!(job_id, "requeued job");
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        self.backend.get_job(job_id).await
    }
}
