//! Persistent job queue for queuectl
//!
//! Jobs are shell commands stored in SQLite. Worker processes claim them
//! atomically, run them, and route failures through exponential backoff into
//! either completion or the dead-letter queue.
//!
//! ```text
//! enqueue ──► JobBackend ◄── claim_next ── WorkerLoop ──► Executor
//!                 ▲                            │
//!                 └──── mark_completed / mark_failed (RetryPolicy)
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod worker;

pub use backend::memory::InMemoryBackend;
pub use backend::sqlite::SqliteBackend;
pub use backend::{JobBackend, JobStats};
pub use config::{ConfigError, QueueConfig};
pub use error::{JobError, Result};
pub use executor::{ExecOutcome, Executor, ShellExecutor, TIMEOUT_EXIT_CODE};
pub use job::{EnqueueRequest, Job, JobState};
pub use queue::{Enqueued, JobQueue};
pub use registry::{PidRegistry, ProcessRegistry, WorkerCommand, WorkerPool};
pub use retry::{RetryDecision, RetryPolicy, LATEST_RUN_AT};
pub use worker::{Processed, WorkerLoop, WorkerOptions};

pub use tokio_util::sync::CancellationToken;
