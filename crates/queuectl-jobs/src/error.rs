use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid job state: {0}")]
    InvalidState(String),

    #[error("Invalid job record: {0}")]
    InvalidRecord(String),

    #[error("Worker error: {0}")]
    WorkerError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, JobError>;

impl From<crate::config::ConfigError> for JobError {
    fn from(err: crate::config::ConfigError) -> Self {
        JobError::ConfigError(err.to_string())
    }
}
