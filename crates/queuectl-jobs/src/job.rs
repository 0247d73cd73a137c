use crate::error::{JobError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Lifecycle state of a stored job.
///
/// A failed execution is not a state of its own: it sends the job back to
/// `Pending` or on to `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl JobState {
    /// All states, in lifecycle order.
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "dead" => Ok(Self::Dead),
            other => Err(JobError::InvalidState(other.to_string())),
        }
    }
}

/// A job as persisted by a [`JobBackend`](crate::backend::JobBackend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl Job {
    /// Whether a worker may claim this job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.next_run_at <= now
    }
}

/// Client-side description of a job to enqueue.
///
/// Accepts the JSON shape `{"id": "job1", "command": "echo hi", "max_retries": 2}`;
/// `timeout` is accepted as an alias of `timeout_seconds`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default, alias = "timeout")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub attempts: Option<u32>,
}

impl EnqueueRequest {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }

    pub fn attempts(mut self, n: u32) -> Self {
        self.attempts = Some(n);
        self
    }

    /// Build the pending job this request stands for.
    ///
    /// A missing id is replaced with a fresh UUID and a missing retry limit
    /// with `default_max_retries`. A timeout of `0` means no timeout.
    pub fn into_job(self, default_max_retries: u32, now: DateTime<Utc>) -> Result<Job> {
        let id = match self.id {
            Some(id) if id.trim().is_empty() => {
                return Err(JobError::InvalidRecord("job id must not be empty".to_string()))
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };
        if self.command.trim().is_empty() {
            return Err(JobError::InvalidRecord(format!(
                "job {id} has an empty command"
            )));
        }

        let now = now.trunc_subsecs(0);
        Ok(Job {
            id,
            command: self.command,
            state: JobState::Pending,
            attempts: self.attempts.unwrap_or(0),
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            created_at: now,
            updated_at: now,
            next_run_at: now,
            last_error: None,
            timeout_seconds: self.timeout_seconds.filter(|&secs| secs > 0),
        })
    }
}

/// Current UTC time truncated to whole seconds.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Render a timestamp the way it is stored (`2026-10-15T08:30:00Z`).
///
/// The fixed width keeps lexicographic order equal to chronological order,
/// which the eligibility query relies on.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| JobError::InvalidRecord(format!("bad timestamp {raw:?}: {e}")))
}
