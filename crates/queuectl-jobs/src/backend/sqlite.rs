use super::{JobBackend, JobStats};
use crate::error::{JobError, Result};
use crate::job::{format_timestamp, parse_timestamp, Job, JobState};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteQueryResult,
};
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 4;

const SELECT_COLUMNS: &str = "id, command, state, attempts, max_retries, created_at, updated_at, \
     next_run_at, last_error, timeout_seconds";

/// SQLite-backed job store.
///
/// Every worker process opens its own pool on the same database file; the
/// claim runs in a `BEGIN IMMEDIATE` transaction so the write lock is taken
/// before the candidate row is read.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i64,
    max_retries: i64,
    created_at: String,
    updated_at: String,
    next_run_at: String,
    last_error: Option<String>,
    timeout_seconds: Option<i64>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobError;

    fn try_from(row: JobRow) -> Result<Self> {
        let count = |field: &str, value: i64| {
            u32::try_from(value)
                .map_err(|_| JobError::InvalidRecord(format!("{}: bad {field} {value}", row.id)))
        };
        Ok(Job {
            attempts: count("attempts", row.attempts)?,
            max_retries: count("max_retries", row.max_retries)?,
            state: row.state.parse()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            next_run_at: parse_timestamp(&row.next_run_at)?,
            timeout_seconds: row.timeout_seconds.and_then(|t| u64::try_from(t).ok()),
            last_error: row.last_error,
            command: row.command,
            id: row.id,
        })
    }
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `path` and install the schema.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let backend = Self::from_pool(pool);
        backend.ensure_schema().await?;
        tracing::debug!(path = %path.display(), "opened job store");
        Ok(backend)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the database schema
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                command TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                next_run_at TEXT NOT NULL,
                last_error TEXT,
                timeout_seconds INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state_next ON jobs (state, next_run_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn expect_one(job_id: &str, done: SqliteQueryResult) -> Result<()> {
    if done.rows_affected() == 0 {
        return Err(JobError::NotFound(job_id.to_string()));
    }
    Ok(())
}

/// Select-then-transition; the caller holds the write transaction.
async fn claim_locked(conn: &mut SqliteConnection, now: &str) -> sqlx::Result<Option<JobRow>> {
    let candidate: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM jobs \
         WHERE state = 'pending' AND next_run_at <= ?1 \
         ORDER BY created_at ASC, rowid ASC \
         LIMIT 1",
    )
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((job_id,)) = candidate else {
        return Ok(None);
    };

    let updated_at = format_timestamp(crate::job::now());
    sqlx::query("UPDATE jobs SET state = 'processing', updated_at = ?1 WHERE id = ?2")
        .bind(&updated_at)
        .bind(&job_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query_as::<_, JobRow>(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?1"))
        .bind(&job_id)
        .fetch_optional(&mut *conn)
        .await
}

async fn rollback(conn: &mut SqliteConnection) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(conn).await {
        tracing::warn!(error = %e, "rollback after failed claim did not complete");
    }
}

#[async_trait]
impl JobBackend for SqliteBackend {
    async fn enqueue(&self, job: Job) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at,
                              next_run_at, last_error, timeout_seconds)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.state.as_str())
        .bind(i64::from(job.attempts))
        .bind(i64::from(job.max_retries))
        .bind(format_timestamp(job.created_at))
        .bind(format_timestamp(job.updated_at))
        .bind(format_timestamp(job.next_run_at))
        .bind(&job.last_error)
        .bind(job.timeout_seconds.map(|t| i64::try_from(t).unwrap_or(i64::MAX)))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let row = match claim_locked(&mut conn, &format_timestamp(now)).await {
            Ok(row) => row,
            Err(e) => {
                rollback(&mut conn).await;
                return Err(e.into());
            }
        };
        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            rollback(&mut conn).await;
            return Err(e.into());
        }

        row.map(Job::try_from).transpose()
    }

    async fn mark_completed(&self, job_id: &str) -> Result<()> {
        let done = sqlx::query("UPDATE jobs SET state = 'completed', updated_at = ?1 WHERE id = ?2")
            .bind(format_timestamp(crate::job::now()))
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        expect_one(job_id, done)
    }

    async fn mark_failed(
        &self,
        job_id: &str,
        attempts: u32,
        max_retries: u32,
        backoff_base: u32,
        error: &str,
    ) -> Result<()> {
        let now = crate::job::now();
        let decision = RetryPolicy::new(backoff_base).on_failure(attempts, max_retries, now);

        let done = sqlx::query(
            "UPDATE jobs \
             SET state = ?1, attempts = ?2, last_error = ?3, \
                 next_run_at = COALESCE(?4, next_run_at), updated_at = ?5 \
             WHERE id = ?6",
        )
        .bind(decision.state().as_str())
        .bind(i64::from(decision.attempts()))
        .bind(error)
        .bind(decision.next_run_at().map(format_timestamp))
        .bind(format_timestamp(now))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        expect_one(job_id, done)
    }

    async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = match state {
            Some(state) => {
                sqlx::query_as(&format!(
                    "SELECT {SELECT_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at ASC, rowid ASC"
                ))
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {SELECT_COLUMNS} FROM jobs ORDER BY created_at ASC, rowid ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn stats(&self) -> Result<JobStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = JobStats::new();
        for (state, count) in rows {
            stats.insert(state.parse()?, u64::try_from(count).unwrap_or(0));
        }
        Ok(stats)
    }

    async fn requeue_from_dead(&self, job_id: &str) -> Result<()> {
        let now = format_timestamp(crate::job::now());
        let done = sqlx::query(
            "UPDATE jobs SET state = 'pending', attempts = 0, next_run_at = ?1, updated_at = ?1 \
             WHERE id = ?2",
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        expect_one(job_id, done)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Job::try_from).transpose()
    }
}
