use chrono::Duration;
use queuectl_jobs::job::now;
use queuectl_jobs::{
    EnqueueRequest, JobBackend, JobError, JobQueue, JobState, SqliteBackend,
};
use std::collections::HashSet;
use std::sync::Arc;

async fn open(dir: &tempfile::TempDir) -> SqliteBackend {
    SqliteBackend::connect(dir.path().join("data/jobs.db"))
        .await
        .expect("open job store")
}

async fn enqueue(backend: &SqliteBackend, req: EnqueueRequest) -> bool {
    backend
        .enqueue(req.into_job(3, now()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_jobs_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let backend = open(&dir).await;
        assert!(enqueue(&backend, EnqueueRequest::new("job1", "echo hi").timeout_seconds(9)).await);
        backend.pool().close().await;
    }

    let backend = open(&dir).await;
    let jobs = backend.list_jobs(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, "job1");
    assert_eq!(jobs[0].command, "echo hi");
    assert_eq!(jobs[0].state, JobState::Pending);
    assert_eq!(jobs[0].attempts, 0);
    assert_eq!(jobs[0].timeout_seconds, Some(9));
    assert_eq!(jobs[0].last_error, None);
}

#[tokio::test]
async fn test_duplicate_id_keeps_original() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir).await;

    assert!(enqueue(&backend, EnqueueRequest::new("dup", "echo first").max_retries(1)).await);
    assert!(!enqueue(&backend, EnqueueRequest::new("dup", "echo second").max_retries(5)).await);

    let job = backend.get_job("dup").await.unwrap().unwrap();
    assert_eq!(job.command, "echo first");
    assert_eq!(job.max_retries, 1);
    assert_eq!(backend.list_jobs(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_claim_order_and_eligibility() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir).await;
    let t = now();

    // Same created_at second: insertion order decides.
    for id in ["first", "second", "third"] {
        assert!(backend
            .enqueue(EnqueueRequest::new(id, "true").into_job(3, t).unwrap())
            .await
            .unwrap());
    }
    let mut future = EnqueueRequest::new("future", "true")
        .into_job(3, t - Duration::seconds(60))
        .unwrap();
    future.next_run_at = t + Duration::seconds(30);
    assert!(backend.enqueue(future).await.unwrap());

    let mut claimed = Vec::new();
    while let Some(job) = backend.claim_next(t).await.unwrap() {
        assert_eq!(job.state, JobState::Processing);
        claimed.push(job.id);
    }
    assert_eq!(claimed, ["first", "second", "third"]);

    let later = backend
        .claim_next(t + Duration::seconds(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(later.id, "future");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_exclusive() {
    const JOBS: usize = 12;
    const CLAIMERS: usize = 8;

    let dir = tempfile::tempdir().unwrap();
    let seed = open(&dir).await;
    for i in 0..JOBS {
        assert!(enqueue(&seed, EnqueueRequest::new(format!("job-{i}"), "true")).await);
    }

    // One store handle per claimer, as separate worker processes would have.
    let mut stores = Vec::new();
    for _ in 0..CLAIMERS {
        stores.push(open(&dir).await);
    }

    let handles: Vec<_> = stores
        .into_iter()
        .map(|store| {
            tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(job) = store.claim_next(now()).await.unwrap() {
                    mine.push(job.id);
                }
                mine
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), JOBS, "every job claimed exactly once: {all:?}");
    assert_eq!(unique.len(), JOBS);

    let stats = seed.stats().await.unwrap();
    assert_eq!(stats.get(&JobState::Processing), Some(&(JOBS as u64)));
    assert_eq!(stats.get(&JobState::Pending), None);
}

#[tokio::test]
async fn test_mark_failed_dead_letters_at_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir).await;
    assert!(enqueue(&backend, EnqueueRequest::new("r", "false").max_retries(3)).await);

    let mut t = now();
    for expected in 1..=3u32 {
        let job = backend
            .claim_next(t)
            .await
            .unwrap()
            .expect("job should be eligible");
        backend
            .mark_failed(&job.id, job.attempts, job.max_retries, 2, "nope")
            .await
            .unwrap();

        let stored = backend.get_job("r").await.unwrap().unwrap();
        assert_eq!(stored.attempts, expected);
        if expected < 3 {
            assert_eq!(stored.state, JobState::Pending);
        } else {
            assert_eq!(stored.state, JobState::Dead);
        }
        assert_eq!(stored.last_error.as_deref(), Some("nope"));
        t = t + Duration::seconds(3600);
    }

    assert!(backend.claim_next(t).await.unwrap().is_none());
    let dlq = backend.list_jobs(Some(JobState::Dead)).await.unwrap();
    assert_eq!(dlq.len(), 1);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir).await;

    assert!(matches!(
        backend.mark_completed("ghost").await,
        Err(JobError::NotFound(_))
    ));
    assert!(matches!(
        backend.mark_failed("ghost", 0, 3, 2, "x").await,
        Err(JobError::NotFound(_))
    ));
    assert!(matches!(
        backend.requeue_from_dead("ghost").await,
        Err(JobError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_mark_completed_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir).await;
    assert!(enqueue(&backend, EnqueueRequest::new("done", "true")).await);

    backend.claim_next(now()).await.unwrap().unwrap();
    backend.mark_completed("done").await.unwrap();
    backend.mark_completed("done").await.unwrap();

    let job = backend.get_job("done").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn test_queue_facade_over_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let queue = JobQueue::from_arc(Arc::new(open(&dir).await)).default_max_retries(4);

    let first = queue
        .enqueue(EnqueueRequest::new("a", "true"))
        .await
        .unwrap();
    assert!(first.is_inserted());
    assert!(!queue
        .enqueue(EnqueueRequest::new("a", "true"))
        .await
        .unwrap()
        .is_inserted());
    queue
        .enqueue(EnqueueRequest::new("b", "true"))
        .await
        .unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.get(&JobState::Pending), Some(&2));
    assert_eq!(stats.get(&JobState::Dead), None);
    assert_eq!(queue.get("a").await.unwrap().unwrap().max_retries, 4);

    let ids: Vec<_> = queue
        .list(None)
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(ids, ["a", "b"]);
}

#[tokio::test]
async fn test_failed_claim_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let backend = open(&dir).await;
    assert!(enqueue(&backend, EnqueueRequest::new("stuck", "true")).await);

    // Any write to the table now fails inside the claim transaction.
    sqlx::query(
        "CREATE TRIGGER reject_updates BEFORE UPDATE ON jobs \
         BEGIN SELECT RAISE(ABORT, 'updates disabled'); END",
    )
    .execute(backend.pool())
    .await
    .unwrap();

    for _ in 0..3 {
        assert!(matches!(
            backend.claim_next(now()).await,
            Err(JobError::DatabaseError(_))
        ));
    }

    sqlx::query("DROP TRIGGER reject_updates")
        .execute(backend.pool())
        .await
        .unwrap();

    let job = backend.get_job("stuck").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);

    // No pooled connection was left inside an open transaction.
    let claimed = backend.claim_next(now()).await.unwrap().unwrap();
    assert_eq!(claimed.id, "stuck");
    assert_eq!(claimed.state, JobState::Processing);
}
