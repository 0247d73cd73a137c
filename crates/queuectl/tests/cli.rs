use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};

/// The `queuectl` binary running in `dir` with only that directory's settings.
fn isolated(dir: &Path) -> std::process::Command {
    let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("queuectl"));
    cmd.current_dir(dir)
        .env_remove("QUEUECTL_CONFIG")
        .env_remove("QUEUECTL_DB_PATH")
        .env_remove("QUEUECTL_BACKOFF_BASE")
        .env_remove("QUEUECTL_DEFAULT_MAX_RETRIES")
        .env_remove("QUEUECTL_PID_FILE")
        .env_remove("QUEUECTL_WORKER_LOG")
        .env("QUEUECTL_WORKER_POLL_INTERVAL", "1")
        .env("RUST_LOG", "warn");
    cmd
}

fn queuectl(dir: &Path) -> Command {
    Command::from_std(isolated(dir))
}

fn job_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn enqueue_then_status() {
    let dir = tempfile::tempdir().unwrap();

    queuectl(dir.path())
        .args(["enqueue", r#"{"id":"j1","command":"exit 0","max_retries":2}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("Enqueued j1"));
    assert!(dir.path().join("data/jobs.db").exists());

    queuectl(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"pending\s+1").unwrap())
        .stdout(predicate::str::is_match(r"dead\s+0").unwrap());
}

#[test]
fn duplicate_enqueue_fails_without_overwriting() {
    let dir = tempfile::tempdir().unwrap();

    queuectl(dir.path())
        .args(["enqueue", r#"{"id":"dup","command":"echo first"}"#])
        .assert()
        .success();
    queuectl(dir.path())
        .args(["enqueue", r#"{"id":"dup","command":"echo second"}"#])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));

    let output = queuectl(dir.path()).arg("list").output().unwrap();
    let jobs = job_lines(&output.stdout);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["command"], "echo first");
}

#[test]
fn malformed_job_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    queuectl(dir.path())
        .args(["enqueue", "not json"])
        .assert()
        .failure();
    queuectl(dir.path())
        .args(["enqueue", r#"{"id":"x","command":"   "}"#])
        .assert()
        .failure();
}

#[test]
fn list_filters_by_state() {
    let dir = tempfile::tempdir().unwrap();
    queuectl(dir.path())
        .args(["enqueue", r#"{"id":"a","command":"true","timeout":5}"#])
        .assert()
        .success();

    let output = queuectl(dir.path())
        .args(["list", "--state", "pending"])
        .output()
        .unwrap();
    let jobs = job_lines(&output.stdout);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], "a");
    assert_eq!(jobs[0]["state"], "pending");
    assert_eq!(jobs[0]["timeout_seconds"], 5);
    assert_eq!(jobs[0]["max_retries"], 3);

    queuectl(dir.path())
        .args(["list", "--state", "completed"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn config_set_and_show() {
    let dir = tempfile::tempdir().unwrap();

    queuectl(dir.path())
        .args(["config", "set", "default_max_retries", "6"])
        .assert()
        .success();
    queuectl(dir.path())
        .args(["config", "set", "colour", "blue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown config key"));

    let output = queuectl(dir.path()).args(["config", "show"]).output().unwrap();
    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["default_max_retries"], 6);
    assert_eq!(shown["backoff_base"], 2);

    queuectl(dir.path())
        .args(["enqueue", r#"{"id":"c","command":"true"}"#])
        .assert()
        .success();
    let output = queuectl(dir.path()).arg("list").output().unwrap();
    assert_eq!(job_lines(&output.stdout)[0]["max_retries"], 6);
}

#[test]
fn stop_without_workers_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    queuectl(dir.path())
        .args(["worker", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No running workers"));
}

#[cfg(unix)]
#[test]
fn background_worker_dead_letters_and_retry_requeues() {
    let dir = tempfile::tempdir().unwrap();
    queuectl(dir.path())
        .args(["enqueue", r#"{"id":"ok","command":"exit 0"}"#])
        .assert()
        .success();
    queuectl(dir.path())
        .args(["enqueue", r#"{"id":"j2","command":"exit 1","max_retries":1}"#])
        .assert()
        .success();

    queuectl(dir.path())
        .args(["worker", "start", "--count", "2", "--background"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Started 2 worker(s)"));

    let deadline = Instant::now() + Duration::from_secs(20);
    let dead = loop {
        let output = queuectl(dir.path()).args(["dlq", "list"]).output().unwrap();
        let dead = job_lines(&output.stdout);
        if !dead.is_empty() || Instant::now() > deadline {
            break dead;
        }
        std::thread::sleep(Duration::from_millis(200));
    };

    queuectl(dir.path())
        .args(["worker", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stopped 2 worker(s)"));
    assert!(!dir.path().join("data/workers.pids").exists());

    assert_eq!(dead.len(), 1, "j2 should reach the dead-letter queue");
    assert_eq!(dead[0]["id"], "j2");
    assert_eq!(dead[0]["attempts"], 1);

    queuectl(dir.path())
        .args(["dlq", "retry", "j2"])
        .assert()
        .success();
    let output = queuectl(dir.path())
        .args(["list", "--state", "pending"])
        .output()
        .unwrap();
    let pending = job_lines(&output.stdout);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["id"], "j2");
    assert_eq!(pending[0]["attempts"], 0);
}

#[cfg(unix)]
#[test]
fn foreground_start_reports_pids_before_blocking() {
    use std::io::{BufRead, BufReader};
    use std::process::Stdio;

    let dir = tempfile::tempdir().unwrap();
    let mut parent = isolated(dir.path())
        .args(["worker", "start", "--count", "2"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Held open until the parent exits so its later writes never hit a closed pipe.
    let mut stdout = BufReader::new(parent.stdout.take().unwrap());
    let mut first = String::new();
    stdout.read_line(&mut first).unwrap();
    assert!(
        first.contains("Started 2 worker(s) in the foreground"),
        "unexpected first line: {first:?}"
    );

    let recorded = std::fs::read_to_string(dir.path().join("data/workers.pids")).unwrap();
    let pids: Vec<&str> = recorded.lines().collect();
    assert_eq!(pids.len(), 2);
    for pid in &pids {
        assert!(first.contains(pid));
    }

    queuectl(dir.path())
        .args(["worker", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stopped 2 worker(s)"));

    // Stopped workers drain and exit, which releases the foreground parent.
    let deadline = Instant::now() + Duration::from_secs(20);
    let status = loop {
        if let Some(status) = parent.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            parent.kill().unwrap();
            panic!("foreground pool did not exit after stop");
        }
        std::thread::sleep(Duration::from_millis(100));
    };
    assert!(status.success());
    drop(stdout);
}
