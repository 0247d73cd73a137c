//! Worker process pool and the pid file that tracks it.
//!
//! The pid file is best-effort bookkeeping: one decimal pid per line,
//! appended when workers start and removed on stop. Losing it leaves the
//! workers running with no record of them.

use crate::error::{JobError, Result};
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Durable list of worker pids.
#[derive(Debug, Clone)]
pub struct PidRegistry {
    path: PathBuf,
}

impl PidRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, pids: &[u32]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for pid in pids {
            writeln!(file, "{pid}")?;
        }
        Ok(())
    }

    /// Recorded pids; a missing file reads as empty and unparsable lines are skipped.
    pub fn read(&self) -> Result<Vec<u32>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(contents
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The program (and arguments) a worker process runs.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// The running executable invoked as `<exe> worker run`.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("worker").arg("run"))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        cmd
    }
}

/// Workers returned by [`ProcessRegistry::spawn_pool`].
#[derive(Debug)]
pub struct WorkerPool {
    children: Vec<Child>,
    pids: Vec<u32>,
}

impl WorkerPool {
    pub fn pids(&self) -> &[u32] {
        &self.pids
    }

    /// Wait for every worker to exit, or until Ctrl+C. Workers are never
    /// killed from here; they get the terminal's SIGINT themselves.
    pub async fn wait(mut self) -> Vec<u32> {
        let wait_all =
            futures_util::future::join_all(self.children.iter_mut().map(|child| child.wait()));
        tokio::select! {
            statuses = wait_all => {
                for (pid, status) in self.pids.iter().zip(statuses) {
                    match status {
                        Ok(status) => tracing::info!(pid, %status, "worker exited"),
                        Err(e) => tracing::warn!(pid, error = %e, "failed to wait for worker"),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; workers shut down on their own signal");
            }
        }
        self.pids
    }
}

/// Spawns, records, and signals worker processes.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    pids: PidRegistry,
    worker: WorkerCommand,
    log_file: Option<PathBuf>,
}

impl ProcessRegistry {
    pub fn new(pids: PidRegistry, worker: WorkerCommand) -> Self {
        Self {
            pids,
            worker,
            log_file: None,
        }
    }

    /// Send background workers' stdout/stderr to `path` (appending).
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn pid_registry(&self) -> &PidRegistry {
        &self.pids
    }

    /// Spawn `count` workers and record their pids.
    ///
    /// In background mode this returns right after recording. In foreground
    /// mode it waits for every worker to exit, or until Ctrl+C.
    pub async fn start_pool(&self, count: usize, background: bool) -> Result<Vec<u32>> {
        let pool = self.spawn_pool(count, background)?;
        if background {
            return Ok(pool.pids);
        }
        Ok(pool.wait().await)
    }

    /// Spawn `count` workers and record their pids without waiting on them.
    ///
    /// Background workers write to the log file (if any); foreground workers
    /// share this process's stdout and stderr.
    pub fn spawn_pool(&self, count: usize, background: bool) -> Result<WorkerPool> {
        if count == 0 {
            return Err(JobError::ConfigError(
                "worker count must be greater than 0".to_string(),
            ));
        }

        let mut children = Vec::with_capacity(count);
        let mut pids = Vec::with_capacity(count);
        for _ in 0..count {
            match self.spawn_one(background) {
                Ok((child, pid)) => {
                    children.push(child);
                    pids.push(pid);
                }
                Err(e) => {
                    // Whatever did start must still be stoppable.
                    self.pids.append(&pids)?;
                    return Err(e);
                }
            }
        }
        self.pids.append(&pids)?;
        tracing::info!(?pids, background, "started workers");

        Ok(WorkerPool { children, pids })
    }

    fn spawn_one(&self, background: bool) -> Result<(Child, u32)> {
        let mut cmd = self.worker.to_command();
        if background {
            match &self.log_file {
                Some(path) => {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent)?;
                    }
                    let log = OpenOptions::new().create(true).append(true).open(path)?;
                    cmd.stdout(Stdio::from(log.try_clone()?))
                        .stderr(Stdio::from(log));
                }
                None => {
                    cmd.stdout(Stdio::null()).stderr(Stdio::null());
                }
            }
        }

        let child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| JobError::WorkerError("worker exited before reporting a pid".to_string()))?;
        Ok((child, pid))
    }

    /// Send SIGTERM to every recorded worker and forget them.
    ///
    /// Pids that no longer exist are skipped. Returns the pids that were signaled.
    pub fn stop_pool(&self) -> Result<Vec<u32>> {
        let mut signaled = Vec::new();
        for pid in self.pids.read()? {
            if terminate(pid)? {
                signaled.push(pid);
            }
        }
        self.pids.clear()?;
        tracing::info!(?signaled, "stopped workers");
        Ok(signaled)
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => {
            tracing::warn!(pid, error = %e, "could not signal worker");
            Ok(false)
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> Result<bool> {
    Err(JobError::WorkerError(
        "stopping workers by pid is only supported on unix".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_append_read_clear() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PidRegistry::new(dir.path().join("nested/workers.pids"));

        assert!(registry.read().unwrap().is_empty());
        registry.append(&[10, 11]).unwrap();
        registry.append(&[12]).unwrap();
        assert_eq!(registry.read().unwrap(), vec![10, 11, 12]);

        registry.clear().unwrap();
        assert!(registry.read().unwrap().is_empty());
        registry.clear().unwrap();
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workers.pids");
        std::fs::write(&path, "42\n\nnot-a-pid\n 43 \n").unwrap();
        assert_eq!(PidRegistry::new(path).read().unwrap(), vec![42, 43]);
    }

    #[tokio::test]
    async fn zero_workers_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ProcessRegistry::new(
            PidRegistry::new(dir.path().join("workers.pids")),
            WorkerCommand::new("true"),
        );
        assert!(matches!(
            registry.start_pool(0, true).await,
            Err(JobError::ConfigError(_))
        ));
    }
}
