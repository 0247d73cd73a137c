//! Command execution behind a narrow interface.
//!
//! The worker loop only sees `(exit code, output)`; how the command runs is
//! up to the [`Executor`] implementation.

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Exit code reported when a command exceeds its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when the command could not be run at all.
pub const INVOCATION_ERROR_EXIT_CODE: i32 = 1;

/// How long to keep reading a timed-out command's pipes after killing it.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Result of running one command. `code == 0` means success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub code: i32,
    pub output: String,
}

impl ExecOutcome {
    pub fn new(code: i32, output: impl Into<String>) -> Self {
        Self {
            code,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs a job's command.
///
/// Implementations never fail: timeouts and invocation errors are folded
/// into a non-zero [`ExecOutcome`].
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> ExecOutcome;
}

/// Runs commands through the platform shell, capturing stdout then stderr.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    fn command(command: &str) -> Command {
        #[cfg(unix)]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            // Own process group, so a timeout can take down the whole pipeline.
            cmd.arg("-c").arg(command).process_group(0);
            cmd
        };
        #[cfg(not(unix))]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    INVOCATION_ERROR_EXIT_CODE
}

/// Read a pipe to EOF on its own task; a read error keeps what arrived before it.
fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                tracing::debug!(error = %e, "command output read failed");
            }
        }
        buf
    })
}

/// Stdout followed by stderr.
async fn collect(stdout: JoinHandle<Vec<u8>>, stderr: JoinHandle<Vec<u8>>) -> String {
    let (out, err) = tokio::join!(stdout, stderr);
    let mut output = String::from_utf8_lossy(&out.unwrap_or_default()).into_owned();
    output.push_str(&String::from_utf8_lossy(&err.unwrap_or_default()));
    output
}

/// SIGKILL the child's process group (unix), then the child itself.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pgid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                tracing::debug!(pgid, error = %e, "could not kill process group");
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "could not kill timed-out command");
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> ExecOutcome {
        let mut child = match Self::command(command).spawn() {
            Ok(child) => child,
            Err(e) => return ExecOutcome::new(INVOCATION_ERROR_EXIT_CODE, e.to_string()),
        };
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(command, timeout_secs = limit.as_secs(), "command timed out");
                    kill_tree(&mut child).await;
                    let mut output = format!("Timeout after {}s\n", limit.as_secs());
                    // A grandchild outside the group may still hold a pipe open.
                    if let Ok(partial) = tokio::time::timeout(DRAIN_GRACE, collect(stdout, stderr)).await {
                        output.push_str(&partial);
                    }
                    return ExecOutcome::new(TIMEOUT_EXIT_CODE, output);
                }
            },
            None => child.wait().await,
        };

        match status {
            Ok(status) => ExecOutcome::new(exit_code(status), collect(stdout, stderr).await),
            Err(e) => ExecOutcome::new(INVOCATION_ERROR_EXIT_CODE, e.to_string()),
        }
    }
}
