//! Bounded command executor
//!
//! Runs one filter tool invocation and races it against a wall-clock
//! timeout. If the timer wins the child is SIGKILLed and reaped, and the
//! outcome is reported as timed out. Output is captured for diagnostics only;
//! decisions are made on the exit code alone.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::FilterCommand;
use crate::error::FirewallError;

/// Result of one bounded external invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub succeeded: bool,
    pub timed_out: bool,
    /// -1 when the process was terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutcome {
    pub fn exited(exit_code: i32, stdout: String, stderr: String, elapsed: Duration) -> Self {
        Self {
            succeeded: exit_code == 0,
            timed_out: false,
            exit_code,
            stdout,
            stderr,
            elapsed,
        }
    }

    pub fn timed_out(elapsed: Duration) -> Self {
        Self {
            succeeded: false,
            timed_out: true,
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            elapsed,
        }
    }
}

/// Seam between rule logic and process execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Bound applied to each invocation.
    fn timeout(&self) -> Duration;

    /// Run to completion or until the bound expires. Only failure to start
    /// the process is an `Err`; non-zero exits and timeouts are outcomes.
    async fn run(&self, command: &FilterCommand) -> Result<CommandOutcome, FirewallError>;
}

/// Executes commands with a hard timeout
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    timeout: Duration,
}

impl BoundedExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

#[async_trait]
impl CommandRunner for BoundedExecutor {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, command: &FilterCommand) -> Result<CommandOutcome, FirewallError> {
        debug!(command = %command, timeout = ?self.timeout, "Spawning filter command");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // An abandoned run (interrupted caller) must not leave the tool behind
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FirewallError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().map(|pipe| tokio::spawn(drain(pipe)));
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(drain(pipe)));

        let running = RunningCommand {
            child,
            stdout,
            stderr,
            started: Instant::now(),
        };
        running.wait_or_terminate(self.timeout).await
    }
}

/// A spawned child plus its output readers. Owned by the executor for the
/// duration of one run and handed to the termination path on timeout.
struct RunningCommand {
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    started: Instant,
}

impl RunningCommand {
    /// The bound covers the exit and the drain of both pipes. A helper process
    /// that inherits stdout or stderr can keep the pipes open after the tool
    /// itself has exited.
    async fn wait_or_terminate(mut self, limit: Duration) -> Result<CommandOutcome, FirewallError> {
        let finished = tokio::time::timeout(limit, self.finish()).await;
        match finished {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(timeout = ?limit, "Command timed out, killing process");
                let elapsed = self.terminate().await;
                Ok(CommandOutcome::timed_out(elapsed))
            }
        }
    }

    async fn finish(&mut self) -> Result<CommandOutcome, FirewallError> {
        let status = self.child.wait().await?;
        let stdout = collect(self.stdout.as_mut()).await;
        let stderr = collect(self.stderr.as_mut()).await;
        Ok(CommandOutcome::exited(
            status.code().unwrap_or(-1),
            stdout,
            stderr,
            self.started.elapsed(),
        ))
    }

    async fn terminate(mut self) -> Duration {
        for reader in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            reader.abort();
        }

        if let Some(pid) = self.child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            match nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL) {
                Ok(()) => {}
                Err(nix::errno::Errno::ESRCH) => {} // exited in the meantime
                Err(e) => {
                    warn!("Failed to SIGKILL pid {pid}: {e}");
                    if let Err(e) = self.child.start_kill() {
                        warn!("Failed to kill pid {pid}: {e}");
                    }
                }
            }
        }

        if let Err(e) = self.child.wait().await {
            warn!("Failed to reap killed command: {e}");
        }
        self.started.elapsed()
    }
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    buf
}

async fn collect(reader: Option<&mut JoinHandle<Vec<u8>>>) -> String {
    match reader {
        Some(handle) => String::from_utf8_lossy(&handle.await.unwrap_or_default())
            .trim_end()
            .to_string(),
        None => String::new(),
    }
}
