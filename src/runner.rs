//! Process runner.
//!
//! Spawns one external process under a deadline, merges its stdout and stderr
//! into a single capture, and kills it (together with its process group) when
//! the deadline expires.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::{StepError, StepFailure};

/// How long to keep reading after a kill, for output still sitting in the pipes.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 8 * 1024;

/// A single wall-clock bound shared by every step of one request.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start the clock now with the given budget.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub const fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// One process invocation.
#[derive(Debug, Clone)]
pub struct Step {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Detach into a new process group so the whole tree can be killed.
    pub new_process_group: bool,
}

/// Runs steps and captures their combined output.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub const fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Run `step` to completion or until `deadline` expires.
    ///
    /// Returns the combined output on success. On failure the error still
    /// carries every byte captured before the failure.
    #[instrument(
        skip(self, step, deadline),
        fields(program = %step.program.display(), args = ?step.args)
    )]
    pub async fn run(&self, step: &Step, deadline: Deadline) -> Result<Vec<u8>, StepError> {
        if deadline.is_expired() {
            debug!("Deadline already expired, not spawning");
            return Err(StepError::new(
                StepFailure::TimedOut(deadline.budget()),
                Vec::new(),
            ));
        }

        let mut cmd = Command::new(&step.program);
        cmd.args(&step.args)
            .current_dir(&step.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if step.new_process_group {
            cmd.process_group(0);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| {
            StepError::new(
                StepFailure::Spawn {
                    program: step.program.display().to_string(),
                    source,
                },
                Vec::new(),
            )
        })?;

        // With process_group(0) the child's pid is also its group id
        let group = if step.new_process_group {
            child.id().and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw)
        } else {
            None
        };
        // kill_on_drop only reaches the leader; this covers the rest of the
        // group if the future is dropped mid-run.
        let mut guard = GroupGuard::new(group);

        let mut capture = Capture::new(self.max_output_bytes);
        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            terminate(&mut child, group).await;
            guard.disarm();
            return Err(StepError::new(
                StepFailure::Io(std::io::Error::other("output pipes not captured")),
                Vec::new(),
            ));
        };

        let finished = tokio::time::timeout_at(deadline.at, async {
            let (status, read) = tokio::join!(
                async {
                    let status = child.wait().await;
                    // Descendants left behind by the leader would keep the
                    // pipes open and outlive the request.
                    if let Some(pgid) = group {
                        signal_group(pgid);
                    }
                    status
                },
                capture.drain(&mut stdout, &mut stderr),
            );
            read.and(status)
        })
        .await;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match finished {
            Ok(Ok(status)) => {
                guard.disarm();
                debug!(%status, elapsed_ms, "Process exited");
                let output = capture.finish();
                if status.success() {
                    Ok(output)
                } else {
                    Err(StepError::new(StepFailure::Exited(status), output))
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed while collecting process output");
                terminate(&mut child, group).await;
                guard.disarm();
                Err(StepError::new(StepFailure::Io(e), capture.finish()))
            }
            Err(_) => {
                warn!(
                    budget_secs = deadline.budget().as_secs_f64(),
                    elapsed_ms, "Deadline expired, killing process"
                );
                terminate(&mut child, group).await;
                guard.disarm();
                let _ =
                    tokio::time::timeout(DRAIN_GRACE, capture.drain(&mut stdout, &mut stderr))
                        .await;
                Err(StepError::new(
                    StepFailure::TimedOut(deadline.budget()),
                    capture.finish(),
                ))
            }
        }
    }
}

/// Kill the child (and its group, if any) and reap it.
async fn terminate(child: &mut Child, group: Option<Pid>) {
    if let Some(pgid) = group {
        signal_group(pgid);
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Child already gone");
    }
}

/// SIGKILL every process in the group. A group with no members left is fine.
fn signal_group(pgid: Pid) {
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => debug!(pgid = pgid.as_raw(), "Killed process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "Failed to kill process group"),
    }
}

/// Kills a process group on drop unless disarmed.
#[derive(Debug)]
struct GroupGuard {
    pgid: Option<Pid>,
}

impl GroupGuard {
    const fn new(pgid: Option<Pid>) -> Self {
        Self { pgid }
    }

    /// Call once the group has already been signalled.
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!(pgid = pgid.as_raw(), "Run dropped before completion");
            signal_group(pgid);
        }
    }
}

/// Combined stdout/stderr capture with an upper bound on retained bytes.
#[derive(Debug)]
struct Capture {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl Capture {
    const fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.buf.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    /// Read both streams until EOF, appending chunks in arrival order.
    ///
    /// Bytes past the limit are read and discarded so the child never blocks
    /// on a full pipe.
    async fn drain<O, E>(&mut self, stdout: &mut O, stderr: &mut E) -> std::io::Result<()>
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let mut out_buf = [0u8; READ_CHUNK];
        let mut err_buf = [0u8; READ_CHUNK];
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            tokio::select! {
                n = stdout.read(&mut out_buf), if out_open => {
                    let n = n?;
                    if n == 0 {
                        out_open = false;
                    } else {
                        self.push(&out_buf[..n]);
                    }
                }
                n = stderr.read(&mut err_buf), if err_open => {
                    let n = n?;
                    if n == 0 {
                        err_open = false;
                    } else {
                        self.push(&err_buf[..n]);
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Vec<u8> {
        if self.truncated {
            let marker = format!("\n[output truncated at {} bytes]\n", self.limit);
            self.buf.extend_from_slice(marker.as_bytes());
        }
        self.buf
    }
}
