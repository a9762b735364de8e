//! Extraction supervisor: one child process per run.
//!
//! The engine is an opaque executable that takes the staged file path as its
//! last argument. Both output pipes are drained on their own tasks for the
//! whole life of the child, so a chatty engine cannot fill a pipe buffer and
//! stall. The wait is bounded by the caller's deadline; on expiry the child
//! is killed and reaped before the outcome is returned.
//!
//! Nothing here is shared between runs: concurrent calls each own their
//! child, their buffers and their timers.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::PipelineError;

/// Exit code reported for a run killed at its deadline (same as coreutils `timeout`).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when the child ended without one (killed by a signal).
pub const SIGNALED_EXIT_CODE: i32 = -1;

/// Upper bound on pipe draining after the child has exited.
///
/// A grandchild that inherited the pipes can keep them open indefinitely;
/// such a stream is cut off and reported as far as it was read.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on reaping a child after it was sent SIGKILL.
const REAP_GRACE: Duration = Duration::from_secs(5);

/// What the engine did during one run. Engine misbehaviour is data here,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Deadline the run was held to.
    #[serde(skip)]
    pub deadline: Duration,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ExtractionOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// How to launch the extraction engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before the input path (e.g. an interpreter's script).
    pub leading_args: Vec<String>,
}

impl EngineCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn program_label(&self) -> String {
        self.program.display().to_string()
    }
}

/// Spawns and supervises the external extraction engine.
#[derive(Debug, Clone)]
pub struct ExtractionSupervisor {
    engine: EngineCommand,
}

impl ExtractionSupervisor {
    pub fn new(engine: EngineCommand) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &EngineCommand {
        &self.engine
    }

    /// Run the engine once against `path`, waiting at most `deadline`.
    ///
    /// Only a failure to start the engine is an error; a non-zero exit or a
    /// timeout is reported through the returned outcome.
    pub async fn run(&self, path: &Path, deadline: Duration) -> Result<ExtractionOutcome, PipelineError> {
        let started = Instant::now();

        let mut command = Command::new(&self.engine.program);
        command
            .args(&self.engine.leading_args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::ExecutableNotFound {
                    program: self.engine.program_label(),
                }
            } else {
                PipelineError::Spawn {
                    program: self.engine.program_label(),
                    source: e,
                }
            }
        })?;

        let pid = child.id();
        tracing::debug!(pid, program = %self.engine.program_label(), input = %path.display(), "Extraction engine started");

        let stdout_task = child.stdout.take().map(drain);
        let stderr_task = child.stderr.take().map(drain);

        let (exit_code, timed_out) = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => (status.code().unwrap_or(SIGNALED_EXIT_CODE), false),
            Ok(Err(e)) => {
                tracing::warn!(pid, "Waiting on extraction engine failed: {e}");
                (SIGNALED_EXIT_CODE, false)
            }
            Err(_) => {
                tracing::warn!(pid, ?deadline, "Extraction engine exceeded deadline, killing");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(pid, "Failed to signal extraction engine: {e}");
                }
                match tokio::time::timeout(REAP_GRACE, child.wait()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(pid, "Reaping killed engine failed: {e}"),
                    Err(_) => tracing::error!(pid, "Killed engine did not exit within grace period"),
                }
                (TIMEOUT_EXIT_CODE, true)
            }
        };

        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;
        let elapsed = started.elapsed();

        tracing::debug!(
            pid,
            exit_code,
            timed_out,
            elapsed_ms = elapsed.as_millis() as u64,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Extraction engine finished"
        );

        Ok(ExtractionOutcome {
            exit_code,
            stdout,
            stderr,
            timed_out,
            deadline,
            elapsed,
        })
    }
}

/// A pipe being read on its own task into a buffer shared with the caller.
struct PipeDrain {
    task: JoinHandle<()>,
    buf: Arc<Mutex<Vec<u8>>>,
}

impl PipeDrain {
    /// Bytes captured so far.
    fn captured(&self) -> String {
        match self.buf.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

/// Read a pipe to EOF on its own task, appending each chunk as it arrives.
fn drain<R>(mut pipe: R) -> PipeDrain
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = buf.clone();
    let task = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => match sink.lock() {
                    Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                    Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                },
                Err(e) => {
                    tracing::debug!("Engine pipe read ended early: {e}");
                    break;
                }
            }
        }
    });
    PipeDrain { task, buf }
}

/// Wait (bounded) for a drain task and decode what it captured.
///
/// A pipe still held open by a grandchild after the grace period yields
/// whatever was read before the cutoff.
async fn collect(drain: Option<PipeDrain>) -> String {
    let Some(mut drain) = drain else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut drain.task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Engine pipe reader failed: {e}"),
        Err(_) => {
            drain.task.abort();
            tracing::warn!("Engine pipe still open after exit, output truncated");
        }
    }
    drain.captured()
}
