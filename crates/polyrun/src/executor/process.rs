//! Process spawning and output capture
//!
//! Runs one program in its own process group, enforces the wall clock
//! deadline by killing the group, and reads stdout/stderr up to a cap.

use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::executor::ExecuteError;
use crate::executor::limits::Rlimits;
use crate::types::{ExecutionResult, ExecutionStatus, LimitExceeded, ResourceLimits};

/// How long to keep draining pipes after the process group is gone
const READ_GRACE: Duration = Duration::from_secs(2);

/// Read buffer size
const CHUNK: usize = 8192;

/// Everything needed to spawn one child
#[derive(Debug)]
pub(crate) struct SpawnSpec<'a> {
    pub program: &'a Path,
    pub args: &'a [String],
    pub env: &'a BTreeMap<String, String>,
    pub working_dir: Option<&'a Path>,
    pub limits: &'a ResourceLimits,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Kills a whole process group on request or when dropped
///
/// Dropping the guard while armed (the run future was cancelled) kills the
/// group, so background children never outlive the request.
#[derive(Debug)]
struct ProcessGroup {
    pgid: libc::pid_t,
    armed: bool,
}

impl ProcessGroup {
    fn new(pid: u32) -> Option<Self> {
        let pgid = libc::pid_t::try_from(pid).ok()?;
        Some(Self { pgid, armed: true })
    }

    fn kill(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        // SAFETY: killpg has no memory-safety preconditions. ESRCH (group
        // already gone) is expected after a clean exit.
        let rc = unsafe { libc::killpg(self.pgid, libc::SIGKILL) };
        if rc == 0 {
            debug!(pgid = self.pgid, "killed process group");
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Spawn the program and wait for it under the configured limits
pub(crate) async fn run(spec: SpawnSpec<'_>) -> Result<ExecutionResult, ExecuteError> {
    let limits = spec.limits;
    let rlimits = Rlimits::from_limits(limits);

    let mut cmd = Command::new(spec.program);
    cmd.args(spec.args)
        .env_clear()
        .envs(spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    if let Some(dir) = spec.working_dir {
        cmd.current_dir(dir);
    }
    if let Some(gid) = spec.gid {
        cmd.gid(gid);
    }
    if let Some(uid) = spec.uid {
        cmd.uid(uid);
    }
    // SAFETY: the hook only calls setrlimit on values copied into the closure
    unsafe {
        cmd.pre_exec(move || rlimits.apply());
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ExecuteError::SpawnFailed {
        program: spec.program.display().to_string(),
        source,
    })?;
    let mut group = child.id().and_then(ProcessGroup::new);

    let cap = limits
        .max_output
        .map_or(usize::MAX, |bytes| usize::try_from(bytes).unwrap_or(usize::MAX));
    let stdout_task = child.stdout.take().map(|out| tokio::spawn(read_capped(out, cap)));
    let stderr_task = child.stderr.take().map(|err| tokio::spawn(read_capped(err, cap)));

    let (status, timed_out) = match limits.wall_time() {
        Some(deadline) => match tokio::time::timeout(deadline, child.wait()).await {
            Ok(status) => (status?, false),
            Err(_) => {
                debug!(?deadline, "wall time limit reached");
                if let Some(ref mut group) = group {
                    group.kill();
                }
                let _ = child.start_kill();
                (child.wait().await?, true)
            }
        },
        None => (child.wait().await?, false),
    };
    let wall_time = start.elapsed();

    // Reap stragglers the program left in its group so they release the pipes
    if let Some(ref mut group) = group {
        group.kill();
    }

    let (stdout, stdout_truncated) = collect(stdout_task).await;
    let (stderr, stderr_truncated) = collect(stderr_task).await;

    let mut result = classify(status, timed_out, limits.memory_limit.is_some());
    result.wall_time = wall_time;
    result.stdout = stdout;
    result.stderr = stderr;
    result.stdout_truncated = stdout_truncated;
    result.stderr_truncated = stderr_truncated;
    if result.is_truncated() && !result.limit_exceeded.is_exceeded() {
        result.limit_exceeded = LimitExceeded::Output;
    }

    debug!(
        status = ?result.status,
        exit_code = ?result.exit_code,
        signal = ?result.signal,
        wall_ms = wall_time.as_millis() as u64,
        "process finished"
    );
    Ok(result)
}

/// Map an exit status to the execution result skeleton
fn classify(status: ExitStatus, timed_out: bool, memory_limited: bool) -> ExecutionResult {
    if timed_out {
        return ExecutionResult {
            status: ExecutionStatus::TimedOut,
            limit_exceeded: LimitExceeded::WallTime,
            signal: status.signal(),
            exit_code: status.code(),
            ..Default::default()
        };
    }

    match (status.code(), status.signal()) {
        (Some(0), _) => ExecutionResult {
            status: ExecutionStatus::Ok,
            exit_code: Some(0),
            ..Default::default()
        },
        (Some(code), _) => ExecutionResult {
            status: ExecutionStatus::RuntimeError,
            exit_code: Some(code),
            ..Default::default()
        },
        (None, Some(signal)) => ExecutionResult {
            status: ExecutionStatus::Signaled,
            limit_exceeded: LimitExceeded::from_signal(signal, memory_limited),
            signal: Some(signal),
            ..Default::default()
        },
        (None, None) => ExecutionResult {
            status: ExecutionStatus::RuntimeError,
            ..Default::default()
        },
    }
}

/// Read a stream to the end, keeping at most `cap` bytes
///
/// The rest is drained and discarded so the writer never blocks on a full pipe.
pub(crate) async fn read_capped<R>(mut reader: R, cap: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(cap.min(CHUNK));
    let mut chunk = [0u8; CHUNK];
    let mut truncated = false;

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "output stream read failed");
                break;
            }
        };
        if truncated {
            continue;
        }
        let remaining = cap.saturating_sub(buf.len());
        if n <= remaining {
            buf.extend_from_slice(&chunk[..n]);
        } else {
            buf.extend_from_slice(&chunk[..remaining]);
            truncated = true;
        }
    }

    (buf, truncated)
}

async fn collect(task: Option<JoinHandle<(Vec<u8>, bool)>>) -> (Vec<u8>, bool) {
    let Some(mut task) = task else {
        return (Vec::new(), false);
    };
    match tokio::time::timeout(READ_GRACE, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(error = %e, "output reader task failed");
            (Vec::new(), false)
        }
        Err(_) => {
            // A descendant escaped the process group and still holds the pipe
            warn!("output pipe still open after process exit, abandoning reader");
            task.abort();
            (Vec::new(), true)
        }
    }
}
