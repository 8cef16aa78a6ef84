//! Bounded executor
//!
//! Runs one [`Invocation`] as a child process with a cleared environment,
//! POSIX resource limits, a wall clock deadline enforced on the whole process
//! group, and size-capped output capture. A semaphore bounds how many
//! children run at once.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::command::Invocation;
use crate::config::{Config, SandboxConfig};
use crate::types::ExecutionResult;

mod limits;
mod process;

/// Errors that prevent a process from running at all
///
/// A program that runs and fails is not an error; it is an
/// [`ExecutionResult`] with a non-`Ok` status.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("toolchain '{0}' is not available")]
    ToolchainUnavailable(String),

    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("executor is shut down")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecuteError {
    /// Whether the failure means the toolchain binary could not be started
    ///
    /// Only exec failures count. A limit or privilege drop that fails in the
    /// child before exec is an executor fault, not a missing toolchain.
    pub fn is_toolchain_unavailable(&self) -> bool {
        match self {
            ExecuteError::ToolchainUnavailable(_) => true,
            ExecuteError::SpawnFailed { source, .. } => matches!(
                source.raw_os_error(),
                Some(libc::ENOENT | libc::EACCES | libc::ENOEXEC)
            ),
            _ => false,
        }
    }
}

/// Runs invocations under limits, at most `max_concurrent` at a time
#[derive(Debug, Clone)]
pub struct Executor {
    sandbox: SandboxConfig,
    permits: Arc<Semaphore>,
}

impl Executor {
    pub fn new(sandbox: SandboxConfig, max_concurrent: usize) -> Self {
        Self {
            sandbox,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sandbox.clone(), config.max_concurrent)
    }

    /// Number of children that could start right now
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run an invocation to completion
    ///
    /// Never retries. The returned result describes how the process ended,
    /// including timeouts and signals.
    #[instrument(skip_all, fields(program = %invocation.program()))]
    pub async fn run(&self, invocation: &Invocation) -> Result<ExecutionResult, ExecuteError> {
        let env = self.child_env(invocation);
        let search_path = env
            .get("PATH")
            .map_or(self.sandbox.path.as_str(), String::as_str);
        let program = resolve_program(invocation.program(), search_path)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ExecuteError::Closed)?;
        debug!(program = %program.display(), args = ?invocation.get_args(), "spawning");

        process::run(process::SpawnSpec {
            program: &program,
            args: invocation.get_args(),
            env: &env,
            working_dir: invocation.get_working_dir(),
            limits: invocation.get_limits(),
            uid: self.sandbox.run_as_uid,
            gid: self.sandbox.run_as_gid,
        })
        .await
    }

    /// Environment for the child: PATH and HOME, then the invocation's own
    fn child_env(&self, invocation: &Invocation) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_owned(), self.sandbox.path.clone());
        if let Some(dir) = invocation.get_working_dir() {
            env.insert("HOME".to_owned(), dir.display().to_string());
        }
        env.extend(
            invocation
                .get_env()
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        env
    }
}

/// Resolve a program name against a PATH string
///
/// Names containing a `/` are used as-is but must exist. Bare names are
/// searched in `search_path` only; the server's own PATH is never consulted.
pub fn resolve_program(program: &str, search_path: &str) -> Result<PathBuf, ExecuteError> {
    if program.is_empty() {
        return Err(ExecuteError::ToolchainUnavailable(program.to_owned()));
    }

    if program.contains('/') {
        let path = Path::new(program);
        return if is_executable(path) {
            Ok(path.to_path_buf())
        } else {
            Err(ExecuteError::ToolchainUnavailable(program.to_owned()))
        };
    }

    search_path
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| ExecuteError::ToolchainUnavailable(program.to_owned()))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
