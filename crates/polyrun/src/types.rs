use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds (RLIMIT_CPU)
    #[serde(default)]
    pub time_limit: Option<f64>,

    /// Wall clock time limit in seconds, enforced by killing the process group
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Address space limit in kilobytes (RLIMIT_AS)
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Data segment limit in kilobytes (RLIMIT_DATA)
    ///
    /// Counts private writable mappings rather than reserved address space,
    /// so it bounds runtimes that reserve large heaps up front.
    #[serde(default)]
    pub data_limit: Option<u64>,

    /// Stack size limit in kilobytes
    #[serde(default)]
    pub stack_limit: Option<u64>,

    /// Maximum number of processes/threads for the sandbox user (RLIMIT_NPROC)
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum captured bytes per output stream
    #[serde(default)]
    pub max_output: Option<u64>,

    /// Maximum size of any file the process writes, in kilobytes (RLIMIT_FSIZE)
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Maximum open files
    #[serde(default)]
    pub max_open_files: Option<u32>,
}

impl ResourceLimits {
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;

    /// Create new resource limits populated with the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits with every field unset, useful as an override base
    pub fn unset() -> Self {
        Self {
            time_limit: None,
            wall_time_limit: None,
            memory_limit: None,
            data_limit: None,
            stack_limit: None,
            max_processes: None,
            max_output: None,
            max_file_size: None,
            max_open_files: None,
        }
    }

    /// Set the CPU time limit in seconds
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the memory limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the data segment limit in kilobytes
    pub fn with_data_limit(mut self, kb: u64) -> Self {
        self.data_limit = Some(kb);
        self
    }

    /// Set the stack size limit in kilobytes
    pub fn with_stack_limit(mut self, kb: u64) -> Self {
        self.stack_limit = Some(kb);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the maximum captured output per stream in bytes
    pub fn with_max_output(mut self, bytes: u64) -> Self {
        self.max_output = Some(bytes);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            time_limit: overrides.time_limit.or(self.time_limit),
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            data_limit: overrides.data_limit.or(self.data_limit),
            stack_limit: overrides.stack_limit.or(self.stack_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_output: overrides.max_output.or(self.max_output),
            max_file_size: overrides.max_file_size.or(self.max_file_size),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
        }
    }

    /// Clamp the wall time limit so it never exceeds `budget`
    pub fn capped_wall_time(mut self, budget: Duration) -> Self {
        let budget = budget.as_secs_f64();
        self.wall_time_limit = Some(match self.wall_time_limit {
            Some(limit) => limit.min(budget),
            None => budget,
        });
        self
    }

    /// Wall time limit as a duration, if set and positive
    pub fn wall_time(&self) -> Option<Duration> {
        self.wall_time_limit
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: Some(5.0),
            wall_time_limit: Some(10.0),
            memory_limit: None,
            data_limit: None,
            stack_limit: Some(64 * Self::MB),
            max_processes: None,
            max_output: Some(1024 * 1024), // 1 MiB per stream
            max_file_size: Some(16 * Self::MB),
            max_open_files: Some(64),
        }
    }
}

/// Result of one bounded process execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// How the process ended
    pub status: ExecutionStatus,

    /// Secondary status indicating which limit was exceeded (if any)
    pub limit_exceeded: LimitExceeded,

    /// Wall clock time used
    pub wall_time: Duration,

    /// Exit code if the program exited normally
    pub exit_code: Option<i32>,

    /// Signal number if the program was killed by a signal
    pub signal: Option<i32>,

    /// Captured standard output, capped at the output limit
    pub stdout: Vec<u8>,

    /// Captured standard error, capped at the output limit
    pub stderr: Vec<u8>,

    /// Whether stdout was cut at the output limit
    pub stdout_truncated: bool,

    /// Whether stderr was cut at the output limit
    pub stderr_truncated: bool,
}

impl ExecutionResult {
    /// Check if the execution was successful (exited with code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Ok) && self.exit_code == Some(0)
    }

    /// Whether either stream was truncated
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }

    /// Captured stdout as (lossy) UTF-8
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Captured stderr as (lossy) UTF-8
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            status: ExecutionStatus::Ok,
            limit_exceeded: LimitExceeded::NotExceeded,
            wall_time: Duration::ZERO,
            exit_code: None,
            signal: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: false,
            stderr_truncated: false,
        }
    }
}

/// Terminal state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Program exited with code 0
    Ok,

    /// Program exited with a non-zero code
    RuntimeError,

    /// Wall clock limit hit; the process group was killed
    TimedOut,

    /// Program was killed by a signal it did not receive from our timer
    Signaled,
}

/// Secondary status indicating which resource limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LimitExceeded {
    /// No limit was exceeded
    #[default]
    #[serde(rename = "none")]
    NotExceeded,

    /// CPU time limit exceeded (SIGXCPU)
    #[serde(rename = "time")]
    Time,

    /// Wall clock time limit exceeded
    #[serde(rename = "wall_time")]
    WallTime,

    /// Memory limit exceeded
    #[serde(rename = "memory")]
    Memory,

    /// Output or file size limit exceeded
    #[serde(rename = "output")]
    Output,
}

impl LimitExceeded {
    /// Infer which limit a terminating signal corresponds to
    ///
    /// `memory_limited` tells whether an address-space limit was in effect;
    /// allocation failures under RLIMIT_AS usually surface as SIGSEGV or SIGABRT.
    pub fn from_signal(signal: i32, memory_limited: bool) -> Self {
        match signal {
            libc::SIGXCPU => LimitExceeded::Time,
            libc::SIGXFSZ => LimitExceeded::Output,
            libc::SIGSEGV | libc::SIGABRT | libc::SIGBUS if memory_limited => {
                LimitExceeded::Memory
            }
            _ => LimitExceeded::NotExceeded,
        }
    }

    /// Check if any limit was exceeded
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        !matches!(self, LimitExceeded::NotExceeded)
    }
}
