//! Execution step
//!
//! Runs the program inside the request's remaining time budget and turns the
//! process result into the failure reported to the client.

use std::time::Duration;

use tracing::{debug, instrument};

use crate::command::Invocation;
use crate::executor::{ExecuteError, Executor};
use crate::runner::FailureKind;
use crate::types::{ExecutionResult, ExecutionStatus, LimitExceeded, ResourceLimits};

/// Execute with at most `remaining` wall time, after applying caller overrides
#[instrument(skip_all, fields(program = %invocation.program()))]
pub(crate) async fn execute(
    executor: &Executor,
    mut invocation: Invocation,
    remaining: Duration,
    overrides: Option<&ResourceLimits>,
) -> Result<ExecutionResult, ExecuteError> {
    if remaining.is_zero() {
        debug!("request budget exhausted before run");
        return Ok(budget_exhausted());
    }

    let mut limits = invocation.get_limits().clone();
    if let Some(overrides) = overrides {
        limits = limits.with_overrides(overrides);
    }
    *invocation.limits_mut() = limits.capped_wall_time(remaining);

    let result = executor.run(&invocation).await?;
    debug!(
        status = ?result.status,
        exit_code = ?result.exit_code,
        limit = ?result.limit_exceeded,
        wall_ms = result.wall_time.as_millis() as u64,
        "execution complete"
    );
    Ok(result)
}

/// Result standing in for a step that had no time left to start
pub(crate) fn budget_exhausted() -> ExecutionResult {
    ExecutionResult {
        status: ExecutionStatus::TimedOut,
        limit_exceeded: LimitExceeded::WallTime,
        ..Default::default()
    }
}

/// Classify a finished run; `None` when it succeeded
pub(crate) fn run_failure(result: &ExecutionResult) -> Option<(FailureKind, String)> {
    if result.is_success() {
        return None;
    }
    if result.status == ExecutionStatus::TimedOut {
        return Some((FailureKind::TimedOut, "execution timed out".to_owned()));
    }

    let stderr = result.stderr_lossy();
    let message = if !stderr.trim().is_empty() {
        stderr
    } else {
        match (result.exit_code, result.signal, result.limit_exceeded) {
            (_, _, LimitExceeded::Time) => "CPU time limit exceeded".to_owned(),
            (_, _, LimitExceeded::Memory) => "memory limit exceeded".to_owned(),
            (Some(code), _, _) => format!("process exited with code {code}"),
            (None, Some(signal), _) => format!("process killed by signal {signal}"),
            _ => "process failed".to_owned(),
        }
    };
    Some((FailureKind::RuntimeFailure, message))
}
