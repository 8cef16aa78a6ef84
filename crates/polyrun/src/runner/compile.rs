//! Compilation step
//!
//! Runs the compile invocation inside the request's remaining time budget
//! and collects the compiler's diagnostics.

use std::time::Duration;

use tracing::{debug, instrument};

use crate::command::Invocation;
use crate::executor::{ExecuteError, Executor};
use crate::runner::execute::budget_exhausted;
use crate::types::{ExecutionResult, ExecutionStatus};

/// Result of a compilation
#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Whether compilation succeeded
    pub success: bool,

    /// Execution result from the compilation process
    pub execution: ExecutionResult,

    /// Compiler output (stdout, then stderr)
    pub output: String,
}

impl CompileResult {
    fn from_execution(execution: ExecutionResult) -> Self {
        let stdout = execution.stdout_lossy();
        let stderr = execution.stderr_lossy();
        let mut output = stdout;
        if !output.is_empty() && !stderr.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stderr);

        Self {
            success: execution.is_success(),
            execution,
            output,
        }
    }

    /// Check if compilation was successful
    pub fn is_success(&self) -> bool {
        self.success && self.execution.exit_code == Some(0)
    }

    /// Whether the compiler ran out of time
    pub fn timed_out(&self) -> bool {
        self.execution.status == ExecutionStatus::TimedOut
    }

    /// Text reported to the client when compilation failed
    ///
    /// The compiler's own output when there is any, otherwise a description
    /// of how the compiler ended.
    pub fn error_message(&self) -> String {
        if !self.output.trim().is_empty() {
            return self.output.clone();
        }
        match (self.execution.status, self.execution.exit_code, self.execution.signal) {
            (ExecutionStatus::TimedOut, _, _) => "compilation timed out".to_owned(),
            (_, Some(code), _) => format!("compilation failed with exit code {code}"),
            (_, None, Some(signal)) => format!("compiler killed by signal {signal}"),
            _ => "compilation failed".to_owned(),
        }
    }
}

/// Compile with at most `remaining` wall time
#[instrument(skip_all, fields(program = %invocation.program()))]
pub(crate) async fn compile(
    executor: &Executor,
    mut invocation: Invocation,
    remaining: Duration,
) -> Result<CompileResult, ExecuteError> {
    if remaining.is_zero() {
        return Ok(CompileResult::from_execution(budget_exhausted()));
    }

    let capped = invocation.get_limits().clone().capped_wall_time(remaining);
    *invocation.limits_mut() = capped;

    let result = CompileResult::from_execution(executor.run(&invocation).await?);
    debug!(
        success = result.success,
        exit_code = ?result.execution.exit_code,
        status = ?result.execution.status,
        "compilation complete"
    );
    Ok(result)
}
