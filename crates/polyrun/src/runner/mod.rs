//! Execution orchestrator
//!
//! Drives one submission through its lifecycle:
//! `Received → Validated → Staged → Built → Executed → Cleaned → Responded`.
//! The artifact is released on every path out of `Staged`, including errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

pub use crate::runner::compile::CompileResult;

mod compile;
mod execute;

use crate::artifact::{Artifact, ArtifactError, ArtifactStore};
use crate::command::{self, BuildError};
use crate::config::{Config, LanguageProfile};
use crate::executor::{ExecuteError, Executor};
use crate::install::Installer;
use crate::registry::{LanguageRegistry, RegistryError};
use crate::types::{ExecutionResult, ResourceLimits};

/// Errors that reject a request before or outside of execution
///
/// A program that fails to compile, crashes or times out is not an error; it
/// is a [`RunOutcome`] with `success == false`.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("invalid dependency name '{0}'")]
    InvalidDependencyName(String),

    #[error("dependency '{0}' must name a version, e.g. {0}@latest")]
    MissingVersion(String),

    #[error("{0}")]
    UnsupportedOperation(String),

    #[error("failed to build command: {0}")]
    Build(#[from] BuildError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("execution error: {0}")]
    Execute(#[from] ExecuteError),
}

impl RequestError {
    /// Whether the client is at fault (maps to 400 at the HTTP boundary)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RequestError::InvalidRequest(_)
                | RequestError::UnsupportedLanguage(_)
                | RequestError::InvalidDependencyName(_)
                | RequestError::MissingVersion(_)
                | RequestError::UnsupportedOperation(_)
        )
    }
}

impl From<RegistryError> for RequestError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnsupportedLanguage(id) => RequestError::UnsupportedLanguage(id),
        }
    }
}

/// Why a submission did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The compiler rejected the source
    CompileError,
    /// The program exited non-zero or was killed by a signal
    RuntimeFailure,
    /// The request's wall clock budget ran out
    TimedOut,
    /// The toolchain binary is not installed or could not be started
    ToolchainUnavailable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::CompileError => "compile_error",
            FailureKind::RuntimeFailure => "runtime_failure",
            FailureKind::TimedOut => "timed_out",
            FailureKind::ToolchainUnavailable => "toolchain_unavailable",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle states of one request, traced at debug level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Validated,
    Staged,
    Built,
    Executed,
    Cleaned,
    Responded,
}

/// One code submission
#[derive(Debug, Clone, Default)]
pub struct SubmissionRequest {
    /// Language identifier as sent by the client
    pub language: Option<String>,
    /// Uploaded source bytes
    pub source: Vec<u8>,
    /// Client-supplied file name (only an extension hint is kept)
    pub file_name: Option<String>,
}

impl SubmissionRequest {
    pub fn new(language: impl Into<String>, source: impl Into<Vec<u8>>) -> Self {
        Self {
            language: Some(language.into()),
            source: source.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// Outcome of a submission that was accepted and executed
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Request identifier (names the scratch directory)
    pub id: Uuid,
    /// Resolved language identifier
    pub language: String,
    /// Whether every step succeeded
    pub success: bool,
    /// Program stdout (compiler output for compile-only requests)
    pub output: String,
    /// Error text: compiler diagnostics, program stderr or a status message
    pub error: Option<String>,
    /// Why the request failed
    pub failure: Option<FailureKind>,
    /// Whether any captured stream was cut at the output limit
    pub truncated: bool,
    /// Compile step result, for compiled languages
    pub compile: Option<CompileResult>,
    /// Run step result, if the program ran
    pub run: Option<ExecutionResult>,
}

impl RunOutcome {
    fn new(id: Uuid, language: &str) -> Self {
        Self {
            id,
            language: language.to_owned(),
            success: false,
            output: String::new(),
            error: None,
            failure: None,
            truncated: false,
            compile: None,
            run: None,
        }
    }

    fn fail(mut self, kind: FailureKind, message: impl Into<String>) -> Self {
        self.success = false;
        self.failure = Some(kind);
        self.error = Some(message.into());
        self
    }
}

/// What to do with a staged submission
#[derive(Debug, Clone, Copy)]
enum Mode<'a> {
    CompileOnly,
    CompileAndRun { overrides: Option<&'a ResourceLimits> },
}

/// Wall clock budget shared by every step of one request
#[derive(Debug, Clone, Copy)]
struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    fn start(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }
}

/// High-level runner for code submissions
#[derive(Debug, Clone)]
pub struct Runner {
    config: Arc<Config>,
    registry: Arc<LanguageRegistry>,
    store: ArtifactStore,
    executor: Executor,
}

impl Runner {
    /// Create a new runner with the given configuration
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(LanguageRegistry::from_config(&config));
        let store = ArtifactStore::new(&config.staging_dir)
            .with_owner(config.sandbox.run_as_uid, config.sandbox.run_as_gid);
        let executor = Executor::from_config(&config);
        Self {
            config: Arc::new(config),
            registry,
            store,
            executor,
        }
    }

    /// Create a new runner with default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Installer sharing this runner's registry, staging root and concurrency limit
    pub fn installer(&self) -> Installer {
        Installer::new(
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            self.store.clone(),
            self.executor.clone(),
        )
    }

    /// Compile (if needed) and run a submission within the request budget
    #[instrument(skip_all, fields(language = request.language.as_deref().unwrap_or("")))]
    pub async fn compile_and_run(
        &self,
        request: SubmissionRequest,
    ) -> Result<RunOutcome, RequestError> {
        self.submit(
            request,
            Mode::CompileAndRun { overrides: None },
            self.config.request_budget(),
        )
        .await
    }

    /// Compile a submission without running it
    ///
    /// Interpreted languages succeed immediately with empty output.
    #[instrument(skip_all, fields(language = request.language.as_deref().unwrap_or("")))]
    pub async fn compile(&self, request: SubmissionRequest) -> Result<RunOutcome, RequestError> {
        self.submit(request, Mode::CompileOnly, self.config.request_budget())
            .await
    }

    /// Compile if needed and run with caller limit overrides
    ///
    /// A wall time in `overrides` replaces the configured request budget.
    #[instrument(skip_all, fields(language = request.language.as_deref().unwrap_or("")))]
    pub async fn run_source(
        &self,
        request: SubmissionRequest,
        overrides: Option<&ResourceLimits>,
    ) -> Result<RunOutcome, RequestError> {
        let budget = overrides
            .and_then(ResourceLimits::wall_time)
            .unwrap_or_else(|| self.config.request_budget());
        self.submit(request, Mode::CompileAndRun { overrides }, budget)
            .await
    }

    async fn submit(
        &self,
        request: SubmissionRequest,
        mode: Mode<'_>,
        budget: Duration,
    ) -> Result<RunOutcome, RequestError> {
        let deadline = Deadline::start(budget);
        debug!(state = ?RequestState::Received, bytes = request.source.len());

        let (language, profile) = self.validate(&request)?;
        debug!(state = ?RequestState::Validated, %language);

        let mut artifact = self
            .store
            .stage(&request.source, request.file_name.as_deref())
            .await?;
        debug!(state = ?RequestState::Staged, id = %artifact.id());

        let outcome = self
            .process(&language, profile, &mut artifact, mode, deadline)
            .await;

        artifact.release().await;
        debug!(state = ?RequestState::Cleaned);

        let outcome = outcome?;
        debug!(
            state = ?RequestState::Responded,
            success = outcome.success,
            failure = ?outcome.failure,
        );
        Ok(outcome)
    }

    fn validate<'a>(
        &'a self,
        request: &SubmissionRequest,
    ) -> Result<(String, &'a LanguageProfile), RequestError> {
        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .ok_or_else(|| RequestError::InvalidRequest("missing language".to_owned()))?;
        // An empty upload has nothing to compile or run; reject it up front
        if request.source.is_empty() {
            return Err(RequestError::InvalidRequest("code file is empty".to_owned()));
        }
        let profile = self.registry.resolve(language)?;
        Ok((language.to_ascii_lowercase(), profile))
    }

    async fn process(
        &self,
        language: &str,
        profile: &LanguageProfile,
        artifact: &mut Artifact,
        mode: Mode<'_>,
        deadline: Deadline,
    ) -> Result<RunOutcome, RequestError> {
        self.store.normalize(artifact, profile).await?;

        let base = &self.config.default_limits;
        let compile_invocation = command::build_compile(profile, artifact, base)?;
        let run_invocation = match mode {
            Mode::CompileOnly => None,
            Mode::CompileAndRun { overrides } => {
                Some((command::build_run(profile, artifact, base)?, overrides))
            }
        };
        debug!(state = ?RequestState::Built, compiled = compile_invocation.is_some());

        let mut outcome = RunOutcome::new(artifact.id(), language);

        if let Some(invocation) = compile_invocation {
            let result =
                match compile::compile(&self.executor, invocation, deadline.remaining()).await {
                    Ok(result) => result,
                    Err(e) if e.is_toolchain_unavailable() => {
                        return Ok(outcome.fail(FailureKind::ToolchainUnavailable, e.to_string()));
                    }
                    Err(e) => return Err(e.into()),
                };

            let success = result.is_success();
            let timed_out = result.timed_out();
            let message = result.error_message();
            outcome.truncated = result.execution.is_truncated();
            outcome.output = result.output.clone();
            outcome.compile = Some(result);

            if !success {
                let kind = if timed_out {
                    FailureKind::TimedOut
                } else {
                    FailureKind::CompileError
                };
                debug!(state = ?RequestState::Executed, "compilation failed, run skipped");
                return Ok(outcome.fail(kind, message));
            }
        }

        let Some((invocation, overrides)) = run_invocation else {
            outcome.success = true;
            return Ok(outcome);
        };

        let result = match execute::execute(
            &self.executor,
            invocation,
            deadline.remaining(),
            overrides,
        )
        .await
        {
            Ok(result) => result,
            Err(e) if e.is_toolchain_unavailable() => {
                return Ok(outcome.fail(FailureKind::ToolchainUnavailable, e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!(state = ?RequestState::Executed, status = ?result.status);

        outcome.output = result.stdout_lossy();
        outcome.truncated |= result.is_truncated();
        let failure = execute::run_failure(&result);
        outcome.run = Some(result);

        Ok(match failure {
            Some((kind, message)) => outcome.fail(kind, message),
            None => {
                outcome.success = true;
                outcome
            }
        })
    }
}
