//! Dependency installer
//!
//! Runs a language's package manager for a validated list of dependency
//! names. Every install happens in a fresh scratch directory that is removed
//! afterwards, so installs never leak into other requests.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::command;
use crate::config::{Config, LanguageProfile};
use crate::executor::Executor;
use crate::registry::LanguageRegistry;
use crate::runner::{FailureKind, RequestError};
use crate::types::{ExecutionResult, ExecutionStatus};

/// Longest accepted dependency name (npm's limit, the strictest common one)
pub const MAX_DEPENDENCY_NAME_LEN: usize = 214;

/// Optional scope, a name, up to eight `/path` segments (Go module paths)
/// and an optional `@version`. Every segment starts with an alphanumeric, so
/// a name can never be parsed as a flag.
static DEPENDENCY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^@?[A-Za-z0-9][A-Za-z0-9._-]*(/[A-Za-z0-9][A-Za-z0-9._-]*){0,8}(@[A-Za-z0-9][A-Za-z0-9._+-]*)?$",
    )
    .expect("dependency name pattern should compile")
});

/// Languages that never support installation, whatever the table says
const NEVER_INSTALLABLE: [&str; 1] = ["java"];

/// A request to install dependencies for one language
#[derive(Debug, Clone, Default)]
pub struct DependencyRequest {
    /// Language identifier as sent by the client
    pub language: Option<String>,
    /// Dependency names, in order
    pub dependencies: Vec<String>,
}

impl DependencyRequest {
    pub fn new(
        language: impl Into<String>,
        dependencies: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            language: Some(language.into()),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }
}

/// Result of running the package manager
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// Request identifier (names the scratch directory)
    pub id: Uuid,
    /// Resolved language identifier
    pub language: String,
    /// Whether the package manager exited successfully
    pub success: bool,
    /// Package manager stdout
    pub output: String,
    /// Package manager stderr or a status message on failure
    pub error: Option<String>,
    /// Why the install failed
    pub failure: Option<FailureKind>,
    /// Whether any captured stream was cut at the output limit
    pub truncated: bool,
    /// Raw process result, if the package manager ran
    pub execution: Option<ExecutionResult>,
}

/// Check one dependency name against the safety pattern
pub fn validate_dependency_name(name: &str) -> Result<(), RequestError> {
    let valid = name.len() <= MAX_DEPENDENCY_NAME_LEN
        && !name.contains("..")
        && DEPENDENCY_NAME.is_match(name);
    if valid {
        Ok(())
    } else {
        Err(RequestError::InvalidDependencyName(name.to_owned()))
    }
}

/// Whether a name pins a version with `@`, ignoring a leading npm scope
fn has_version(name: &str) -> bool {
    name.rfind('@').is_some_and(|at| at > 0)
}

/// Installs dependencies through a language's package manager
#[derive(Debug, Clone)]
pub struct Installer {
    config: Arc<Config>,
    registry: Arc<LanguageRegistry>,
    store: ArtifactStore,
    executor: Executor,
}

impl Installer {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<LanguageRegistry>,
        store: ArtifactStore,
        executor: Executor,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            executor,
        }
    }

    /// Validate the request, then run the package manager once
    ///
    /// A single invalid name rejects the whole batch before anything is
    /// written or spawned.
    #[instrument(skip_all, fields(language = request.language.as_deref().unwrap_or("")))]
    pub async fn install(&self, request: DependencyRequest) -> Result<InstallOutcome, RequestError> {
        let (language, profile) = self.validate(&request)?;
        debug!(%language, count = request.dependencies.len(), "install request validated");

        let scratch = self.store.scratch().await?;
        let id = scratch.id();

        let result = async {
            let invocation = command::build_install(
                &language,
                profile,
                scratch.path(),
                &request.dependencies,
                &self.config.install_limits,
            )?;
            Ok::<_, RequestError>(self.executor.run(&invocation).await)
        }
        .await;

        scratch.release().await;

        let mut outcome = InstallOutcome {
            id,
            language,
            success: false,
            output: String::new(),
            error: None,
            failure: None,
            truncated: false,
            execution: None,
        };

        let execution = match result? {
            Ok(execution) => execution,
            Err(e) if e.is_toolchain_unavailable() => {
                outcome.failure = Some(FailureKind::ToolchainUnavailable);
                outcome.error = Some(e.to_string());
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        };

        outcome.success = execution.is_success();
        outcome.output = execution.stdout_lossy();
        outcome.truncated = execution.is_truncated();
        if !outcome.success {
            let (kind, message) = if execution.status == ExecutionStatus::TimedOut {
                (FailureKind::TimedOut, "installation timed out".to_owned())
            } else {
                let stderr = execution.stderr_lossy();
                let message = if stderr.trim().is_empty() {
                    match execution.exit_code {
                        Some(code) => format!("package manager exited with code {code}"),
                        None => "package manager failed".to_owned(),
                    }
                } else {
                    stderr
                };
                (FailureKind::RuntimeFailure, message)
            };
            outcome.failure = Some(kind);
            outcome.error = Some(message);
        }
        debug!(success = outcome.success, "install complete");
        outcome.execution = Some(execution);
        Ok(outcome)
    }

    fn validate<'a>(
        &'a self,
        request: &DependencyRequest,
    ) -> Result<(String, &'a LanguageProfile), RequestError> {
        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .ok_or_else(|| RequestError::InvalidRequest("missing language".to_owned()))?
            .to_ascii_lowercase();
        if request.dependencies.is_empty() {
            return Err(RequestError::InvalidRequest(
                "no dependencies given".to_owned(),
            ));
        }

        let profile = self.registry.resolve(&language)?;
        if NEVER_INSTALLABLE.contains(&language.as_str()) || !profile.is_installable() {
            return Err(RequestError::UnsupportedOperation(format!(
                "dependency installation is not supported for {language}"
            )));
        }

        let require_version = profile
            .install
            .as_ref()
            .is_some_and(|install| install.require_version);
        for name in &request.dependencies {
            validate_dependency_name(name)?;
            if require_version && !has_version(name) {
                return Err(RequestError::MissingVersion(name.clone()));
            }
        }
        Ok((language, profile))
    }
}
