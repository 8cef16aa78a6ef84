//! A library for bounded, multi-language code execution.
//!
//! Polyrun takes an untrusted source file and a language tag, resolves them
//! into a toolchain invocation from a static language table, runs it under
//! resource limits and a wall clock deadline, and always removes the
//! submission from disk afterwards.
//!
//! # Features
//!
//! - **Static language table**: compile/run/install commands are argument vectors from an embedded TOML file.
//! - **Per-request scratch directories**: every submission lives in its own `<staging>/<uuid>/` and is released on every exit path.
//! - **Bounded execution**: POSIX rlimits, process-group kill on timeout, capped stdout/stderr.
//! - **Dependency installation**: package names are validated before they reach a package manager.

pub use artifact::{Artifact, ArtifactError, ArtifactStore, Workspace};
pub use command::{BuildError, Invocation};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG, LanguageProfile};
pub use executor::{ExecuteError, Executor};
pub use install::{DependencyRequest, InstallOutcome, Installer, validate_dependency_name};
pub use registry::{LanguageRegistry, RegistryError};
pub use runner::{
    CompileResult, FailureKind, RequestError, RequestState, RunOutcome, Runner, SubmissionRequest,
};
pub use types::{ExecutionResult, ExecutionStatus, LimitExceeded, ResourceLimits};

pub mod artifact;
pub mod command;
pub mod config;
pub mod executor;
pub mod install;
pub mod registry;
pub mod runner;
pub mod types;
