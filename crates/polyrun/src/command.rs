//! Command builder
//!
//! Turns a language profile and a staged artifact into an [`Invocation`]: a
//! program, an ordered argument vector and an explicit environment. Nothing
//! here ever goes through a shell; every placeholder fills exactly the
//! argument slot it occupies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::artifact::Artifact;
use crate::config::{LanguageProfile, TemplateVars};
use crate::config::language::unknown_placeholder;
use crate::types::ResourceLimits;

/// Placeholder that expands to one argument per dependency
const PACKAGES: &str = "{packages}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("{step} command uses {placeholder} but the language declares no output name")]
    MissingOutput {
        step: &'static str,
        placeholder: &'static str,
    },

    #[error("{step} command uses unknown placeholder {token}")]
    UnknownPlaceholder { step: &'static str, token: String },

    #[error("{0} command is empty")]
    EmptyCommand(&'static str),

    #[error("{{packages}} must be a whole argument, found '{0}'")]
    MisplacedPackages(String),

    #[error("language '{0}' has no install step")]
    NotInstallable(String),

    #[error("invalid output name '{0}'")]
    InvalidOutputName(String),

    #[error("artifact path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}

/// A fully resolved process invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Program name or path, resolved against PATH by the executor
    program: String,
    /// Arguments after the program
    args: Vec<String>,
    /// Environment set on top of a cleared environment
    env: BTreeMap<String, String>,
    /// Working directory
    working_dir: Option<PathBuf>,
    /// Resource limits
    limits: ResourceLimits,
}

impl Invocation {
    /// Create a new invocation builder for `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            limits: ResourceLimits::default(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append multiple arguments
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn get_working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn get_limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Mutable access to the limits, used to apply the remaining request budget
    pub fn limits_mut(&mut self) -> &mut ResourceLimits {
        &mut self.limits
    }
}

/// Build the compile invocation, or `None` for interpreted languages
pub fn build_compile(
    profile: &LanguageProfile,
    artifact: &Artifact,
    base: &ResourceLimits,
) -> Result<Option<Invocation>, BuildError> {
    let Some(ref compile) = profile.compile else {
        return Ok(None);
    };
    let paths = ArtifactPaths::new(profile, artifact)?;
    let vars = paths.vars();
    let limits = layered(base, compile.limits.as_ref());

    let invocation = expand_command("compile", &compile.command, &vars)?
        .working_dir(artifact.dir())
        .limits(limits);
    let invocation = expand_env("compile", invocation, &compile.env, &vars)?;
    Ok(Some(invocation))
}

/// Build the run invocation
pub fn build_run(
    profile: &LanguageProfile,
    artifact: &Artifact,
    base: &ResourceLimits,
) -> Result<Invocation, BuildError> {
    let paths = ArtifactPaths::new(profile, artifact)?;
    let vars = paths.vars();
    let limits = layered(base, profile.run.limits.as_ref());

    let invocation = expand_command("run", &profile.run.command, &vars)?
        .working_dir(artifact.dir())
        .limits(limits);
    expand_env("run", invocation, &profile.run.env, &vars)
}

/// Build the dependency install invocation
///
/// `packages` must already be validated; each one becomes its own argument
/// in place of the `{packages}` slot.
pub fn build_install(
    language: &str,
    profile: &LanguageProfile,
    scratch: &Path,
    packages: &[String],
    base: &ResourceLimits,
) -> Result<Invocation, BuildError> {
    let install = profile
        .install
        .as_ref()
        .ok_or_else(|| BuildError::NotInstallable(language.to_owned()))?;
    let dir = utf8(scratch)?;
    let vars = TemplateVars {
        dir: Some(dir),
        ..Default::default()
    };

    let (program, rest) = install
        .command
        .split_first()
        .ok_or(BuildError::EmptyCommand("install"))?;
    if program.contains(PACKAGES) {
        return Err(BuildError::MisplacedPackages(program.clone()));
    }

    let mut invocation = Invocation::new(expand_arg("install", program, &vars)?);
    for arg in rest {
        if arg == PACKAGES {
            invocation = invocation.args(packages.iter().cloned());
        } else if arg.contains(PACKAGES) {
            return Err(BuildError::MisplacedPackages(arg.clone()));
        } else {
            invocation = invocation.arg(expand_arg("install", arg, &vars)?);
        }
    }

    let invocation = invocation
        .working_dir(scratch)
        .limits(layered(base, install.limits.as_ref()));
    expand_env("install", invocation, &install.env, &vars)
}

/// Paths a compile or run template may refer to
///
/// The source is a bare file name: compile and run steps execute inside the
/// request directory, and diagnostics then never show the staging path.
struct ArtifactPaths {
    source: String,
    output: Option<String>,
    class: String,
    dir: String,
}

impl ArtifactPaths {
    fn new(profile: &LanguageProfile, artifact: &Artifact) -> Result<Self, BuildError> {
        let output = match profile.output_name() {
            Some(name) => {
                let path = artifact
                    .output_path(name)
                    .map_err(|_| BuildError::InvalidOutputName(name.to_owned()))?;
                Some(utf8(&path)?.to_owned())
            }
            None => None,
        };
        let class = artifact
            .stem()
            .unwrap_or(profile.source_stem.as_str())
            .to_owned();
        let source = artifact
            .source()
            .file_name()
            .map_or(artifact.source(), Path::new);

        Ok(Self {
            source: utf8(source)?.to_owned(),
            output,
            class,
            dir: utf8(artifact.dir())?.to_owned(),
        })
    }

    fn vars(&self) -> TemplateVars<'_> {
        TemplateVars {
            source: Some(&self.source),
            output: self.output.as_deref(),
            class: Some(&self.class),
            dir: Some(&self.dir),
        }
    }
}

fn layered(base: &ResourceLimits, step: Option<&ResourceLimits>) -> ResourceLimits {
    match step {
        Some(step) => base.with_overrides(step),
        None => base.clone(),
    }
}

fn expand_command(
    step: &'static str,
    template: &[String],
    vars: &TemplateVars<'_>,
) -> Result<Invocation, BuildError> {
    let (program, rest) = template
        .split_first()
        .ok_or(BuildError::EmptyCommand(step))?;

    let mut invocation = Invocation::new(expand_arg(step, program, vars)?);
    for arg in rest {
        if arg.contains(PACKAGES) {
            return Err(BuildError::MisplacedPackages(arg.clone()));
        }
        invocation = invocation.arg(expand_arg(step, arg, vars)?);
    }
    Ok(invocation)
}

fn expand_env(
    step: &'static str,
    mut invocation: Invocation,
    env: &BTreeMap<String, String>,
    vars: &TemplateVars<'_>,
) -> Result<Invocation, BuildError> {
    for (key, value) in env {
        invocation = invocation.env(key, expand_arg(step, value, vars)?);
    }
    Ok(invocation)
}

fn expand_arg(
    step: &'static str,
    arg: &str,
    vars: &TemplateVars<'_>,
) -> Result<String, BuildError> {
    if let Some(token) = unknown_placeholder(arg) {
        return Err(BuildError::UnknownPlaceholder { step, token });
    }
    vars.expand(arg)
        .map_err(|placeholder| match placeholder {
            "{output}" | "{binary}" => BuildError::MissingOutput { step, placeholder },
            other => BuildError::UnknownPlaceholder {
                step,
                token: other.to_owned(),
            },
        })
}

fn utf8(path: &Path) -> Result<&str, BuildError> {
    path.to_str()
        .ok_or_else(|| BuildError::NonUtf8Path(path.to_path_buf()))
}
