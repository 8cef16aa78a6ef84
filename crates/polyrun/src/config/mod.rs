use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{
    CompileConfig, DEFAULT_SANDBOX_PATH, FileExtension, InstallConfig, LanguageProfile, RunConfig,
    TemplateVars,
};
use crate::types::ResourceLimits;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// This is the built-in language table. Library users can access it to
/// generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../polyrun.example.toml");

/// Prefix for environment variable overrides (`POLYRUN__SERVER__BIND_ADDR`, ...)
pub const ENV_PREFIX: &str = "POLYRUN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for polyrun
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory under which every request gets its own scratch directory
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Maximum number of child processes running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Wall clock budget in seconds shared by the compile and run steps of one request
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,

    /// Default resource limits applied to compile and run steps.
    /// Language and caller limits override these field by field.
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Default resource limits applied to dependency installation
    #[serde(default = "default_install_limits")]
    pub install_limits: ResourceLimits,

    /// Process-boundary settings for child processes
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Language profiles keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, LanguageProfile>,
}

/// Process-boundary settings shared by every child process
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// PATH handed to child processes and used to resolve toolchain binaries
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Drop to this uid before exec (requires the server to run as root)
    #[serde(default)]
    pub run_as_uid: Option<u32>,

    /// Drop to this gid before exec (requires the server to run as root)
    #[serde(default)]
    pub run_as_gid: Option<u32>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            path: default_sandbox_path(),
            run_as_uid: None,
            run_as_gid: None,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            max_concurrent: default_max_concurrent(),
            request_timeout: default_request_timeout(),
            default_limits: ResourceLimits::default(),
            install_limits: default_install_limits(),
            sandbox: SandboxConfig::default(),
            server: ServerConfig::default(),
            languages: HashMap::new(),
        }
    }

    /// Wall clock budget for one compile-and-run request
    pub fn request_budget(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_request_timeout()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("polyrun")
}

fn default_max_concurrent() -> usize {
    8
}

fn default_request_timeout() -> f64 {
    10.0
}

fn default_install_limits() -> ResourceLimits {
    ResourceLimits {
        time_limit: Some(300.0),
        wall_time_limit: Some(180.0),
        memory_limit: None,
        data_limit: None,
        stack_limit: None,
        max_processes: None,
        max_output: Some(1024 * 1024),
        max_file_size: Some(512 * ResourceLimits::MB),
        max_open_files: Some(1024),
    }
}

fn default_sandbox_path() -> String {
    DEFAULT_SANDBOX_PATH.to_owned()
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_max_upload_bytes() -> usize {
    1024 * 1024
}
