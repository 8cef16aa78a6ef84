//! Configuration file loading for polyrun
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::language::unknown_placeholder;
use crate::config::{Config, ConfigError, ENV_PREFIX, EXAMPLE_CONFIG, LanguageProfile};

impl Config {
    /// Load configuration from a file
    ///
    /// The file replaces the built-in language table entirely.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the layered configuration used by the server and CLI
    ///
    /// Sources, lowest precedence first: the embedded language table, the
    /// optional file, then `POLYRUN__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            ConfigBuilder::builder().add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml));
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be at least 1".to_owned(),
            ));
        }
        if !(self.request_timeout.is_finite() && self.request_timeout > 0.0) {
            return Err(ConfigError::Invalid(
                "request_timeout must be a positive number of seconds".to_owned(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for (id, lang) in &self.languages {
            let normalized = id.trim().to_ascii_lowercase();
            if normalized.is_empty() {
                return Err(ConfigError::Invalid("empty language id".to_owned()));
            }
            if !seen.insert(normalized) {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' is defined more than once (ids are case-insensitive)"
                )));
            }
            validate_language(id, lang)?;
        }

        Ok(())
    }
}

fn validate_language(id: &str, lang: &LanguageProfile) -> Result<(), ConfigError> {
    if lang.name.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "language '{id}' has empty name"
        )));
    }
    if lang.extension.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "language '{id}' has empty extension"
        )));
    }
    if lang.source_stem.is_empty()
        || !lang
            .source_stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ConfigError::Invalid(format!(
            "language '{id}' has invalid source stem '{}'",
            lang.source_stem
        )));
    }
    if lang.run.command.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "language '{id}' has empty run command"
        )));
    }
    if let Some(ref compile) = lang.compile
        && compile.command.is_empty()
    {
        return Err(ConfigError::Invalid(format!(
            "language '{id}' has empty compile command"
        )));
    }
    if let Some(name) = lang.output_name()
        && (name.is_empty() || name.contains('/') || name.contains(".."))
    {
        return Err(ConfigError::Invalid(format!(
            "language '{id}' has invalid output name '{name}'"
        )));
    }
    if let Some(ref install) = lang.install {
        if install.command.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "language '{id}' has empty install command"
            )));
        }
        if !install.command.iter().any(|arg| arg == "{packages}") {
            return Err(ConfigError::Invalid(format!(
                "language '{id}' install command has no standalone {{packages}} argument"
            )));
        }
    }

    let has_output = lang.output_name().is_some();
    let templates = lang
        .compile
        .iter()
        .flat_map(|c| c.command.iter().chain(c.env.values()))
        .chain(lang.run.command.iter())
        .chain(lang.run.env.values());
    for arg in templates {
        if let Some(token) = unknown_placeholder(arg) {
            return Err(ConfigError::Invalid(format!(
                "language '{id}' uses unknown placeholder {token}"
            )));
        }
        if arg.contains("{packages}") {
            return Err(ConfigError::Invalid(format!(
                "language '{id}' uses {{packages}} outside the install command"
            )));
        }
        if !has_output && (arg.contains("{output}") || arg.contains("{binary}")) {
            return Err(ConfigError::Invalid(format!(
                "language '{id}' references the compile output but declares no output_name"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[languages.test]
name = "Test Language"
extension = "test"

[languages.test.run]
command = ["./test"]
"#;

        let config = Config::parse_toml(toml).unwrap();
        assert!(config.languages.contains_key("test"));
        assert_eq!(config.languages["test"].name, "Test Language");
        assert_eq!(config.languages["test"].source_stem, "main");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
staging_dir = "/var/tmp/polyrun"
max_concurrent = 2
request_timeout = 4.0

[default_limits]
wall_time_limit = 2.0
memory_limit = 262144

[sandbox]
path = "/usr/bin:/bin"
run_as_uid = 65534
run_as_gid = 65534

[server]
bind_addr = "127.0.0.1:8080"

[languages.c]
name = "C (GCC)"
extension = "c"

[languages.c.compile]
command = ["gcc", "{source}", "-o", "{output}"]
output_name = "main"

[languages.c.run]
command = ["{binary}"]
"#;

        let config = Config::parse_toml(toml).unwrap();
        assert_eq!(
            config.staging_dir,
            std::path::PathBuf::from("/var/tmp/polyrun")
        );
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.default_limits.wall_time_limit, Some(2.0));
        assert_eq!(config.default_limits.memory_limit, Some(262144));
        assert_eq!(config.sandbox.run_as_uid, Some(65534));
        assert_eq!(config.server.bind_addr.port(), 8080);
        assert!(config.languages["c"].compile.is_some());
    }

    #[test]
    fn test_default_languages_included() {
        let config = Config::default();
        for id in [
            "c",
            "cpp",
            "python",
            "java",
            "javascript",
            "typescript",
            "go",
            "rust",
            "csharp",
        ] {
            assert!(config.languages.contains_key(id), "missing {id}");
        }
    }

    #[test]
    fn test_default_java_is_not_installable() {
        let config = Config::default();
        assert!(!config.languages["java"].is_installable());
        assert!(config.languages["python"].is_installable());
    }

    #[test]
    fn test_partial_limits_dont_override_unspecified_fields() {
        let toml = r#"
[languages.go]
name = "Go"
extension = "go"

[languages.go.compile]
command = ["go", "build", "-o", "{output}", "{source}"]
output_name = "main"

[languages.go.compile.limits]
max_processes = 50

[languages.go.run]
command = ["{binary}"]
"#;

        let config = Config::parse_toml(toml).unwrap();
        let compile_limits = config.languages["go"]
            .compile
            .as_ref()
            .unwrap()
            .limits
            .as_ref()
            .unwrap();

        // Only max_processes was specified; other fields should be None
        // so they don't override the base limits via with_overrides
        assert_eq!(compile_limits.max_processes, Some(50));
        assert_eq!(compile_limits.time_limit, None);
        assert_eq!(compile_limits.memory_limit, None);
        assert_eq!(compile_limits.wall_time_limit, None);
    }

    #[test]
    fn test_invalid_empty_name() {
        let toml = r#"
[languages.test]
name = ""
extension = "test"

[languages.test.run]
command = ["./test"]
"#;

        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn test_invalid_unknown_placeholder() {
        let toml = r#"
[languages.test]
name = "Test"
extension = "test"

[languages.test.run]
command = ["run", "{sauce}"]
"#;

        let err = Config::parse_toml(toml).unwrap_err();
        assert!(err.to_string().contains("{sauce}"));
    }

    #[test]
    fn test_invalid_output_without_output_name() {
        let toml = r#"
[languages.test]
name = "Test"
extension = "test"

[languages.test.compile]
command = ["cc", "{source}"]

[languages.test.run]
command = ["{binary}"]
"#;

        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn test_invalid_install_without_packages_argument() {
        let toml = r#"
[languages.test]
name = "Test"
extension = "test"

[languages.test.run]
command = ["run", "{source}"]

[languages.test.install]
command = ["pkg", "add", "--all={packages}"]
"#;

        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn test_invalid_source_stem() {
        let toml = r#"
[languages.test]
name = "Test"
extension = "test"
source_stem = "../escape"

[languages.test.run]
command = ["run", "{source}"]
"#;

        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn test_invalid_zero_concurrency() {
        let toml = r#"
max_concurrent = 0
"#;

        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn test_load_without_file_uses_embedded_table() {
        let config = Config::load(None).unwrap();
        assert!(config.languages.contains_key("python"));
    }
}
