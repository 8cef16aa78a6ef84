use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::ResourceLimits;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Placeholders a command template may contain
pub const PLACEHOLDERS: [&str; 6] = [
    "{source}",
    "{output}",
    "{binary}",
    "{class}",
    "{dir}",
    "{packages}",
];

/// Toolchain profile for one programming language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageProfile {
    /// Human-readable name for the language (e.g., "C (GCC)")
    pub name: String,

    /// File extension the toolchain expects
    pub extension: FileExtension,

    /// File name stem of the normalized source (e.g. "Main" for Java)
    #[serde(default = "default_source_stem")]
    pub source_stem: String,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,

    /// Package installation configuration (None when unsupported)
    #[serde(default)]
    pub install: Option<InstallConfig>,
}

impl LanguageProfile {
    /// Check if the language is compiled
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Check if the language supports dependency installation
    pub fn is_installable(&self) -> bool {
        self.install.is_some()
    }

    /// Get the normalized source file name for this language
    pub fn source_name(&self) -> String {
        format!("{}.{}", self.source_stem, self.extension)
    }

    /// Name of the compiled output, if this language produces one
    pub fn output_name(&self) -> Option<&str> {
        self.compile
            .as_ref()
            .and_then(|compile| compile.output_name.as_deref())
    }
}

fn default_source_stem() -> String {
    "main".to_owned()
}

/// File extension without dot (e.g., "cpp")
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Program and arguments with placeholders
    /// Placeholders: {source}, {output}, {class}, {dir}
    pub command: Vec<String>,

    /// Output file name next to the source (e.g., "main"); None when the
    /// compiler writes into `{dir}` on its own (javac)
    #[serde(default)]
    pub output_name: Option<String>,

    /// Environment variables to set during compilation; values may use {dir}
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Resource limits for compilation (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

/// Default PATH for child processes
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Program and arguments with placeholders
    /// Placeholders: {source}, {binary}, {class}, {dir}
    pub command: Vec<String>,

    /// Environment variables to set; values may use {dir}
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Resource limits for execution (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

/// Configuration for the dependency installation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Program and arguments; `{packages}` must be a whole argument and
    /// expands to one argument per dependency
    pub command: Vec<String>,

    /// Environment variables to set; values may use {dir}
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Every dependency must carry an explicit `@version`
    #[serde(default)]
    pub require_version: bool,

    /// Resource limits for installation (overrides install defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

/// Substitutions available when expanding a template
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
    pub source: Option<&'a str>,
    pub output: Option<&'a str>,
    pub class: Option<&'a str>,
    pub dir: Option<&'a str>,
}

impl TemplateVars<'_> {
    /// Expand placeholders inside one argument
    ///
    /// Returns the name of the first placeholder that has no value.
    pub fn expand(&self, arg: &str) -> Result<String, &'static str> {
        let mut out = String::with_capacity(arg.len());
        let mut rest = arg;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            match self.lookup(tail) {
                Some((placeholder, value)) => {
                    out.push_str(value.ok_or(placeholder)?);
                    rest = &tail[placeholder.len()..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn lookup(&self, tail: &str) -> Option<(&'static str, Option<&str>)> {
        let pairs: [(&'static str, Option<&str>); 5] = [
            ("{source}", self.source),
            ("{output}", self.output),
            ("{binary}", self.output),
            ("{class}", self.class),
            ("{dir}", self.dir),
        ];
        pairs
            .into_iter()
            .find(|(placeholder, _)| tail.starts_with(placeholder))
    }
}

/// Return the first `{...}` token in `arg` that is not a known placeholder
pub fn unknown_placeholder(arg: &str) -> Option<String> {
    let mut rest = arg;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            return None;
        };
        let token = &rest[start..start + len + 1];
        if !PLACEHOLDERS.contains(&token) {
            return Some(token.to_owned());
        }
        rest = &rest[start + len + 1..];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python() -> LanguageProfile {
        LanguageProfile {
            name: "Python".to_owned(),
            extension: FileExtension::new("py").unwrap(),
            source_stem: default_source_stem(),
            compile: None,
            run: RunConfig {
                command: vec!["python3".to_owned(), "{source}".to_owned()],
                env: BTreeMap::new(),
                limits: None,
            },
            install: None,
        }
    }

    #[test]
    fn file_extension_new_valid() {
        let ext = FileExtension::new("cpp").unwrap();
        assert_eq!(ext.to_string(), "cpp");
    }

    #[test]
    fn file_extension_new_empty() {
        let ext = FileExtension::new("").unwrap();
        assert!(ext.is_empty());
    }

    #[test]
    fn file_extension_new_rejects_slash() {
        assert!(FileExtension::new("path/ext").is_err());
    }

    #[test]
    fn file_extension_new_rejects_dot() {
        assert!(FileExtension::new(".cpp").is_err());
        assert!(FileExtension::new(".tar.gz").is_err());
    }

    #[test]
    fn expand_source_placeholder() {
        let vars = TemplateVars {
            source: Some("/tmp/a/main.c"),
            ..Default::default()
        };
        assert_eq!(vars.expand("{source}").unwrap(), "/tmp/a/main.c");
    }

    #[test]
    fn expand_output_and_binary_share_a_value() {
        let vars = TemplateVars {
            output: Some("/tmp/a/main"),
            ..Default::default()
        };
        assert_eq!(vars.expand("{output}").unwrap(), "/tmp/a/main");
        assert_eq!(vars.expand("{binary}").unwrap(), "/tmp/a/main");
    }

    #[test]
    fn expand_placeholder_in_middle() {
        let vars = TemplateVars {
            output: Some("main.exe"),
            ..Default::default()
        };
        assert_eq!(vars.expand("-out:{output}").unwrap(), "-out:main.exe");
    }

    #[test]
    fn expand_missing_value_names_the_placeholder() {
        let vars = TemplateVars::default();
        assert_eq!(vars.expand("{output}"), Err("{output}"));
    }

    #[test]
    fn expand_does_not_rescan_substituted_values() {
        // A value that happens to look like a placeholder is inserted verbatim
        let vars = TemplateVars {
            source: Some("/tmp/{dir}/x"),
            dir: Some("/elsewhere"),
            ..Default::default()
        };
        assert_eq!(vars.expand("{source}").unwrap(), "/tmp/{dir}/x");
    }

    #[test]
    fn unknown_placeholder_detection() {
        assert_eq!(unknown_placeholder("{source}"), None);
        assert_eq!(unknown_placeholder("-out:{output}"), None);
        assert_eq!(unknown_placeholder("{sauce}"), Some("{sauce}".to_owned()));
        assert_eq!(unknown_placeholder("plain"), None);
        assert_eq!(unknown_placeholder("{unterminated"), None);
    }

    #[test]
    fn language_is_compiled_false() {
        assert!(!python().is_compiled());
        assert!(!python().is_installable());
    }

    #[test]
    fn language_source_name_uses_stem_and_extension() {
        let mut lang = python();
        assert_eq!(lang.source_name(), "main.py");
        lang.source_stem = "Main".to_owned();
        lang.extension = FileExtension::new("java").unwrap();
        assert_eq!(lang.source_name(), "Main.java");
    }

    #[test]
    fn language_output_name_from_compile_step() {
        let mut lang = python();
        assert_eq!(lang.output_name(), None);
        lang.compile = Some(CompileConfig {
            command: vec!["gcc".to_owned()],
            output_name: Some("main".to_owned()),
            env: BTreeMap::new(),
            limits: None,
        });
        assert_eq!(lang.output_name(), Some("main"));
    }
}
