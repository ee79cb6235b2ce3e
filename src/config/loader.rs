//! Configuration loader.
//!
//! Pipeline:
//! 1. Size check and read (UTF-8 BOM stripped)
//! 2. Environment variable expansion on the raw text
//! 3. YAML parsing and deserialization
//! 4. Validation
//! 5. Freeze with `Arc`

use std::path::Path;
use std::sync::Arc;

use serde_yaml::Value;

use crate::config::schema::InstallationConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Options for the configuration loader.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Maximum configuration file size in bytes.
    pub max_config_size: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_config_size: env_or("RUPTURE_MAX_CONFIG_SIZE", 1024 * 1024),
        }
    }
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: Arc<InstallationConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Configuration loader.
#[derive(Debug)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a new configuration loader with the given options.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Creates a new configuration loader with default options.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(LoaderOptions::default())
    }

    /// Loads a configuration file and returns the frozen configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or exceeds the size limit
    /// - A required environment variable is unset
    /// - YAML parsing fails
    /// - Validation fails
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > self.options.max_config_size {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {} bytes", self.options.max_config_size),
            });
        }

        let raw_content = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        self.load_str(&raw_content, path)
    }

    /// Loads configuration from in-memory YAML text.
    ///
    /// `path` is only used for error reporting.
    ///
    /// # Errors
    ///
    /// Same as [`ConfigLoader::load`], minus the file system checks.
    pub fn load_str(&self, raw: &str, path: &Path) -> Result<LoadResult, ConfigError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        let mut warnings = Vec::new();

        let mut env_sub = EnvSubstitution::new();
        let substituted = env_sub
            .substitute(raw, path)
            .map_err(|e| with_path(e, path))?;
        warnings.extend(env_sub.warnings);

        let root: Value =
            serde_yaml::from_str(&substituted).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        if root.is_null() {
            return Err(ConfigError::ParseError {
                path: path.to_path_buf(),
                line: None,
                message: "Configuration file is empty".to_string(),
            });
        }

        let config: InstallationConfig =
            serde_yaml::from_value(root).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: None,
                message: format!("Failed to deserialize configuration: {e}"),
            })?;

        let validation = Validator::new().validate(&config);
        if validation.has_errors() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: validation.errors,
            });
        }

        for issue in validation.warnings {
            warnings.push(LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            });
        }

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

/// Fills in the source path on parse errors raised before it was known.
fn with_path(err: ConfigError, path: &Path) -> ConfigError {
    match err {
        ConfigError::ParseError {
            path: p,
            line,
            message,
        } if p.as_os_str().is_empty() => ConfigError::ParseError {
            path: path.to_path_buf(),
            line,
            message,
        },
        other => other,
    }
}

// ============================================================================
// Environment Variable Substitution
// ============================================================================

/// Pre-parse environment variable substitution.
///
/// Runs on raw YAML text so substituted numbers and booleans keep their
/// YAML types.
struct EnvSubstitution {
    warnings: Vec<LoadWarning>,
}

impl EnvSubstitution {
    const fn new() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Supports `${VAR}`, `${VAR:-default}`, `${VAR:?message}` and `$$`.
    fn substitute(&mut self, raw_yaml: &str, source_path: &Path) -> Result<String, ConfigError> {
        let mut result = String::with_capacity(raw_yaml.len());
        let mut chars = raw_yaml.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                result.push(c);
                continue;
            }
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();
                    let spec = Self::parse_var_spec(&mut chars)?;
                    match std::env::var(&spec.name) {
                        Ok(value) => result.push_str(&value),
                        Err(_) => match spec.fallback {
                            Fallback::Default(default) => result.push_str(&default),
                            Fallback::Required(message) => {
                                return Err(ConfigError::EnvVarNotSet {
                                    var: spec.name,
                                    location: message,
                                });
                            }
                            Fallback::Empty => self.warnings.push(LoadWarning {
                                message: format!(
                                    "Environment variable '{}' is not set, using empty string",
                                    spec.name
                                ),
                                location: Some(source_path.display().to_string()),
                            }),
                        },
                    }
                }
                _ => result.push(c),
            }
        }

        Ok(result)
    }

    fn parse_var_spec(
        chars: &mut std::iter::Peekable<std::str::Chars>,
    ) -> Result<VarSpec, ConfigError> {
        let mut name = String::new();

        while let Some(c) = chars.next() {
            match c {
                '}' => {
                    return Ok(VarSpec {
                        name,
                        fallback: Fallback::Empty,
                    });
                }
                ':' if chars.peek() == Some(&'-') => {
                    chars.next();
                    let default = Self::read_until_close(chars)?;
                    return Ok(VarSpec {
                        name,
                        fallback: Fallback::Default(default),
                    });
                }
                ':' if chars.peek() == Some(&'?') => {
                    chars.next();
                    let message = Self::read_until_close(chars)?;
                    return Ok(VarSpec {
                        name,
                        fallback: Fallback::Required(message),
                    });
                }
                _ => name.push(c),
            }
        }

        Err(unclosed(&format!("${{{name}")))
    }

    /// Reads up to the matching `}`, allowing nested braces in defaults.
    fn read_until_close(
        chars: &mut std::iter::Peekable<std::str::Chars>,
    ) -> Result<String, ConfigError> {
        let mut value = String::new();
        let mut depth = 1;

        for c in chars.by_ref() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(value);
                    }
                }
                _ => {}
            }
            value.push(c);
        }

        Err(unclosed(&value))
    }
}

struct VarSpec {
    name: String,
    fallback: Fallback,
}

enum Fallback {
    Empty,
    Default(String),
    Required(String),
}

fn unclosed(fragment: &str) -> ConfigError {
    ConfigError::ParseError {
        path: std::path::PathBuf::new(),
        line: None,
        message: format!("Unclosed environment variable reference: {fragment}"),
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn load_yaml(yaml: &str) -> Result<LoadResult, ConfigError> {
        ConfigLoader::with_defaults().load_str(yaml, Path::new("test.yaml"))
    }

    #[test]
    fn loads_partial_config() {
        let result = load_yaml("session:\n  rupture_delay: 2s\n").unwrap();
        assert_eq!(result.config.session.rupture_delay, Duration::from_secs(2));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn empty_file_is_an_error() {
        let err = load_yaml("# nothing here\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn bom_is_stripped() {
        let result = load_yaml("\u{feff}server:\n  bind: \"127.0.0.1:4000\"\n").unwrap();
        assert_eq!(result.config.server.bind, "127.0.0.1:4000");
    }

    #[test]
    fn syntax_error_reports_line() {
        let err = load_yaml("server:\n  bind: [unclosed\n").unwrap_err();
        match err {
            ConfigError::ParseError { line, path, .. } => {
                assert!(line.is_some());
                assert_eq!(path, Path::new("test.yaml"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn validation_errors_surface() {
        let err = load_yaml("server:\n  broadcast_capacity: 0\n").unwrap_err();
        match err {
            ConfigError::ValidationError { errors, path } => {
                assert_eq!(path, "test.yaml");
                assert_eq!(errors[0].path, "server.broadcast_capacity");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn validation_warnings_become_load_warnings() {
        let yaml = "session:\n  gaze_start_pressure: 0\n  gaze_hold_pressure: 0\n";
        let result = load_yaml(yaml).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(
            result.warnings[0].location.as_deref(),
            Some("session.gaze_hold_pressure")
        );
    }

    #[test]
    fn env_default_used_when_unset() {
        let yaml = "server:\n  bind: \"${RUPTURE_TEST_UNSET_BIND:-127.0.0.1:4100}\"\n";
        let result = load_yaml(yaml).unwrap();
        assert_eq!(result.config.server.bind, "127.0.0.1:4100");
    }

    #[test]
    fn env_required_fails_when_unset() {
        let yaml = "server:\n  bind: \"${RUPTURE_TEST_UNSET_REQUIRED:?gallery port}\"\n";
        let err = load_yaml(yaml).unwrap_err();
        match err {
            ConfigError::EnvVarNotSet { var, location } => {
                assert_eq!(var, "RUPTURE_TEST_UNSET_REQUIRED");
                assert_eq!(location, "gallery port");
            }
            other => panic!("expected EnvVarNotSet, got {other:?}"),
        }
    }

    #[test]
    fn env_missing_without_default_warns() {
        let mut sub = EnvSubstitution::new();
        let out = sub
            .substitute("a: \"${RUPTURE_TEST_UNSET_PLAIN}\"", Path::new("x.yaml"))
            .unwrap();
        assert_eq!(out, "a: \"\"");
        assert_eq!(sub.warnings.len(), 1);
    }

    #[test]
    fn dollar_escape() {
        let mut sub = EnvSubstitution::new();
        let out = sub.substitute("price: $$5 and $x", Path::new("x.yaml")).unwrap();
        assert_eq!(out, "price: $5 and $x");
    }

    #[test]
    fn nested_braces_in_default() {
        let mut sub = EnvSubstitution::new();
        let out = sub
            .substitute("${RUPTURE_TEST_UNSET_NESTED:-{a}}", Path::new("x.yaml"))
            .unwrap();
        assert_eq!(out, "{a}");
    }

    #[test]
    fn unclosed_reference_reports_path() {
        let err = load_yaml("bind: ${OPEN").unwrap_err();
        match err {
            ConfigError::ParseError { path, message, .. } => {
                assert_eq!(path, Path::new("test.yaml"));
                assert!(message.contains("Unclosed"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file() {
        let err = ConfigLoader::with_defaults()
            .load(Path::new("/no/such/installation.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }

    #[test]
    fn oversized_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "session:\n  seed: 7").unwrap();
        let loader = ConfigLoader::new(LoaderOptions { max_config_size: 4 });
        let err = loader.load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "session:\n  seed: 7\n  experiencer_controls_only: true").unwrap();
        let result = ConfigLoader::with_defaults().load(file.path()).unwrap();
        assert_eq!(result.config.session.seed, Some(7));
        assert!(result.config.session.experiencer_controls_only);
    }
}
