//! `validate` command
//!
//! Loads each configuration file through the full loader pipeline and
//! reports the outcome without starting the server.

use crate::cli::args::ValidateArgs;
use crate::config::loader::ConfigLoader;
use crate::error::{ConfigError, RuptureError, Severity, ValidationIssue};

/// Validate configuration files without starting the server.
///
/// Stops at the first file that fails.
///
/// # Errors
///
/// Returns an I/O error if a file does not exist, or a config error if
/// loading or validation fails. With `--strict`, warnings fail as well.
pub fn run(args: &ValidateArgs) -> Result<(), RuptureError> {
    let loader = ConfigLoader::with_defaults();

    for path in &args.files {
        if !path.exists() {
            return Err(RuptureError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )));
        }
        tracing::info!(file = %path.display(), "validating configuration");

        let load_result = loader.load(path)?;

        for warning in &load_result.warnings {
            tracing::warn!(
                location = warning.location.as_deref().unwrap_or("<unknown>"),
                "{}",
                warning.message
            );
        }

        if args.strict && !load_result.warnings.is_empty() {
            let errors = load_result
                .warnings
                .into_iter()
                .map(|w| ValidationIssue {
                    path: w.location.unwrap_or_default(),
                    message: w.message,
                    severity: Severity::Error,
                })
                .collect();
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors,
            }
            .into());
        }

        println!("{}: valid", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;
    use crate::error::ExitCode;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn args(files: Vec<PathBuf>, strict: bool) -> ValidateArgs {
        ValidateArgs { files, strict }
    }

    #[test]
    fn valid_file_passes() {
        let file = write_config("session:\n  rupture_delay: 2s\n");
        assert!(run(&args(vec![file.path().to_path_buf()], false)).is_ok());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = run(&args(vec![PathBuf::from("/nope/gallery.yaml")], false)).unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn invalid_file_is_config_error() {
        let file = write_config("session:\n  thresholds: { unstable: 50, critical: 40 }\n");
        let err = run(&args(vec![file.path().to_path_buf()], false)).unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn strict_rejects_warnings() {
        let file = write_config("session:\n  gaze_start_pressure: 0\n  gaze_hold_pressure: 0\n");
        assert!(run(&args(vec![file.path().to_path_buf()], false)).is_ok());
        let err = run(&args(vec![file.path().to_path_buf()], true)).unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }
}
