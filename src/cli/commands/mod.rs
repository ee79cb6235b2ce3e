//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod serve;
pub mod validate;
pub mod version;

use crate::cli::args::{Cli, Commands};
use crate::error::{ExitCode, RuptureError};

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// Returns the process exit code on success. `serve` reports how it was
/// stopped through this code (130 after SIGINT, 143 after SIGTERM).
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli) -> Result<i32, RuptureError> {
    match cli.command {
        Commands::Serve(args) => serve::run(&args).await,
        Commands::Validate(args) => {
            validate::run(&args)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version(args) => {
            version::run(&args);
            Ok(ExitCode::SUCCESS)
        }
    }
}
