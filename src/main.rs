//! `rupture` - shared-gaze installation server

use clap::Parser;

use rupture::cli::args::Cli;
use rupture::cli::commands;
use rupture::cli::commands::serve::{exit_code_for, shutdown_signal};
use rupture::observability::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format.into(), cli.verbose, cli.color);
    }

    // The first signal is handled by the running command; a second one
    // forces the process down.
    tokio::spawn(async {
        shutdown_signal().await;
        eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
        let reason = shutdown_signal().await;
        std::process::exit(exit_code_for(reason));
    });

    match commands::dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
