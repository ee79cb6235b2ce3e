//! `serve` command
//!
//! Loads configuration, starts the session hub and the WebSocket server,
//! and runs until SIGINT/SIGTERM or until the listener exits.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::cli::args::ServeArgs;
use crate::config::loader::ConfigLoader;
use crate::config::schema::InstallationConfig;
use crate::config::validation::Validator;
use crate::error::{ConfigError, ExitCode, RuptureError};
use crate::hub::SessionHub;
use crate::observability::{Event, EventEmitter, StopReason};
use crate::transport::ws::{WsConfig, WsServer, parse_bind_addr};

/// Run the installation server.
///
/// Returns the exit code matching how the server stopped.
///
/// # Errors
///
/// Returns a config error if the configuration cannot be loaded, an I/O
/// error if the metrics endpoint or events file cannot be opened, or a
/// transport error if the listener cannot bind.
pub async fn run(args: &ServeArgs) -> Result<i32, RuptureError> {
    let config = resolve_config(args)?;
    let bind_addr = parse_bind_addr(&config.server.bind)?;

    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    let events = Arc::new(match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    });

    let cancel = CancellationToken::new();
    let (hub, hub_task) = SessionHub::spawn(
        config.session.clone(),
        config.server.broadcast_capacity,
        Arc::clone(&events),
        cancel.clone(),
    );

    let ws_config = WsConfig {
        bind_addr,
        max_message_size: config.server.max_message_size,
        public_dir: config.server.public_dir.clone(),
    };
    let (mut server, bound_addr) = match WsServer::bind(ws_config, hub, cancel.clone()).await {
        Ok(bound) => bound,
        Err(e) => {
            cancel.cancel();
            let _ = hub_task.await;
            return Err(e.into());
        }
    };

    events.emit(Event::ServerStarted {
        timestamp: Utc::now(),
        bind: bound_addr.to_string(),
    });

    let reason = tokio::select! {
        reason = shutdown_signal() => reason,
        () = server.closed() => StopReason::ListenerClosed,
    };
    tracing::info!(
        ?reason,
        open_connections = server.connection_count(),
        "stopping installation server"
    );

    cancel.cancel();
    if reason != StopReason::ListenerClosed {
        server.join().await;
    }
    let _ = hub_task.await;

    events.emit(Event::ServerStopped {
        timestamp: Utc::now(),
        reason,
    });
    if let Some(path) = &args.events_file {
        tracing::info!(
            events = events.event_count(),
            path = %path.display(),
            "event log closed"
        );
    }

    Ok(exit_code_for(reason))
}

/// Loads the configuration file (if any) and applies command-line overrides.
fn resolve_config(args: &ServeArgs) -> Result<InstallationConfig, RuptureError> {
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!(config = %path.display(), "loading configuration");
            let load_result = ConfigLoader::with_defaults().load(path)?;
            for warning in &load_result.warnings {
                tracing::warn!(
                    location = warning.location.as_deref().unwrap_or("<unknown>"),
                    "{}",
                    warning.message
                );
            }
            InstallationConfig::clone(&load_result.config)
        }
        None => InstallationConfig::default(),
    };

    if !apply_overrides(&mut config, args) {
        return Ok(config);
    }

    // Overrides bypass the loader, so check the merged result.
    let result = Validator::new().validate(&config);
    if result.has_errors() {
        return Err(ConfigError::ValidationError {
            path: "command line".to_string(),
            errors: result.errors,
        }
        .into());
    }
    for issue in &result.warnings {
        tracing::warn!(location = %issue.path, "{}", issue.message);
    }
    Ok(config)
}

/// Applies CLI overrides. Returns `true` if anything changed.
fn apply_overrides(config: &mut InstallationConfig, args: &ServeArgs) -> bool {
    let mut changed = false;
    if let Some(bind) = &args.bind {
        config.server.bind.clone_from(bind);
        changed = true;
    }
    if let Some(dir) = &args.public_dir {
        config.server.public_dir = Some(dir.clone());
        changed = true;
    }
    if let Some(seed) = args.seed {
        config.session.seed = Some(seed);
        changed = true;
    }
    changed
}

/// Waits for SIGINT or SIGTERM.
///
/// If the SIGTERM handler cannot be registered only SIGINT is awaited.
#[cfg(unix)]
pub async fn shutdown_signal() -> StopReason {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => StopReason::Interrupted,
            _ = sigterm.recv() => StopReason::Terminated,
        },
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            StopReason::Interrupted
        }
    }
}

/// Waits for Ctrl+C.
#[cfg(not(unix))]
pub async fn shutdown_signal() -> StopReason {
    let _ = tokio::signal::ctrl_c().await;
    StopReason::Interrupted
}

/// Maps a stop reason to the process exit code.
#[must_use]
pub const fn exit_code_for(reason: StopReason) -> i32 {
    match reason {
        StopReason::Interrupted => ExitCode::INTERRUPTED,
        StopReason::Terminated => ExitCode::TERMINATED,
        StopReason::ListenerClosed => ExitCode::ERROR,
    }
}
