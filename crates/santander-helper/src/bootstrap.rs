//! Daemon start-up: configuration, logging, socket binding and the serve loop.

use std::fs;
use std::future::Future;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;

use santander_config::{HelperConfig, ProcessEnv};
use santander_events::EventBus;
use santander_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics, init_logging};
use tokio::net::UnixListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{HelperError, HelperResult};
use crate::server::HelperServer;

/// Mode of the listening socket; callers run unprivileged.
const SOCKET_MODE: u32 = 0o666;

/// Entry point for the `santander-helperd` binary.
///
/// # Errors
///
/// Returns an error if configuration, logging or the socket cannot be set up.
pub async fn run_helper() -> HelperResult<()> {
    let config =
        HelperConfig::load(&ProcessEnv).map_err(|source| HelperError::Config { source })?;

    let format = match config.logging.format.as_deref() {
        Some(value) => value
            .parse::<LogFormat>()
            .map_err(|source| HelperError::Telemetry {
                operation: "telemetry.log_format",
                source,
            })?,
        None => LogFormat::infer(),
    };
    init_logging(&LoggingConfig {
        level: &config.logging.level,
        format,
        build_sha: option_env!("SANTANDER_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(|source| HelperError::Telemetry {
        operation: "telemetry.init",
        source,
    })?;
    let _context = GlobalContextGuard::new("helper");

    serve_helper(&config, shutdown_signal()).await
}

/// Bind the configured socket and serve until `shutdown` resolves, removing
/// the socket file afterwards.
///
/// # Errors
///
/// Returns an error if metrics cannot be registered or the socket cannot be bound.
pub async fn serve_helper<F>(config: &HelperConfig, shutdown: F) -> HelperResult<()>
where
    F: Future<Output = ()>,
{
    let metrics = Metrics::new().map_err(|source| HelperError::Telemetry {
        operation: "telemetry.metrics",
        source,
    })?;
    let events = EventBus::with_capacity(config.event_capacity);
    let dispatcher = Dispatcher::new(config, events, metrics.clone());
    let listener = bind_socket(&config.socket_path)?;

    info!(
        socket = %config.socket_path.display(),
        roots = ?config.allowed_roots,
        policy = config.overlap_policy.as_str(),
        "helper listening"
    );
    if config.allowed_roots.is_empty() {
        warn!("no allowed roots configured; every request will be rejected");
    }

    HelperServer::new(dispatcher)
        .serve_unix(listener, shutdown)
        .await;

    if let Err(err) = fs::remove_file(&config.socket_path)
        && err.kind() != io::ErrorKind::NotFound
    {
        warn!(error = %err, "failed to remove helper socket");
    }
    match metrics_report(&metrics) {
        Ok(report) => info!(metrics = %report, "helper stopped"),
        Err(err) => {
            warn!(error = %err, "failed to render helper metrics");
            info!("helper stopped");
        }
    }
    Ok(())
}

/// Prometheus text for everything the helper recorded.
fn metrics_report(metrics: &Metrics) -> HelperResult<String> {
    metrics.render().map_err(|source| HelperError::Telemetry {
        operation: "telemetry.render",
        source,
    })
}

/// Bind a Unix socket at `path`, replacing a stale socket left by an earlier run.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created, a non-socket
/// file occupies `path`, or binding fails.
pub fn bind_socket(path: &Path) -> HelperResult<UnixListener> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| HelperError::io("socket.create_parent", parent, source))?;
    }
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_socket() => {
            fs::remove_file(path)
                .map_err(|source| HelperError::io("socket.remove_stale", path, source))?;
        }
        Ok(_) => {
            return Err(HelperError::io(
                "socket.remove_stale",
                path,
                io::Error::from(io::ErrorKind::AlreadyExists),
            ));
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(source) => return Err(HelperError::io("socket.stat", path, source)),
    }

    let listener =
        UnixListener::bind(path).map_err(|source| HelperError::io("socket.bind", path, source))?;
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))
        .map_err(|source| HelperError::io("socket.chmod", path, source))?;
    Ok(listener)
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "ctrl-c handler failed");
            }
        }
        () = terminate => {}
    }
    info!("shutdown signal received");
}
