pub mod batch;
pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod google;
pub mod http;
mod locks;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod provisioner;
mod redaction;
pub mod report;
pub mod secrets;
pub mod service;
pub mod sync;

use crate::config::ServiceConfig;
use crate::errors::{AppError, AppResult};
use crate::service::PnlService;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Starts the service: opens the store, spawns the auto-sync loop when
/// configured and serves HTTP until a shutdown signal arrives.
pub async fn run(config: ServiceConfig) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| AppError::Io(format!("failed to bind {}: {error}", config.bind_addr)))?;
    let service = PnlService::from_config(config)?;

    let auto_sync = service.start_auto_sync();
    match listener.local_addr() {
        Ok(addr) => tracing::info!(addr = %addr, auto_sync = auto_sync.is_some(), "listening"),
        Err(error) => tracing::warn!(error = %error, "listener has no local address"),
    }

    let result = http::serve(service, listener).await;
    if let Some(handle) = auto_sync {
        handle.abort();
    }
    result
}

/// JSON logs to a daily rolling file under `<data_dir>/logs`, or to stdout
/// when no data dir is configured.
pub fn init_tracing(data_dir: Option<&Path>) -> Result<(), String> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let Some(data_dir) = data_dir else {
        return tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .map_err(|error| error.to_string());
    };

    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "pnl-sync.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
