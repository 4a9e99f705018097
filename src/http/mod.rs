//! HTTP surface: integration endpoints, record-store endpoints and the cron hook.

mod error;
mod handlers;

pub use error::{status_for, ApiError};

use crate::errors::{AppError, AppResult};
use crate::service::PnlService;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PnlService>,
}

pub fn build_router(service: Arc<PnlService>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/integrations/google/auth", get(handlers::google_auth))
        .route("/api/integrations/google/callback", get(handlers::google_callback))
        .route("/api/clients", post(handlers::create_client).get(handlers::list_clients))
        .route("/api/clients/:client_id", get(handlers::get_client))
        .route(
            "/api/clients/:client_id/financial-profile",
            put(handlers::save_financial_profile),
        )
        .route("/api/clients/:client_id/metrics", post(handlers::record_metrics))
        .route("/api/clients/:client_id/auto-sync", put(handlers::set_auto_sync))
        .route(
            "/api/clients/:client_id/google-sheets/create",
            post(handlers::create_sheet),
        )
        .route("/api/clients/:client_id/google-sheets/sync", post(handlers::sync_sheet))
        .route(
            "/api/clients/:client_id/google-sheets/status",
            get(handlers::sheet_status),
        )
        .route("/api/clients/:client_id/pnl", get(handlers::pnl_preview))
        .route("/api/cron/sync-google-sheets", get(handlers::cron_sync))
        .with_state(AppState { service })
}

/// Serves until SIGTERM/SIGINT, then lets in-flight requests finish.
pub async fn serve(service: Arc<PnlService>, listener: TcpListener) -> AppResult<()> {
    let app = build_router(service);
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .map_err(|error| AppError::Internal(format!("server failed: {error}")))
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                tracing::warn!("could not register signal handlers; falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
}
