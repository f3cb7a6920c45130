//! Ancillary HTTP listeners.
//!
//! Health and metrics run on independent ports and only read shared state:
//! the health handler pings the store through the pool, the metrics handler
//! renders the cycle counters. Neither blocks, nor is blocked by, a running
//! reconciliation cycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use lib_vpngate::metrics::CycleMetrics;
use lib_vpngate::store::ServerStore;

/// Shared state for the health handler.
pub struct HealthState {
    pub store: Arc<dyn ServerStore>,
    /// Upper bound for the database ping.
    pub timeout: Duration,
}

pub fn health_router(state: Arc<HealthState>, path: &str) -> Router {
    Router::new().route(path, get(health_handler)).with_state(state)
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match tokio::time::timeout(state.timeout, state.store.ping()).await {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(json!({"status": "UP", "database": "reachable"})),
        ),
        Ok(Err(e)) => {
            warn!(error = %e, "health check database ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "DOWN", "database": e.to_string()})),
            )
        }
        Err(_) => {
            warn!("health check database ping timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "DOWN", "database": "ping timed out"})),
            )
        }
    }
}

pub fn metrics_router(metrics: Arc<CycleMetrics>, path: &str) -> Router {
    Router::new().route(path, get(metrics_handler)).with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<CycleMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.gather(),
    )
}

/// Binds and serves a router. A listener that cannot bind is a startup
/// failure; the caller decides how fatal that is.
pub async fn serve(router: Router, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listener up and running");
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}
