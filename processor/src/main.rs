//! # vpngate-processor
//!
//! Service entrypoint. Wires together logging, configuration, the store
//! pool and the ancillary listeners, then drives the reconciliation cycle
//! on a fixed interval: once immediately at startup, then once per tick.

mod config;
mod web;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lib_vpngate::metrics::CycleMetrics;
use lib_vpngate::reconciler::Reconciler;
use lib_vpngate::store::{PgServerStore, ServerStore};

use config::AppConfig;

fn setup_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default tracing subscriber");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env files before anything else reads the environment.
    dotenvy::dotenv().ok();
    setup_logging();

    let cfg = AppConfig::parse();
    info!(
        feed_url = %cfg.feed_url,
        interval_min = cfg.ticker_interval_min,
        dial_timeout_s = cfg.dial_timeout_seconds,
        "configuration loaded"
    );

    let store = PgServerStore::connect(&cfg.db_url, cfg.db_max_open_conn)
        .context("failed to create database pool")?;
    store
        .ensure_schema()
        .await
        .context("failed to ensure servers schema")?;
    let store: Arc<dyn ServerStore> = Arc::new(store);
    info!("database connection pool created");

    let metrics = Arc::new(CycleMetrics::new().context("failed to register cycle counters")?);

    // Ancillary listeners run independently of the reconciliation cycle and
    // only read shared state. A listener that cannot bind takes the process
    // down with it.
    let health_state = Arc::new(web::HealthState {
        store: store.clone(),
        timeout: Duration::from_secs(cfg.health_timeout_seconds),
    });
    let health_router = web::health_router(health_state, &cfg.health_endpoint);
    let health_port = cfg.health_port;
    tokio::spawn(async move {
        if let Err(e) = web::serve(health_router, health_port).await {
            error!(port = health_port, error = %e, "health listener failed");
            std::process::exit(1);
        }
    });

    let metrics_router = web::metrics_router(metrics.clone(), &cfg.metrics_endpoint);
    let metrics_port = cfg.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = web::serve(metrics_router, metrics_port).await {
            error!(port = metrics_port, error = %e, "metrics listener failed");
            std::process::exit(1);
        }
    });

    let reconciler = Reconciler::new(
        store,
        metrics,
        cfg.feed_url.clone(),
        Duration::from_secs(cfg.dial_timeout_seconds),
    );

    // The first tick completes immediately, which covers the instant run
    // before the interval kicks in. One cycle in flight at a time; an
    // overrunning cycle delays the next tick instead of stacking.
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.ticker_interval_min * 60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        reconciler.run_cycle().await;
    }
}
