//! # Reconciliation Cycle
//!
//! The driver of one full pass: fetch the feed, extract records, delete
//! persisted servers that have gone stale, then upsert the freshly fetched
//! survivors. The same liveness filter guards both phases, so a row is
//! deleted under exactly the conditions that would have kept it from being
//! inserted.
//!
//! The reconciler is an explicit context object: it owns its store handle,
//! HTTP client and metrics reference, and keeps no state between cycles
//! beyond what the store persists.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::extract;
use crate::feed;
use crate::metrics::CycleMetrics;
use crate::model::ServerRecord;
use crate::probe;
use crate::store::ServerStore;

/// Outcome counts for one reconciliation cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Stale rows removed during the staleness phase.
    pub removed: usize,
    /// Records persisted during the upsert phase.
    pub inserted: usize,
    /// Records dropped by the liveness filter during the upsert phase.
    pub skipped: usize,
    /// Persistence statement failures across both phases.
    pub failed: usize,
}

/// One reconciliation pipeline instance.
pub struct Reconciler {
    store: Arc<dyn ServerStore>,
    metrics: Arc<CycleMetrics>,
    http: reqwest::Client,
    feed_url: String,
    dial_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ServerStore>,
        metrics: Arc<CycleMetrics>,
        feed_url: String,
        dial_timeout: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            // Transport defaults only; the feed fetch carries no extra
            // timeout and no retry policy.
            http: reqwest::Client::new(),
            feed_url,
            dial_timeout,
        }
    }

    /// Runs one full cycle: fetch, extract, delete-stale, upsert-fresh.
    ///
    /// A fetch that yields nothing still runs the staleness phase, so a
    /// dead feed cannot keep dead servers alive in the store.
    pub async fn run_cycle(&self) -> CycleOutcome {
        info!("starting scheduler execution");
        let started = Instant::now();

        let rows = feed::fetch_rows(&self.http, &self.feed_url).await;
        let records = extract::records_from_rows(&rows);

        let mut outcome = CycleOutcome::default();
        self.delete_stale(&mut outcome).await;
        self.upsert_fresh(&records, &mut outcome).await;

        info!(
            removed = outcome.removed,
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            failed = outcome.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ending scheduler execution"
        );
        outcome
    }

    /// Staleness phase: re-probe every persisted server and delete the ones
    /// that no longer pass the liveness filter. Matching is by the exact
    /// identity tuple the row was stored under.
    pub async fn delete_stale(&self, outcome: &mut CycleOutcome) {
        info!("starting remove unreachable server operation");
        let started = Instant::now();

        let endpoints = match self.store.list_endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                error!(error = %e, "could not list stored servers, skipping staleness phase");
                return;
            }
        };

        for endpoint in &endpoints {
            let live = probe::is_insertable(
                &endpoint.ip,
                &endpoint.proto,
                &endpoint.conf_data,
                endpoint.port,
                self.dial_timeout,
            )
            .await;
            if live {
                continue;
            }

            match self.store.delete_endpoint(endpoint).await {
                Ok(()) => outcome.removed += 1,
                Err(e) => {
                    // One failed delete must not abort the rest of the pass.
                    outcome.failed += 1;
                    self.metrics.failed.inc();
                    warn!(
                        ip = %endpoint.ip,
                        proto = %endpoint.proto,
                        port = endpoint.port,
                        error = %e,
                        "failed to delete stale server"
                    );
                }
            }
        }

        info!(
            removed = outcome.removed,
            checked = endpoints.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ending remove unreachable server operation"
        );
    }

    /// Upsert phase: filter the fresh batch through the liveness check and
    /// persist the survivors in one multi-row statement, in feed order.
    pub async fn upsert_fresh(&self, records: &[ServerRecord], outcome: &mut CycleOutcome) {
        info!("starting insert reachable server operation");
        let started = Instant::now();

        let mut staged: Vec<ServerRecord> = Vec::with_capacity(records.len());
        for record in records {
            let insertable = probe::is_insertable(
                &record.ip,
                &record.proto,
                &record.conf_data,
                record.port,
                self.dial_timeout,
            )
            .await;
            if insertable {
                staged.push(record.clone());
            } else {
                outcome.skipped += 1;
                self.metrics.skipped.inc();
            }
        }

        if staged.is_empty() {
            info!(
                skipped = outcome.skipped,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "no insertable servers in this batch"
            );
            return;
        }

        match self.store.upsert_batch(&staged).await {
            Ok(()) => {
                outcome.inserted = staged.len();
                self.metrics.inserted.inc_by(staged.len() as u64);
            }
            Err(e) => {
                outcome.failed += staged.len();
                self.metrics.failed.inc_by(staged.len() as u64);
                error!(rows = staged.len(), error = %e, "failed to upsert server batch");
            }
        }

        info!(
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ending insert reachable server operation"
        );
    }
}
