//! # Cycle Counters
//!
//! Prometheus counters for the reconciliation outcomes, rendered in the
//! text exposition format by the metrics listener. Held behind an explicit
//! handle that is passed to whoever needs it; nothing registers into a
//! global registry.

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Counter registry shared by the reconciler and the metrics listener.
pub struct CycleMetrics {
    registry: Registry,
    /// Servers persisted by the upsert phase.
    pub inserted: IntCounter,
    /// Servers dropped by the liveness filter during the upsert phase.
    pub skipped: IntCounter,
    /// Persistence statement failures, upsert and delete alike.
    pub failed: IntCounter,
}

impl CycleMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let inserted = IntCounter::new(
            "inserted_server_count",
            "Servers inserted on scheduled executions",
        )?;
        let skipped = IntCounter::new(
            "skipped_server_count",
            "Servers skipped on scheduled executions",
        )?;
        let failed = IntCounter::new(
            "failed_server_count",
            "Server persistence failures on scheduled executions",
        )?;
        registry.register(Box::new(inserted.clone()))?;
        registry.register(Box::new(skipped.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        Ok(Self {
            registry,
            inserted,
            skipped,
            failed,
        })
    }

    /// Renders every registered counter in the text exposition format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
