//! # vpngate relay harvester core
//!
//! The reconciliation pipeline for a public OpenVPN relay list: fetch the
//! feed, extract per-server records from base64-encoded configuration blobs,
//! probe each endpoint for liveness, and reconcile the survivors against the
//! `servers` table.
//!
//! One cycle runs fetch → extract → delete-stale → upsert-fresh. The
//! pipeline keeps no state between cycles beyond what is persisted; every
//! run starts from a fresh fetch and reconciles idempotently.

// Declare the modules to re-export
pub mod extract;
pub mod feed;
pub mod metrics;
pub mod model;
pub mod probe;
pub mod reconciler;
pub mod store;

// Re-export the main entry points
pub use metrics::CycleMetrics;
pub use model::{ServerRecord, StoredEndpoint, MIN_FEED_COLUMNS};
pub use reconciler::{CycleOutcome, Reconciler};
pub use store::{PgServerStore, ServerStore, StoreError};
