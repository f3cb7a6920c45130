//! # Persistence Layer
//!
//! The `servers` table behind a trait seam so the reconciler never touches
//! a concrete driver. The production implementation pools connections with
//! `deadpool_postgres` and executes through `tokio-postgres`.
//!
//! Upsert conflict policy: insert-or-replace-entirely, keyed on the primary
//! id. A key collision overwrites every column of the existing physical row
//! with the incoming record.

use async_trait::async_trait;
use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use thiserror::Error;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;
use tracing::debug;

use crate::model::{ServerRecord, StoredEndpoint};

pub const SQL_SELECT_SERVERS: &str = "SELECT ip, proto, conf_data, port FROM servers";
pub const SQL_DELETE_SERVER: &str =
    "DELETE FROM servers WHERE ip = $1 AND conf_data = $2 AND proto = $3 AND port = $4";

const SQL_CREATE_SERVERS: &str = "CREATE TABLE IF NOT EXISTS servers (
    id INT PRIMARY KEY,
    uuid TEXT NOT NULL,
    hostname TEXT NOT NULL,
    ip TEXT NOT NULL,
    port INT NOT NULL,
    conf_data TEXT NOT NULL,
    proto TEXT NOT NULL,
    enabled BOOL NOT NULL,
    score BIGINT NOT NULL,
    ping BIGINT NOT NULL,
    speed BIGINT NOT NULL,
    country_long TEXT NOT NULL,
    country_short TEXT NOT NULL,
    num_vpn_sessions BIGINT NOT NULL,
    uptime BIGINT NOT NULL,
    total_users BIGINT NOT NULL,
    total_traffic BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
)";

/// Columns written per record by the multi-row upsert.
const UPSERT_COLUMNS: usize = 18;

/// Custom error types for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to build connection pool: {0}")]
    PoolBuild(String),
    #[error("failed to acquire connection: {0}")]
    Acquire(#[from] deadpool_postgres::PoolError),
    #[error("query execution failed: {0}")]
    Query(#[from] tokio_postgres::Error),
}

/// The operations the reconciliation cycle needs from durable storage.
///
/// Passed explicitly to every component that persists; there is no
/// process-wide database handle.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Reads the identity columns of every persisted server.
    async fn list_endpoints(&self) -> Result<Vec<StoredEndpoint>, StoreError>;

    /// Deletes the row matching the identity tuple exactly.
    async fn delete_endpoint(&self, endpoint: &StoredEndpoint) -> Result<(), StoreError>;

    /// Persists the batch in one statement, assigning 1-based positional
    /// ids in batch order. The id is a throwaway sequence number; a
    /// collision on it replaces the existing row entirely.
    async fn upsert_batch(&self, records: &[ServerRecord]) -> Result<(), StoreError>;

    /// Cheap connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed [`ServerStore`] over a deadpool connection pool.
pub struct PgServerStore {
    pool: Pool,
}

impl PgServerStore {
    /// Builds the connection pool. Fails fast; a service that cannot reach
    /// its store at startup has nothing to do.
    pub fn connect(db_url: &str, max_pool_size: usize) -> Result<Self, StoreError> {
        let mut cfg = DeadpoolConfig::new();
        cfg.url = Some(db_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(max_pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::PoolBuild(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Creates the `servers` table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.batch_execute(SQL_CREATE_SERVERS).await?;
        Ok(())
    }
}

#[async_trait]
impl ServerStore for PgServerStore {
    async fn list_endpoints(&self) -> Result<Vec<StoredEndpoint>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client.query(SQL_SELECT_SERVERS, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| StoredEndpoint {
                ip: row.get(0),
                proto: row.get(1),
                conf_data: row.get(2),
                port: row.get::<_, i32>(3) as u16,
            })
            .collect())
    }

    async fn delete_endpoint(&self, endpoint: &StoredEndpoint) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let port = i32::from(endpoint.port);
        let stmt = client.prepare_cached(SQL_DELETE_SERVER).await?;
        client
            .execute(&stmt, &[&endpoint.ip, &endpoint.conf_data, &endpoint.proto, &port])
            .await?;
        Ok(())
    }

    async fn upsert_batch(&self, records: &[ServerRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let client = self.pool.get().await?;
        let sql = build_upsert_statement(records.len());

        // Keep the owned values the parameter slice borrows from.
        let ids: Vec<i32> = (1..=records.len() as i32).collect();
        let ports: Vec<i32> = records.iter().map(|r| i32::from(r.port)).collect();

        let mut params: Vec<&(dyn ToSql + Sync)> =
            Vec::with_capacity(records.len() * UPSERT_COLUMNS);
        for (index, record) in records.iter().enumerate() {
            params.push(&ids[index]);
            params.push(&record.uuid);
            params.push(&record.hostname);
            params.push(&record.ip);
            params.push(&ports[index]);
            params.push(&record.conf_data);
            params.push(&record.proto);
            params.push(&record.enabled);
            params.push(&record.score);
            params.push(&record.ping);
            params.push(&record.speed);
            params.push(&record.country_long);
            params.push(&record.country_short);
            params.push(&record.num_vpn_sessions);
            params.push(&record.uptime);
            params.push(&record.total_users);
            params.push(&record.total_traffic);
            params.push(&record.created_at);
        }

        let stmt = client.prepare_cached(&sql).await?;
        let written = client.execute(&stmt, &params).await?;
        debug!(rows = written, "executed multi-row upsert");
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.execute("SELECT 1", &[]).await?;
        Ok(())
    }
}

/// Builds the multi-row upsert statement for `rows` records.
///
/// Placeholders run `$1..$n` in row-major order, 18 per record. The
/// `ON CONFLICT` clause updates every non-key column from the incoming row,
/// which is what makes a collision a full replacement.
fn build_upsert_statement(rows: usize) -> String {
    let mut sql = String::from(
        "INSERT INTO servers (id, uuid, hostname, ip, port, conf_data, proto, enabled, score, \
         ping, speed, country_long, country_short, num_vpn_sessions, uptime, total_users, \
         total_traffic, created_at) VALUES ",
    );
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for column in 0..UPSERT_COLUMNS {
            if column > 0 {
                sql.push_str(", ");
            }
            sql.push('$');
            sql.push_str(&(row * UPSERT_COLUMNS + column + 1).to_string());
        }
        sql.push(')');
    }
    sql.push_str(
        " ON CONFLICT (id) DO UPDATE SET uuid = EXCLUDED.uuid, hostname = EXCLUDED.hostname, \
         ip = EXCLUDED.ip, port = EXCLUDED.port, conf_data = EXCLUDED.conf_data, \
         proto = EXCLUDED.proto, enabled = EXCLUDED.enabled, score = EXCLUDED.score, \
         ping = EXCLUDED.ping, speed = EXCLUDED.speed, country_long = EXCLUDED.country_long, \
         country_short = EXCLUDED.country_short, num_vpn_sessions = EXCLUDED.num_vpn_sessions, \
         uptime = EXCLUDED.uptime, total_users = EXCLUDED.total_users, \
         total_traffic = EXCLUDED.total_traffic, created_at = EXCLUDED.created_at",
    );
    sql
}
