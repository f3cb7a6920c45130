//! # Record Extraction
//!
//! Maps fixed feed columns onto [`ServerRecord`]s and digs the connection
//! parameters out of the base64-encoded OpenVPN configuration blob.
//! Failures are per-row: one malformed entry never poisons the batch.
//!
//! ## Column layout
//! 0 hostname, 2 score, 3 ping, 4 speed, 5/6 country long/short,
//! 7 sessions, 8 uptime, 9 total users, 10 total traffic,
//! 14 configuration blob. Rows shorter than [`MIN_FEED_COLUMNS`] fail with
//! a typed error instead of an index panic.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{parse_i64_or_zero, ServerRecord, MIN_FEED_COLUMNS};

/// Why a single feed row failed to become a record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("row has {got} columns, expected at least {min}", min = MIN_FEED_COLUMNS)]
    ShortRow { got: usize },
    #[error("configuration blob is not valid base64: {0}")]
    BadBlob(#[from] base64::DecodeError),
}

/// Builds records from raw feed rows, in feed order, skipping rows that
/// fail to parse.
pub fn records_from_rows(rows: &[Vec<String>]) -> Vec<ServerRecord> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        match record_from_row(row) {
            Ok(record) => records.push(record),
            Err(e) => {
                let hostname = row.first().map(String::as_str).unwrap_or_default();
                warn!(hostname, error = %e, "skipping feed row");
            }
        }
    }
    info!(created = records.len(), rows = rows.len(), "created records from feed rows");
    records
}

/// Extracts one record from one feed row.
pub fn record_from_row(row: &[String]) -> Result<ServerRecord, RecordError> {
    if row.len() < MIN_FEED_COLUMNS {
        return Err(RecordError::ShortRow { got: row.len() });
    }

    let decoded = BASE64.decode(row[14].trim())?;
    // The upstream blob is not guaranteed to be clean UTF-8.
    let conf_data = String::from_utf8_lossy(&decoded).into_owned();
    let (ip, port, proto) = scan_directives(&conf_data);

    Ok(ServerRecord {
        hostname: row[0].clone(),
        uuid: Uuid::new_v4().to_string(),
        ip,
        port,
        proto,
        country_long: row[5].clone(),
        country_short: row[6].clone(),
        score: parse_i64_or_zero(&row[2]),
        ping: parse_i64_or_zero(&row[3]),
        speed: parse_i64_or_zero(&row[4]),
        num_vpn_sessions: parse_i64_or_zero(&row[7]),
        uptime: parse_i64_or_zero(&row[8]),
        total_users: parse_i64_or_zero(&row[9]),
        total_traffic: parse_i64_or_zero(&row[10]),
        conf_data,
        enabled: true,
        created_at: Utc::now(),
    })
}

/// Scans the decoded configuration text for `remote` and `proto` directives.
///
/// When a directive repeats, the last occurrence wins: fields are
/// overwritten in line order, with no first-match short-circuit. Real-world
/// blobs are not well-formed, so a directive missing its value token leaves
/// the field as it was, and a `remote` line missing its port token yields
/// port 0. Only exact token matches count; `remote-cert-tls` is not
/// `remote`.
fn scan_directives(conf_data: &str) -> (String, u16, String) {
    let mut ip = String::new();
    let mut port = 0u16;
    let mut proto = String::new();

    for line in conf_data.lines() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("remote") => {
                if let Some(host) = tokens.next() {
                    ip = host.to_string();
                    port = tokens.next().and_then(|t| t.parse().ok()).unwrap_or(0);
                }
            }
            Some("proto") => {
                if let Some(transport) = tokens.next() {
                    proto = transport.to_string();
                }
            }
            _ => {}
        }
    }

    (ip, port, proto)
}
