//! # Relay Data Model
//!
//! A [`ServerRecord`] is built fresh from one feed row on every cycle and is
//! never mutated after extraction. Rows already persisted come back as
//! [`StoredEndpoint`]s, which carry only the columns that identify a server
//! on disk.

use chrono::{DateTime, Utc};

/// Minimum number of columns a feed row must carry before positional
/// extraction is attempted. Column 14, the configuration blob, is the
/// highest index read.
pub const MIN_FEED_COLUMNS: usize = 15;

/// One relay endpoint parsed and decoded from a feed row.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRecord {
    /// Feed column 0.
    pub hostname: String,
    /// Fresh v4 identifier assigned at extraction time. Regenerated on
    /// every cycle, so it must never be used to correlate records across
    /// runs.
    pub uuid: String,
    /// Address from the last `remote` directive in the decoded blob. Empty
    /// when the blob carries no parseable directive, in which case the
    /// record cannot pass a liveness probe.
    pub ip: String,
    /// Port from the last `remote` directive, 0 when absent or unparseable.
    pub port: u16,
    /// Transport from the last `proto` directive ("tcp" or "udp").
    pub proto: String,
    pub country_long: String,
    pub country_short: String,
    pub score: i64,
    pub ping: i64,
    pub speed: i64,
    pub num_vpn_sessions: i64,
    pub uptime: i64,
    pub total_users: i64,
    pub total_traffic: i64,
    /// Decoded plaintext OpenVPN configuration, usually multi-line.
    pub conf_data: String,
    /// Always true at creation time.
    pub enabled: bool,
    /// Timestamp of extraction.
    pub created_at: DateTime<Utc>,
}

/// The identity columns of a persisted server, read back for staleness
/// checks. Deletion keys on exactly these four columns; `uuid` plays no
/// part in identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredEndpoint {
    pub ip: String,
    pub proto: String,
    pub conf_data: String,
    pub port: u16,
}

impl StoredEndpoint {
    pub fn from_record(record: &ServerRecord) -> Self {
        Self {
            ip: record.ip.clone(),
            proto: record.proto.clone(),
            conf_data: record.conf_data.clone(),
            port: record.port,
        }
    }
}

/// Lenient integer parsing for the feed statistics columns. The upstream
/// list routinely carries empty or junk values, so failures collapse to
/// zero rather than poisoning the row.
pub(crate) fn parse_i64_or_zero(raw: &str) -> i64 {
    match raw.trim().parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            tracing::debug!(value = raw, "unparseable integer field, defaulting to zero");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integers() {
        assert_eq!(parse_i64_or_zero("42"), 42);
        assert_eq!(parse_i64_or_zero("-7"), -7);
        assert_eq!(parse_i64_or_zero(" 1368749 "), 1368749);
    }

    #[test]
    fn junk_collapses_to_zero() {
        assert_eq!(parse_i64_or_zero(""), 0);
        assert_eq!(parse_i64_or_zero("-"), 0);
        assert_eq!(parse_i64_or_zero("12.5"), 0);
        assert_eq!(parse_i64_or_zero("fast"), 0);
    }
}
