//! # Feed Acquisition
//!
//! Fetches the relay list as comma-delimited text and splits it into raw
//! field rows. Comment and header lines are dropped here; column-count
//! validation happens later, during extraction.

use thiserror::Error;
use tracing::{error, info};

/// Why the feed could not be retrieved.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Fetches the feed and returns its raw field rows in feed order.
///
/// Transport and body-read failures are not fatal: they are logged and
/// collapse to an empty row set, so the caller's cycle degenerates to a
/// staleness-only pass instead of aborting. One attempt per call, no retry,
/// no timeout beyond the transport default.
pub async fn fetch_rows(client: &reqwest::Client, url: &str) -> Vec<Vec<String>> {
    match fetch_body(client, url).await {
        Ok(body) => {
            let rows = parse_rows(&body);
            info!(url, rows = rows.len(), "fetched server list");
            rows
        }
        Err(e) => {
            error!(url, error = %e, "failed to fetch server list, continuing with empty batch");
            Vec::new()
        }
    }
}

async fn fetch_body(client: &reqwest::Client, url: &str) -> Result<String, FeedError> {
    let response = client.get(url).send().await?;
    Ok(response.text().await?)
}

/// Splits the body into comma-delimited rows.
///
/// A row whose first field begins with `*` or `#` is a comment or header
/// line and is discarded regardless of its content. Blank lines are
/// discarded as well. The feed never quotes fields, so a plain split is
/// sufficient.
pub fn parse_rows(body: &str) -> Vec<Vec<String>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split(',').map(str::to_string).collect::<Vec<String>>())
        .filter(|fields| !fields[0].starts_with('*') && !fields[0].starts_with('#'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = "\
*vpn_servers
#HostName,IP,Score,Ping,Speed,CountryLong,CountryShort,NumVpnSessions,Uptime,TotalUsers,TotalTraffic,LogType,Operator,Message,OpenVPN_ConfigData_Base64
host-a,1.2.3.4,100,10,1000,Japan,JP,5,100,50,9000,2weeks,owner,,QUJD
host-b,5.6.7.8,200,20,2000,Korea,KR,6,200,60,8000,2weeks,owner,,REVG
*
";

    #[test]
    fn drops_comment_and_header_rows() {
        let rows = parse_rows(FEED);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "host-a");
        assert_eq!(rows[1][0], "host-b");
    }

    #[test]
    fn preserves_feed_order_and_fields() {
        let rows = parse_rows("b,2,x\na,1,y\n");
        assert_eq!(rows[0], vec!["b", "2", "x"]);
        assert_eq!(rows[1], vec!["a", "1", "y"]);
    }

    #[test]
    fn empty_body_yields_no_rows() {
        assert!(parse_rows("").is_empty());
        assert!(parse_rows("\n\n").is_empty());
    }

    #[tokio::test]
    async fn fetches_rows_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/iphone/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/api/iphone/", server.uri());
        let rows = fetch_rows(&client, &url).await;
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_collapses_to_empty_batch() {
        // Bind and drop a listener to get a port with nothing behind it.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/api/iphone/");
        let rows = fetch_rows(&client, &url).await;
        assert!(rows.is_empty());
    }
}
