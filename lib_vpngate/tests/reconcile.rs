//! End-to-end tests for the reconciliation cycle, driven through a mock
//! feed server and an in-memory store that models the production conflict
//! policy (insert-or-replace-entirely, keyed on primary id).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lib_vpngate::model::{ServerRecord, StoredEndpoint};
use lib_vpngate::store::{ServerStore, StoreError};
use lib_vpngate::{CycleMetrics, Reconciler};

const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Replace-on-id store, keeping full records so tests can inspect what a
/// collision overwrote.
#[derive(Default)]
struct InMemoryStore {
    rows: Mutex<BTreeMap<i32, ServerRecord>>,
}

impl InMemoryStore {
    fn snapshot(&self) -> BTreeMap<i32, ServerRecord> {
        self.rows.lock().unwrap().clone()
    }

    fn seed(&self, id: i32, record: ServerRecord) {
        self.rows.lock().unwrap().insert(id, record);
    }
}

#[async_trait]
impl ServerStore for InMemoryStore {
    async fn list_endpoints(&self) -> Result<Vec<StoredEndpoint>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .map(StoredEndpoint::from_record)
            .collect())
    }

    async fn delete_endpoint(&self, endpoint: &StoredEndpoint) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap()
            .retain(|_, record| StoredEndpoint::from_record(record) != *endpoint);
        Ok(())
    }

    async fn upsert_batch(&self, records: &[ServerRecord]) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        for (index, record) in records.iter().enumerate() {
            rows.insert(index as i32 + 1, record.clone());
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn conf_text(port: u16, marked: bool) -> String {
    let marker = if marked {
        "#auth-user-pass\r\n"
    } else {
        "auth-user-pass credentials.txt\r\n"
    };
    format!("client\r\nproto tcp\r\nremote 127.0.0.1 {port}\r\n{marker}")
}

fn feed_row(hostname: &str, conf: &str) -> String {
    format!(
        "{hostname},127.0.0.1,100,10,1000,Japan,JP,5,1000,50,9000,2weeks,owner,,{}",
        BASE64.encode(conf.as_bytes())
    )
}

fn feed_body(rows: &[String]) -> String {
    let mut body = String::from("*vpn_servers\n#HostName,IP,Score,...\n");
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    body
}

async fn mock_feed(body: String) -> (MockServer, String) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/iphone/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    let url = format!("{}/api/iphone/", server.uri());
    (server, url)
}

fn record_for(port: u16, marked: bool) -> ServerRecord {
    let conf = conf_text(port, marked);
    ServerRecord {
        hostname: format!("seeded-{port}"),
        uuid: "seeded-uuid".to_string(),
        ip: "127.0.0.1".to_string(),
        port,
        proto: "tcp".to_string(),
        country_long: "Japan".to_string(),
        country_short: "JP".to_string(),
        score: 1,
        ping: 1,
        speed: 1,
        num_vpn_sessions: 1,
        uptime: 1,
        total_users: 1,
        total_traffic: 1,
        conf_data: conf,
        enabled: true,
        created_at: chrono::Utc::now(),
    }
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn cycle_persists_reachable_and_skips_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_port = listener.local_addr().unwrap().port();

    let rows = vec![
        feed_row("live.example", &conf_text(live_port, true)),
        feed_row("dead.example", &conf_text(closed_port(), true)),
    ];
    let (_server, url) = mock_feed(feed_body(&rows)).await;

    let store = Arc::new(InMemoryStore::default());
    let metrics = Arc::new(CycleMetrics::new().unwrap());
    let reconciler = Reconciler::new(store.clone(), metrics.clone(), url, DIAL_TIMEOUT);

    let outcome = reconciler.run_cycle().await;

    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(metrics.inserted.get(), 1);
    assert_eq!(metrics.skipped.get(), 1);

    let rows = store.snapshot();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[&1].hostname, "live.example");
    assert_eq!(rows[&1].port, live_port);
}

#[tokio::test]
async fn cycle_is_idempotent_over_unchanged_feed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_port = listener.local_addr().unwrap().port();

    let rows = vec![feed_row("live.example", &conf_text(live_port, true))];
    let (_server, url) = mock_feed(feed_body(&rows)).await;

    let store = Arc::new(InMemoryStore::default());
    let metrics = Arc::new(CycleMetrics::new().unwrap());
    let reconciler = Reconciler::new(store.clone(), metrics.clone(), url, DIAL_TIMEOUT);

    reconciler.run_cycle().await;
    let first = store.snapshot();
    reconciler.run_cycle().await;
    let second = store.snapshot();

    // Identical row set: same ids, same identities. The uuid is freshly
    // generated each extraction, which is exactly what proves the second
    // pass replaced the row instead of ignoring the collision.
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(
        StoredEndpoint::from_record(&first[&1]),
        StoredEndpoint::from_record(&second[&1])
    );
    assert_ne!(first[&1].uuid, second[&1].uuid);
}

#[tokio::test]
async fn staleness_phase_runs_even_when_feed_is_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_port = listener.local_addr().unwrap().port();
    let dead_port = closed_port();

    let store = Arc::new(InMemoryStore::default());
    store.seed(1, record_for(live_port, true));
    store.seed(2, record_for(dead_port, true));

    // Nothing listens on the feed URL, so the fetch yields an empty batch.
    let feed_url = format!("http://127.0.0.1:{}/api/iphone/", closed_port());
    let metrics = Arc::new(CycleMetrics::new().unwrap());
    let reconciler = Reconciler::new(store.clone(), metrics, feed_url, DIAL_TIMEOUT);

    let outcome = reconciler.run_cycle().await;

    assert_eq!(outcome.removed, 1);
    assert_eq!(outcome.inserted, 0);
    let rows = store.snapshot();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[&1].port, live_port);
}

#[tokio::test]
async fn staleness_phase_deletes_rows_lacking_the_marker() {
    // Reachable but no longer marked open-access: the same filter that
    // would refuse the insert removes the row.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_port = listener.local_addr().unwrap().port();

    let store = Arc::new(InMemoryStore::default());
    store.seed(1, record_for(live_port, false));

    let feed_url = format!("http://127.0.0.1:{}/api/iphone/", closed_port());
    let metrics = Arc::new(CycleMetrics::new().unwrap());
    let reconciler = Reconciler::new(store.clone(), metrics, feed_url, DIAL_TIMEOUT);

    let outcome = reconciler.run_cycle().await;

    assert_eq!(outcome.removed, 1);
    assert!(store.snapshot().is_empty());
}
