/*!
Queue-layer behavior: harvested records flow through the insert pipe into
storage, claimed proxies flow to testers and back through the update and
results pipes, and shutdown flushes and releases everything.
*/

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use proxyscan::cli::Cli;
use proxyscan::models::{ProxyProtocol, ProxyRecord, ProxyStatus, ProxyTest};
use proxyscan::queue;
use proxyscan::storage::lock::lock_token;
use proxyscan::storage::Storage;
use proxyscan::Config;

fn test_config(testers: usize) -> Config {
    let cli = Cli::try_parse_from([
        "proxyscan",
        "--proxy-scrap",
        "--tester-count",
        &testers.to_string(),
    ])
    .unwrap();
    Config::from_cli(cli).unwrap()
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not met within 10s");
}

fn record(ip: &str, port: u16) -> ProxyRecord {
    ProxyRecord {
        ip: ip.to_string(),
        port,
        protocol: ProxyProtocol::Http,
        username: None,
        password: None,
    }
}

#[tokio::test]
async fn harvested_records_reach_storage() {
    let storage = Arc::new(Storage::open_in_memory().await.unwrap());
    let interrupt = CancellationToken::new();
    let (hub, workers) = queue::start(
        &test_config(2),
        storage.clone(),
        interrupt.clone(),
        lock_token("203.0.113.1"),
    );

    // Scenario: one scraper yields a single address; exactly one row
    // appears, protocol taken from the scraper, status UNKNOWN.
    hub.insert_records(vec![record("1.2.3.4", 8080)]);

    let probe_storage = storage.clone();
    wait_until(|| {
        let storage = probe_storage.clone();
        async move { storage.count_proxies().await.unwrap() == 1 }
    })
    .await;

    let proxy = storage.get_proxy(1).await.unwrap().unwrap();
    assert_eq!(proxy.ip, "1.2.3.4");
    assert_eq!(proxy.port, 8080);
    assert_eq!(proxy.protocol, ProxyProtocol::Http);
    assert_eq!(proxy.status, ProxyStatus::Unknown);

    // Duplicates collapse onto the unique (ip, port) pair.
    hub.insert_records(vec![record("1.2.3.4", 8080), record("1.2.3.4", 8080)]);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(storage.count_proxies().await.unwrap(), 1);

    interrupt.cancel();
    workers.join().await;
}

#[tokio::test]
async fn fetch_pipe_hands_out_claimed_proxies() {
    let storage = Arc::new(Storage::open_in_memory().await.unwrap());

    storage
        .insert_bulk(&[record("1.2.3.4", 8080), record("5.6.7.8", 3128)])
        .await
        .unwrap();
    // Make both rows stale enough to scan.
    sqlx::query("UPDATE proxy SET modified = datetime('now', '-1 hour')")
        .execute(storage.pool())
        .await
        .unwrap();

    let interrupt = CancellationToken::new();
    let mut config = test_config(1);
    config.scan_interval = Duration::from_secs(60);
    let (hub, workers) = queue::start(
        &config,
        storage.clone(),
        interrupt.clone(),
        lock_token("203.0.113.1"),
    );

    let mut first = None;
    for _ in 0..20 {
        if let Some(proxy) = hub.get_proxy().await {
            first = Some(proxy);
            break;
        }
    }
    let first = first.expect("no proxy delivered within 20s");

    // The handed-out proxy is claimed: its row is TESTING.
    let row = storage.get_proxy(first.id).await.unwrap().unwrap();
    assert_eq!(row.status, ProxyStatus::Testing);
    assert_eq!(first.status, ProxyStatus::Testing);

    // Push a result back through the update + results pipes.
    let mut tested = first.clone();
    tested.status = ProxyStatus::Ok;
    tested.latency = 150;
    tested.test_count += 1;
    tested.modified = chrono::Utc::now();
    hub.update_proxy(tested).await.unwrap();
    hub.insert_test(ProxyTest::new(first.id, ProxyStatus::Ok, 150, "Anonymous proxy"))
        .await
        .unwrap();

    interrupt.cancel();
    workers.join().await;

    // Flushed on shutdown.
    let row = storage.get_proxy(first.id).await.unwrap().unwrap();
    assert_eq!(row.status, ProxyStatus::Ok);
    assert_eq!(row.latency, 150);
    assert_eq!(storage.count_tests().await.unwrap(), 1);

    // The undelivered claim was released on shutdown.
    let stuck: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proxy WHERE status = 1")
        .fetch_one(storage.pool())
        .await
        .unwrap();
    assert_eq!(stuck, 0);
}

#[tokio::test]
async fn cleanup_worker_recovers_stuck_claims() {
    let storage = Arc::new(Storage::open_in_memory().await.unwrap());

    storage.insert_bulk(&[record("1.2.3.4", 8080)]).await.unwrap();
    // A claim abandoned long ago by a crashed worker.
    sqlx::query("UPDATE proxy SET status = 1, modified = datetime('now', '-1 hour')")
        .execute(storage.pool())
        .await
        .unwrap();

    let interrupt = CancellationToken::new();
    let (_hub, workers) = queue::start(
        &test_config(1),
        storage.clone(),
        interrupt.clone(),
        lock_token("203.0.113.1"),
    );

    let probe_storage = storage.clone();
    wait_until(|| {
        let storage = probe_storage.clone();
        async move {
            storage.get_proxy(1).await.unwrap().unwrap().status == ProxyStatus::Error
        }
    })
    .await;

    interrupt.cancel();
    workers.join().await;
}
