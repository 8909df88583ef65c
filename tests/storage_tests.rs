/*!
Storage invariants: upsert idempotence, the claim protocol, the stuck
sweep, cleanup of chronic failures and the cross-process lock lease.
*/

use chrono::{Duration, Utc};

use proxyscan::models::{ProxyProtocol, ProxyRecord, ProxyStatus, ProxyTest};
use proxyscan::storage::lock::lock_token;
use proxyscan::storage::Storage;

fn record(ip: &str, port: u16, protocol: ProxyProtocol) -> ProxyRecord {
    ProxyRecord {
        ip: ip.to_string(),
        port,
        protocol,
        username: None,
        password: None,
    }
}

async fn backdate_modified(storage: &Storage, id: i64, secs: i64) {
    sqlx::query("UPDATE proxy SET modified = ? WHERE id = ?")
        .bind(Utc::now() - Duration::seconds(secs))
        .bind(id)
        .execute(storage.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn insert_bulk_is_idempotent_on_ip_port() {
    let storage = Storage::open_in_memory().await.unwrap();

    let records = vec![
        record("1.2.3.4", 8080, ProxyProtocol::Http),
        record("5.6.7.8", 1080, ProxyProtocol::Socks5),
    ];

    storage.insert_bulk(&records).await.unwrap();
    assert_eq!(storage.count_proxies().await.unwrap(), 2);

    // Same list again, in any order: same row count.
    let reversed: Vec<ProxyRecord> = records.iter().rev().cloned().collect();
    storage.insert_bulk(&reversed).await.unwrap();
    assert_eq!(storage.count_proxies().await.unwrap(), 2);
}

#[tokio::test]
async fn upsert_conflict_preserves_test_state() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[record("1.2.3.4", 8080, ProxyProtocol::Http)])
        .await
        .unwrap();

    // Simulate a completed test cycle.
    let mut proxy = storage
        .need_scan(1, -1, &[])
        .await
        .unwrap()
        .pop()
        .unwrap();
    proxy.status = ProxyStatus::Ok;
    proxy.latency = 321;
    proxy.test_count = 3;
    proxy.fail_count = 1;
    proxy.modified = Utc::now();
    storage.update_bulk(&[proxy.clone()]).await.unwrap();

    // Re-harvest the same address with fresh credentials.
    let mut updated = record("1.2.3.4", 8080, ProxyProtocol::Socks5);
    updated.username = Some("user".to_string());
    updated.password = Some("pass".to_string());
    storage.insert_bulk(&[updated]).await.unwrap();

    let reloaded = storage.get_proxy(proxy.id).await.unwrap().unwrap();
    // Credentials/protocol take the incoming values...
    assert_eq!(reloaded.protocol, ProxyProtocol::Socks5);
    assert_eq!(reloaded.username.as_deref(), Some("user"));
    // ...while test state is untouched.
    assert_eq!(reloaded.status, ProxyStatus::Ok);
    assert_eq!(reloaded.latency, 321);
    assert_eq!(reloaded.test_count, 3);
    assert_eq!(reloaded.fail_count, 1);
}

#[tokio::test]
async fn need_scan_orders_by_status_then_staleness() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[
            record("1.1.1.1", 80, ProxyProtocol::Http),
            record("2.2.2.2", 80, ProxyProtocol::Http),
            record("3.3.3.3", 80, ProxyProtocol::Http),
        ])
        .await
        .unwrap();

    let mut proxies = storage.need_scan(10, -1, &[]).await.unwrap();
    proxies.sort_by_key(|p| p.ip.clone());

    // 1.1.1.1 -> OK (stale), 2.2.2.2 -> ERROR, 3.3.3.3 stays UNKNOWN.
    proxies[0].status = ProxyStatus::Ok;
    proxies[1].status = ProxyStatus::Error;
    for proxy in &mut proxies[..2] {
        proxy.modified = Utc::now();
    }
    storage.update_bulk(&proxies[..2].to_vec()).await.unwrap();
    backdate_modified(&storage, proxies[0].id, 7200).await;
    backdate_modified(&storage, proxies[1].id, 3600).await;
    backdate_modified(&storage, proxies[2].id, 60).await;

    let scan = storage.need_scan(10, 30, &[]).await.unwrap();
    let order: Vec<&str> = scan.iter().map(|p| p.ip.as_str()).collect();
    // Status ascending: UNKNOWN(0) < OK(2) < ERROR(4).
    assert_eq!(order, vec!["3.3.3.3", "1.1.1.1", "2.2.2.2"]);
}

#[tokio::test]
async fn need_scan_excludes_testing_and_fresh_rows() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[
            record("1.1.1.1", 80, ProxyProtocol::Http),
            record("2.2.2.2", 80, ProxyProtocol::Http),
        ])
        .await
        .unwrap();

    let proxies = storage.need_scan(10, -1, &[]).await.unwrap();
    let testing = proxies.iter().find(|p| p.ip == "1.1.1.1").unwrap();
    storage.bulk_lock(&[testing.id]).await.unwrap();
    backdate_modified(&storage, testing.id, 7200).await;

    let scan = storage.need_scan(10, 30, &[]).await.unwrap();
    assert_eq!(scan.len(), 1);
    assert_eq!(scan[0].ip, "2.2.2.2");
}

#[tokio::test]
async fn lock_for_testing_wins_exactly_once() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[record("1.2.3.4", 8080, ProxyProtocol::Http)])
        .await
        .unwrap();
    let proxy = storage.need_scan(1, -1, &[]).await.unwrap().pop().unwrap();

    // Two workers read the same row; the claim is a conditional update,
    // so the second attempt sees a changed status and loses.
    assert_eq!(storage.lock_for_testing(&proxy).await.unwrap(), 1);
    assert_eq!(storage.lock_for_testing(&proxy).await.unwrap(), 0);

    let reloaded = storage.get_proxy(proxy.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, ProxyStatus::Testing);
}

#[tokio::test]
async fn get_for_scan_claim_cycle() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[record("1.2.3.4", 8080, ProxyProtocol::Http)])
        .await
        .unwrap();

    // Never-tested rows qualify regardless of staleness.
    let proxy = storage.get_for_scan(3600, &[]).await.unwrap().unwrap();
    assert_eq!(proxy.status, ProxyStatus::Unknown);

    assert_eq!(storage.lock_for_testing(&proxy).await.unwrap(), 1);

    // Claimed rows disappear from the scan predicate.
    assert!(storage.get_for_scan(3600, &[]).await.unwrap().is_none());

    // Protocol filter applies.
    storage
        .insert_bulk(&[record("5.6.7.8", 1080, ProxyProtocol::Socks5)])
        .await
        .unwrap();
    let socks = storage
        .get_for_scan(3600, &[ProxyProtocol::Socks5])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(socks.protocol, ProxyProtocol::Socks5);
    assert!(storage
        .get_for_scan(3600, &[ProxyProtocol::Http])
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn latest_tests_are_newest_first() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[record("1.2.3.4", 8080, ProxyProtocol::Http)])
        .await
        .unwrap();
    let proxy = storage.need_scan(1, -1, &[]).await.unwrap().pop().unwrap();

    storage
        .insert_tests_bulk(&[
            ProxyTest::new(proxy.id, ProxyStatus::Error, 0, "Connection timed out"),
            ProxyTest::new(proxy.id, ProxyStatus::Ok, 120, "Anonymous proxy"),
        ])
        .await
        .unwrap();

    let tests = storage.latest_tests(proxy.id, 10).await.unwrap();
    assert_eq!(tests.len(), 2);
    assert_eq!(tests[0].status, ProxyStatus::Ok);
    assert_eq!(tests[0].info.as_deref(), Some("Anonymous proxy"));
    assert_eq!(tests[1].status, ProxyStatus::Error);
}

#[tokio::test]
async fn bulk_unlock_releases_claims() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[
            record("1.1.1.1", 80, ProxyProtocol::Http),
            record("2.2.2.2", 80, ProxyProtocol::Http),
        ])
        .await
        .unwrap();

    let ids: Vec<i64> = storage
        .need_scan(10, -1, &[])
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();

    assert_eq!(storage.bulk_lock(&ids).await.unwrap(), 2);
    assert!(storage.need_scan(10, -1, &[]).await.unwrap().is_empty());

    assert_eq!(storage.bulk_unlock(&ids).await.unwrap(), 2);
    assert_eq!(storage.need_scan(10, -1, &[]).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unlock_stuck_recovers_abandoned_claims() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[record("1.2.3.4", 8080, ProxyProtocol::Http)])
        .await
        .unwrap();
    let proxy = storage.need_scan(1, -1, &[]).await.unwrap().pop().unwrap();
    storage.bulk_lock(&[proxy.id]).await.unwrap();

    // Fresh claim is left alone.
    assert_eq!(storage.unlock_stuck(10).await.unwrap(), 0);

    backdate_modified(&storage, proxy.id, 3600).await;
    assert_eq!(storage.unlock_stuck(10).await.unwrap(), 1);

    let reloaded = storage.get_proxy(proxy.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, ProxyStatus::Error);
}

#[tokio::test]
async fn delete_failed_drops_chronic_failures_and_cascades() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[
            record("1.1.1.1", 80, ProxyProtocol::Http),
            record("2.2.2.2", 80, ProxyProtocol::Http),
        ])
        .await
        .unwrap();

    let mut proxies = storage.need_scan(10, -1, &[]).await.unwrap();
    proxies.sort_by_key(|p| p.ip.clone());

    // 1.1.1.1: old, heavily tested, 96% failures. 2.2.2.2: healthy.
    proxies[0].test_count = 25;
    proxies[0].fail_count = 24;
    proxies[1].test_count = 25;
    proxies[1].fail_count = 2;
    storage.update_bulk(&proxies).await.unwrap();
    for proxy in &proxies {
        sqlx::query("UPDATE proxy SET created = ? WHERE id = ?")
            .bind(Utc::now() - Duration::days(30))
            .bind(proxy.id)
            .execute(storage.pool())
            .await
            .unwrap();
    }

    storage
        .insert_tests_bulk(&[ProxyTest::new(proxies[0].id, ProxyStatus::Error, 0, "Timeout")])
        .await
        .unwrap();
    assert_eq!(storage.count_tests().await.unwrap(), 1);

    let deleted = storage.delete_failed(14, 20, 0.9, 100).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(storage.get_proxy(proxies[0].id).await.unwrap().is_none());
    assert!(storage.get_proxy(proxies[1].id).await.unwrap().is_some());

    // Tests cascade with their parent.
    assert_eq!(storage.count_tests().await.unwrap(), 0);
}

#[tokio::test]
async fn get_valid_filters_protocol_age_and_country() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[
            record("1.1.1.1", 80, ProxyProtocol::Http),
            record("2.2.2.2", 1080, ProxyProtocol::Socks5),
            record("3.3.3.3", 1080, ProxyProtocol::Socks5),
        ])
        .await
        .unwrap();

    let mut proxies = storage.need_scan(10, -1, &[]).await.unwrap();
    proxies.sort_by_key(|p| p.ip.clone());
    for proxy in &mut proxies {
        proxy.status = ProxyStatus::Ok;
        proxy.modified = Utc::now();
    }
    proxies[1].country = Some("cn".to_string());
    storage.update_bulk(&proxies).await.unwrap();

    let socks = storage
        .get_valid(10, 3600, Some(ProxyProtocol::Socks5), &[])
        .await
        .unwrap();
    assert_eq!(socks.len(), 2);

    let filtered = storage
        .get_valid(10, 3600, Some(ProxyProtocol::Socks5), &["cn".to_string()])
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].ip, "3.3.3.3");

    // Stale OKs do not qualify.
    backdate_modified(&storage, proxies[2].id, 7200).await;
    let fresh = storage
        .get_valid(10, 3600, Some(ProxyProtocol::Socks5), &[])
        .await
        .unwrap();
    assert_eq!(fresh.len(), 1);
}

#[tokio::test]
async fn fail_count_never_exceeds_test_count_through_updates() {
    let storage = Storage::open_in_memory().await.unwrap();

    storage
        .insert_bulk(&[record("1.2.3.4", 8080, ProxyProtocol::Http)])
        .await
        .unwrap();

    let mut proxy = storage.need_scan(1, -1, &[]).await.unwrap().pop().unwrap();
    for round in 0..10 {
        proxy.test_count += 1;
        if round % 2 == 0 {
            proxy.fail_count += 1;
        }
        proxy.modified = Utc::now();
        storage.update_bulk(&[proxy.clone()]).await.unwrap();

        let reloaded = storage.get_proxy(proxy.id).await.unwrap().unwrap();
        assert!(reloaded.fail_count <= reloaded.test_count);
    }
}

#[tokio::test]
async fn database_lock_is_exclusive_until_lease_expires() {
    let storage = Storage::open_in_memory().await.unwrap();

    let node_a = lock_token("203.0.113.1");
    let node_b = lock_token("203.0.113.2");

    // One process wins, the other loses.
    assert!(storage.lock_database(&node_a).await.unwrap());
    assert!(!storage.lock_database(&node_b).await.unwrap());

    // Re-entrant for the holder.
    assert!(storage.lock_database(&node_a).await.unwrap());

    // Only the holder can release.
    assert!(!storage.unlock_database(&node_b).await.unwrap());
    assert!(storage.unlock_database(&node_a).await.unwrap());

    // Once free, the other process takes it.
    assert!(storage.lock_database(&node_b).await.unwrap());
}

#[tokio::test]
async fn expired_lease_is_seized_forcibly() {
    let storage = Storage::open_in_memory().await.unwrap();

    let node_a = lock_token("203.0.113.1");
    let node_b = lock_token("203.0.113.2");

    assert!(storage.lock_database(&node_a).await.unwrap());
    assert!(!storage.lock_database(&node_b).await.unwrap());

    // The holder goes silent past the 10 s lease.
    sqlx::query("UPDATE db_config SET modified = ? WHERE key = 'read_lock'")
        .bind(Utc::now() - Duration::seconds(11))
        .execute(storage.pool())
        .await
        .unwrap();

    assert!(storage.lock_database(&node_b).await.unwrap());

    // The stale holder must not release the new owner's lock.
    assert!(!storage.unlock_database(&node_a).await.unwrap());
}

#[tokio::test]
async fn schema_bootstrap_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxyscan.db");

    let storage = Storage::connect(&path, 2, 250).await.unwrap();
    storage
        .insert_bulk(&[record("1.2.3.4", 8080, ProxyProtocol::Http)])
        .await
        .unwrap();
    storage.close().await;

    // Reopening verifies the stored schema version and keeps the data.
    let storage = Storage::connect(&path, 2, 250).await.unwrap();
    assert_eq!(storage.count_proxies().await.unwrap(), 1);
    storage.close().await;
}
