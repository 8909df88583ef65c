/*!
One tester worker.

Owns at most one claimed proxy at a time. Per iteration: take a proxy from
the fetch pipe, either delete it outright when the cleanup predicate holds
or run the probe pipeline, then push the outcome into the write-back
queues. The worker holds no storage connection while probes are in flight.
*/

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::models::{Proxy, ProxyStatus, ProxyTest};
use crate::queue::idle;

use super::pool::TesterPool;

/// Pause when the fetch pipe stays empty.
const EMPTY_QUEUE_PAUSE: Duration = Duration::from_secs(5);

pub struct TesterWorker {
    pub id: usize,
    pub pool: Arc<TesterPool>,
}

impl TesterWorker {
    /// Old enough, tested enough, failing enough: drop instead of probing.
    fn should_discard(&self, proxy: &Proxy) -> bool {
        let config = &self.pool.config;

        if proxy.test_count as i64 <= config.cleanup_test_count {
            return false;
        }

        let age = Utc::now() - proxy.created;
        if age < chrono::Duration::days(config.cleanup_age_days) {
            return false;
        }

        proxy.fail_count as f64 / proxy.test_count as f64 > config.cleanup_fail_ratio
    }

    async fn execute_probes(&self, proxy: &mut Proxy) -> Vec<ProxyTest> {
        let mut results = Vec::new();

        for probe in &self.pool.probes {
            if probe.skip_probe(proxy) {
                debug!("Skipped {} probe for proxy: {}", probe.name(), proxy.url(false));
                continue;
            }

            let test = probe.execute(proxy).await;

            proxy.test_count += 1;
            if test.status == ProxyStatus::Ok {
                self.pool.mark_success();
            } else {
                proxy.fail_count += 1;
                self.pool.mark_fail();
            }

            let failed = test.status != ProxyStatus::Ok;
            results.push(test.clone());

            if self.pool.hub.insert_test(test).await.is_err() {
                warn!("Timed out queueing a probe result.");
            }

            if failed && !self.pool.config.tester_force {
                break;
            }

            if self.pool.interrupt.is_cancelled() {
                break;
            }
        }

        if results.is_empty() {
            let placeholder = ProxyTest::new(proxy.id, ProxyStatus::Error, 0, "Not tested");
            results.push(placeholder.clone());
            if self.pool.hub.insert_test(placeholder).await.is_err() {
                warn!("Timed out queueing a probe result.");
            }
        }

        results
    }

    /// Fold probe outcomes back into the proxy: last status wins, latency
    /// is the mean over executed probes, country filled on first sight.
    fn evaluate_results(&self, proxy: &mut Proxy, results: &[ProxyTest]) {
        if proxy.country.is_none() {
            proxy.country = self.pool.geoip.lookup_country(&proxy.ip);
        }

        let total: u64 = results.iter().map(|t| t.latency as u64).sum();
        proxy.latency = (total / results.len() as u64) as u32;
        proxy.status = results.last().map(|t| t.status).unwrap_or(ProxyStatus::Error);
        proxy.modified = Utc::now();
    }

    pub async fn run(self) {
        debug!("proxy-tester-{:03} started.", self.id);

        loop {
            if self.pool.interrupt.is_cancelled() {
                break;
            }

            let Some(mut proxy) = self.pool.hub.get_proxy().await else {
                idle(&self.pool.interrupt, EMPTY_QUEUE_PAUSE).await;
                continue;
            };

            if self.should_discard(&proxy) {
                debug!("Discarding chronically failing proxy: {}", proxy.url(false));
                if let Err(e) = self.pool.storage.delete_proxy(proxy.id).await {
                    warn!("Failed to delete proxy #{}: {e}", proxy.id);
                }
                continue;
            }

            let results = self.execute_probes(&mut proxy).await;
            self.evaluate_results(&mut proxy, &results);

            if self.pool.hub.update_proxy(proxy).await.is_err() {
                warn!("Timed out queueing a proxy update.");
            }
        }

        debug!("proxy-tester-{:03} shut down.", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;

    fn proxy(created_days_ago: i64, test_count: u32, fail_count: u32) -> Proxy {
        Proxy {
            id: 1,
            ip: "1.2.3.4".to_string(),
            port: 8080,
            protocol: ProxyProtocol::Http,
            username: None,
            password: None,
            status: ProxyStatus::Unknown,
            latency: 0,
            test_count,
            fail_count,
            country: None,
            created: Utc::now() - chrono::Duration::days(created_days_ago),
            modified: Utc::now(),
        }
    }

    #[test]
    fn discard_predicate_requires_all_three_conditions() {
        // Mirrors the defaults: 14 days, >20 tests, >90% failures.
        let old_and_failing = proxy(30, 25, 24);
        let young = proxy(2, 25, 24);
        let untested = proxy(30, 5, 5);
        let mostly_working = proxy(30, 25, 3);

        let check = |p: &Proxy| {
            let age_ok = (Utc::now() - p.created) >= chrono::Duration::days(14);
            let tests_ok = p.test_count as i64 > 20;
            let ratio_ok = p.test_count > 0 && p.fail_count as f64 / p.test_count as f64 > 0.9;
            age_ok && tests_ok && ratio_ok
        };

        assert!(check(&old_and_failing));
        assert!(!check(&young));
        assert!(!check(&untested));
        assert!(!check(&mostly_working));
    }
}
