/*!
Tester pool manager.

Builds the probe pipeline once, validates every probe against its
known-good endpoint without a proxy (refusing to start on any failure),
then launches N tester workers and a statistics loop. Counters are shared
behind one mutex; shutdown waits for workers to finish their current
iteration.
*/

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::geoip::GeoIpDatabase;
use crate::probes::judge::AnonymityJudge;
use crate::probes::reachability::{ReachabilityProbe, DEFAULT_TITLE, DEFAULT_URL};
use crate::probes::socks::SocksVersionProbe;
use crate::probes::vendor::{
    ApiVersionProbe, LoginEndpointProbe, SignupPageProbe, DEFAULT_API_URL, DEFAULT_LOGIN_URL,
    DEFAULT_SIGNUP_TITLE, DEFAULT_SIGNUP_URL,
};
use crate::probes::{Probe, ProbeError, ProbeTransport};
use crate::queue::{idle, QueueHub};
use crate::storage::Storage;

use super::worker::TesterWorker;

#[derive(Debug, Default, Clone, Copy)]
pub struct TesterStats {
    pub total_success: u64,
    pub total_fail: u64,
    pub notice_success: u64,
    pub notice_fail: u64,
}

pub struct TesterPool {
    pub config: Arc<Config>,
    pub probes: Vec<Arc<dyn Probe>>,
    pub hub: Arc<QueueHub>,
    pub storage: Arc<Storage>,
    pub geoip: Arc<GeoIpDatabase>,
    pub interrupt: CancellationToken,
    stats: Mutex<TesterStats>,
    judge: Arc<AnonymityJudge>,
}

impl TesterPool {
    /// Assemble the probe pipeline in its fixed execution order: the SOCKS
    /// sniff first (it may reclassify the protocol the later probes use),
    /// then reachability, anonymity and the vendor endpoints.
    ///
    /// The judge rides its own transport: env-dump judges sit behind
    /// self-signed certificates often enough that the anonymity probe opts
    /// out of TLS verification.
    pub fn build(
        config: Arc<Config>,
        transport: Arc<dyn ProbeTransport>,
        judge_transport: Arc<dyn ProbeTransport>,
        hub: Arc<QueueHub>,
        storage: Arc<Storage>,
        geoip: Arc<GeoIpDatabase>,
        interrupt: CancellationToken,
    ) -> Self {
        let judge = Arc::new(AnonymityJudge::new(
            judge_transport,
            config.proxy_judges.clone(),
        ));

        let mut probes: Vec<Arc<dyn Probe>> = Vec::new();

        probes.push(Arc::new(SocksVersionProbe::new(config.tester_timeout)));
        probes.push(Arc::new(ReachabilityProbe::new(
            transport.clone(),
            DEFAULT_URL.to_string(),
            DEFAULT_TITLE.to_string(),
        )));

        if config.tester_anonymity {
            probes.push(judge.clone());
        }

        if config.tester_vendor {
            probes.push(Arc::new(ApiVersionProbe::new(
                transport.clone(),
                DEFAULT_API_URL.to_string(),
            )));
            probes.push(Arc::new(LoginEndpointProbe::new(
                transport.clone(),
                DEFAULT_LOGIN_URL.to_string(),
            )));
            probes.push(Arc::new(SignupPageProbe::new(
                transport,
                DEFAULT_SIGNUP_URL.to_string(),
                DEFAULT_SIGNUP_TITLE.to_string(),
            )));
        }

        TesterPool {
            config,
            probes,
            hub,
            storage,
            geoip,
            interrupt,
            stats: Mutex::new(TesterStats::default()),
            judge,
        }
    }

    /// The public IP learned by the judge, used for the database lock token.
    pub fn public_ip(&self) -> Option<String> {
        self.judge.public_ip()
    }

    /// Validate the whole probe suite without a proxy. Any failure refuses
    /// startup.
    pub async fn validate(&self) -> Result<(), ProbeError> {
        info!("Validating proxy test suite.");

        for probe in &self.probes {
            if let Err(e) = probe.validate().await {
                error!("Invalid response from probe {}: {e}", probe.name());
                return Err(e);
            }
        }

        Ok(())
    }

    pub fn mark_success(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.total_success += 1;
        stats.notice_success += 1;
    }

    pub fn mark_fail(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.total_fail += 1;
        stats.notice_fail += 1;
    }

    pub fn stats(&self) -> TesterStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reset_notice_stats(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.notice_success = 0;
        stats.notice_fail = 0;
    }

    fn print_stats(&self, window: Duration) {
        let stats = self.stats();
        info!(
            "Total tests: {} valid and {} failed.",
            stats.total_success, stats.total_fail
        );
        info!(
            "Tests in last {}s: {} valid and {} failed.",
            window.as_secs(),
            stats.notice_success,
            stats.notice_fail
        );
    }

    /// Launch the tester workers and the statistics loop.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.tester_count + 1);

        for id in 0..self.config.tester_count {
            let worker = TesterWorker {
                id,
                pool: self.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        let pool = self.clone();
        handles.push(tokio::spawn(async move {
            let window = pool.config.tester_notice_interval;
            loop {
                idle(&pool.interrupt, window).await;
                if pool.interrupt.is_cancelled() {
                    break;
                }
                pool.print_stats(window);
                pool.hub.log_stats();
                pool.reset_notice_stats();
            }
        }));

        info!("Launched {} tester workers.", self.config.tester_count);
        handles
    }
}
