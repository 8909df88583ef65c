/*!
Application driver.

Wires storage, queues, the tester pool, the harvester pool and the status
service together, then runs the periodic loop: re-harvest on the refresh
tick, export on the output tick, shut everything down in order when the
interrupt fires (signal or fatal worker error).

Shutdown order: set interrupt → join testers → join queue workers (they
flush on the way out) → close the storage pool.
*/

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::export;
use crate::geoip::GeoIpDatabase;
use crate::probes::judge::AnonymityJudge;
use crate::probes::{HttpTransport, ProbeTransport, RetryPolicy};
use crate::queue;
use crate::scrape::{sources, HarvesterPool};
use crate::storage::{lock::lock_token, Storage};
use crate::tester::TesterPool;
use crate::useragent;

/// Validation failures tolerated across refresh ticks before giving up.
const MAX_VALIDATION_FAILURES: u32 = 2;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    std::fs::create_dir_all(&config.download_path)
        .with_context(|| format!("creating {}", config.download_path.display()))?;

    let storage = Arc::new(
        Storage::connect(&config.db_path, config.db_max_conn, config.db_batch_size)
            .await
            .context("initializing storage")?,
    );

    let geoip = Arc::new(match &config.geoip_file {
        Some(path) => GeoIpDatabase::load(path),
        None => GeoIpDatabase::empty(),
    });

    let interrupt = CancellationToken::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down...");
                interrupt.cancel();
            }
        });
    }

    let retry = RetryPolicy {
        total: config.tester_retries,
        backoff_factor: config.tester_backoff_factor,
    };
    let user_agent = useragent::generate(config.user_agent);

    let transport: Arc<dyn ProbeTransport> = Arc::new(
        HttpTransport::new(config.tester_timeout, retry.clone(), user_agent.clone(), true)
            .context("building probe transport")?,
    );
    // Judge endpoints frequently sit behind self-signed certificates.
    let judge_transport: Arc<dyn ProbeTransport> = Arc::new(
        HttpTransport::new(config.tester_timeout, retry, user_agent, false)
            .context("building judge transport")?,
    );

    // The database lock token is derived from this node's public address,
    // learned from the judge before any worker touches storage.
    let bootstrap_judge =
        AnonymityJudge::new(judge_transport.clone(), config.proxy_judges.clone());
    let public_ip = match bootstrap_judge.discover_public_ip().await {
        Ok(ip) => {
            info!("External IP address found: {ip}");
            ip
        }
        Err(e) => {
            if config.tester_anonymity {
                anyhow::bail!("failed to identify local IP address: {e}");
            }
            warn!("Failed to identify local IP address: {e}");
            "localhost".to_string()
        }
    };
    let token = lock_token(&public_ip);

    let (hub, queue_workers) = queue::start(&config, storage.clone(), interrupt.clone(), token);

    let pool = Arc::new(TesterPool::build(
        config.clone(),
        transport,
        judge_transport,
        hub.clone(),
        storage.clone(),
        geoip,
        interrupt.clone(),
    ));

    if let Err(e) = pool.validate().await {
        interrupt.cancel();
        queue_workers.join().await;
        storage.close().await;
        anyhow::bail!("proxy test suite validation failed: {e}");
    }
    info!("Proxy test suite validation was successful.");

    let tester_handles = pool.clone().start();

    let server_handle = config.web_enabled.then(|| {
        tokio::spawn(server_task(
            storage.clone(),
            config.web_port,
            interrupt.clone(),
        ))
    });

    let harvesters = HarvesterPool::new(
        config.clone(),
        sources::registry(&config),
        storage.clone(),
        hub.clone(),
        interrupt.clone(),
    );

    // Initial harvest feeds the pipeline before the first refresh tick.
    harvesters.harvest().await;

    let mut refresh_tick = tokio::time::interval(config.refresh_interval);
    let mut output_tick = tokio::time::interval(config.output_interval);
    refresh_tick.tick().await;
    output_tick.tick().await;

    let mut validation_failures: u32 = 0;
    loop {
        tokio::select! {
            _ = interrupt.cancelled() => break,
            _ = refresh_tick.tick() => {
                info!("Refreshing proxy lists from configured sources.");
                harvesters.harvest().await;

                if pool.validate().await.is_err() {
                    validation_failures += 1;
                    error!("Proxy test suite validation failed.");
                    if validation_failures > MAX_VALIDATION_FAILURES {
                        interrupt.cancel();
                    }
                } else {
                    validation_failures = 0;
                }
            }
            _ = output_tick.tick() => {
                if let Err(e) = export::output_working(&config, &storage).await {
                    warn!("Failed to write output files: {e}");
                }
            }
        }
    }

    // Final export so the published lists reflect the last test results.
    if let Err(e) = export::output_working(&config, &storage).await {
        warn!("Failed to write output files: {e}");
    }

    info!("Waiting for proxy testers to finish...");
    futures::future::join_all(tester_handles).await;
    info!("Proxy tester workers shut down.");

    queue_workers.join().await;

    if let Some(handle) = server_handle {
        let _ = handle.await;
    }

    storage.close().await;
    info!("Shutdown complete.");
    Ok(())
}

async fn server_task(storage: Arc<Storage>, port: u16, interrupt: CancellationToken) {
    crate::server::serve(storage, port, interrupt).await;
}
