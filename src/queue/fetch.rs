//! Fetch-for-test worker: prefetches claimable proxies into the fetch pipe.
//!
//! Holds the cross-process lock around the `need_scan` + `bulk_lock` pair so
//! two deployments never claim overlapping batches. On shutdown it releases
//! whatever it claimed that no tester took.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::models::{Proxy, ProxyProtocol, ProxyStatus};
use crate::storage::{Storage, StorageError};

use super::{failure_backoff, idle, QueueHub, MAX_FLUSH_FAILURES, PIPE_TIMEOUT};

pub struct FetchWorker {
    pub storage: Arc<Storage>,
    pub interrupt: CancellationToken,
    pub hub: Arc<QueueHub>,
    pub tx: mpsc::Sender<Proxy>,
    pub depth: Arc<AtomicUsize>,
    pub capacity: usize,
    pub scan_age_secs: i64,
    pub protocols: Vec<ProxyProtocol>,
    pub lock_token: String,
}

impl FetchWorker {
    async fn fill_queue(&self) -> Result<bool, StorageError> {
        let free_slots = self.capacity.saturating_sub(self.depth.load(Ordering::Relaxed));
        if free_slots == 0 {
            idle(&self.interrupt, Duration::from_secs(1)).await;
            return Ok(true);
        }

        if !self.storage.lock_database(&self.lock_token).await? {
            idle(&self.interrupt, Duration::from_secs(1)).await;
            return Ok(true);
        }

        let claimed = async {
            let proxies = self
                .storage
                .need_scan(free_slots as i64, self.scan_age_secs, &self.protocols)
                .await?;
            let ids: Vec<i64> = proxies.iter().map(|p| p.id).collect();
            self.storage.bulk_lock(&ids).await?;
            Ok::<Vec<Proxy>, StorageError>(proxies)
        }
        .await;

        // The coarse lock only covers the claim batch, never the hand-off.
        if let Err(e) = self.storage.unlock_database(&self.lock_token).await {
            warn!("Failed to unlock database: {e}");
        }

        let proxies = claimed?;
        if proxies.is_empty() {
            idle(&self.interrupt, Duration::from_secs(1)).await;
            return Ok(true);
        }

        let mut undelivered = Vec::new();
        for mut proxy in proxies {
            proxy.status = ProxyStatus::Testing;
            // Count before sending so the consumer can never underflow it.
            self.depth.fetch_add(1, Ordering::Relaxed);
            match self.tx.send_timeout(proxy, PIPE_TIMEOUT).await {
                Ok(()) => {}
                Err(mpsc::error::SendTimeoutError::Timeout(proxy))
                | Err(mpsc::error::SendTimeoutError::Closed(proxy)) => {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                    undelivered.push(proxy.id);
                }
            }
        }

        if !undelivered.is_empty() {
            warn!("Releasing {} claims the pipe would not take.", undelivered.len());
            self.storage.bulk_unlock(&undelivered).await?;
        }

        Ok(true)
    }

    /// Release every claim still sitting in the pipe.
    async fn release_queue(&self) {
        let mut ids = Vec::new();
        {
            let mut rx = self.hub.fetch_rx.lock().await;
            while let Ok(proxy) = rx.try_recv() {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                ids.push(proxy.id);
            }
        }

        match self.storage.bulk_unlock(&ids).await {
            Ok(count) => debug!("Released {count} proxies from testing."),
            Err(e) => error!("Failed to release {} proxies: {e}", ids.len()),
        }
    }

    pub async fn run(self) {
        debug!("Fetch queue worker started.");
        let mut failures: u32 = 0;

        loop {
            if failures > MAX_FLUSH_FAILURES {
                error!("Unable to get proxies to test.");
                self.interrupt.cancel();
                break;
            }

            if self.interrupt.is_cancelled() {
                break;
            }

            match self.fill_queue().await {
                Ok(_) => failures = 0,
                Err(e) => {
                    warn!("Failed to fill test queue: {e}");
                    failures += 1;
                    idle(&self.interrupt, failure_backoff(failures)).await;
                }
            }
        }

        self.release_queue().await;
        debug!("Fetch queue worker shut down.");
    }
}
