//! Update-proxy worker: batched write-back of tester results.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::models::Proxy;
use crate::storage::Storage;

use super::{failure_backoff, idle, MAX_FLUSH_FAILURES};

pub struct UpdateWorker {
    pub storage: Arc<Storage>,
    pub interrupt: CancellationToken,
    pub rx: mpsc::Receiver<Proxy>,
    pub depth: Arc<AtomicUsize>,
    pub backlog: Vec<Proxy>,
    /// Pending rows required before a flush; dropped to zero on interrupt.
    pub threshold: usize,
}

impl UpdateWorker {
    async fn flush(&mut self, threshold: usize) -> bool {
        if self.depth.load(Ordering::Relaxed) + self.backlog.len() < threshold.max(1) {
            idle(&self.interrupt, Duration::from_secs(1)).await;
            return true;
        }

        while let Ok(proxy) = self.rx.try_recv() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            self.backlog.push(proxy);
        }

        match self.storage.update_bulk(&self.backlog).await {
            Ok(count) => {
                debug!("Updated {count} proxies.");
                self.backlog.clear();
                true
            }
            Err(e) => {
                warn!("Failed to update proxy queue: {e}");
                false
            }
        }
    }

    pub async fn run(mut self) {
        debug!("Proxy update worker started.");
        let mut failures: u32 = 0;

        loop {
            if failures > MAX_FLUSH_FAILURES {
                error!("Unable to update proxies.");
                self.interrupt.cancel();
                break;
            }

            let threshold = if self.interrupt.is_cancelled() {
                0
            } else {
                self.threshold
            };

            if !self.flush(threshold).await {
                failures += 1;
                idle(&self.interrupt, failure_backoff(failures)).await;
                continue;
            }

            failures = 0;
            if self.interrupt.is_cancelled() {
                break;
            }
        }

        self.flush(0).await;
        debug!("Proxy update worker shut down.");
    }
}
