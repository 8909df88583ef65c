//! Results worker: batched append of probe outcomes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::models::ProxyTest;
use crate::storage::Storage;

use super::{failure_backoff, idle, MAX_FLUSH_FAILURES};

pub struct ResultsWorker {
    pub storage: Arc<Storage>,
    pub interrupt: CancellationToken,
    pub rx: mpsc::Receiver<ProxyTest>,
    pub depth: Arc<AtomicUsize>,
    pub backlog: Vec<ProxyTest>,
    pub threshold: usize,
}

impl ResultsWorker {
    async fn flush(&mut self, threshold: usize) -> bool {
        if self.depth.load(Ordering::Relaxed) + self.backlog.len() < threshold.max(1) {
            idle(&self.interrupt, Duration::from_secs(1)).await;
            return true;
        }

        while let Ok(test) = self.rx.try_recv() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            self.backlog.push(test);
        }

        match self.storage.insert_tests_bulk(&self.backlog).await {
            Ok(count) => {
                debug!("Inserted {count} proxy tests.");
                self.backlog.clear();
                true
            }
            Err(e) => {
                warn!("Failed to insert proxy tests: {e}");
                false
            }
        }
    }

    pub async fn run(mut self) {
        debug!("Proxy test worker started.");
        let mut failures: u32 = 0;

        loop {
            if failures > MAX_FLUSH_FAILURES {
                error!("Unable to insert proxy tests.");
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
        debug!("Proxy test worker shut down.");
    }
}
