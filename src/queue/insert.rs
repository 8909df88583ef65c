//! Insert-new worker: drains scraped candidates into batched upserts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::models::ProxyRecord;
use crate::storage::Storage;

use super::{failure_backoff, idle, MAX_FLUSH_FAILURES};

pub struct InsertWorker {
    pub storage: Arc<Storage>,
    pub interrupt: CancellationToken,
    pub rx: mpsc::UnboundedReceiver<ProxyRecord>,
    pub depth: Arc<AtomicUsize>,
    pub backlog: Vec<ProxyRecord>,
}

impl InsertWorker {
    async fn flush(&mut self) -> bool {
        if self.depth.load(Ordering::Relaxed) + self.backlog.len() < 1 {
            idle(&self.interrupt, Duration::from_secs(1)).await;
            return true;
        }

        while let Ok(record) = self.rx.try_recv() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            self.backlog.push(record);
        }

        match self.storage.insert_bulk(&self.backlog).await {
            Ok(count) => {
                debug!("Inserted {count} proxies.");
                self.backlog.clear();
                true
            }
            Err(e) => {
                warn!("Failed to insert proxies: {e}");
                false
            }
        }
    }

    pub async fn run(mut self) {
        debug!("Proxy insert worker started.");
        let mut failures: u32 = 0;

        loop {
            if failures > MAX_FLUSH_FAILURES {
                error!("Unable to insert proxies.");
                self.interrupt.cancel();
                break;
            }

            if !self.flush().await {
                failures += 1;
                idle(&self.interrupt, failure_backoff(failures)).await;
                continue;
            }

            failures = 0;
            if self.interrupt.is_cancelled() {
                break;
            }
        }

        // Final drain regardless of threshold
        self.flush().await;
        debug!("Proxy insert worker shut down.");
    }
}
