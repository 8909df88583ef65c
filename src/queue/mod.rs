/*!
Bounded in-memory pipes decoupling the hot testing path from batched
persistence, plus the workers that own each pipe.

Five pipes, capacities derived from the tester pool size:

| pipe            | capacity      | producer   | consumer        |
|-----------------|---------------|------------|-----------------|
| fetch-for-test  | 2 × testers   | fetch worker | testers       |
| insert-new      | unbounded     | harvesters | insert worker   |
| update-proxy    | 10 × testers  | testers    | update worker   |
| insert-test     | 50 × testers  | testers    | results worker  |
| cleanup         | internal      | cleanup worker | —           |

Producers send with a bounded timeout so a dead consumer can never stall
them forever; consumers receive with a bounded timeout so shutdown is
always observed. Each persisting worker keeps an internal backlog for
failed flushes and escalates to a process-wide interrupt after four
consecutive storage failures.
*/

pub mod cleanup;
pub mod fetch;
pub mod insert;
pub mod results;
pub mod update;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::models::{Proxy, ProxyRecord, ProxyTest};
use crate::storage::Storage;

/// Timeout for queue sends and receives.
pub const PIPE_TIMEOUT: Duration = Duration::from_secs(1);

/// Consecutive storage failures before a worker raises the interrupt.
pub const MAX_FLUSH_FAILURES: u32 = 4;

/// Backlog size that triggers a flush on the update/results workers.
pub const FLUSH_THRESHOLD: usize = 10;

#[derive(Debug, thiserror::Error)]
#[error("queue send timed out")]
pub struct QueueSendTimeout;

/// Handles to the pipes, shared by testers and harvesters.
pub struct QueueHub {
    interrupt: CancellationToken,

    fetch_rx: tokio::sync::Mutex<mpsc::Receiver<Proxy>>,
    fetch_depth: Arc<AtomicUsize>,

    insert_tx: mpsc::UnboundedSender<ProxyRecord>,
    insert_depth: Arc<AtomicUsize>,

    update_tx: mpsc::Sender<Proxy>,
    update_depth: Arc<AtomicUsize>,

    results_tx: mpsc::Sender<ProxyTest>,
    results_depth: Arc<AtomicUsize>,
}

impl QueueHub {
    /// Take one claimed proxy to test. `None` when the pipe stays empty for
    /// [`PIPE_TIMEOUT`].
    pub async fn get_proxy(&self) -> Option<Proxy> {
        let mut rx = self.fetch_rx.lock().await;
        match tokio::time::timeout(PIPE_TIMEOUT, rx.recv()).await {
            Ok(Some(proxy)) => {
                self.fetch_depth.fetch_sub(1, Ordering::Relaxed);
                Some(proxy)
            }
            _ => None,
        }
    }

    /// Queue scraped candidates for upsert. Never blocks.
    ///
    /// Depth counters are bumped before the send so a consumer can never
    /// observe an item it has not been told about and underflow the count.
    pub fn insert_records(&self, records: Vec<ProxyRecord>) {
        for record in records {
            self.insert_depth.fetch_add(1, Ordering::Relaxed);
            if self.insert_tx.send(record).is_err() {
                self.insert_depth.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Queue a tested proxy for write-back.
    pub async fn update_proxy(&self, proxy: Proxy) -> Result<(), QueueSendTimeout> {
        self.update_depth.fetch_add(1, Ordering::Relaxed);
        match self.update_tx.send_timeout(proxy, PIPE_TIMEOUT).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.update_depth.fetch_sub(1, Ordering::Relaxed);
                Err(QueueSendTimeout)
            }
        }
    }

    /// Queue a probe outcome for append.
    pub async fn insert_test(&self, test: ProxyTest) -> Result<(), QueueSendTimeout> {
        self.results_depth.fetch_add(1, Ordering::Relaxed);
        match self.results_tx.send_timeout(test, PIPE_TIMEOUT).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.results_depth.fetch_sub(1, Ordering::Relaxed);
                Err(QueueSendTimeout)
            }
        }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    pub fn log_stats(&self) {
        info!(
            "Queues: fetch={} insert={} update={} results={}",
            self.fetch_depth.load(Ordering::Relaxed),
            self.insert_depth.load(Ordering::Relaxed),
            self.update_depth.load(Ordering::Relaxed),
            self.results_depth.load(Ordering::Relaxed),
        );
    }
}

/// Join handles for the five queue workers.
pub struct QueueWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl QueueWorkers {
    /// Wait for every worker to flush and exit. Call after cancelling the
    /// interrupt token.
    pub async fn join(self) {
        info!("Waiting for queue workers to finish...");
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("Database queue workers shut down.");
    }
}

/// Build the pipes and spawn their workers.
pub fn start(
    config: &Config,
    storage: Arc<Storage>,
    interrupt: CancellationToken,
    lock_token: String,
) -> (Arc<QueueHub>, QueueWorkers) {
    let fetch_capacity = config.tester_count * 2;
    let update_capacity = config.tester_count * 10;
    let results_capacity = config.tester_count * 50;

    let (fetch_tx, fetch_rx) = mpsc::channel(fetch_capacity);
    let (insert_tx, insert_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = mpsc::channel(update_capacity);
    let (results_tx, results_rx) = mpsc::channel(results_capacity);

    let fetch_depth = Arc::new(AtomicUsize::new(0));
    let insert_depth = Arc::new(AtomicUsize::new(0));
    let update_depth = Arc::new(AtomicUsize::new(0));
    let results_depth = Arc::new(AtomicUsize::new(0));

    let hub = Arc::new(QueueHub {
        interrupt: interrupt.clone(),
        fetch_rx: tokio::sync::Mutex::new(fetch_rx),
        fetch_depth: fetch_depth.clone(),
        insert_tx,
        insert_depth: insert_depth.clone(),
        update_tx,
        update_depth: update_depth.clone(),
        results_tx,
        results_depth: results_depth.clone(),
    });

    let handles = vec![
        tokio::spawn(
            fetch::FetchWorker {
                storage: storage.clone(),
                interrupt: interrupt.clone(),
                hub: hub.clone(),
                tx: fetch_tx,
                depth: fetch_depth,
                capacity: fetch_capacity,
                scan_age_secs: config.scan_age_secs(),
                protocols: config.protocols.clone(),
                lock_token: lock_token.clone(),
            }
            .run(),
        ),
        tokio::spawn(
            insert::InsertWorker {
                storage: storage.clone(),
                interrupt: interrupt.clone(),
                rx: insert_rx,
                depth: insert_depth,
                backlog: Vec::new(),
            }
            .run(),
        ),
        tokio::spawn(
            update::UpdateWorker {
                storage: storage.clone(),
                interrupt: interrupt.clone(),
                rx: update_rx,
                depth: update_depth,
                backlog: Vec::new(),
                threshold: FLUSH_THRESHOLD,
            }
            .run(),
        ),
        tokio::spawn(
            results::ResultsWorker {
                storage: storage.clone(),
                interrupt: interrupt.clone(),
                rx: results_rx,
                depth: results_depth,
                backlog: Vec::new(),
                threshold: FLUSH_THRESHOLD,
            }
            .run(),
        ),
        tokio::spawn(
            cleanup::CleanupWorker {
                storage,
                interrupt,
                lock_token,
                age_days: config.cleanup_age_days,
                min_tests: config.cleanup_test_count,
                fail_ratio: config.cleanup_fail_ratio,
            }
            .run(),
        ),
    ];

    (hub, QueueWorkers { handles })
}

/// Sleep that wakes early on interrupt.
pub(crate) async fn idle(interrupt: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = interrupt.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

/// Linear backoff after a failed flush.
pub(crate) fn failure_backoff(failures: u32) -> Duration {
    Duration::from_secs_f64(failures as f64)
}
