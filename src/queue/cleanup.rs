//! Cleanup worker: crash recovery and pruning of chronic failures.
//!
//! Every pass, under the cross-process lock: release proxies stuck in
//! TESTING back to ERROR, then delete long-window failures in bounded
//! batches.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::storage::{Storage, StorageError};

use super::{failure_backoff, idle, MAX_FLUSH_FAILURES};

/// Minutes in TESTING before a claim counts as stuck.
pub const STUCK_MINUTES: i64 = 10;

/// Rows deleted per cleanup pass.
pub const DELETE_LIMIT: i64 = 100;

/// Probe history retention.
pub const TEST_RETENTION_DAYS: i64 = 365;

/// Pause between passes.
pub const PASS_INTERVAL: Duration = Duration::from_secs(30);

pub struct CleanupWorker {
    pub storage: Arc<Storage>,
    pub interrupt: CancellationToken,
    pub lock_token: String,
    pub age_days: i64,
    pub min_tests: i64,
    pub fail_ratio: f64,
}

impl CleanupWorker {
    async fn pass(&self) -> Result<(), StorageError> {
        let unstuck = self.storage.unlock_stuck(STUCK_MINUTES).await?;
        if unstuck > 0 {
            debug!("Unlocked {unstuck} proxies stuck in testing.");
        }

        let deleted = self
            .storage
            .delete_failed(self.age_days, self.min_tests, self.fail_ratio, DELETE_LIMIT)
            .await?;
        if deleted > 0 {
            debug!("Deleted {deleted} broken proxies.");
        }

        let pruned = self
            .storage
            .delete_tests_older_than(TEST_RETENTION_DAYS)
            .await?;
        if pruned > 0 {
            debug!("Pruned {pruned} ancient proxy tests.");
        }

        Ok(())
    }

    pub async fn run(self) {
        debug!("Cleanup worker started.");
        let mut failures: u32 = 0;

        loop {
            if failures > MAX_FLUSH_FAILURES {
                error!("Unable to clean up database.");
                self.interrupt.cancel();
                break;
            }

            if self.interrupt.is_cancelled() {
                break;
            }

            match self.storage.lock_database(&self.lock_token).await {
                Ok(true) => {}
                Ok(false) => {
                    idle(&self.interrupt, Duration::from_secs(1)).await;
                    continue;
                }
                Err(e) => {
                    warn!("Failed to lock database: {e}");
                    failures += 1;
                    idle(&self.interrupt, failure_backoff(failures)).await;
                    continue;
                }
            }

            let result = self.pass().await;

            if let Err(e) = self.storage.unlock_database(&self.lock_token).await {
                warn!("Failed to unlock database: {e}");
            }

            match result {
                Ok(()) => {
                    failures = 0;
                    idle(&self.interrupt, PASS_INTERVAL).await;
                }
                Err(e) => {
                    warn!("Failed to delete broken proxies: {e}");
                    failures += 1;
                    idle(&self.interrupt, failure_backoff(failures)).await;
                }
            }
        }

        debug!("Cleanup worker shut down.");
    }
}
