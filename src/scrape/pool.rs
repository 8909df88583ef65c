/*!
Harvester pool.

Launches every registered scraper in parallel under a bounded-concurrency
semaphore and funnels each scraper's parsed records straight into the
insert queue. A failing scraper logs and contributes nothing; the pool is
relaunched on every refresh tick.
*/

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::queue::QueueHub;
use crate::scrape::{parse_lines, ScrapeSession, Scraper};
use crate::storage::Storage;

/// Simultaneously running scrapers.
pub const MAX_CONCURRENT_SCRAPERS: usize = 6;

pub struct HarvesterPool {
    config: Arc<Config>,
    scrapers: Vec<Arc<dyn Scraper>>,
    storage: Arc<Storage>,
    hub: Arc<QueueHub>,
    interrupt: CancellationToken,
}

impl HarvesterPool {
    pub fn new(
        config: Arc<Config>,
        scrapers: Vec<Arc<dyn Scraper>>,
        storage: Arc<Storage>,
        hub: Arc<QueueHub>,
        interrupt: CancellationToken,
    ) -> Self {
        HarvesterPool {
            config,
            scrapers,
            storage,
            hub,
            interrupt,
        }
    }

    async fn build_session(&self) -> Option<ScrapeSession> {
        let session = match ScrapeSession::new(
            self.config.scraper_timeout,
            self.config.scraper_retries,
            self.config.scraper_backoff_factor,
            crate::useragent::generate(self.config.user_agent),
            self.config.download_path.clone(),
            self.config.verbose,
        ) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to build scraper session: {e}");
                return None;
            }
        };

        let session = if let Some(url) = &self.config.scraper_proxy {
            session.with_fixed_upstream(url.clone())
        } else if self.config.scraper_anonymous {
            session
                .with_stored_upstream(&self.storage, self.hub.clone())
                .await
        } else {
            session
        };

        Some(session)
    }

    /// Run every scraper once. Returns the number of records queued.
    pub async fn harvest(&self) -> usize {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_SCRAPERS));
        let mut handles = Vec::with_capacity(self.scrapers.len());

        for scraper in &self.scrapers {
            if self.interrupt.is_cancelled() {
                break;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            let Some(session) = self.build_session().await else {
                continue;
            };
            let scraper = scraper.clone();
            let hub = self.hub.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let name = scraper.name();

                let lines = match scraper.scrape(&session).await {
                    Ok(lines) => lines,
                    Err(e) => {
                        error!("{name} proxy scraper failed: {e}");
                        return 0;
                    }
                };

                info!("{name} scraped a total of {} proxies.", lines.len());
                let records = parse_lines(name, &lines, scraper.protocol());
                let count = records.len();
                hub.insert_records(records);
                count
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap_or(0);
        }

        info!("Harvest pass queued {total} proxies.");
        total
    }
}
