//! Reads a local proxy list, one address per line. Blank lines and `#`
//! comments are ignored. Lines carry their own scheme or are skipped by
//! the parser.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use crate::models::ProxyProtocol;
use crate::scrape::{ScrapeError, ScrapeSession, Scraper};

pub struct FileReader {
    path: PathBuf,
}

impl FileReader {
    pub fn new(path: PathBuf) -> Self {
        FileReader { path }
    }
}

#[async_trait]
impl Scraper for FileReader {
    fn name(&self) -> &'static str {
        "file-reader"
    }

    fn protocol(&self) -> Option<ProxyProtocol> {
        None
    }

    async fn scrape(&self, _session: &ScrapeSession) -> Result<Vec<String>, ScrapeError> {
        let content = tokio::fs::read_to_string(&self.path).await?;

        let lines: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(String::from)
            .collect();

        info!("Read {} proxies from file: {}", lines.len(), self.path.display());
        Ok(lines)
    }
}
