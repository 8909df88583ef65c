//! HTML table scraper for free-proxy-list.net.
//!
//! Table row format: IP, port, code, country, anonymity, google, https,
//! last checked. Transparent proxies and ignored countries are skipped.

use async_trait::async_trait;
use tracing::{error, info};

use crate::models::ProxyProtocol;
use crate::scrape::{row_cells, strip_tags, table_rows, ScrapeError, ScrapeSession, Scraper};

const BASE_URL: &str = "https://free-proxy-list.net";

pub struct FreeProxyList {
    ignore_countries: Vec<String>,
}

impl FreeProxyList {
    pub fn new() -> Self {
        FreeProxyList {
            ignore_countries: Vec::new(),
        }
    }

    pub fn with_ignored_countries(ignore_countries: Vec<String>) -> Self {
        FreeProxyList { ignore_countries }
    }

    fn parse_webpage(&self, html: &str) -> Vec<String> {
        let mut proxylist = Vec::new();

        for row in table_rows(html) {
            let cells = row_cells(row);
            if cells.len() != 8 {
                continue;
            }

            let ip = strip_tags(cells[0]);
            let port = strip_tags(cells[1]);
            let country = strip_tags(cells[3]).to_lowercase();
            let status = strip_tags(cells[4]).to_lowercase();

            if self.ignore_countries.iter().any(|c| country.contains(c)) {
                continue;
            }
            if status == "transparent" {
                continue;
            }

            proxylist.push(format!("{ip}:{port}"));
        }

        info!("Parsed {} http proxies from webpage.", proxylist.len());
        proxylist
    }
}

impl Default for FreeProxyList {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scraper for FreeProxyList {
    fn name(&self) -> &'static str {
        "freeproxylist-net"
    }

    fn protocol(&self) -> Option<ProxyProtocol> {
        Some(ProxyProtocol::Http)
    }

    async fn scrape(&self, session: &ScrapeSession) -> Result<Vec<String>, ScrapeError> {
        let html = session.get(BASE_URL, None).await?;
        info!("Parsing proxy list from webpage: {BASE_URL}");

        let proxylist = self.parse_webpage(&html);
        if proxylist.is_empty() {
            error!("Unable to find any proxy table rows.");
            session.cache_response("freeproxylist-net", &html);
        }

        Ok(proxylist)
    }
}
