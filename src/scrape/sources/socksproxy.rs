//! HTML table scraper for socks-proxy.net.
//!
//! Rows carry a SOCKS version column; versioned entries keep their scheme,
//! the rest fall back to the source's default protocol.

use async_trait::async_trait;
use tracing::{error, info};

use crate::models::ProxyProtocol;
use crate::scrape::{row_cells, strip_tags, table_rows, ScrapeError, ScrapeSession, Scraper};

const BASE_URL: &str = "https://www.socks-proxy.net/";

pub struct SocksProxy {
    ignore_countries: Vec<String>,
}

impl SocksProxy {
    pub fn new(ignore_countries: Vec<String>) -> Self {
        SocksProxy { ignore_countries }
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
            let version = strip_tags(cells[4]).to_lowercase();
            let status = strip_tags(cells[5]).to_lowercase();

            if status == "transparent" {
                continue;
            }
            if self.ignore_countries.iter().any(|c| country.contains(c)) {
                continue;
            }

            let proxy_url = if version == "socks4" || version == "socks5" {
                format!("{version}://{ip}:{port}")
            } else {
                format!("{ip}:{port}")
            };
            proxylist.push(proxy_url);
        }

        info!("Parsed {} proxies from webpage.", proxylist.len());
        proxylist
    }
}

#[async_trait]
impl Scraper for SocksProxy {
    fn name(&self) -> &'static str {
        "socksproxy-net"
    }

    fn protocol(&self) -> Option<ProxyProtocol> {
        Some(ProxyProtocol::Socks5)
    }

    async fn scrape(&self, session: &ScrapeSession) -> Result<Vec<String>, ScrapeError> {
        let html = session.get(BASE_URL, None).await?;
        info!("Parsing proxy list from webpage: {BASE_URL}");

        let proxylist = self.parse_webpage(&html);
        if proxylist.is_empty() {
            error!("Unable to find any proxy table rows.");
            session.cache_response("socksproxy-net", &html);
        }

        Ok(proxylist)
    }
}
