//! Plain-list scraper for the proxyscrape.com API.

use async_trait::async_trait;
use tracing::info;

use crate::models::ProxyProtocol;
use crate::scrape::{ScrapeError, ScrapeSession, Scraper};

const BASE_URL: &str = "https://api.proxyscrape.com/?request=getproxies";

pub struct ProxyScrape {
    name: &'static str,
    url: String,
    protocol: ProxyProtocol,
}

impl ProxyScrape {
    pub fn http() -> Self {
        ProxyScrape {
            name: "proxy-scrape-http",
            url: format!("{BASE_URL}&proxytype=http&timeout=10000&country=all&ssl=all&anonymity=anonymous"),
            protocol: ProxyProtocol::Http,
        }
    }

    pub fn socks4() -> Self {
        ProxyScrape {
            name: "proxy-scrape-socks4",
            url: format!("{BASE_URL}&proxytype=socks4&timeout=10000&country=all"),
            protocol: ProxyProtocol::Socks4,
        }
    }

    pub fn socks5() -> Self {
        ProxyScrape {
            name: "proxy-scrape-socks5",
            url: format!("{BASE_URL}&proxytype=socks5&timeout=10000&country=all"),
            protocol: ProxyProtocol::Socks5,
        }
    }
}

#[async_trait]
impl Scraper for ProxyScrape {
    fn name(&self) -> &'static str {
        self.name
    }

    fn protocol(&self) -> Option<ProxyProtocol> {
        Some(self.protocol)
    }

    async fn scrape(&self, session: &ScrapeSession) -> Result<Vec<String>, ScrapeError> {
        info!("Downloading proxy list from: {}", self.url);
        let body = session.get(&self.url, None).await?;

        let lines: Vec<String> = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        info!("Parsed {} proxies from list.", lines.len());
        Ok(lines)
    }
}
