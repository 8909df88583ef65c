//! Plain-list scraper for the TheSpeedX/SOCKS-List GitHub mirrors.

use async_trait::async_trait;
use tracing::info;

use crate::models::ProxyProtocol;
use crate::scrape::{ScrapeError, ScrapeSession, Scraper};

const BASE_URL: &str = "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/";

pub struct TheSpeedX {
    name: &'static str,
    url: String,
    protocol: ProxyProtocol,
}

impl TheSpeedX {
    pub fn http() -> Self {
        TheSpeedX {
            name: "the-speed-x-http",
            url: format!("{BASE_URL}http.txt"),
            protocol: ProxyProtocol::Http,
        }
    }

    pub fn socks4() -> Self {
        TheSpeedX {
            name: "the-speed-x-socks4",
            url: format!("{BASE_URL}socks4.txt"),
            protocol: ProxyProtocol::Socks4,
        }
    }

    pub fn socks5() -> Self {
        TheSpeedX {
            name: "the-speed-x-socks5",
            url: format!("{BASE_URL}socks5.txt"),
            protocol: ProxyProtocol::Socks5,
        }
    }
}

#[async_trait]
impl Scraper for TheSpeedX {
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
