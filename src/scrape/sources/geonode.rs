//! JSON API scraper for proxylist.geonode.com, walking paginated results.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::ProxyProtocol;
use crate::scrape::{ScrapeError, ScrapeSession, Scraper};

const BASE_URL: &str = "https://proxylist.geonode.com/api/proxy-list\
?limit=500&sort_by=lastChecked&sort_type=desc\
&anonymityLevel=elite&anonymityLevel=anonymous";

pub struct GeoNode {
    name: &'static str,
    base_url: String,
    protocol: ProxyProtocol,
}

impl GeoNode {
    pub fn http() -> Self {
        GeoNode {
            name: "geo-node-http",
            base_url: format!("{BASE_URL}&protocols=http%2Chttps"),
            protocol: ProxyProtocol::Http,
        }
    }

    pub fn socks4() -> Self {
        GeoNode {
            name: "geo-node-socks4",
            base_url: format!("{BASE_URL}&protocols=socks4"),
            protocol: ProxyProtocol::Socks4,
        }
    }

    pub fn socks5() -> Self {
        GeoNode {
            name: "geo-node-socks5",
            base_url: format!("{BASE_URL}&protocols=socks5"),
            protocol: ProxyProtocol::Socks5,
        }
    }

    /// Extract `ip:port` entries from one page of results.
    fn parse_page(json: &serde_json::Value) -> Vec<String> {
        let mut proxies = Vec::new();

        for row in json.get("data").and_then(|d| d.as_array()).unwrap_or(&Vec::new()) {
            let ip = row.get("ip").and_then(|v| v.as_str());
            // The API serves ports as strings or numbers depending on age.
            let port = match row.get("port") {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };

            if let (Some(ip), Some(port)) = (ip, port) {
                proxies.push(format!("{ip}:{port}"));
            }
        }

        proxies
    }
}

#[async_trait]
impl Scraper for GeoNode {
    fn name(&self) -> &'static str {
        self.name
    }

    fn protocol(&self) -> Option<ProxyProtocol> {
        Some(self.protocol)
    }

    async fn scrape(&self, session: &ScrapeSession) -> Result<Vec<String>, ScrapeError> {
        let mut proxylist = Vec::new();
        let mut page: u64 = 1;
        let mut total_pages: u64 = 1;

        while page <= total_pages {
            let url = format!("{}&page={page}", self.base_url);
            let json = session.get_json(&url).await?;

            if page == 1 {
                let total = json.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
                let limit = json.get("limit").and_then(|v| v.as_u64()).unwrap_or(500).max(1);
                total_pages = total.div_ceil(limit);
                if total_pages == 0 {
                    warn!("{} returned an empty result set.", self.name);
                    break;
                }
            }

            info!("Parsing proxy list from: {url}");
            proxylist.extend(Self::parse_page(&json));
            page += 1;
        }

        info!("Parsed {} proxies from API.", proxylist.len());
        Ok(proxylist)
    }
}
