//! Scraper for openproxy.space, whose lists are embedded in the page's
//! `window.__NUXT__` bootstrap script.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{error, info};

use crate::models::ProxyProtocol;
use crate::scrape::{ScrapeError, ScrapeSession, Scraper};

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})""#).expect("address regex")
    })
}

pub struct OpenProxySpace {
    name: &'static str,
    url: &'static str,
    protocol: ProxyProtocol,
}

impl OpenProxySpace {
    pub fn http() -> Self {
        OpenProxySpace {
            name: "open-proxy-space-http",
            url: "https://openproxy.space/list/http/",
            protocol: ProxyProtocol::Http,
        }
    }

    pub fn socks4() -> Self {
        OpenProxySpace {
            name: "open-proxy-space-socks4",
            url: "https://openproxy.space/list/socks4",
            protocol: ProxyProtocol::Socks4,
        }
    }

    pub fn socks5() -> Self {
        OpenProxySpace {
            name: "open-proxy-space-socks5",
            url: "https://openproxy.space/list/socks5",
            protocol: ProxyProtocol::Socks5,
        }
    }

    fn parse_webpage(html: &str) -> Vec<String> {
        let mut proxylist = Vec::new();

        // Only the NUXT bootstrap script carries the list payload.
        let Some(start) = html.find("window.__NUXT__") else {
            return proxylist;
        };
        let script = &html[start..];
        let script_end = script.find("</script>").unwrap_or(script.len());

        for caps in address_re().captures_iter(&script[..script_end]) {
            proxylist.push(format!("{}:{}", &caps[1], &caps[2]));
        }

        proxylist
    }
}

#[async_trait]
impl Scraper for OpenProxySpace {
    fn name(&self) -> &'static str {
        self.name
    }

    fn protocol(&self) -> Option<ProxyProtocol> {
        Some(self.protocol)
    }

    async fn scrape(&self, session: &ScrapeSession) -> Result<Vec<String>, ScrapeError> {
        let html = session.get(self.url, Some(self.url)).await?;
        info!("Parsing proxy list from webpage: {}", self.url);

        let proxylist = Self::parse_webpage(&html);
        if proxylist.is_empty() {
            error!("Unable to parse proxy list.");
            session.cache_response(self.name, &html);
        } else {
            info!("Parsed {} proxies from webpage.", proxylist.len());
        }

        Ok(proxylist)
    }
}
