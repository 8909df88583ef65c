//! Per-source scraper adapters.

pub mod file;
pub mod freeproxylist;
pub mod geonode;
pub mod openproxy;
pub mod proxynova;
pub mod proxyscrape;
pub mod socksproxy;
pub mod spysone;
pub mod thespeedx;

use std::sync::Arc;

use crate::config::Config;
use crate::models::ProxyProtocol;

use super::Scraper;

/// Assemble the scraper registry for the configured sources and protocol
/// filter. The file reader (when configured) always runs; web sources only
/// when scraping is enabled.
pub fn registry(config: &Config) -> Vec<Arc<dyn Scraper>> {
    let mut scrapers: Vec<Arc<dyn Scraper>> = Vec::new();

    if let Some(path) = &config.proxy_file {
        scrapers.push(Arc::new(file::FileReader::new(path.clone())));
    }

    if !config.proxy_scrap {
        return scrapers;
    }

    let wants = |protocol: ProxyProtocol| {
        config.protocols.is_empty() || config.protocols.contains(&protocol)
    };

    if wants(ProxyProtocol::Http) {
        scrapers.push(Arc::new(freeproxylist::FreeProxyList::with_ignored_countries(
            config.ignore_countries.clone(),
        )));
        scrapers.push(Arc::new(proxynova::ProxyNova::new(
            config.ignore_countries.clone(),
        )));
        scrapers.push(Arc::new(spysone::SpysOne::https()));
        scrapers.push(Arc::new(openproxy::OpenProxySpace::http()));
        scrapers.push(Arc::new(proxyscrape::ProxyScrape::http()));
        scrapers.push(Arc::new(thespeedx::TheSpeedX::http()));
        scrapers.push(Arc::new(geonode::GeoNode::http()));
    }

    if wants(ProxyProtocol::Socks4) {
        scrapers.push(Arc::new(openproxy::OpenProxySpace::socks4()));
        scrapers.push(Arc::new(proxyscrape::ProxyScrape::socks4()));
        scrapers.push(Arc::new(thespeedx::TheSpeedX::socks4()));
        scrapers.push(Arc::new(geonode::GeoNode::socks4()));
    }

    if wants(ProxyProtocol::Socks5) {
        scrapers.push(Arc::new(socksproxy::SocksProxy::new(
            config.ignore_countries.clone(),
        )));
        scrapers.push(Arc::new(spysone::SpysOne::socks()));
        scrapers.push(Arc::new(openproxy::OpenProxySpace::socks5()));
        scrapers.push(Arc::new(proxyscrape::ProxyScrape::socks5()));
        scrapers.push(Arc::new(thespeedx::TheSpeedX::socks5()));
        scrapers.push(Arc::new(geonode::GeoNode::socks5()));
    }

    scrapers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn config(args: &[&str]) -> Config {
        let mut full = vec!["proxyscan"];
        full.extend_from_slice(args);
        Config::from_cli(Cli::try_parse_from(full).unwrap()).unwrap()
    }

    #[test]
    fn file_only_when_scraping_disabled() {
        let config = config(&["--proxy-file", "proxies.txt"]);
        let scrapers = registry(&config);
        assert_eq!(scrapers.len(), 1);
        assert_eq!(scrapers[0].name(), "file-reader");
    }

    #[test]
    fn socks5_filter_excludes_http_sources() {
        let config = config(&["--proxy-scrap", "--proxy-protocol", "socks5"]);
        let scrapers = registry(&config);
        assert!(!scrapers.is_empty());
        for scraper in &scrapers {
            assert_ne!(scraper.protocol(), Some(ProxyProtocol::Http), "{}", scraper.name());
        }
    }

    #[test]
    fn all_protocols_include_every_family() {
        let config = config(&["--proxy-scrap"]);
        let names: Vec<&str> = registry(&config).iter().map(|s| s.name()).collect();
        for expected in [
            "freeproxylist-net",
            "proxynova-com",
            "spys-one-https",
            "spys-one-socks",
            "socksproxy-net",
            "open-proxy-space-socks4",
            "proxy-scrape-socks5",
            "the-speed-x-http",
            "geo-node-socks5",
        ] {
            assert!(names.contains(&expected), "missing {expected} in {names:?}");
        }
    }
}
