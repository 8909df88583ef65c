//! HTML table scraper for proxynova.com.
//!
//! The IP column hides the address inside a `document.write(...)` script
//! using a rotation of string-obfuscation tricks; the expression evaluator
//! in [`crate::deobfuscate`] reduces it to the literal.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

use crate::deobfuscate::deobfuscate_js;
use crate::models::{validate_ip, ProxyProtocol};
use crate::scrape::{row_cells, strip_tags, table_rows, ScrapeError, ScrapeSession, Scraper};

const BASE_URL: &str = "https://www.proxynova.com";
const URLS: &[&str] = &[
    "https://www.proxynova.com/proxy-server-list/elite-proxies/",
    "https://www.proxynova.com/proxy-server-list/anonymous-proxies/",
];

fn document_write_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)document\.write\((.*?)\);?\s*</script>").expect("dw regex"))
}

pub struct ProxyNova {
    ignore_countries: Vec<String>,
}

impl ProxyNova {
    pub fn new(ignore_countries: Vec<String>) -> Self {
        ProxyNova { ignore_countries }
    }

    fn parse_webpage(&self, html: &str) -> Vec<String> {
        let mut proxylist = Vec::new();

        for row in table_rows(html) {
            let cells = row_cells(row);
            if cells.len() != 7 {
                continue;
            }

            // Several obfuscation methods are used on rotation.
            let Some(caps) = document_write_re().captures(cells[0]) else {
                debug!("No obfuscated IP script in row.");
                continue;
            };

            let ip = deobfuscate_js(&caps[1]);
            if !validate_ip(&ip) {
                warn!("Invalid IP format parsed: {ip:?}");
                continue;
            }

            let port = strip_tags(cells[1]);
            let country = strip_tags(cells[5]).to_lowercase();
            let status = strip_tags(cells[6]).to_lowercase();

            if self.ignore_countries.iter().any(|c| country.contains(c)) {
                continue;
            }
            if status.contains("transparent") {
                continue;
            }

            proxylist.push(format!("{ip}:{port}"));
        }

        info!("Parsed {} http proxies from webpage.", proxylist.len());
        proxylist
    }
}

#[async_trait]
impl Scraper for ProxyNova {
    fn name(&self) -> &'static str {
        "proxynova-com"
    }

    fn protocol(&self) -> Option<ProxyProtocol> {
        Some(ProxyProtocol::Http)
    }

    async fn scrape(&self, session: &ScrapeSession) -> Result<Vec<String>, ScrapeError> {
        let mut proxylist = Vec::new();

        for url in URLS {
            let html = match session.get(url, Some(BASE_URL)).await {
                Ok(html) => html,
                Err(e) => {
                    error!("Failed to download webpage {url}: {e}");
                    continue;
                }
            };

            info!("Parsing proxy list from webpage: {url}");
            let proxies = self.parse_webpage(&html);
            if proxies.is_empty() {
                session.cache_response("proxynova-com", &html);
            }
            proxylist.extend(proxies);
        }

        Ok(proxylist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ip_script: &str, port: &str, country: &str, status: &str) -> String {
        format!(
            "<tr>\
             <td><script>document.write({ip_script});</script></td>\
             <td>{port}</td><td>x</td><td>x</td><td>x</td>\
             <td><a href=\"#\">{country}</a></td>\
             <td><span>{status}</span></td>\
             </tr>"
        )
    }

    #[test]
    fn deobfuscates_ip_column() {
        let html = format!(
            "<table id=\"tbl_proxy_list\"><tbody>{}</tbody></table>",
            row("\"1.2.3.\".concat(\"4\")", "8080", "Portugal", "elite")
        );
        let scraper = ProxyNova::new(Vec::new());
        assert_eq!(scraper.parse_webpage(&html), vec!["1.2.3.4:8080"]);
    }

    #[test]
    fn skips_transparent_and_bad_ips() {
        let html = format!(
            "<table><tbody>{}{}</tbody></table>",
            row("\"9.9.9.9\"", "80", "Germany", "transparent proxy"),
            row("\"not-an-ip\"", "80", "Germany", "elite")
        );
        let scraper = ProxyNova::new(Vec::new());
        assert!(scraper.parse_webpage(&html).is_empty());
    }
}
