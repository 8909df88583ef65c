/*!
HTML scraper for spys.one.

The listing sits behind a POST with a hidden `xx0` token, and every port
is obfuscated twice: a packed `eval(function(p,a,c,k,e,d){…})` script
defines an XOR variable table, and each row's port is written as a chain
of `(var^var)` reads against that table.
*/

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

use crate::deobfuscate::{decode_crazyxor, parse_crazyxor, unpack};
use crate::models::{validate_ip, ProxyProtocol};
use crate::scrape::{row_cells, strip_tags, ScrapeError, ScrapeSession, Scraper};

fn hidden_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<input[^>]*name="?xx0"?[^>]*value="?([0-9a-f]+)"?"#).expect("token regex")
    })
}

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script[^>]*>(.*?)</script>").expect("script regex"))
}

fn spy_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<tr class="spy1xx?"[^>]*>(.*?)</tr>"#).expect("spy row regex")
    })
}

fn port_read_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([\w\^]+)\)").expect("port read regex"))
}

fn country_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([\w\s]+) \(.*").expect("country regex"))
}

pub struct SpysOne {
    name: &'static str,
    base_url: &'static str,
    post_data: &'static str,
    protocol: ProxyProtocol,
    ignore_countries: Vec<String>,
}

impl SpysOne {
    pub fn https() -> Self {
        SpysOne {
            name: "spys-one-https",
            base_url: "https://spys.one/en/https-ssl-proxy/",
            post_data: "xpp=5&xf1=1&xf4=0&xf5=0",
            protocol: ProxyProtocol::Http,
            ignore_countries: Vec::new(),
        }
    }

    pub fn socks() -> Self {
        SpysOne {
            name: "spys-one-socks",
            base_url: "https://spys.one/en/socks-proxy-list/",
            post_data: "xpp=5&xf1=0&xf2=0&xf4=0&xf5=0",
            protocol: ProxyProtocol::Socks5,
            ignore_countries: Vec::new(),
        }
    }

    fn parse_secret(html: &str) -> Option<String> {
        hidden_token_re()
            .captures(html)
            .map(|caps| caps[1].to_string())
    }

    /// Find and resolve the XOR variable table hidden in the page scripts.
    fn parse_encoding(html: &str) -> HashMap<String, i64> {
        for caps in script_re().captures_iter(html) {
            for line in caps[1].lines() {
                let line = line.trim();
                if line.contains('^') && line.contains(';') && line.contains('=') {
                    debug!("Found XOR decoding script.");
                    let clean = unpack(line);
                    let encoding = parse_crazyxor(&clean);
                    if !encoding.is_empty() {
                        return encoding;
                    }
                }
            }
        }
        HashMap::new()
    }

    fn parse_webpage(&self, html: &str) -> Vec<String> {
        let mut proxylist = Vec::new();

        let encoding = Self::parse_encoding(html);
        if encoding.is_empty() {
            error!("Unable to find XOR decoding script.");
            return proxylist;
        }

        for row_caps in spy_row_re().captures_iter(html) {
            let row = &row_caps[1];
            let cells = row_cells(row);
            if cells.len() != 10 {
                continue;
            }

            let Some(script_caps) = script_re().captures(cells[0]) else {
                warn!("Unable to find port obfuscation script.");
                continue;
            };
            let port_script = script_caps[1].to_string();

            let without_script = script_re().replace_all(cells[0], "");
            let ip = strip_tags(&without_script);
            if !validate_ip(&ip) {
                warn!("Invalid IP found: {ip:?}");
                continue;
            }

            let port: String = port_read_re()
                .captures_iter(&port_script)
                .map(|caps| decode_crazyxor(&encoding, &caps[1]))
                .collect();
            if port.is_empty() {
                continue;
            }

            let anonymity = strip_tags(cells[2]);
            if anonymity != "ANM" && anonymity != "HIA" {
                debug!("Skipped non-anonymous proxy.");
                continue;
            }

            let mut country = strip_tags(cells[3]).to_lowercase();
            if let Some(caps) = country_name_re().captures(&country) {
                country = caps[1].trim().to_string();
            }
            if self.ignore_countries.iter().any(|c| country.contains(c)) {
                continue;
            }

            proxylist.push(format!("{ip}:{port}"));
        }

        info!("Parsed {} proxies from webpage.", proxylist.len());
        proxylist
    }
}

#[async_trait]
impl Scraper for SpysOne {
    fn name(&self) -> &'static str {
        self.name
    }

    fn protocol(&self) -> Option<ProxyProtocol> {
        Some(self.protocol)
    }

    async fn scrape(&self, session: &ScrapeSession) -> Result<Vec<String>, ScrapeError> {
        let html = session.get(self.base_url, Some(self.base_url)).await?;

        let Some(secret) = Self::parse_secret(&html) else {
            error!("Unable to find secret \"xx0\" parameter.");
            session.cache_response(self.name, &html);
            return Ok(Vec::new());
        };
        debug!("Found secret \"xx0\" parameter: {secret}");

        let post_data = format!("xx0={secret}&{}", self.post_data);
        let html = session
            .post_form(self.base_url, Some(self.base_url), &post_data)
            .await?;

        info!("Parsing proxy list from webpage: {}", self.base_url);
        let proxylist = self.parse_webpage(&html);
        if proxylist.is_empty() {
            session.cache_response(self.name, &html);
        }

        Ok(proxylist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spy_cell(content: &str) -> String {
        format!("<td colspan=\"1\">{content}</td>")
    }

    fn page(rows: &str) -> String {
        // Table, preceded by the XOR table script. Digits for port 8080:
        // a1^b1 = 12^4 = 8, c1^d1 = 7^(3^4) = 0.
        format!(
            "<html><script type=\"text/javascript\">a1=12;b1=4;c1=7;d1=3^4;</script>\
             <table>{rows}</table></html>"
        )
    }

    fn row(ip: &str, anonymity: &str, country: &str) -> String {
        let mut cells = String::new();
        cells.push_str(&spy_cell(&format!(
            "<font class=\"spy14\">{ip}<script type=\"text/javascript\">\
             document.write(\"<font class=spy2>:</font>\"+(a1^b1)+(c1^d1)+(a1^b1)+(c1^d1))\
             </script></font>"
        )));
        cells.push_str(&spy_cell("proxy type"));
        cells.push_str(&spy_cell(anonymity));
        cells.push_str(&spy_cell(country));
        for _ in 0..6 {
            cells.push_str(&spy_cell("x"));
        }
        format!("<tr class=\"spy1x\" onmouseover=\"x\">{cells}</tr>")
    }

    #[test]
    fn finds_hidden_token() {
        let html = r#"<form><input type="hidden" name="xx0" value="ab12cd34"/></form>"#;
        assert_eq!(SpysOne::parse_secret(html).as_deref(), Some("ab12cd34"));
        assert_eq!(SpysOne::parse_secret("<form></form>"), None);
    }

    #[test]
    fn decodes_xor_obfuscated_ports() {
        let html = page(&row("183.88.16.161", "ANM", "thailand (bangkok)"));
        let scraper = SpysOne::https();
        assert_eq!(scraper.parse_webpage(&html), vec!["183.88.16.161:8080"]);
    }

    #[test]
    fn skips_transparent_rows() {
        let html = page(&row("183.88.16.161", "NOA", "thailand"));
        let scraper = SpysOne::https();
        assert!(scraper.parse_webpage(&html).is_empty());
    }

    #[test]
    fn packed_encoding_script_is_unpacked_first() {
        // Same table wrapped in the eval packer.
        let packed = "eval(function(p,a,c,k,e,d){while(c--){if(k[c]){p=p.replace(new RegExp('\\b'+c+'\\b','g'),k[c])}}return p}('0=12;1=4;2=7;3=15^8;',4,4,'a1|b1|c1|d1'.split('|'),0,{}))";
        let html = format!(
            "<html><script type=\"text/javascript\">{packed}</script>\
             <table>{}</table></html>",
            row("10.0.0.1", "HIA", "portugal")
        );
        let scraper = SpysOne::socks();
        assert_eq!(scraper.parse_webpage(&html), vec!["10.0.0.1:8080"]);
    }
}
