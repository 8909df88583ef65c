/*!
Scraper framework.

A scraper is an independent unit producing raw address strings from one
upstream source. The framework supplies the retrying HTTP session (with an
optional upstream proxy so sources cannot block this node), response
caching for debugging, and the shared line parser that turns raw strings
into [`ProxyRecord`]s. Malformed lines are logged and skipped; a failing
scraper yields an empty list and never aborts the pool.
*/

pub mod pool;
pub mod session;
pub mod sources;

pub use pool::HarvesterPool;
pub use session::ScrapeSession;

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::models::{parse_proxy, ProxyProtocol, ProxyRecord, MIN_ADDRESS_LEN};
use crate::probes::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
}

/// One upstream proxy source.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &'static str;

    /// Protocol assigned to bare addresses this source yields.
    fn protocol(&self) -> Option<ProxyProtocol>;

    /// Fetch and extract raw address strings.
    async fn scrape(&self, session: &ScrapeSession) -> Result<Vec<String>, ScrapeError>;
}

/// Parse raw address lines into records, skipping anything malformed.
pub fn parse_lines(
    name: &str,
    lines: &[String],
    default_protocol: Option<ProxyProtocol>,
) -> Vec<ProxyRecord> {
    let mut result = Vec::new();

    for line in lines {
        let line = line.trim();
        if line.len() < MIN_ADDRESS_LEN {
            debug!("Invalid proxy address: {line}");
            continue;
        }
        match parse_proxy(line, default_protocol) {
            Ok(record) => result.push(record),
            Err(e) => debug!("{e}"),
        }
    }

    info!("{name} successfully parsed {} proxies.", result.len());
    result
}

// Minimal HTML helpers shared by the table scrapers. The sources only need
// row/cell iteration and tag stripping, not a document model.

pub(crate) fn table_rows(html: &str) -> Vec<&str> {
    static ROW_RE: OnceLock<Regex> = OnceLock::new();
    let re = ROW_RE.get_or_init(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("row regex"));
    re.captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

pub(crate) fn row_cells(row: &str) -> Vec<&str> {
    static CELL_RE: OnceLock<Regex> = OnceLock::new();
    let re = CELL_RE.get_or_init(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").expect("cell regex"));
    re.captures_iter(row)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

pub(crate) fn strip_tags(fragment: &str) -> String {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    let re = TAG_RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));
    re.replace_all(fragment, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lines_skips_malformed() {
        let lines = vec![
            "1.2.3.4:8080".to_string(),
            "bad".to_string(),
            "socks5://5.6.7.8:1080".to_string(),
            "999.1.1.1:80".to_string(),
        ];
        let records = parse_lines("test", &lines, Some(ProxyProtocol::Http));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].protocol, ProxyProtocol::Http);
        assert_eq!(records[1].protocol, ProxyProtocol::Socks5);
    }

    #[test]
    fn html_row_and_cell_iteration() {
        let html = "<table><tr><td>1.2.3.4</td><td>8080</td></tr>\
                    <tr class=\"x\"><td><b>5.6.7.8</b></td><td>3128</td></tr></table>";
        let rows = table_rows(html);
        assert_eq!(rows.len(), 2);

        let cells = row_cells(rows[1]);
        assert_eq!(cells.len(), 2);
        assert_eq!(strip_tags(cells[0]), "5.6.7.8");
    }

    #[test]
    fn strip_tags_handles_nested_markup() {
        assert_eq!(strip_tags("<a href=\"x\"><span> us </span></a>"), "us");
    }
}
