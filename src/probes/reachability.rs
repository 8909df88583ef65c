//! Generic reachability probe: fetch a large, stable site and check its
//! HTML title against a known literal.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use crate::models::{Proxy, ProxyStatus, ProxyTest};
use crate::probes::{classify_response, classify_transport_error, Probe, ProbeError, ProbeTransport};

pub const DEFAULT_URL: &str = "https://www.google.com/";
pub const DEFAULT_TITLE: &str = "Google";

pub struct ReachabilityProbe {
    transport: Arc<dyn ProbeTransport>,
    url: String,
    expected_title: String,
}

impl ReachabilityProbe {
    pub fn new(transport: Arc<dyn ProbeTransport>, url: String, expected_title: String) -> Self {
        ReachabilityProbe {
            transport,
            url,
            expected_title,
        }
    }

    fn classify_body(&self, proxy_id: i64, latency: u32, body: &str) -> ProxyTest {
        match extract_title(body) {
            Some(title) if title == self.expected_title => ProxyTest::new(
                proxy_id,
                ProxyStatus::Ok,
                latency,
                &format!("Access to {}", self.expected_title),
            ),
            _ => ProxyTest::new(proxy_id, ProxyStatus::Error, latency, "Unexpected page title"),
        }
    }
}

/// First `<title>` text in an HTML document.
pub fn extract_title(html: &str) -> Option<String> {
    static TITLE_RE: OnceLock<Regex> = OnceLock::new();
    let re = TITLE_RE.get_or_init(|| {
        Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex")
    });

    re.captures(html).map(|caps| caps[1].trim().to_string())
}

#[async_trait]
impl Probe for ReachabilityProbe {
    fn name(&self) -> &'static str {
        "reachability"
    }

    async fn validate(&self) -> Result<(), ProbeError> {
        let response = self.transport.get(&self.url, &[], None).await?;

        match extract_title(&response.body) {
            Some(title) if title == self.expected_title => Ok(()),
            Some(title) => Err(ProbeError::Validation(format!(
                "unexpected title {title:?} from {}",
                self.url
            ))),
            None => Err(ProbeError::Validation(format!("no title in response from {}", self.url))),
        }
    }

    async fn execute(&self, proxy: &mut Proxy) -> ProxyTest {
        let proxy_url = proxy.url(false);

        let response = match self.transport.get(&self.url, &[], Some(&proxy_url)).await {
            Ok(response) => response,
            Err(e) => return classify_transport_error(proxy.id, &e),
        };

        if let Some(test) = classify_response(proxy.id, &response) {
            return test;
        }

        self.classify_body(proxy.id, response.latency_ms(), &response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_title() {
        assert_eq!(
            extract_title("<html><head><title>Google</title></head></html>").as_deref(),
            Some("Google")
        );
    }

    #[test]
    fn extracts_title_with_attributes_and_whitespace() {
        let html = "<TITLE lang=\"en\">\n  Example Domain \n</TITLE>";
        assert_eq!(extract_title(html).as_deref(), Some("Example Domain"));
    }

    #[test]
    fn missing_title_is_none() {
        assert_eq!(extract_title("<html><body>nothing</body></html>"), None);
    }
}
