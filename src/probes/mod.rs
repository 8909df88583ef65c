/*!
Probe framework: one self-contained network interaction per probe, each
producing a [`ProxyTest`].

A probe declares whether it applies to a proxy (`skip_probe`), how to
validate itself without a proxy at startup (`validate`), and how to turn a
response into a terminal status (`execute`). Transport failures and
non-2xx/banned/empty responses are classified by the framework before a
probe's own parser runs.
*/

pub mod judge;
pub mod reachability;
pub mod session;
pub mod socks;
pub mod vendor;

pub use session::{HttpTransport, ProbeResponse, ProbeTransport, RetryPolicy, TransportError};

use async_trait::async_trait;

use crate::models::{Proxy, ProxyStatus, ProxyTest};

/// HTTP status codes treated as an explicit ban.
pub const STATUS_BANLIST: &[u16] = &[403, 409];

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("validation failed: {0}")]
    Validation(String),
}

/// One probe in the tester pipeline.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this probe does not apply to `proxy`.
    fn skip_probe(&self, _proxy: &Proxy) -> bool {
        false
    }

    /// Run the probe without a proxy against its known-good endpoint.
    /// Called once at startup; a failure refuses the whole suite.
    async fn validate(&self) -> Result<(), ProbeError>;

    /// Execute the probe through `proxy` and classify the outcome. May
    /// mutate the proxy (the SOCKS sniff reclassifies its protocol).
    async fn execute(&self, proxy: &mut Proxy) -> ProxyTest;
}

/// Convert a transport failure into a test outcome.
pub fn classify_transport_error(proxy_id: i64, error: &TransportError) -> ProxyTest {
    let (status, info) = match error {
        TransportError::Timeout => (ProxyStatus::Timeout, "Connection timed out".to_string()),
        TransportError::Connect(kind) => {
            (ProxyStatus::Error, format!("Failed to connect - {kind}"))
        }
        TransportError::RetryExhausted => {
            (ProxyStatus::Error, "Failed to connect - retries exhausted".to_string())
        }
        TransportError::RedirectLoop => (ProxyStatus::Error, "Too many redirects".to_string()),
        TransportError::Other(e) => (ProxyStatus::Error, format!("Unexpected error - {e}")),
    };
    ProxyTest::new(proxy_id, status, 0, &info)
}

/// Framework-level response classification, applied before a probe's own
/// parser: banned status codes, bad status codes, empty bodies. Returns
/// `None` when the probe should inspect the body itself.
pub fn classify_response(proxy_id: i64, response: &ProbeResponse) -> Option<ProxyTest> {
    let latency = response.latency_ms();

    if STATUS_BANLIST.contains(&response.status) {
        return Some(ProxyTest::new(
            proxy_id,
            ProxyStatus::Banned,
            latency,
            "Banned status code",
        ));
    }

    if !(200..300).contains(&response.status) {
        return Some(ProxyTest::new(
            proxy_id,
            ProxyStatus::Error,
            latency,
            &format!("Bad status code: {}", response.status),
        ));
    }

    if response.body.trim().is_empty() {
        return Some(ProxyTest::new(
            proxy_id,
            ProxyStatus::Error,
            latency,
            "Empty response",
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn response(status: u16, body: &str) -> ProbeResponse {
        ProbeResponse {
            status,
            body: body.to_string(),
            elapsed: Duration::from_millis(120),
            headers: HashMap::new(),
        }
    }

    #[test]
    fn timeout_classifies_as_timeout() {
        let test = classify_transport_error(7, &TransportError::Timeout);
        assert_eq!(test.status, ProxyStatus::Timeout);
        assert_eq!(test.info.as_deref(), Some("Connection timed out"));
        assert_eq!(test.proxy_id, 7);
    }

    #[test]
    fn refusal_classifies_as_error() {
        let test = classify_transport_error(1, &TransportError::Connect("refused".to_string()));
        assert_eq!(test.status, ProxyStatus::Error);
        assert!(test.info.unwrap().starts_with("Failed to connect"));
    }

    #[test]
    fn banned_status_codes() {
        for status in [403, 409] {
            let test = classify_response(1, &response(status, "x")).unwrap();
            assert_eq!(test.status, ProxyStatus::Banned);
            assert_eq!(test.info.as_deref(), Some("Banned status code"));
        }
    }

    #[test]
    fn bad_status_code_carries_the_code() {
        let test = classify_response(1, &response(502, "x")).unwrap();
        assert_eq!(test.status, ProxyStatus::Error);
        assert_eq!(test.info.as_deref(), Some("Bad status code: 502"));
    }

    #[test]
    fn empty_body_is_an_error() {
        let test = classify_response(1, &response(200, "  ")).unwrap();
        assert_eq!(test.status, ProxyStatus::Error);
        assert_eq!(test.info.as_deref(), Some("Empty response"));
    }

    #[test]
    fn good_response_passes_through() {
        assert!(classify_response(1, &response(200, "<html>")).is_none());
    }
}
