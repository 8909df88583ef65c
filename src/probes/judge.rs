/*!
Anonymity probe against an env-dump proxy judge.

The judge echoes the request headers and `REMOTE_ADDR`. A proxy is
anonymous when none of the echoed values contains this node's public IP and
the echoed User-Agent is the one we sent. The public IP is learned at
validation time by calling the judge directly, without a proxy.
*/

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::models::{Proxy, ProxyStatus, ProxyTest, validate_ip};
use crate::probes::{classify_response, classify_transport_error, Probe, ProbeError, ProbeTransport};

/// Header names inspected for IP leaks, as echoed by azenv-style judges.
const LEAK_KEYWORDS: &[&str] = &[
    "REMOTE_ADDR",
    "USER_AGENT",
    "FORWARDED_FOR",
    "FORWARDED",
    "CLIENT_IP",
    "X_FORWARDED_FOR",
    "X_FORWARDED",
    "X_CLUSTER_CLIENT_IP",
];

pub struct AnonymityJudge {
    transport: Arc<dyn ProbeTransport>,
    /// Judge endpoints, round-robined across probe executions.
    judge_urls: Vec<String>,
    next_url: AtomicUsize,
    public_ip: RwLock<Option<String>>,
}

impl AnonymityJudge {
    pub fn new(transport: Arc<dyn ProbeTransport>, judge_urls: Vec<String>) -> Self {
        AnonymityJudge {
            transport,
            judge_urls,
            next_url: AtomicUsize::new(0),
            public_ip: RwLock::new(None),
        }
    }

    fn judge_url(&self) -> &str {
        let idx = self.next_url.fetch_add(1, Ordering::Relaxed);
        &self.judge_urls[idx % self.judge_urls.len()]
    }

    /// The public IP learned during validation.
    pub fn public_ip(&self) -> Option<String> {
        self.public_ip.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Ask the judge for this node's public address, without a proxy.
    pub async fn discover_public_ip(&self) -> Result<String, ProbeError> {
        let url = self.judge_url();
        let response = self.transport.get(url, &[], None).await?;

        let env = parse_env_response(&response.body);
        let ip = env
            .get("REMOTE_ADDR")
            .map(|s| s.trim().to_string())
            .filter(|s| validate_ip(s))
            .ok_or_else(|| {
                ProbeError::Validation(format!("judge did not echo REMOTE_ADDR: {url}"))
            })?;

        *self.public_ip.write().unwrap_or_else(|e| e.into_inner()) = Some(ip.clone());
        Ok(ip)
    }

    fn analyze(&self, proxy_id: i64, latency: u32, env: &HashMap<String, String>) -> ProxyTest {
        if env.is_empty() {
            return ProxyTest::new(proxy_id, ProxyStatus::Error, latency, "Error parsing response");
        }

        let public_ip = self.public_ip();
        if let Some(public_ip) = &public_ip {
            for value in env.values() {
                if value.contains(public_ip) {
                    return ProxyTest::new(
                        proxy_id,
                        ProxyStatus::Error,
                        latency,
                        "Non-anonymous proxy",
                    );
                }
            }
        }

        if env.get("USER_AGENT").map(String::as_str) != Some(self.transport.user_agent()) {
            return ProxyTest::new(proxy_id, ProxyStatus::Error, latency, "Bad user-agent");
        }

        ProxyTest::new(proxy_id, ProxyStatus::Ok, latency, "Anonymous proxy")
    }
}

/// Parse an env-dump body into `KEY = value` pairs for the headers we
/// care about.
pub fn parse_env_response(content: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();

    for line in content.lines() {
        let line_upper = line.to_uppercase();
        for keyword in LEAK_KEYWORDS {
            if line_upper.contains(keyword) {
                if let Some((_, value)) = line.split_once(" = ") {
                    result.insert(keyword.to_string(), value.trim().to_string());
                }
                break;
            }
        }
    }

    result
}

#[async_trait]
impl Probe for AnonymityJudge {
    fn name(&self) -> &'static str {
        "anonymity-judge"
    }

    async fn validate(&self) -> Result<(), ProbeError> {
        let ip = self.discover_public_ip().await?;
        debug!("External IP address found: {ip}");
        Ok(())
    }

    async fn execute(&self, proxy: &mut Proxy) -> ProxyTest {
        let url = self.judge_url();
        let proxy_url = proxy.url(false);

        let response = match self.transport.get(url, &[], Some(&proxy_url)).await {
            Ok(response) => response,
            Err(e) => return classify_transport_error(proxy.id, &e),
        };

        if let Some(test) = classify_response(proxy.id, &response) {
            if test.status == ProxyStatus::Banned {
                warn!("Proxy {} seems to be banned by the judge.", proxy_url);
            }
            return test;
        }

        let env = parse_env_response(&response.body);
        self.analyze(proxy.id, response.latency_ms(), &env)
    }
}
