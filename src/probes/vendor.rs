/*!
Vendor-specific probes.

Three endpoints of the downstream service the pool feeds are probed
directly: the plain-text version endpoint (expected version learned at
validation), the sign-up page (title literal) and the login endpoint (JSON
with `lt` and `execution` keys).
*/

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::info;

use crate::models::{Proxy, ProxyStatus, ProxyTest};
use crate::probes::reachability::extract_title;
use crate::probes::{classify_response, classify_transport_error, Probe, ProbeError, ProbeTransport};

pub const DEFAULT_API_URL: &str = "https://pgorelease.nianticlabs.com/plfe/version";
pub const DEFAULT_SIGNUP_URL: &str = "https://club.pokemon.com/us/pokemon-trainer-club/sign-up/";
pub const DEFAULT_SIGNUP_TITLE: &str = "The Official Pokémon Website | Pokemon.com";
pub const DEFAULT_LOGIN_URL: &str = "https://sso.pokemon.com/sso/login?service=\
https%3A%2F%2Fsso.pokemon.com%2Fsso%2Foauth2.0%2FcallbackAuthorize&locale=en_US";

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\d+\.\d+").expect("version regex"))
}

/// Plain-text version endpoint. The current version string is learned from
/// the direct (proxyless) validation request and then expected in every
/// proxied response.
pub struct ApiVersionProbe {
    transport: Arc<dyn ProbeTransport>,
    url: String,
    version: RwLock<Option<String>>,
}

impl ApiVersionProbe {
    pub fn new(transport: Arc<dyn ProbeTransport>, url: String) -> Self {
        ApiVersionProbe {
            transport,
            url,
            version: RwLock::new(None),
        }
    }

    pub fn expected_version(&self) -> Option<String> {
        self.version.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Probe for ApiVersionProbe {
    fn name(&self) -> &'static str {
        "api-version"
    }

    async fn validate(&self) -> Result<(), ProbeError> {
        let response = self.transport.get(&self.url, &[], None).await?;

        if response.status != 200 {
            return Err(ProbeError::Validation(format!(
                "failed validation request to {} ({})",
                self.url, response.status
            )));
        }

        let version = version_re()
            .find(&response.body)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                ProbeError::Validation(format!("unable to find version in response from {}", self.url))
            })?;

        info!("API version: {version}");
        *self.version.write().unwrap_or_else(|e| e.into_inner()) = Some(version);
        Ok(())
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

        let latency = response.latency_ms();
        match self.expected_version() {
            Some(version) if response.body.contains(&version) => {
                ProxyTest::new(proxy.id, ProxyStatus::Ok, latency, "Access to version API")
            }
            _ => ProxyTest::new(proxy.id, ProxyStatus::Error, latency, "Unexpected version"),
        }
    }
}

/// Sign-up page probe: HTML title must match a known literal.
pub struct SignupPageProbe {
    transport: Arc<dyn ProbeTransport>,
    url: String,
    expected_title: String,
}

impl SignupPageProbe {
    pub fn new(transport: Arc<dyn ProbeTransport>, url: String, expected_title: String) -> Self {
        SignupPageProbe {
            transport,
            url,
            expected_title,
        }
    }

    fn classify_body(&self, proxy_id: i64, latency: u32, body: &str) -> ProxyTest {
        match extract_title(body) {
            Some(title) if title == self.expected_title => {
                ProxyTest::new(proxy_id, ProxyStatus::Ok, latency, "Access to sign-up page")
            }
            _ => ProxyTest::new(proxy_id, ProxyStatus::Error, latency, "Unexpected page title"),
        }
    }
}

#[async_trait]
impl Probe for SignupPageProbe {
    fn name(&self) -> &'static str {
        "signup-page"
    }

    async fn validate(&self) -> Result<(), ProbeError> {
        let response = self.transport.get(&self.url, &[], None).await?;
        let test = self.classify_body(0, 0, &response.body);

        if test.status != ProxyStatus::Ok {
            return Err(ProbeError::Validation(format!(
                "unable to validate response from {}",
                self.url
            )));
        }
        Ok(())
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

/// Login endpoint probe: JSON body must carry both `lt` and `execution`.
pub struct LoginEndpointProbe {
    transport: Arc<dyn ProbeTransport>,
    url: String,
}

impl LoginEndpointProbe {
    pub fn new(transport: Arc<dyn ProbeTransport>, url: String) -> Self {
        LoginEndpointProbe { transport, url }
    }

    fn classify_body(&self, proxy_id: i64, latency: u32, body: &str) -> ProxyTest {
        let parsed: Result<serde_json::Value, _> = serde_json::from_str(body);

        match parsed {
            Ok(json) if json.get("lt").is_some() && json.get("execution").is_some() => {
                ProxyTest::new(proxy_id, ProxyStatus::Ok, latency, "Access to login endpoint")
            }
            _ => ProxyTest::new(proxy_id, ProxyStatus::Error, latency, "Missing login markers"),
        }
    }
}

#[async_trait]
impl Probe for LoginEndpointProbe {
    fn name(&self) -> &'static str {
        "login-endpoint"
    }

    async fn validate(&self) -> Result<(), ProbeError> {
        let response = self.transport.get(&self.url, &[], None).await?;
        let test = self.classify_body(0, 0, &response.body);

        if test.status != ProxyStatus::Ok {
            return Err(ProbeError::Validation(format!(
                "unable to validate response from {}",
                self.url
            )));
        }
        Ok(())
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
    use crate::probes::session::{ProbeResponse, TransportError};
    use std::collections::HashMap;
    use std::time::Duration;

    struct FixedTransport(String);

    #[async_trait]
    impl ProbeTransport for FixedTransport {
        async fn get(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _proxy_url: Option<&str>,
        ) -> Result<ProbeResponse, TransportError> {
            Ok(ProbeResponse {
                status: 200,
                body: self.0.clone(),
                elapsed: Duration::from_millis(80),
                headers: HashMap::new(),
            })
        }

        fn user_agent(&self) -> &str {
            "test-agent"
        }
    }

    fn test_proxy() -> Proxy {
        Proxy {
            id: 3,
            ip: "1.2.3.4".to_string(),
            port: 8080,
            protocol: crate::models::ProxyProtocol::Http,
            username: None,
            password: None,
            status: ProxyStatus::Unknown,
            latency: 0,
            test_count: 0,
            fail_count: 0,
            country: None,
            created: chrono::Utc::now(),
            modified: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn version_learned_then_matched() {
        let transport = Arc::new(FixedTransport("0.245.2\n\x07".to_string()));
        let probe = ApiVersionProbe::new(transport, "http://api.example/version".to_string());

        probe.validate().await.unwrap();
        assert_eq!(probe.expected_version().as_deref(), Some("0.245.2"));

        let mut proxy = test_proxy();
        let test = probe.execute(&mut proxy).await;
        assert_eq!(test.status, ProxyStatus::Ok);
    }

    #[tokio::test]
    async fn login_requires_both_markers() {
        let good = r#"{ "lt": "LT-345-WbnEH", "execution": "e5s1" }"#;
        let probe = LoginEndpointProbe::new(
            Arc::new(FixedTransport(good.to_string())),
            "http://login.example".to_string(),
        );
        let mut proxy = test_proxy();
        assert_eq!(probe.execute(&mut proxy).await.status, ProxyStatus::Ok);

        let partial = r#"{ "lt": "LT-345" }"#;
        let probe = LoginEndpointProbe::new(
            Arc::new(FixedTransport(partial.to_string())),
            "http://login.example".to_string(),
        );
        let test = probe.execute(&mut proxy).await;
        assert_eq!(test.status, ProxyStatus::Error);
        assert_eq!(test.info.as_deref(), Some("Missing login markers"));
    }

    #[tokio::test]
    async fn signup_checks_title_literal() {
        let html = "<html><title>The Official Pokémon Website | Pokemon.com</title></html>";
        let probe = SignupPageProbe::new(
            Arc::new(FixedTransport(html.to_string())),
            "http://signup.example".to_string(),
            DEFAULT_SIGNUP_TITLE.to_string(),
        );
        probe.validate().await.unwrap();

        let mut proxy = test_proxy();
        assert_eq!(probe.execute(&mut proxy).await.status, ProxyStatus::Ok);
    }
}
