/*!
Shared HTTP transport for probes.

One [`HttpTransport`] wraps an isahc client with the retry policy, base
header set and per-request timeout every probe shares. The proxy under test
is injected as the request's proxy URI; curl dispatches on the scheme, so
`http://`, `socks4://` and `socks5://` proxies all work through the same
client.

Probes depend on the [`ProbeTransport`] trait so tests can substitute a
mock.
*/

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use isahc::config::{Configurable, RedirectPolicy, SslOption};
use isahc::AsyncReadResponseExt;

/// HTTP status codes that trigger a retry instead of classification.
pub const STATUS_FORCELIST: &[u16] = &[413, 429, 500, 502, 503, 504];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub total: u32,
    /// Seconds multiplied by the attempt number between retries.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            total: 3,
            backoff_factor: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.backoff_factor * attempt as f64)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
    pub elapsed: Duration,
    pub headers: HashMap<String, String>,
}

impl ProbeResponse {
    pub fn latency_ms(&self) -> u32 {
        self.elapsed.as_millis().min(u32::MAX as u128) as u32
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection timed out")]
    Timeout,
    #[error("Failed to connect - {0}")]
    Connect(String),
    #[error("Too many redirects")]
    RedirectLoop,
    #[error("Retries exhausted")]
    RetryExhausted,
    #[error("Unexpected error - {0}")]
    Other(String),
}

/// Transport seam between probes and the network.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// GET `url`, optionally through `proxy_url`, with the transport's base
    /// headers plus `extra_headers`.
    async fn get(
        &self,
        url: &str,
        extra_headers: &[(String, String)],
        proxy_url: Option<&str>,
    ) -> Result<ProbeResponse, TransportError>;

    /// The User-Agent the transport sends, for probes that verify the echo.
    fn user_agent(&self) -> &str;
}

pub struct HttpTransport {
    client: isahc::HttpClient,
    timeout: Duration,
    retry: RetryPolicy,
    user_agent: String,
    verify_tls: bool,
}

impl HttpTransport {
    pub fn new(
        timeout: Duration,
        retry: RetryPolicy,
        user_agent: String,
        verify_tls: bool,
    ) -> Result<Self, TransportError> {
        let client = isahc::HttpClient::new().map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(HttpTransport {
            client,
            timeout,
            retry,
            user_agent,
            verify_tls,
        })
    }

    fn base_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Connection".to_string(), "close".to_string()),
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
            ("Accept-Language".to_string(), "en-GB,en-US;q=0.9,en;q=0.8".to_string()),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ]
    }

    async fn execute_once(
        &self,
        url: &str,
        extra_headers: &[(String, String)],
        proxy_url: Option<&str>,
    ) -> Result<ProbeResponse, TransportError> {
        let mut builder = isahc::Request::get(url)
            .timeout(self.timeout)
            .redirect_policy(RedirectPolicy::Limit(2));

        if let Some(proxy_url) = proxy_url {
            let uri: isahc::http::Uri = proxy_url
                .parse()
                .map_err(|_| TransportError::Other(format!("bad proxy url: {proxy_url}")))?;
            builder = builder.proxy(Some(uri));
        }

        if !self.verify_tls {
            builder = builder.ssl_options(
                SslOption::DANGER_ACCEPT_INVALID_CERTS | SslOption::DANGER_ACCEPT_INVALID_HOSTS,
            );
        }

        for (name, value) in self.base_headers().iter().chain(extra_headers.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let request = builder
            .body(())
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let start = Instant::now();
        let mut response = self
            .client
            .send_async(request)
            .await
            .map_err(map_isahc_error)?;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.to_string(), value.to_string());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(ProbeResponse {
            status,
            body,
            elapsed,
            headers,
        })
    }
}

fn map_isahc_error(error: isahc::Error) -> TransportError {
    use isahc::error::ErrorKind;

    match error.kind() {
        ErrorKind::Timeout => TransportError::Timeout,
        ErrorKind::ConnectionFailed | ErrorKind::NameResolution => {
            TransportError::Connect(error.kind().to_string())
        }
        ErrorKind::TooManyRedirects => TransportError::RedirectLoop,
        _ => TransportError::Other(error.to_string()),
    }
}

#[async_trait]
impl ProbeTransport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        extra_headers: &[(String, String)],
        proxy_url: Option<&str>,
    ) -> Result<ProbeResponse, TransportError> {
        let mut attempt: u32 = 0;

        loop {
            match self.execute_once(url, extra_headers, proxy_url).await {
                Ok(response) => {
                    if STATUS_FORCELIST.contains(&response.status) && attempt < self.retry.total {
                        attempt += 1;
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                        continue;
                    }
                    return Ok(response);
                }
                // Deadline failures are not retried
                Err(TransportError::Timeout) => return Err(TransportError::Timeout),
                Err(e) => {
                    if attempt < self.retry.total {
                        attempt += 1;
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                        continue;
                    }
                    return Err(match e {
                        TransportError::Connect(_) | TransportError::Other(_) => {
                            TransportError::RetryExhausted
                        }
                        other => other,
                    });
                }
            }
        }
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }
}
