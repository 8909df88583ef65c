/*!
Retrying HTTP session for scrapers.

Separate knobs from the probe transport (scraper retries/backoff/timeout
are their own options). The session may route through an upstream proxy:
an explicit URL, or a random stored proxy when anonymous scraping is on.
When a stored helper proxy is used, its success or failure is recorded
back through the queues like any other test outcome. The timeout triples
when a request is proxied.

In verbose mode raw responses are cached to the download directory for
offline debugging.
*/

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use isahc::config::{Configurable, RedirectPolicy};
use isahc::AsyncReadResponseExt;
use tracing::{debug, warn};

use crate::models::{Proxy, ProxyStatus, ProxyTest};
use crate::probes::session::{ProbeResponse, TransportError, STATUS_FORCELIST};
use crate::queue::QueueHub;
use crate::storage::Storage;

/// Upstream route for scraper requests.
pub enum Upstream {
    /// Operator-supplied proxy URL.
    Fixed(String),
    /// Random proxy picked from storage; bookkeeping goes to the queues.
    Stored(Box<Proxy>),
}

impl Upstream {
    fn url(&self) -> String {
        match self {
            Upstream::Fixed(url) => url.clone(),
            Upstream::Stored(proxy) => proxy.url(false),
        }
    }
}

pub struct ScrapeSession {
    client: isahc::HttpClient,
    timeout: Duration,
    retries: u32,
    backoff_factor: f64,
    user_agent: String,
    upstream: Option<Upstream>,
    hub: Option<Arc<QueueHub>>,
    download_path: PathBuf,
    verbose: bool,
}

impl ScrapeSession {
    pub fn new(
        timeout: Duration,
        retries: u32,
        backoff_factor: f64,
        user_agent: String,
        download_path: PathBuf,
        verbose: bool,
    ) -> Result<Self, TransportError> {
        let client = isahc::HttpClient::new().map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(ScrapeSession {
            client,
            timeout,
            retries,
            backoff_factor,
            user_agent,
            upstream: None,
            hub: None,
            download_path,
            verbose,
        })
    }

    /// Route requests through an explicit proxy URL.
    pub fn with_fixed_upstream(mut self, url: String) -> Self {
        self.upstream = Some(Upstream::Fixed(url));
        self
    }

    /// Route requests through a random stored proxy and record its
    /// performance through the queues.
    pub async fn with_stored_upstream(mut self, storage: &Storage, hub: Arc<QueueHub>) -> Self {
        match storage.get_random().await {
            Ok(Some(proxy)) => {
                debug!("Scraping through stored proxy: {}", proxy.url(false));
                self.upstream = Some(Upstream::Stored(Box::new(proxy)));
                self.hub = Some(hub);
            }
            Ok(None) => debug!("No stored proxy available for scraping."),
            Err(e) => warn!("Failed to get a proxy for scraping: {e}"),
        }
        self
    }

    fn request_timeout(&self) -> Duration {
        // Routed requests ride two networks; give them slack.
        if self.upstream.is_some() {
            self.timeout * 3
        } else {
            self.timeout
        }
    }

    /// Record helper-proxy bookkeeping after a request.
    async fn account_upstream(&self, error: Option<&str>) {
        let (Some(Upstream::Stored(proxy)), Some(hub)) = (&self.upstream, &self.hub) else {
            return;
        };

        let mut proxy = (**proxy).clone();
        proxy.test_count += 1;
        proxy.modified = Utc::now();

        let test = match error {
            Some(error) => {
                proxy.fail_count += 1;
                ProxyTest::new(
                    proxy.id,
                    ProxyStatus::Error,
                    0,
                    &format!("Failed to scrape webpage: {error}"),
                )
            }
            None => ProxyTest::new(proxy.id, ProxyStatus::Ok, 0, "Scraped webpage"),
        };

        if hub.update_proxy(proxy).await.is_err() || hub.insert_test(test).await.is_err() {
            warn!("Timed out recording scraper proxy bookkeeping.");
        }
    }

    async fn execute_once(
        &self,
        url: &str,
        referer: Option<&str>,
        form_body: Option<&str>,
    ) -> Result<ProbeResponse, TransportError> {
        let mut builder = match form_body {
            Some(_) => isahc::Request::post(url),
            None => isahc::Request::get(url),
        };

        builder = builder
            .timeout(self.request_timeout())
            .redirect_policy(RedirectPolicy::Limit(2))
            .header("User-Agent", self.user_agent.as_str())
            .header("Accept", "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8")
            .header("Referer", referer.unwrap_or("https://www.google.com"))
            .header("Connection", "close");

        if let Some(upstream) = &self.upstream {
            let uri: isahc::http::Uri = upstream
                .url()
                .parse()
                .map_err(|_| TransportError::Other("bad upstream proxy url".to_string()))?;
            builder = builder.proxy(Some(uri));
        }

        let request = match form_body {
            Some(body) => builder
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(body.to_string())
                .map_err(|e| TransportError::Other(e.to_string()))?,
            None => builder
                .body(String::new())
                .map_err(|e| TransportError::Other(e.to_string()))?,
        };

        let start = Instant::now();
        let mut response = self.client.send_async(request).await.map_err(|e| {
            use isahc::error::ErrorKind;
            match e.kind() {
                ErrorKind::Timeout => TransportError::Timeout,
                ErrorKind::ConnectionFailed | ErrorKind::NameResolution => {
                    TransportError::Connect(e.kind().to_string())
                }
                ErrorKind::TooManyRedirects => TransportError::RedirectLoop,
                _ => TransportError::Other(e.to_string()),
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(ProbeResponse {
            status,
            body,
            elapsed: start.elapsed(),
            headers: HashMap::new(),
        })
    }

    async fn request(
        &self,
        url: &str,
        referer: Option<&str>,
        form_body: Option<&str>,
    ) -> Result<String, TransportError> {
        let mut attempt: u32 = 0;

        loop {
            let outcome = self.execute_once(url, referer, form_body).await;

            match outcome {
                Ok(response) if (200..300).contains(&response.status) && !response.body.is_empty() => {
                    self.account_upstream(None).await;
                    return Ok(response.body);
                }
                Ok(response) => {
                    if attempt < self.retries
                        && (STATUS_FORCELIST.contains(&response.status) || response.body.is_empty())
                    {
                        attempt += 1;
                        tokio::time::sleep(Duration::from_secs_f64(
                            self.backoff_factor * attempt as f64,
                        ))
                        .await;
                        continue;
                    }
                    self.account_upstream(Some("bad response")).await;
                    return Err(TransportError::Other(format!(
                        "bad status code: {}",
                        response.status
                    )));
                }
                Err(e) => {
                    if attempt < self.retries {
                        attempt += 1;
                        tokio::time::sleep(Duration::from_secs_f64(
                            self.backoff_factor * attempt as f64,
                        ))
                        .await;
                        continue;
                    }
                    self.account_upstream(Some("connection error")).await;
                    return Err(e);
                }
            }
        }
    }

    /// GET a page as text.
    pub async fn get(&self, url: &str, referer: Option<&str>) -> Result<String, TransportError> {
        self.request(url, referer, None).await
    }

    /// POST a form and return the response text.
    pub async fn post_form(
        &self,
        url: &str,
        referer: Option<&str>,
        body: &str,
    ) -> Result<String, TransportError> {
        self.request(url, referer, Some(body)).await
    }

    /// GET and parse a JSON document.
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, TransportError> {
        let body = self.request(url, None, None).await?;
        serde_json::from_str(&body).map_err(|e| TransportError::Other(e.to_string()))
    }

    /// Cache a raw response for offline debugging (verbose mode only).
    pub fn cache_response(&self, name: &str, content: &str) {
        if !self.verbose {
            return;
        }

        let path = self.download_path.join(format!("{name}.html"));
        if let Err(e) = std::fs::create_dir_all(&self.download_path)
            .and_then(|_| std::fs::write(&path, content))
        {
            warn!("Failed to cache response to {}: {e}", path.display());
        } else {
            debug!("Web page output saved to: {}", path.display());
        }
    }
}
