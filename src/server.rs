/*!
Read-only HTTP status service.

Small axum app bound to the configured port:

- `GET /` — HTML summary of proxy counts by status
- `GET /proxydata` — JSON proxy records
- `GET /proxylist` — JSON proxy URL strings
- `GET /proxy/{id}` — success-rate number for one proxy
- `GET /azenv` — echoes request headers, a built-in judge endpoint for
  self-testing

`limit` is capped at 1000 and `max_age` at 86400 seconds.
*/

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::models::{Proxy, ProxyProtocol};
use crate::storage::Storage;

pub const MAX_LIMIT: i64 = 1000;
pub const MAX_AGE_SECS: i64 = 86400;

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    pub protocol: Option<String>,
    pub limit: Option<i64>,
    pub max_age: Option<i64>,
    /// Comma-separated ISO country codes.
    pub exclude_countries: Option<String>,
    #[serde(default)]
    pub no_protocol: bool,
}

impl ListQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, MAX_LIMIT)
    }

    fn max_age(&self) -> i64 {
        self.max_age.unwrap_or(3600).clamp(1, MAX_AGE_SECS)
    }

    fn protocol(&self) -> Option<ProxyProtocol> {
        self.protocol.as_deref().and_then(|p| p.parse().ok())
    }

    fn exclude_countries(&self) -> Vec<String> {
        self.exclude_countries
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

/// JSON shape of one proxy record.
#[derive(Debug, serde::Serialize)]
struct ProxyData {
    id: i64,
    url: String,
    ip: String,
    port: u16,
    protocol: String,
    status: String,
    latency: u32,
    test_count: u32,
    fail_count: u32,
    score: f64,
    country: Option<String>,
    created: chrono::DateTime<chrono::Utc>,
    modified: chrono::DateTime<chrono::Utc>,
}

impl From<Proxy> for ProxyData {
    fn from(proxy: Proxy) -> Self {
        ProxyData {
            id: proxy.id,
            url: proxy.url(false),
            ip: proxy.ip.clone(),
            port: proxy.port,
            protocol: proxy.protocol.name().to_string(),
            status: proxy.status.name().to_string(),
            latency: proxy.latency,
            test_count: proxy.test_count,
            fail_count: proxy.fail_count,
            score: proxy.test_score(),
            country: proxy.country,
            created: proxy.created,
            modified: proxy.modified,
        }
    }
}

async fn index(State(storage): State<Arc<Storage>>) -> Result<Html<String>, StatusCode> {
    let counts = storage
        .count_by_status()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let tests = storage
        .count_tests()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut rows = String::new();
    for (status, count) in &counts {
        rows.push_str(&format!("<tr><td>{status}</td><td>{count}</td></tr>"));
    }
    let total: i64 = counts.iter().map(|(_, c)| c).sum();

    Ok(Html(format!(
        "<html><head><title>proxyscan</title></head><body>\
         <h1>proxyscan</h1>\
         <table><tr><th>Status</th><th>Proxies</th></tr>{rows}\
         <tr><td>TOTAL</td><td>{total}</td></tr></table>\
         <p>{tests} tests recorded.</p>\
         </body></html>"
    )))
}

async fn proxydata(
    State(storage): State<Arc<Storage>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ProxyData>>, StatusCode> {
    let proxies = storage
        .get_valid(
            query.limit(),
            query.max_age(),
            query.protocol(),
            &query.exclude_countries(),
        )
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(proxies.into_iter().map(ProxyData::from).collect()))
}

async fn proxylist(
    State(storage): State<Arc<Storage>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<String>>, StatusCode> {
    let proxies = storage
        .get_valid(
            query.limit(),
            query.max_age(),
            query.protocol(),
            &query.exclude_countries(),
        )
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(
        proxies.iter().map(|p| p.url(query.no_protocol)).collect(),
    ))
}

async fn proxy_score(
    State(storage): State<Arc<Storage>>,
    Path(id): Path<i64>,
) -> Result<Json<f64>, StatusCode> {
    let proxy = storage
        .get_proxy(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::BAD_REQUEST)?;

    Ok(Json(proxy.test_score()))
}

/// Echo request headers in env-dump form, usable as a local proxy judge.
async fn azenv(ConnectInfo(addr): ConnectInfo<SocketAddr>, headers: HeaderMap) -> Html<String> {
    let mut lines = vec![format!("REMOTE_ADDR = {}", addr.ip())];

    for (name, value) in &headers {
        let cgi_name = format!("HTTP_{}", name.as_str().to_uppercase().replace('-', "_"));
        lines.push(format!("{cgi_name} = {}", value.to_str().unwrap_or("")));
    }

    Html(format!(
        "<html><head><title>AZ Environment</title></head><body><pre>{}</pre></body></html>",
        lines.join("\n")
    ))
}

pub fn router(storage: Arc<Storage>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/proxydata", get(proxydata))
        .route("/proxylist", get(proxylist))
        .route("/proxy/:id", get(proxy_score))
        .route("/azenv", get(azenv))
        .with_state(storage)
}

/// Serve until the interrupt fires.
pub async fn serve(storage: Arc<Storage>, port: u16, interrupt: CancellationToken) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind status service on {addr}: {e}");
            return;
        }
    };

    info!("Status service listening on {addr}");

    let app = router(storage).into_make_service_with_connect_info::<SocketAddr>();
    let shutdown = async move { interrupt.cancelled().await };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Status service error: {e}");
    }
}
