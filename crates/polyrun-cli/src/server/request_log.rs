//! Request logging hook
//!
//! After a response is produced, a detached task records who called, from
//! where, and how many bytes they uploaded. The hook never delays or alters
//! the response; sink failures are only logged.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};

/// One logged request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLogEntry {
    pub client_ip: String,
    pub country: Option<String>,
    pub method: String,
    pub language: Option<String>,
    pub upload_bytes: Option<u64>,
}

/// Details a handler attaches to its response for the logger
#[derive(Debug, Clone, Default)]
pub struct LoggedRequest {
    pub language: Option<String>,
    pub upload_bytes: u64,
}

/// Destination for request log entries
#[async_trait]
pub trait RequestLogSink: Send + Sync {
    async fn record(&self, entry: &RequestLogEntry) -> anyhow::Result<()>;
}

/// Resolves a client address to a country code
pub trait CountryLookup: Send + Sync {
    fn country(&self, ip: &str) -> Option<String>;
}

/// Sink writing a structured tracing event per request
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl RequestLogSink for TracingSink {
    async fn record(&self, entry: &RequestLogEntry) -> anyhow::Result<()> {
        info!(
            client_ip = %entry.client_ip,
            country = entry.country.as_deref().unwrap_or("unknown"),
            method = %entry.method,
            language = entry.language.as_deref().unwrap_or("-"),
            upload_bytes = entry.upload_bytes.unwrap_or(0),
            "request logged"
        );
        Ok(())
    }
}

/// Lookup that knows no countries
#[derive(Debug, Default)]
pub struct NoCountry;

impl CountryLookup for NoCountry {
    fn country(&self, _ip: &str) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct RequestLogger {
    sink: Arc<dyn RequestLogSink>,
    lookup: Arc<dyn CountryLookup>,
}

impl RequestLogger {
    pub fn new(sink: Arc<dyn RequestLogSink>, lookup: Arc<dyn CountryLookup>) -> Self {
        Self { sink, lookup }
    }

    fn entry(
        &self,
        client_ip: String,
        method: String,
        logged: Option<&LoggedRequest>,
    ) -> RequestLogEntry {
        RequestLogEntry {
            country: self.lookup.country(&client_ip),
            client_ip,
            method,
            language: logged.and_then(|l| l.language.clone()),
            upload_bytes: logged.map(|l| l.upload_bytes).filter(|bytes| *bytes > 0),
        }
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink), Arc::new(NoCountry))
    }
}

impl std::fmt::Debug for RequestLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLogger").finish_non_exhaustive()
    }
}

/// Middleware recording every request once its response exists
pub async fn log_requests(
    State(logger): State<RequestLogger>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = client_ip(request.headers(), peer);

    let response = next.run(request).await;

    let entry = logger.entry(client_ip, method, response.extensions().get::<LoggedRequest>());
    tokio::spawn(async move {
        if let Err(e) = logger.sink.record(&entry).await {
            warn!(error = %e, "failed to record request log");
        }
    });
    response
}

/// Client address: proxy headers first, then the socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let ip = header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .or_else(|| header("x-real-ip"))
        .or_else(|| header("cf-connecting-ip"))
        .map(str::to_owned)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "127.0.0.1".to_owned());

    match ip.strip_prefix("::ffff:") {
        Some(v4) => v4.to_owned(),
        None => ip,
    }
}
