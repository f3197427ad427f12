//! Outbound HTTP client seam.
//!
//! # Responsibilities
//! - Send one request to an upstream host
//! - Classify transport failures (timeout, connect, other)
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - Redirects are not followed; the caller sees the upstream's 3xx
//! - No retries here; a failed call is reported once
//! - Trait object so handlers can be driven by scripted upstreams in tests

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method, StatusCode};
use thiserror::Error;

use crate::routing::HOST_SELECTOR_HEADER;

/// Header carrying the caller's remaining deadline in milliseconds.
pub const DEADLINE_HEADER: &str = "x-request-deadline-ms";

/// Headers that apply to a single connection and are never forwarded.
/// Content-Length is recomputed from the relayed body.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// `reqwest`-backed upstream with a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let response = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers());
        let body = response.bytes().await.map_err(classify)?;

        Ok(UpstreamResponse { status, headers, body })
    }
}

fn classify(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else if err.is_connect() {
        UpstreamError::Connect(err.to_string())
    } else {
        UpstreamError::Request(err.to_string())
    }
}

/// Copy of `headers` without hop-by-hop headers or headers named in `Connection`.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if named.iter().any(|n| n == name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Headers to send upstream: hop-by-hop, `Host` and proxy control headers removed.
pub fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = strip_hop_by_hop(headers);
    out.remove(header::HOST);
    out.remove(HOST_SELECTOR_HEADER);
    out.remove(DEADLINE_HEADER);
    out
}
