//! Request handling and transformation.
//!
//! # Responsibilities
//! - Read the request ID assigned by the request-id layer
//! - Derive the caller's deadline (a malformed deadline header is a 400)
//! - Buffer the body within the configured limit
//! - Turn the axum request into a `ProxyRequest`
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The deadline starts when the request is accepted, not when it is forwarded
//! - Requests without a host key still flow through the pipeline (404 + event)

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request};
use uuid::Uuid;

use crate::proxy::upstream::DEADLINE_HEADER;
use crate::proxy::{ProxyError, ProxyRequest};
use crate::resilience::timeouts::deadline_from;
use crate::routing::HostRouter;

pub const X_REQUEST_ID: &str = "x-request-id";

/// The request ID set upstream of us, or a fresh one when the request
/// reached the handler without passing the request-id layer.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| Some(Uuid::new_v4().to_string()))
}

/// Remaining budget the caller asked for. A header that is present but not a
/// whole number of milliseconds is an error.
pub fn requested_budget(headers: &HeaderMap) -> Result<Option<Duration>, ProxyError> {
    let Some(value) = headers.get(DEADLINE_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|ms| Some(Duration::from_millis(ms)))
        .ok_or_else(|| ProxyError::InvalidRequest(format!("{} must be a number of milliseconds", DEADLINE_HEADER)))
}

/// Limits applied while reading an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_body_bytes: usize,
    pub max_deadline: Duration,
}

/// Convert an inbound request. On failure the host key (possibly empty) and
/// request ID are returned with the error so the refusal can be accounted for.
pub async fn into_proxy_request(
    request: Request<Body>,
    limits: RequestLimits,
) -> Result<ProxyRequest, (String, Option<String>, ProxyError)> {
    let (parts, body) = request.into_parts();
    let host_key = HostRouter::select_host_key(&parts.headers, parts.uri.path()).unwrap_or_default();
    let request_id = request_id(&parts.headers);

    let deadline = match requested_budget(&parts.headers) {
        Ok(requested) => deadline_from(requested, limits.max_deadline),
        Err(e) => return Err((host_key, request_id, e)),
    };

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limits.max_body_bytes) {
        return Err((host_key, request_id, ProxyError::PayloadTooLarge(limits.max_body_bytes)));
    }

    let body = match axum::body::to_bytes(body, limits.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(host = %host_key, error = %e, "Failed to buffer request body");
            return Err((host_key, request_id, ProxyError::PayloadTooLarge(limits.max_body_bytes)));
        }
    };

    Ok(ProxyRequest {
        host_key,
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
        deadline,
        request_id,
    })
}
