//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay the upstream response to the client
//! - Render synthesized errors as small JSON bodies
//! - Attach `Retry-After` to short-circuited requests
//!
//! # Design Decisions
//! - Upstream status, headers and body are relayed unchanged
//! - Hop-by-hop headers are already stripped by the upstream client
//! - Error bodies never include upstream payloads

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::proxy::{ProxyError, UpstreamResponse};

#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_secs();
        let body = ErrorBody {
            error: self.outcome().as_str(),
            message: self.to_string(),
            host: self.host().filter(|h| !h.is_empty()),
            retry_after_secs: retry_after,
        };

        let mut response = (self.status(), Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Relay an upstream response to the client.
pub fn relay(upstream: UpstreamResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::StatusCode;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_circuit_open_response() {
        let response = ProxyError::CircuitOpen {
            host: "hmrc".into(),
            retry_after: Duration::from_secs(42),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");

        let body = body_json(response).await;
        assert_eq!(body["error"], "circuit_open");
        assert_eq!(body["host"], "hmrc");
        assert_eq!(body["retry_after_secs"], 42);
    }

    #[tokio::test]
    async fn test_unknown_host_has_no_retry_after() {
        let response = ProxyError::UnknownHost(String::new()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());

        let body = body_json(response).await;
        assert_eq!(body["error"], "unknown_host");
        assert!(body.get("host").is_none());
    }

    #[tokio::test]
    async fn test_relay_keeps_status_and_headers() {
        let mut upstream = UpstreamResponse::new(StatusCode::CREATED, "{\"id\":1}");
        upstream
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = relay(upstream);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "application/json");
    }
}
