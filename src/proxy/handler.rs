//! Per-request pipeline: rate limit → breaker → forward → record outcome.
//!
//! # Responsibilities
//! - Resolve the host, take a token, pass the breaker
//! - Forward once with a bounded call timeout
//! - Feed the call result back into the breaker
//! - Emit exactly one outcome event per request
//!
//! # Design Decisions
//! - The limiter runs first; a rate-limited request never touches the breaker
//! - The upstream is never retried; only store writes are
//! - A held probe slot is released when the call is never made

use std::sync::Arc;
use std::time::Instant as StdInstant;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use tokio::time::Instant;

use crate::config::HostConfig;
use crate::observability::{OutcomeEvent, OutcomeSink};
use crate::proxy::error::FailureKind;
use crate::proxy::upstream::{outbound_headers, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};
use crate::proxy::{Outcome, ProxyError};
use crate::resilience::timeouts::call_timeout;
use crate::resilience::{Admission, CallResult, CircuitBreaker, RateDecision, RateLimiter};
use crate::routing::{upstream_url, HostRouter};
use crate::store::BreakerState;

/// An inbound request, already detached from the HTTP server.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub host_key: String,
    pub method: Method,
    /// Full inbound path, including the host's mapped prefix.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub deadline: Instant,
    pub request_id: Option<String>,
}

impl ProxyRequest {
    pub fn new(host_key: impl Into<String>, method: Method, path: impl Into<String>, deadline: Instant) -> Self {
        Self {
            host_key: host_key.into(),
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            deadline,
            request_id: None,
        }
    }
}

pub struct ProxyHandler {
    router: HostRouter,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    upstream: Arc<dyn Upstream>,
    sink: Arc<dyn OutcomeSink>,
}

impl ProxyHandler {
    pub fn new(
        router: HostRouter,
        limiter: RateLimiter,
        breaker: CircuitBreaker,
        upstream: Arc<dyn Upstream>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        Self {
            router,
            limiter,
            breaker,
            upstream,
            sink,
        }
    }

    pub fn router(&self) -> &HostRouter {
        &self.router
    }

    /// Handle one request end to end.
    pub async fn handle(&self, request: ProxyRequest) -> Result<UpstreamResponse, ProxyError> {
        let started = StdInstant::now();
        let (result, breaker_state) = self.dispatch(&request).await;

        let (outcome, http_status) = match &result {
            Ok(response) => (Outcome::from_status(response.status.as_u16()), response.status.as_u16()),
            Err(e) => (e.outcome(), e.status().as_u16()),
        };

        self.sink.emit(OutcomeEvent {
            host_key: request.host_key,
            outcome,
            http_status,
            latency_ms: started.elapsed().as_millis() as u64,
            breaker_state,
            request_id: request.request_id,
        });

        result
    }

    /// Account for a request refused before it could enter the pipeline.
    pub fn reject(&self, host_key: &str, request_id: Option<String>, error: ProxyError) -> ProxyError {
        self.sink.emit(OutcomeEvent {
            host_key: host_key.to_string(),
            outcome: error.outcome(),
            http_status: error.status().as_u16(),
            latency_ms: 0,
            breaker_state: None,
            request_id,
        });
        error
    }

    async fn dispatch(
        &self,
        request: &ProxyRequest,
    ) -> (Result<UpstreamResponse, ProxyError>, Option<BreakerState>) {
        let Some(host) = self.router.get(&request.host_key).cloned() else {
            tracing::debug!(host = %request.host_key, "No configured host");
            return (Err(ProxyError::UnknownHost(request.host_key.clone())), None);
        };

        if let RateDecision::Limited { retry_after } = self.limiter.try_acquire(&host).await {
            tracing::debug!(host = %host.host_key, retry_after_ms = retry_after.as_millis() as u64, "Rate limited");
            return (
                Err(ProxyError::RateLimited {
                    host: host.host_key.clone(),
                    retry_after,
                }),
                None,
            );
        }

        let probe = match self.breaker.allow(&host).await {
            Admission::Allowed { probe } => probe,
            Admission::Rejected { retry_after } => {
                return (
                    Err(ProxyError::CircuitOpen {
                        host: host.host_key.clone(),
                        retry_after,
                    }),
                    Some(BreakerState::Open),
                );
            }
        };

        let Some(budget) = call_timeout(host.latency_threshold(), request.deadline) else {
            if probe {
                self.breaker.release_probe(&host).await;
            }
            return (Err(ProxyError::DeadlineExceeded(host.host_key.clone())), None);
        };

        let forwarded = self.forward(&host, request, budget).await;
        let call_result = match &forwarded {
            Ok(response) => CallResult::from_status(response.status.as_u16()),
            Err(_) => CallResult::Failure,
        };
        let state = self.breaker.record_outcome(&host, call_result, probe).await;

        let result = forwarded.map_err(|kind| {
            tracing::warn!(host = %host.host_key, error = %kind, probe, "Upstream call failed");
            ProxyError::UpstreamFailure {
                host: host.host_key.clone(),
                kind,
            }
        });
        (result, state)
    }

    async fn forward(
        &self,
        host: &HostConfig,
        request: &ProxyRequest,
        budget: std::time::Duration,
    ) -> Result<UpstreamResponse, FailureKind> {
        let outbound = UpstreamRequest {
            method: request.method.clone(),
            url: upstream_url(host, &request.path, request.query.as_deref()),
            headers: outbound_headers(&request.headers),
            body: request.body.clone(),
        };
        tracing::debug!(
            host = %host.host_key,
            method = %outbound.method,
            url = %outbound.url,
            budget_ms = budget.as_millis() as u64,
            "Forwarding request"
        );

        match tokio::time::timeout(budget, self.upstream.send(outbound)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(UpstreamError::Timeout)) | Err(_) => Err(FailureKind::Timeout),
            Ok(Err(UpstreamError::Connect(msg))) => Err(FailureKind::Connect(msg)),
            Ok(Err(UpstreamError::Request(msg))) => Err(FailureKind::Request(msg)),
        }
    }
}
