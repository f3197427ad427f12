//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (tracing, body limit, request ID, timeout)
//! - Bind the server to a listener
//! - Hand requests to the `ProxyHandler`
//! - Stop accepting on shutdown and drain in-flight requests

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::request::{into_proxy_request, RequestLimits};
use crate::http::response::relay;
use crate::proxy::ProxyHandler;

/// Headroom above the request deadline for recording the outcome.
const RESPONSE_GRACE: Duration = Duration::from_secs(5);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<ProxyHandler>,
    pub limits: RequestLimits,
}

/// HTTP server for the egress proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ProxyConfig, handler: Arc<ProxyHandler>) -> Self {
        let state = AppState {
            handler,
            limits: RequestLimits {
                max_body_bytes: config.limits.max_body_bytes,
                max_deadline: Duration::from_secs(config.timeouts.request_secs),
            },
        };
        let router = Self::build_router(config, state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let request_timeout = Duration::from_secs(config.timeouts.request_secs) + RESPONSE_GRACE;
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.limits.max_body_bytes))
            .layer(TimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The configured router, for driving the server without a socket.
    pub fn into_router(self) -> Router {
        self.router
    }
}

async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let proxied = match into_proxy_request(request, state.limits).await {
        Ok(proxied) => proxied,
        Err((host_key, request_id, error)) => {
            return state.handler.reject(&host_key, request_id, error).into_response();
        }
    };

    tracing::debug!(
        request_id = proxied.request_id.as_deref().unwrap_or("-"),
        host = %proxied.host_key,
        method = %proxied.method,
        path = %proxied.path,
        "Proxying request"
    );

    match state.handler.handle(proxied).await {
        Ok(upstream) => relay(upstream),
        Err(error) => error.into_response(),
    }
}
