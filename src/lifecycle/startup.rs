//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the state store and the upstream client
//! - Wire the limiter, breaker and handler around one shared store
//! - Bind listeners and start background tasks
//! - Run until a shutdown signal, then drain
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::{setup_admin_router, AdminState};
use crate::clock::{Clock, SystemClock};
use crate::config::ProxyConfig;
use crate::health::Reconciler;
use crate::http::HttpServer;
use crate::lifecycle::signals::wait_for_signal;
use crate::lifecycle::Shutdown;
use crate::observability::{MetricsSink, OutcomeSink};
use crate::proxy::{HttpUpstream, ProxyHandler, Upstream};
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::routing::HostRouter;
use crate::store::{open_store, CachedStore, StateStore, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("state store: {0}")]
    Store(#[from] StoreError),
    #[error("upstream client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Every long-lived piece of the proxy, wired together.
#[derive(Clone)]
pub struct Components {
    pub config: Arc<ProxyConfig>,
    pub router: HostRouter,
    pub store: CachedStore,
    pub breaker: CircuitBreaker,
    pub handler: Arc<ProxyHandler>,
}

impl Components {
    /// Wire components around an already opened store.
    pub fn assemble(
        config: ProxyConfig,
        backend: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        upstream: Arc<dyn Upstream>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        let config = Arc::new(config);
        let router = HostRouter::new(&config.hosts);
        let store = CachedStore::new(backend, &config.store);
        let cas_attempts = config.store.cas_retries;

        let limiter = RateLimiter::new(store.clone(), clock.clone(), cas_attempts);
        let breaker = CircuitBreaker::new(store.clone(), clock, cas_attempts);
        let handler = Arc::new(ProxyHandler::new(
            router.clone(),
            limiter,
            breaker.clone(),
            upstream,
            sink,
        ));

        Self {
            config,
            router,
            store,
            breaker,
            handler,
        }
    }

    /// Open the configured store and build the production components.
    pub async fn build(config: ProxyConfig) -> Result<Self, StartupError> {
        let backend = open_store(&config.store).await?;
        let upstream = HttpUpstream::new(Duration::from_millis(config.timeouts.connect_ms))?;
        Ok(Self::assemble(
            config,
            backend,
            Arc::new(SystemClock::new()),
            Arc::new(upstream),
            Arc::new(MetricsSink),
        ))
    }

    pub fn http_server(&self) -> HttpServer {
        HttpServer::new(&self.config, self.handler.clone())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.router.clone(),
            self.breaker.clone(),
            self.store.clone(),
            Duration::from_secs(self.config.reconciler.interval_secs),
        )
    }

    pub fn admin_router(&self) -> Router {
        setup_admin_router(AdminState {
            router: self.router.clone(),
            store: self.store.clone(),
            breaker: self.breaker.clone(),
            api_key: Arc::from(self.config.admin.api_key.as_str()),
            started_at: Instant::now(),
        })
    }
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address).await.map_err(|source| StartupError::Bind {
        address: address.to_string(),
        source,
    })
}

/// Bind listeners, start background tasks and serve until a shutdown signal.
pub async fn run(components: Components) -> Result<(), StartupError> {
    let config = components.config.clone();
    let shutdown = Shutdown::default();
    let mut tasks = Vec::new();

    if config.reconciler.enabled {
        let reconciler = components.reconciler();
        tasks.push(tokio::spawn(reconciler.run(shutdown.subscribe())));
    } else {
        tracing::info!("Reconciler disabled");
    }

    if config.admin.enabled {
        let listener = bind(&config.admin.bind_address).await?;
        let app = components.admin_router();
        let mut admin_shutdown = shutdown.subscribe();
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = admin_shutdown.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API stopped");
            }
        }));
    }

    let listener = bind(&config.listener.bind_address).await?;
    let server = components.http_server();
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tracing::info!(hosts = components.router.hosts().len(), "Egress proxy ready");

    let server_result = tokio::select! {
        signal = wait_for_signal() => {
            tracing::info!(signal, "Shutdown signal received");
            None
        }
        result = &mut server_task => Some(result),
    };

    let clean = shutdown.drain(tasks).await;
    let served = match server_result {
        Some(result) => result,
        None => server_task.await,
    };

    match served {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(StartupError::Serve(e)),
        Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
    }
    if !clean {
        tracing::warn!("Some background tasks did not stop in time");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
