//! Admin API: inspection and administrative reset of host state.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::resilience::CircuitBreaker;
use crate::routing::HostRouter;
use crate::store::CachedStore;

#[derive(Clone)]
pub struct AdminState {
    pub router: HostRouter,
    pub store: CachedStore,
    pub breaker: CircuitBreaker,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/hosts", get(get_hosts))
        .route("/admin/hosts/{host_key}/reset", post(reset_host))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::clock::{Clock, ManualClock};
    use crate::config::{HostConfig, StoreConfig};
    use crate::store::{BreakerState, HostRecord, MemoryStateStore, StateStore};

    fn admin() -> (Arc<MemoryStateStore>, Router) {
        let hosts = vec![HostConfig::new("hmrc", "/hmrc", "https://api.service.hmrc.gov.uk")];
        let backend = Arc::new(MemoryStateStore::new());
        let store = CachedStore::new(backend.clone(), &StoreConfig::default());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
        let state = AdminState {
            router: HostRouter::new(&hosts),
            breaker: CircuitBreaker::new(store.clone(), clock, 3),
            store,
            api_key: Arc::from("secret"),
            started_at: Instant::now(),
        };
        (backend, setup_admin_router(state))
    }

    fn authed(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let (_, app) = admin();
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/status")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_counts_breakers() {
        let (_, app) = admin();
        let response = app.oneshot(authed("GET", "/admin/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["status"], "operational");
        assert_eq!(body["hosts"], 1);
        assert_eq!(body["breakers"]["closed"], 1);
    }

    #[tokio::test]
    async fn test_reset_closes_open_host() {
        let (backend, app) = admin();
        let host = HostConfig::new("hmrc", "/hmrc", "https://api.service.hmrc.gov.uk");
        let mut record = HostRecord::initial(&host, 500);
        record.breaker.state = BreakerState::Open;
        record.breaker.consecutive_failures = 5;
        record.bucket.tokens_remaining = 0.0;
        backend.compare_and_set("hmrc", None, record).await.unwrap();

        let response = app.clone().oneshot(authed("POST", "/admin/hosts/hmrc/reset")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stored = backend.get("hmrc").await.unwrap().unwrap().value;
        assert_eq!(stored.breaker.state, BreakerState::Closed);
        assert_eq!(stored.breaker.consecutive_failures, 0);
        assert_eq!(stored.bucket.tokens_remaining, host.burst());

        let response = app.oneshot(authed("GET", "/admin/hosts")).await.unwrap();
        let body = json(response).await;
        assert_eq!(body[0]["config"]["host_key"], "hmrc");
        assert_eq!(body[0]["record"]["breaker"]["state"], "CLOSED");
    }

    #[tokio::test]
    async fn test_reset_unknown_host() {
        let (_, app) = admin();
        let response = app.oneshot(authed("POST", "/admin/hosts/nope/reset")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
