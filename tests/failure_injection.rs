//! Failure injection: dead upstreams, slow upstreams, store outages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use egress_guard::proxy::Outcome;
use egress_guard::store::BreakerState;

mod common;
use common::{client, closed_port, host, start_programmable_backend, TestProxy};

#[tokio::test]
async fn test_connection_refused_counts_as_failure() {
    let dead = closed_port().await;
    let mut hmrc = host("hmrc", dead);
    hmrc.failure_threshold = 2;
    let proxy = TestProxy::start(vec![hmrc]).await;
    let client = client();

    for _ in 0..2 {
        let res = client.get(proxy.url("/hmrc/x")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "upstream_failure");
    }
    assert_eq!(proxy.record("hmrc").await.breaker.state, BreakerState::Open);

    let res = client.get(proxy.url("/hmrc/x")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_slow_upstream_cut_at_latency_threshold() {
    let upstream = start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "{}".into())
    })
    .await;
    let mut hmrc = host("hmrc", upstream);
    hmrc.latency_threshold_ms = 200;
    hmrc.failure_threshold = 1;
    let proxy = TestProxy::start(vec![hmrc]).await;

    let started = Instant::now();
    let res = client().get(proxy.url("/hmrc/x")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(2));

    let record = proxy.record("hmrc").await;
    assert_eq!(record.breaker.state, BreakerState::Open);
    assert!(record.breaker.last_failure_at.is_some());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_caller_deadline_caps_the_call() {
    let upstream = start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "{}".into())
    })
    .await;
    let proxy = TestProxy::start(vec![host("hmrc", upstream)]).await;

    let started = Instant::now();
    let res = client()
        .get(proxy.url("/hmrc/x"))
        .header("x-request-deadline-ms", "250")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(proxy.record("hmrc").await.breaker.consecutive_failures, 1);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_store_outage_without_cache_fails_closed() {
    let upstream = common::start_mock_backend(200, "{}").await;
    let proxy = TestProxy::start(vec![host("hmrc", upstream)]).await;
    proxy.backend.set_reachable(false);

    let res = client().get(proxy.url("/hmrc/x")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(res.headers().get("retry-after").is_some());

    let events = proxy.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, Outcome::CircuitOpen);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_store_outage_with_cache_keeps_serving() {
    let upstream = common::start_mock_backend(200, "{}").await;
    let proxy = TestProxy::start(vec![host("hmrc", upstream)]).await;
    let client = client();

    let res = client.get(proxy.url("/hmrc/x")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    proxy.backend.set_reachable(false);
    let res = client.get(proxy.url("/hmrc/x")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    proxy.backend.set_reachable(true);
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_reconciler_promotes_expired_host() {
    let dead = closed_port().await;
    let mut hmrc = host("hmrc", dead);
    hmrc.failure_threshold = 1;
    hmrc.cooldown_seconds = 30;
    let proxy = TestProxy::start(vec![hmrc]).await;

    let res = client().get(proxy.url("/hmrc/x")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(proxy.record("hmrc").await.breaker.state, BreakerState::Open);

    let reconciler = proxy.components.reconciler();
    assert_eq!(reconciler.reconcile_once().await.transitioned, 0);

    proxy.clock.advance(Duration::from_secs(31));
    assert_eq!(reconciler.reconcile_once().await.transitioned, 1);

    let breaker = proxy.record("hmrc").await.breaker;
    assert_eq!(breaker.state, BreakerState::HalfOpen);
    assert!(!breaker.half_open_probe_in_flight);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let upstream = common::start_mock_backend(200, "{}").await;
    let mut config = egress_guard::ProxyConfig::default();
    config.hosts = vec![host("hmrc", upstream)];
    config.limits.max_body_bytes = 64;
    let proxy = TestProxy::start_with(
        config,
        Arc::new(egress_guard::store::MemoryStateStore::new()),
        Arc::new(egress_guard::clock::ManualClock::new(common::START_MILLIS)),
    )
    .await;

    let res = client()
        .post(proxy.url("/hmrc/x"))
        .body(vec![b'x'; 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_malformed_deadline_is_bad_request() {
    let upstream = common::start_mock_backend(200, "{}").await;
    let proxy = TestProxy::start(vec![host("hmrc", upstream)]).await;

    let res = client()
        .get(proxy.url("/hmrc/x"))
        .header("x-request-deadline-ms", "soon")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");

    let events = proxy.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, Outcome::InvalidRequest);
    assert_eq!(proxy.backend.committed_writes(), 0);

    proxy.shutdown.trigger();
}
