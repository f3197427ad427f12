//! Egress guard: per-upstream circuit breaking and rate limiting for outbound
//! HTTP calls, with breaker and bucket state kept in a shared CAS store.

// Core subsystems
pub mod clock;
pub mod config;
pub mod http;
pub mod proxy;
pub mod routing;
pub mod store;

// Traffic management
pub mod health;
pub mod resilience;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{Components, Shutdown};
pub use proxy::{ProxyError, ProxyHandler, ProxyRequest};
