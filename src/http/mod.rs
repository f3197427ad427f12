//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request-id / trace / limit layers)
//!     → request.rs (host key, deadline, buffered body → ProxyRequest)
//!     → proxy::ProxyHandler (rate limit, breaker, forward)
//!     → response.rs (relay upstream response or render ProxyError)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestLimits, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
