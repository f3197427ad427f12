//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (headers, path)
//!     → router.rs (select host key: x-egress-host header, else first segment)
//!     → HostConfig lookup
//!     → matcher.rs (strip mapped path prefix on a segment boundary)
//!     → upstream URL = egress_base_url + remaining path + query
//! ```
//!
//! # Design Decisions
//! - Host table built at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always selects the same host

pub mod matcher;
pub mod router;

pub use router::{upstream_url, HostRouter, HOST_SELECTOR_HEADER};
