//! Host lookup.
//!
//! # Responsibilities
//! - Store the configured upstream hosts
//! - Select the host key for an inbound request
//! - Build the upstream URL for a request path
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) host lookup via HashMap
//! - Explicit `None` for unknown hosts rather than a silent default

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;

use crate::config::HostConfig;
use crate::routing::matcher::{first_segment, strip_prefix};

/// Header that selects the upstream host explicitly.
pub const HOST_SELECTOR_HEADER: &str = "x-egress-host";

#[derive(Debug, Clone)]
pub struct HostRouter {
    by_key: HashMap<String, Arc<HostConfig>>,
    ordered: Vec<Arc<HostConfig>>,
}

impl HostRouter {
    pub fn new(hosts: &[HostConfig]) -> Self {
        let ordered: Vec<Arc<HostConfig>> = hosts.iter().cloned().map(Arc::new).collect();
        let by_key = ordered
            .iter()
            .map(|h| (h.host_key.clone(), h.clone()))
            .collect();
        Self { by_key, ordered }
    }

    pub fn get(&self, host_key: &str) -> Option<&Arc<HostConfig>> {
        self.by_key.get(host_key)
    }

    /// All hosts in configuration order.
    pub fn hosts(&self) -> &[Arc<HostConfig>] {
        &self.ordered
    }

    /// Host key for a request: the selector header if present, else the
    /// first path segment.
    pub fn select_host_key(headers: &HeaderMap, path: &str) -> Option<String> {
        headers
            .get(HOST_SELECTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| first_segment(path).map(str::to_string))
    }
}

/// Upstream URL for `path` (and optional query) on `host`.
pub fn upstream_url(host: &HostConfig, path: &str, query: Option<&str>) -> String {
    let base = host.egress_base_url.trim_end_matches('/');
    let path = strip_prefix(path, &host.mapped_path_prefix);
    match query {
        Some(q) if !q.is_empty() => format!("{}{}?{}", base, path, q),
        _ => format!("{}{}", base, path),
    }
}
