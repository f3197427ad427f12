//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the egress proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the egress proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream hosts the proxy is allowed to call.
    pub hosts: Vec<HostConfig>,

    /// Shared state store settings.
    pub store: StoreConfig,

    /// Background OPEN -> HALF_OPEN sweep.
    pub reconciler: ReconcilerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Request size limits.
    pub limits: LimitsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Static per-upstream settings. Loaded once and never mutated.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HostConfig {
    /// Partition key in the state store (e.g. "hmrc", "hmrc-sandbox").
    pub host_key: String,

    /// Inbound path prefix removed before forwarding (e.g. "/hmrc").
    #[serde(default)]
    pub mapped_path_prefix: String,

    /// Base URL requests are forwarded to.
    pub egress_base_url: String,

    /// Consecutive failures that trip the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Upper bound on a single upstream call.
    #[serde(default = "default_latency_threshold_ms")]
    pub latency_threshold_ms: u64,

    /// Minimum time the breaker stays OPEN.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Token refill rate.
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: f64,

    /// Token bucket capacity.
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_latency_threshold_ms() -> u64 {
    10_000
}

fn default_cooldown_seconds() -> u64 {
    60
}

fn default_rate_per_second() -> f64 {
    3.0
}

fn default_burst_capacity() -> u32 {
    6
}

impl HostConfig {
    /// Build a host entry with default breaker and limiter settings.
    pub fn new(
        host_key: impl Into<String>,
        mapped_path_prefix: impl Into<String>,
        egress_base_url: impl Into<String>,
    ) -> Self {
        Self {
            host_key: host_key.into(),
            mapped_path_prefix: mapped_path_prefix.into(),
            egress_base_url: egress_base_url.into(),
            failure_threshold: default_failure_threshold(),
            latency_threshold_ms: default_latency_threshold_ms(),
            cooldown_seconds: default_cooldown_seconds(),
            rate_per_second: default_rate_per_second(),
            burst_capacity: default_burst_capacity(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn cooldown_millis(&self) -> u64 {
        self.cooldown_seconds.saturating_mul(1_000)
    }

    pub fn latency_threshold(&self) -> Duration {
        Duration::from_millis(self.latency_threshold_ms)
    }

    pub fn burst(&self) -> f64 {
        self.burst_capacity as f64
    }
}

/// Which store implementation backs the shared host state.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map. State is lost on restart.
    Memory,
    /// JSON snapshot on disk, rewritten after every committed write.
    File,
}

/// Shared state store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Snapshot path for the file backend.
    pub path: Option<String>,

    /// Logical table name, carried in logs and the admin API.
    pub table: String,

    /// Bound on a single store call.
    pub operation_timeout_ms: u64,

    /// Extra attempts for writes that fail because the store is unreachable.
    pub write_retries: u32,

    /// Attempts for a read-modify-write that loses a version race.
    pub cas_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            table: "egress-breaker-state".to_string(),
            operation_timeout_ms: 250,
            write_retries: 2,
            cas_retries: 3,
        }
    }
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Reconciler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Run the periodic sweep.
    pub enabled: bool,

    /// Sweep interval in seconds.
    pub interval_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default and maximum caller deadline in seconds.
    pub request_secs: u64,

    /// Upstream connection establishment timeout in milliseconds.
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            connect_ms: 2_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Default admin key. Refused by validation whenever the admin API is enabled.
pub const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_ADMIN_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum inbound body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}
