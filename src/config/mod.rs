//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - Per-host settings are a typed list injected at construction, never read
//!   from the environment at call time
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, HostConfig, LimitsConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    ProxyConfig, ReconcilerConfig, StoreBackend, StoreConfig, TimeoutConfig,
};
