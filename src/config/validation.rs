//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject duplicate host keys and overlapping path prefixes
//! - Path prefixes must lead with their host key, since path routing selects
//!   the host by the first segment
//! - An enabled admin API needs a real key
//! - Validate value ranges (thresholds > 0, rates > 0, URLs parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::{ProxyConfig, StoreBackend, PLACEHOLDER_ADMIN_KEY};
use crate::routing::matcher::first_segment;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut keys = HashSet::new();
    let mut prefixes = HashSet::new();

    if config.hosts.is_empty() {
        errors.push(ValidationError::new("hosts", "at least one upstream host is required"));
    }

    for (i, host) in config.hosts.iter().enumerate() {
        let field = |name: &str| format!("hosts[{}].{}", i, name);

        if host.host_key.is_empty() {
            errors.push(ValidationError::new(field("host_key"), "must not be empty"));
        } else if host.host_key.contains('/') {
            errors.push(ValidationError::new(field("host_key"), "must not contain '/'"));
        } else if !keys.insert(host.host_key.as_str()) {
            errors.push(ValidationError::new(
                field("host_key"),
                format!("duplicate host key '{}'", host.host_key),
            ));
        }

        if !host.mapped_path_prefix.is_empty() {
            if !host.mapped_path_prefix.starts_with('/') {
                errors.push(ValidationError::new(field("mapped_path_prefix"), "must start with '/'"));
            } else if !prefixes.insert(host.mapped_path_prefix.trim_end_matches('/')) {
                errors.push(ValidationError::new(
                    field("mapped_path_prefix"),
                    format!("prefix '{}' is mapped twice", host.mapped_path_prefix),
                ));
            } else if !host.host_key.is_empty() && first_segment(&host.mapped_path_prefix) != Some(host.host_key.as_str()) {
                errors.push(ValidationError::new(
                    field("mapped_path_prefix"),
                    format!("must start with '/{}'", host.host_key),
                ));
            }
        }

        match Url::parse(&host.egress_base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::new(
                field("egress_base_url"),
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(field("egress_base_url"), e.to_string())),
        }

        if host.failure_threshold == 0 {
            errors.push(ValidationError::new(field("failure_threshold"), "must be > 0"));
        }
        if host.latency_threshold_ms == 0 {
            errors.push(ValidationError::new(field("latency_threshold_ms"), "must be > 0"));
        }
        if !(host.rate_per_second.is_finite() && host.rate_per_second > 0.0) {
            errors.push(ValidationError::new(field("rate_per_second"), "must be a positive number"));
        }
        if host.burst_capacity == 0 {
            errors.push(ValidationError::new(field("burst_capacity"), "must be >= 1"));
        }
    }

    if config.store.backend == StoreBackend::File && config.store.path.is_none() {
        errors.push(ValidationError::new("store.path", "required for the file backend"));
    }
    if config.store.operation_timeout_ms == 0 {
        errors.push(ValidationError::new("store.operation_timeout_ms", "must be > 0"));
    }
    if config.store.cas_retries == 0 {
        errors.push(ValidationError::new("store.cas_retries", "must be >= 1"));
    }
    if config.reconciler.enabled && config.reconciler.interval_secs == 0 {
        errors.push(ValidationError::new("reconciler.interval_secs", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.admin.enabled {
        let key = config.admin.api_key.trim();
        if key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must be set when the admin API is enabled"));
        } else if key == PLACEHOLDER_ADMIN_KEY {
            errors.push(ValidationError::new("admin.api_key", "still the placeholder value"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::HostConfig;

    fn valid_config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.hosts.push(HostConfig::new("hmrc", "/hmrc", "https://api.service.hmrc.gov.uk"));
        config.hosts.push(HostConfig::new(
            "hmrc-sandbox",
            "/hmrc-sandbox",
            "https://test-api.service.hmrc.gov.uk",
        ));
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid_config();
        config.hosts[1].host_key = "hmrc".into();
        config.hosts[1].mapped_path_prefix = "no-slash".into();
        config.hosts[1].egress_base_url = "ftp://example.com".into();
        config.hosts[1].failure_threshold = 0;
        config.hosts[1].rate_per_second = 0.0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors[0].to_string().contains("duplicate host key"));
    }

    #[test]
    fn test_file_backend_requires_path() {
        let mut config = valid_config();
        config.store.backend = StoreBackend::File;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "store.path");
    }

    #[test]
    fn test_empty_host_list_rejected() {
        let errors = validate_config(&ProxyConfig::default()).unwrap_err();
        assert_eq!(errors[0].field, "hosts");
    }

    #[test]
    fn test_prefix_must_lead_with_host_key() {
        let mut config = valid_config();
        config.hosts[0].mapped_path_prefix = "/vat".into();
        config.hosts[1].mapped_path_prefix = "/hmrc-sandbox/v2".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "hosts[0].mapped_path_prefix");
        assert_eq!(errors[0].message, "must start with '/hmrc'");
    }

    #[test]
    fn test_enabled_admin_needs_real_key() {
        let mut config = valid_config();
        config.admin.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "admin.api_key");

        config.admin.api_key = "  ".into();
        assert_eq!(validate_config(&config).unwrap_err()[0].field, "admin.api_key");

        config.admin.api_key = "9d2f6b1c8e4a7035".into();
        assert!(validate_config(&config).is_ok());

        config.admin.enabled = false;
        config.admin.api_key = String::new();
        assert!(validate_config(&config).is_ok());
    }
}
