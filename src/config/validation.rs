//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, capacity > 0)
//! - Check backend addresses and name uniqueness
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("invalid {field} address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("duplicate backend name: {0}")]
    DuplicateBackend(String),

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut names = HashSet::new();
    for backend in &config.backends {
        if !names.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }
        if !is_host_port(&backend.address) {
            errors.push(ValidationError::InvalidAddress {
                field: "backends.address",
                value: backend.address.clone(),
            });
        }
    }

    let positive = [
        ("listener.backlog", config.listener.backlog as u64),
        ("listener.max_connections", config.listener.max_connections as u64),
        ("cache.capacity", config.cache.capacity as u64),
        ("cache.default_ttl_secs", config.cache.default_ttl_secs),
        ("timeouts.connect_ms", config.timeouts.connect_ms),
        ("timeouts.backend_ms", config.timeouts.backend_ms),
        ("timeouts.request_ms", config.timeouts.request_ms),
        ("timeouts.idle_secs", config.timeouts.idle_secs),
        ("retries.max_attempts", config.retries.max_attempts as u64),
        ("health_check.interval_secs", config.health_check.interval_secs),
        ("health_check.unhealthy_threshold", config.health_check.unhealthy_threshold as u64),
        ("health_check.healthy_threshold", config.health_check.healthy_threshold as u64),
        ("protocol.max_request_bytes", config.protocol.max_request_bytes as u64),
        ("protocol.max_response_bytes", config.protocol.max_response_bytes as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::MustBePositive(field));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "admin.bind_address",
            value: config.admin.bind_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `host:port` with a non-empty host and a numeric port.
fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BackendConfig;

    fn backend(name: &str, address: &str) -> BackendConfig {
        BackendConfig {
            name: name.into(),
            address: address.into(),
        }
    }

    #[test]
    fn valid_config_passes() {
        let mut config = ProxyConfig::default();
        config.backends.push(backend("b1", "127.0.0.1:3000"));
        config.backends.push(backend("b2", "origin.internal:80"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.backends.push(backend("b1", "no-port"));
        config.backends.push(backend("b1", "127.0.0.1:3001"));
        config.cache.capacity = 0;
        config.retries.max_attempts = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateBackend("b1".into())));
        assert!(errors.contains(&ValidationError::InvalidAddress {
            field: "backends.address",
            value: "no-port".into(),
        }));
        assert!(errors.contains(&ValidationError::MustBePositive("cache.capacity")));
        assert!(errors.contains(&ValidationError::MustBePositive("retries.max_attempts")));
    }

    #[test]
    fn empty_backends_rejected() {
        let config = ProxyConfig::default();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoBackends]);
    }
}
