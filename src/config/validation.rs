//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals, timeouts > 0, addresses parse)
//! - Reject combinations the balancer cannot honor
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue, Method};

use crate::config::schema::{BalancerMode, ProxyConfig, TargetSpec};
use crate::health::target::parse_host;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.targets.is_empty() {
        errors.push(ValidationError::new("targets", "must not be empty"));
    }
    for (i, spec) in config.targets.iter().enumerate() {
        if let Err(e) = parse_host(spec.host()) {
            errors.push(ValidationError::new(format!("targets[{i}]"), e.to_string()));
        }
        if let TargetSpec::Detailed { probe_path: Some(path), .. } = spec {
            if !path.starts_with('/') {
                errors.push(ValidationError::new(
                    format!("targets[{i}].probe_path"),
                    "must start with '/'",
                ));
            }
        }
    }

    let personalized = config
        .targets
        .iter()
        .any(|t| matches!(t, TargetSpec::Detailed { .. }));
    if personalized && config.balancer.max_requests.is_some() {
        errors.push(ValidationError::new(
            "balancer.max_requests",
            "global limit cannot be combined with per-target settings",
        ));
    }

    let health = &config.health_check;
    if health.interval_secs < 1 {
        errors.push(ValidationError::new("health_check.interval_secs", "must be at least 1"));
    }
    if health.timeout_secs < 1 {
        errors.push(ValidationError::new("health_check.timeout_secs", "must be at least 1"));
    }
    if !health.ping_path.starts_with('/') {
        errors.push(ValidationError::new("health_check.ping_path", "must start with '/'"));
    }
    if Method::from_bytes(health.method.as_bytes()).is_err() {
        errors.push(ValidationError::new("health_check.method", "not a valid HTTP method"));
    }
    if config.balancer.mode == BalancerMode::Latency && !health.enabled {
        errors.push(ValidationError::new(
            "balancer.mode",
            "latency mode requires health checks to be enabled",
        ));
    }
    if config.balancer.mode == BalancerMode::Direct && config.targets.len() > 1 {
        errors.push(ValidationError::new(
            "balancer.mode",
            "direct mode takes exactly one target",
        ));
    }

    let forwarding = &config.forwarding;
    if forwarding.request_timeout_secs < 1 {
        errors.push(ValidationError::new("forwarding.request_timeout_secs", "must be at least 1"));
    }
    if let Some(method) = &forwarding.method {
        if Method::from_bytes(method.as_bytes()).is_err() {
            errors.push(ValidationError::new("forwarding.method", "not a valid HTTP method"));
        }
    }
    check_headers("forwarding.additional_headers", forwarding.additional_headers.iter(), &mut errors);
    if let Some(headers) = &forwarding.override_headers {
        check_headers("forwarding.override_headers", headers.iter(), &mut errors);
    }

    check_addr("listener.bind_address", &config.listener.bind_address, &mut errors);
    if config.admin.enabled {
        check_addr("admin.bind_address", &config.admin.bind_address, &mut errors);
    }
    if config.observability.metrics_enabled {
        check_addr("observability.metrics_address", &config.observability.metrics_address, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_headers<'a>(
    field: &str,
    headers: impl Iterator<Item = (&'a String, &'a String)>,
    errors: &mut Vec<ValidationError>,
) {
    for (name, value) in headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::new(format!("{field}.{name}"), "invalid header"));
        }
    }
}

fn check_addr(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, "not a valid socket address"));
    }
}
