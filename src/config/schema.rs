//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend targets, either plain hosts or detailed tables.
    pub targets: Vec<TargetSpec>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Routing policy.
    pub balancer: BalancerConfig,

    /// Forwarding behavior and upstream timeouts.
    pub forwarding: ForwardingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Diagnostics listener.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// A backend target as written in the config file.
///
/// ```toml
/// targets = [
///     "localhost:8080",
///     { host = "http://localhost:8081", probe_path = "/health", max_requests = 50 },
/// ]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TargetSpec {
    /// Host only; probe path and limits come from the global settings.
    Host(String),
    /// Host with its own probe path and request limit.
    Detailed {
        host: String,
        #[serde(default)]
        probe_path: Option<String>,
        #[serde(default)]
        max_requests: Option<u32>,
    },
}

impl TargetSpec {
    pub fn host(&self) -> &str {
        match self {
            TargetSpec::Host(host) => host,
            TargetSpec::Detailed { host, .. } => host,
        }
    }
}

impl From<&str> for TargetSpec {
    fn from(host: &str) -> Self {
        TargetSpec::Host(host.to_string())
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks. Latency mode routes on them and requires
    /// them; in the other modes they are reported only.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Default path to probe for targets without their own.
    pub ping_path: String,

    /// HTTP method used for probes.
    pub method: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 10,
            ping_path: "/".to_string(),
            method: "HEAD".to_string(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Routing policy selection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancerMode {
    /// Fastest healthy target.
    #[default]
    Latency,
    /// Cycle through targets in configured order.
    RoundRobin,
    /// Always the single configured target.
    Direct,
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    pub mode: BalancerMode,

    /// Global request limit per target between two health passes.
    /// Only valid when no target sets its own `max_requests`.
    pub max_requests: Option<u32>,
}

/// Forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Time allowed for the upstream response head, in seconds.
    pub request_timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_timeout_secs: u64,

    /// Append the inbound query string to the upstream URL.
    pub forward_query: bool,

    /// Replace the inbound method.
    pub method: Option<String>,

    /// Replace the inbound body.
    pub override_body: Option<String>,

    /// Headers added to every upstream request.
    pub additional_headers: BTreeMap<String, String>,

    /// Headers sent instead of the inbound ones.
    pub override_headers: Option<BTreeMap<String, String>>,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            connect_timeout_secs: 5,
            idle_timeout_secs: 90,
            forward_query: true,
            method: None,
            override_body: None,
            additional_headers: BTreeMap::new(),
            override_headers: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin diagnostics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the diagnostics listener.
    pub enabled: bool,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
