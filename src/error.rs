//! Error taxonomy.
//!
//! # Kinds
//! - `ProbeFailure`: recorded as target state, never surfaced to callers
//! - `ProxyError`: request-path failures, mapped to 502/503 responses
//! - `BalancerError`: misuse of a balancer operation in the wrong mode
//! - `ConfigError`: loading and validating configuration
//!
//! # Design Decisions
//! - No healthy target is an expected outcome, kept distinct from upstream failures
//! - Timeouts are reported like connection errors (both map to 502)

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::config::validation::ValidationError;

/// Why a single health probe did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeFailure {
    #[error("probe timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unexpected status {0}")]
    Status(StatusCode),
}

impl ProbeFailure {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeFailure::Timeout => "timeout",
            ProbeFailure::Connect(_) => "connect",
            ProbeFailure::Status(_) => "status",
        }
    }
}

/// Failures on the request path.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Selection found no eligible target. Nothing was sent upstream.
    #[error("no healthy backends available or all over limit")]
    NoHealthyTarget,

    #[error("upstream request to {target} failed: {source}")]
    UpstreamConnect {
        target: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("upstream {target} did not respond within {timeout_ms}ms")]
    UpstreamTimeout { target: String, timeout_ms: u128 },

    #[error("invalid upstream uri {uri}")]
    InvalidUpstreamUri { uri: String },

    #[error("failed to build upstream request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("websocket handshake with {target} failed: {reason}")]
    WebSocketHandshake { target: String, reason: String },

    #[error("upgrade of the connection to {target} failed: {source}")]
    Upgrade {
        target: String,
        #[source]
        source: hyper::Error,
    },
}

impl ProxyError {
    /// HTTP status synthesized for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyTarget => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let message = match self.status() {
            StatusCode::SERVICE_UNAVAILABLE => {
                "Service Unavailable: No healthy backends available or all over limit"
            }
            _ => "Bad Gateway: upstream request failed",
        };
        (self.status(), message).into_response()
    }
}

/// Misuse of a load balancer operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalancerError {
    #[error("{operation} is only supported in round-robin mode")]
    UnsupportedMode { operation: &'static str },

    #[error("index {index} out of range for {len} targets")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("global max_requests is not supported when targets carry their own limits")]
    PersonalizedLimits,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("targets list cannot be empty")]
    NoTargets,

    #[error("invalid target host {host:?}: {reason}")]
    InvalidTarget { host: String, reason: String },

    #[error("{field} must be at least 1 second")]
    IntervalTooShort { field: &'static str },

    #[error("invalid header {name:?}")]
    InvalidHeader { name: String },

    #[error("invalid method {0:?}")]
    InvalidMethod(String),

    #[error(transparent)]
    Balancer(#[from] BalancerError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
