//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → converted into TargetPool, ProbeSettings, ForwardOptions
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; target membership never changes at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config};
pub use schema::{
    AdminConfig, BalancerConfig, BalancerMode, ForwardingConfig, HealthCheckConfig, ListenerConfig,
    ObservabilityConfig, ProxyConfig, TargetSpec,
};
