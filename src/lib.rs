//! Health-aware streaming reverse proxy.

pub mod admin;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod proxy;

pub use config::schema::ProxyConfig;
pub use error::{ConfigError, ProxyError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::Proxy;
