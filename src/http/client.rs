//! Pooled upstream HTTP client.
//!
//! Created once per process and shared by clone; the pool is internal to the client.

use std::time::Duration;

use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::ForwardingConfig;
use crate::http::HttpClient;

/// Build the shared client with connect and idle timeouts from config.
pub fn build_client(config: &ForwardingConfig) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
    connector.set_nodelay(true);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .build(connector)
}
