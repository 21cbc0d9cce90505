//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, access log)
//!     → proxy facade (target selection)
//!     → forward.rs (HTTP) or websocket.rs (upgrade requests)
//!         → headers.rs (forwarded headers, hop-by-hop removal)
//!         → client.rs (pooled upstream connections)
//!         → body.rs (chunked relay of both bodies)
//!     → Send to client
//! ```

pub mod body;
pub mod client;
pub mod forward;
pub mod headers;
pub mod server;
pub mod websocket;

use axum::body::Body;
use hyper_util::client::legacy::{connect::HttpConnector, Client};

/// Shared pooled client used for probes and forwarding.
pub type HttpClient = Client<HttpConnector, Body>;

pub use forward::{ForwardOptions, Forwarder};
pub use server::HttpServer;
