//! Streaming HTTP forwarding.
//!
//! # Data Flow
//! ```text
//! inbound Request<Body>
//!     → upstream URI (target host + path [+ query])
//!     → header rewrite (forwarded headers, hop-by-hop removal, overrides)
//!     → body: override | streamed (POST/PUT/PATCH/DELETE) | empty
//!     → pooled client, bounded by the response-head timeout
//!     → response headers filtered, body relayed in bounded chunks
//! ```
//!
//! # Design Decisions
//! - Nothing is buffered: both bodies flow through `RelayBody`
//! - `Host` and `Content-Length` are left to the client, which derives them
//!   from the URI and the body size hint
//! - The timeout covers the response head only; a long stream is not cut off

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::request::Parts;
use axum::http::{Method, Request, Response};
use tokio::time;

use crate::config::ForwardingConfig;
use crate::error::{ConfigError, ProxyError};
use crate::health::Target;
use crate::http::body::{RelayBody, DEFAULT_CHUNK_SIZE};
use crate::http::headers::{self as hdr, X_ACCEL_BUFFERING};
use crate::http::HttpClient;
use crate::proxy::session::SessionTracker;

/// Per-call forwarding parameters.
#[derive(Debug, Clone)]
pub struct ForwardOptions {
    /// Method sent upstream instead of the inbound one.
    pub method: Option<Method>,
    /// Body sent upstream instead of the inbound one.
    pub override_body: Option<Bytes>,
    /// Inserted last, replacing same-named headers.
    pub additional_headers: HeaderMap,
    /// Sent instead of the inbound headers. No forwarded headers are added.
    pub override_headers: Option<HeaderMap>,
    pub forward_query: bool,
    /// Deadline for the upstream response head, or the WebSocket connect.
    pub timeout: Duration,
    /// Upstream path instead of the inbound one.
    pub path: Option<String>,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            method: None,
            override_body: None,
            additional_headers: HeaderMap::new(),
            override_headers: None,
            forward_query: true,
            timeout: Duration::from_secs(60),
            path: None,
        }
    }
}

impl ForwardOptions {
    pub fn from_config(config: &ForwardingConfig) -> Result<Self, ConfigError> {
        let method = config
            .method
            .as_deref()
            .map(|m| Method::from_bytes(m.as_bytes()).map_err(|_| ConfigError::InvalidMethod(m.to_string())))
            .transpose()?;

        Ok(Self {
            method,
            override_body: config.override_body.clone().map(Bytes::from),
            additional_headers: hdr::parse_map(&config.additional_headers)?,
            override_headers: config.override_headers.as_ref().map(hdr::parse_map).transpose()?,
            forward_query: config.forward_query,
            timeout: Duration::from_secs(config.request_timeout_secs),
            path: None,
        })
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.override_body = Some(body.into());
        self
    }

    pub fn header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.additional_headers.insert(name, value);
        self
    }

    pub fn override_headers(mut self, headers: HeaderMap) -> Self {
        self.override_headers = Some(headers);
        self
    }

    pub fn forward_query(mut self, enabled: bool) -> Self {
        self.forward_query = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Path and query to request on the target.
    pub(crate) fn upstream_path<'a>(&'a self, parts: &'a Parts) -> (&'a str, Option<&'a str>) {
        let path = self.path.as_deref().unwrap_or_else(|| parts.uri.path());
        let query = if self.forward_query { parts.uri.query() } else { None };
        (path, query)
    }
}

/// Whether requests with `method` carry the inbound body upstream.
pub fn sends_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// Relays HTTP exchanges to a chosen target through the shared client.
#[derive(Clone)]
pub struct Forwarder {
    client: HttpClient,
    chunk_size: usize,
    sessions: SessionTracker,
}

impl Forwarder {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sessions: SessionTracker::new(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Forward `request` to `target` and stream the response back.
    ///
    /// The returned body keeps the upstream connection until it is fully
    /// consumed or dropped.
    pub async fn forward(
        &self,
        target: &Target,
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
        options: &ForwardOptions,
    ) -> Result<Response<Body>, ProxyError> {
        let session = self.sessions.track();
        let (parts, body) = request.into_parts();

        let (path, query) = options.upstream_path(&parts);
        let uri = target
            .uri_for(path, query)
            .map_err(|_| ProxyError::InvalidUpstreamUri {
                uri: format!("{}{path}", target.key()),
            })?;

        let method = options.method.clone().unwrap_or_else(|| parts.method.clone());
        let body = match &options.override_body {
            Some(bytes) => Body::from(bytes.clone()),
            None if sends_body(&method) => Body::new(RelayBody::new(body, self.chunk_size)),
            None => Body::empty(),
        };

        let mut upstream = Request::builder().method(method).uri(uri).body(body)?;
        *upstream.headers_mut() = upstream_headers(&parts, client_addr, options);

        tracing::debug!(
            session_id = %session.id(),
            target_host = %target,
            method = %upstream.method(),
            uri = %upstream.uri(),
            "Forwarding request"
        );

        let response = match time::timeout(options.timeout, self.client.request(upstream)).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(ProxyError::UpstreamConnect {
                    target: target.key().to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(ProxyError::UpstreamTimeout {
                    target: target.key().to_string(),
                    timeout_ms: options.timeout.as_millis(),
                })
            }
        };

        let (mut parts, body) = response.into_parts();
        hdr::strip_hop_by_hop(&mut parts.headers);
        parts.headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));

        let body = RelayBody::new(Body::new(body), self.chunk_size).with_session(session);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Headers for the upstream request.
fn upstream_headers(parts: &Parts, client_addr: Option<SocketAddr>, options: &ForwardOptions) -> HeaderMap {
    let mut headers = match &options.override_headers {
        Some(headers) => headers.clone(),
        None => {
            let mut headers = parts.headers.clone();
            let host = parts
                .headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .or_else(|| parts.uri.authority().map(|a| a.as_str()));
            let proto = parts.uri.scheme_str().unwrap_or("http");
            hdr::add_forwarded(&mut headers, client_addr, proto, host);
            headers
        }
    };

    hdr::strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    hdr::apply(&mut headers, &options.additional_headers);
    headers
}
