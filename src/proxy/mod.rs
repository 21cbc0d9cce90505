//! Proxy facade.
//!
//! # Data Flow
//! ```text
//! pass(request)
//!     → LoadBalancer::select_target()
//!         - None: 503, nothing sent upstream
//!     → Forwarder::forward() or websocket upgrade
//!     → response returned verbatim, failures as 502
//! ```

pub mod session;

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::request::Parts;
use axum::http::{Request, Response};
use axum::response::IntoResponse;

use crate::error::ProxyError;
use crate::http::forward::{ForwardOptions, Forwarder};
use crate::http::websocket;
use crate::load_balancer::{LoadBalancer, RoutingDecision};
use crate::observability::metrics;
use self::session::SessionTracker;

/// Entry point for proxied traffic: selects a target and forwards to it.
pub struct Proxy {
    balancer: LoadBalancer,
    forwarder: Forwarder,
    options: ForwardOptions,
}

impl Proxy {
    pub fn new(balancer: LoadBalancer, forwarder: Forwarder, options: ForwardOptions) -> Self {
        Self {
            balancer,
            forwarder,
            options,
        }
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    pub fn options(&self) -> &ForwardOptions {
        &self.options
    }

    pub fn sessions(&self) -> &SessionTracker {
        self.forwarder.sessions()
    }

    /// Forward an HTTP request with the default options.
    pub async fn pass(&self, request: Request<Body>, client_addr: Option<SocketAddr>) -> Response<Body> {
        self.pass_with(request, client_addr, &self.options).await
    }

    /// Forward an HTTP request with per-call options.
    pub async fn pass_with(
        &self,
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
        options: &ForwardOptions,
    ) -> Response<Body> {
        let started = Instant::now();
        let method = request.method().clone();

        let (result, decision) = match self.balancer.select_target() {
            Some(decision) => {
                let result = self
                    .forwarder
                    .forward(&decision.target, request, client_addr, options)
                    .await;
                (result, Some(decision))
            }
            None => (Err(ProxyError::NoHealthyTarget), None),
        };

        let response = finish(result, decision.as_ref());
        metrics::record_request(
            method.as_str(),
            response.status().as_u16(),
            decision.as_ref().map_or("none", |d| d.reason.as_str()),
            started,
        );
        response
    }

    /// Proxy a WebSocket upgrade with the default options.
    pub async fn pass_websocket(
        &self,
        upgrade: WebSocketUpgrade,
        parts: Parts,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        self.pass_websocket_with(upgrade, parts, client_addr, &self.options).await
    }

    /// Proxy a WebSocket upgrade.
    ///
    /// The target is connected before the client handshake is answered, and
    /// the client is accepted with the subprotocol the target chose.
    pub async fn pass_websocket_with(
        &self,
        upgrade: WebSocketUpgrade,
        parts: Parts,
        client_addr: Option<SocketAddr>,
        options: &ForwardOptions,
    ) -> Response<Body> {
        let started = Instant::now();
        let decision = self.balancer.select_target();

        let result = match &decision {
            Some(decision) => {
                let protocols = websocket::requested_protocols(&parts.headers);
                let client = self.forwarder.client();
                websocket::connect_upstream(client, &decision.target, &parts, client_addr, &protocols, options)
                    .await
                    .map(|(upstream, negotiated)| {
                        let upgrade = match negotiated {
                            Some(protocol) => upgrade.protocols([protocol]),
                            None => upgrade,
                        };
                        let session = self.forwarder.sessions().track();
                        upgrade
                            .on_failed_upgrade(|e| tracing::warn!(error = %e, "Client WebSocket upgrade failed"))
                            .on_upgrade(move |socket| websocket::relay_sockets(socket, upstream, session))
                    })
            }
            None => Err(ProxyError::NoHealthyTarget),
        };

        let response = finish(result, decision.as_ref());
        metrics::record_request(
            parts.method.as_str(),
            response.status().as_u16(),
            decision.as_ref().map_or("none", |d| d.reason.as_str()),
            started,
        );
        response
    }
}

fn finish(result: Result<Response<Body>, ProxyError>, decision: Option<&RoutingDecision>) -> Response<Body> {
    match result {
        Ok(response) => response,
        Err(ProxyError::NoHealthyTarget) => {
            tracing::debug!("No healthy backends available or all over limit");
            ProxyError::NoHealthyTarget.into_response()
        }
        Err(e) => {
            tracing::warn!(
                target_host = %decision.map_or_else(String::new, |d| d.target.to_string()),
                error = %e,
                "Upstream request failed"
            );
            e.into_response()
        }
    }
}
