//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the proxy (client, target pool, balancer, forwarder) from config
//! - Create the Axum router that sends every path to the proxy
//! - Wire up middleware (access log, request ID)
//! - Run the health monitor for as long as the server runs
//! - Serve until shutdown, then drain in-flight requests

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, ConnectInfo, FromRequestParts, State},
    http::{HeaderName, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin;
use crate::config::{BalancerMode, ProxyConfig};
use crate::error::ConfigError;
use crate::health::{HealthChecker, ProbeSettings, TargetPool};
use crate::http::client::build_client;
use crate::http::forward::{ForwardOptions, Forwarder};
use crate::http::{websocket, HttpClient};
use crate::load_balancer::LoadBalancer;
use crate::proxy::Proxy;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<Proxy>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    proxy: Arc<Proxy>,
}

impl HttpServer {
    /// Create the server and every component behind it. No network I/O happens here.
    pub fn new(config: ProxyConfig) -> Result<Self, ConfigError> {
        let client = build_client(&config.forwarding);
        let pool = TargetPool::from_specs(&config.targets)?;
        let balancer = build_balancer(&config, pool, client.clone())?;
        let options = ForwardOptions::from_config(&config.forwarding)?;

        let proxy = Arc::new(Proxy::new(balancer, Forwarder::new(client), options));
        let router = Self::build_router(AppState { proxy: proxy.clone() });

        Ok(Self {
            router,
            config,
            proxy,
        })
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID)),
            )
    }

    /// Run the server until `shutdown` fires.
    ///
    /// The health monitor runs its first pass before the listener accepts
    /// traffic and stops when this returns.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;

        let _monitor = match self.proxy.balancer().health_checker() {
            Some(checker) => Some(checker.start_scoped().await),
            None => None,
        };

        let admin = if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let state = AppState {
                proxy: self.proxy.clone(),
            };
            Some(tokio::spawn(admin::serve(admin_listener, state, shutdown.resubscribe())))
        } else {
            None
        };

        tracing::info!(address = %addr, targets = self.proxy.balancer().targets().len(), "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        if let Some(admin) = admin {
            let _ = admin.await;
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Router with all middleware, for serving on a custom transport.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

fn build_balancer(config: &ProxyConfig, pool: TargetPool, client: HttpClient) -> Result<LoadBalancer, ConfigError> {
    let checker = |pool: TargetPool| -> Result<Arc<HealthChecker>, ConfigError> {
        let settings = ProbeSettings::from_config(&config.health_check)?;
        let checker = HealthChecker::new(pool, client.clone(), settings)?;
        checker.set_ping_path(config.health_check.ping_path.clone());
        Ok(Arc::new(checker))
    };

    let mut balancer = match config.balancer.mode {
        BalancerMode::RoundRobin => LoadBalancer::round_robin(pool.clone()),
        BalancerMode::Direct => {
            let target = pool.get(0).ok_or(ConfigError::NoTargets)?;
            LoadBalancer::fixed(target.as_ref().clone())
        }
        BalancerMode::Latency => LoadBalancer::latency(checker(pool.clone())?),
    };

    // Outside latency mode the monitor only feeds logs, metrics and the admin API.
    if config.balancer.mode != BalancerMode::Latency && config.health_check.enabled {
        balancer = balancer.with_monitor(checker(pool)?);
    }

    if config.balancer.max_requests.is_some() {
        balancer.set_max_requests(config.balancer.max_requests)?;
    }
    Ok(balancer)
}

/// Every request lands here; upgrades take the WebSocket path.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    if websocket::is_upgrade_request(request.headers()) {
        let (mut parts, _) = request.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => state.proxy.pass_websocket(upgrade, parts, client_addr).await,
            Err(rejection) => rejection.into_response(),
        };
    }

    state.proxy.pass(request, client_addr).await
}
