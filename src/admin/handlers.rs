use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::health::HealthSnapshot;
use crate::http::server::AppState;
use crate::load_balancer::{LoadBalancer, RoutingMode};

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub mode: String,
    pub targets: usize,
    /// Absent when routing does not track health.
    pub healthy_targets: Option<usize>,
    pub generation: Option<u64>,
    pub monitor_running: bool,
    pub active_sessions: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TargetView {
    pub host: String,
    pub healthy: Option<bool>,
    pub latency_ms: Option<f64>,
    pub consecutive_failures: Option<u32>,
    pub last_error: Option<String>,
    pub probe_path: Option<String>,
    pub max_requests: Option<u32>,
    /// Requests routed since the last health pass.
    pub requests: u64,
}

fn mode_name(balancer: &LoadBalancer) -> &'static str {
    match balancer.mode() {
        RoutingMode::RoundRobin(_) => "round_robin",
        RoutingMode::Latency(_) => "latency",
        RoutingMode::Static(_) => "direct",
    }
}

fn snapshot(balancer: &LoadBalancer) -> Option<std::sync::Arc<HealthSnapshot>> {
    balancer.health_checker().map(|checker| checker.snapshot())
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let balancer = state.proxy.balancer();
    let snapshot = snapshot(balancer);
    let healthy = snapshot.as_ref().map(|s| s.healthy().count());

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: match healthy {
            Some(0) => "degraded".to_string(),
            _ => "operational".to_string(),
        },
        mode: mode_name(balancer).to_string(),
        targets: balancer.targets().len(),
        healthy_targets: healthy,
        generation: snapshot.as_ref().map(|s| s.generation()),
        monitor_running: balancer.health_checker().is_some_and(|c| c.is_running()),
        active_sessions: state.proxy.sessions().active_count(),
    })
}

pub async fn get_targets(State(state): State<AppState>) -> Json<Vec<TargetView>> {
    let balancer = state.proxy.balancer();
    let snapshot = snapshot(balancer);

    let views = balancer
        .targets()
        .iter()
        .map(|target| {
            let status = snapshot.as_ref().and_then(|s| s.status(target.index));
            TargetView {
                host: target.key().to_string(),
                healthy: status.map(|s| s.healthy),
                latency_ms: status.and_then(|s| s.latency()),
                consecutive_failures: status.map(|s| s.consecutive_failures),
                last_error: status.and_then(|s| s.last_failure.as_ref()).map(ToString::to_string),
                probe_path: target.probe_path.clone(),
                max_requests: target.max_requests,
                requests: balancer.request_count(target.index),
            }
        })
        .collect();

    Json(views)
}
