//! Active health checking.
//!
//! # Responsibilities
//! - Probe every target once before `start()` returns
//! - Periodically re-probe all targets concurrently
//! - Publish a fresh `HealthSnapshot` after each pass
//! - Answer routing queries from the latest snapshot
//!
//! # Lifecycle
//! ```text
//! STOPPED --start()--> RUNNING --stop() / guard drop / checker drop--> STOPPED
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, Method, Request};
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::error::{ConfigError, ProbeFailure};
use crate::health::snapshot::{HealthSnapshot, ProbeOutcome, TargetStatus};
use crate::health::target::{Target, TargetPool};
use crate::http::HttpClient;
use crate::observability::metrics;

const PROBE_USER_AGENT: &str = "proxy-pass-health-check";

/// Probe response bodies up to this size are read so the connection can be reused.
const PROBE_BODY_LIMIT: usize = 64 * 1024;

/// Probe timing and method.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub method: Method,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(10),
            method: Method::HEAD,
        }
    }
}

impl ProbeSettings {
    pub fn from_config(config: &HealthCheckConfig) -> Result<Self, ConfigError> {
        let method = Method::from_bytes(config.method.as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(config.method.clone()))?;
        Ok(Self {
            interval: config.interval(),
            timeout: config.timeout(),
            method,
        })
    }
}

/// Monitors target health in the background and serves snapshot queries.
pub struct HealthChecker {
    shared: Arc<Shared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by every stop; a start only installs its loop if none happened meanwhile.
    stops: AtomicU64,
}

struct Shared {
    pool: TargetPool,
    client: HttpClient,
    settings: ProbeSettings,
    ping_path: ArcSwap<String>,
    snapshot: ArcSwap<HealthSnapshot>,
}

impl HealthChecker {
    /// Create a stopped checker. No probe is sent until `start()` or `check_all()`.
    pub fn new(pool: TargetPool, client: HttpClient, settings: ProbeSettings) -> Result<Self, ConfigError> {
        if pool.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if settings.interval < Duration::from_secs(1) {
            return Err(ConfigError::IntervalTooShort { field: "interval" });
        }
        if settings.timeout < Duration::from_secs(1) {
            return Err(ConfigError::IntervalTooShort { field: "timeout" });
        }

        let snapshot = HealthSnapshot::initial(&pool);
        Ok(Self {
            shared: Arc::new(Shared {
                pool,
                client,
                settings,
                ping_path: ArcSwap::from_pointee("/".to_string()),
                snapshot: ArcSwap::from_pointee(snapshot),
            }),
            monitor: Mutex::new(None),
            stops: AtomicU64::new(0),
        })
    }

    /// Probe all targets once, then keep probing in the background.
    ///
    /// Returns after the first pass has been published. Calling it while the
    /// monitor is running does nothing.
    pub async fn start(&self) {
        if self.is_running() {
            return;
        }

        tracing::info!(
            interval = ?self.shared.settings.interval,
            timeout = ?self.shared.settings.timeout,
            targets = self.shared.pool.len(),
            "Health monitor starting"
        );
        let stops = self.stops.load(Ordering::SeqCst);
        self.shared.probe_all().await;

        let mut slot = self.monitor_slot();
        if self.stops.load(Ordering::SeqCst) != stops {
            tracing::debug!("Health monitor stopped during its first pass");
        } else if slot.is_none() {
            *slot = Some(tokio::spawn(self.shared.clone().run()));
        }
    }

    /// Start the monitor and tie its lifetime to the returned guard.
    pub async fn start_scoped(self: &Arc<Self>) -> MonitorGuard {
        self.start().await;
        MonitorGuard {
            checker: Arc::clone(self),
        }
    }

    /// Stop the background loop and wait for it to end.
    pub async fn stop(&self) {
        let handle = {
            let mut slot = self.monitor_slot();
            self.stops.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            tracing::info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.monitor_slot().is_some()
    }

    /// Run one probe pass now and return the snapshot it produced.
    pub async fn check_all(&self) -> Arc<HealthSnapshot> {
        self.shared.probe_all().await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        self.shared.snapshot.load_full()
    }

    pub fn fastest(&self) -> Option<Arc<Target>> {
        self.shared.snapshot.load().fastest().map(|s| s.target.clone())
    }

    pub fn healthy_targets(&self) -> Vec<Arc<Target>> {
        self.shared.snapshot.load().healthy_targets()
    }

    pub fn response_times(&self) -> Vec<(Arc<Target>, f64)> {
        self.shared.snapshot.load().response_times()
    }

    /// Whether `host` is a known target and currently healthy.
    pub fn is_healthy(&self, host: &str) -> bool {
        self.shared
            .pool
            .find(host)
            .is_some_and(|t| self.shared.snapshot.load().is_healthy(t.index))
    }

    pub fn pool(&self) -> &TargetPool {
        &self.shared.pool
    }

    /// Default probe path for targets without their own.
    pub fn ping_path(&self) -> String {
        self.shared.ping_path.load().as_ref().clone()
    }

    pub fn set_ping_path(&self, path: impl Into<String>) {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        self.shared.ping_path.store(Arc::new(path));
    }

    fn abort(&self) {
        let mut slot = self.monitor_slot();
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = slot.take() {
            handle.abort();
            tracing::debug!("Health monitor aborted");
        }
    }

    fn monitor_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Keeps the monitor running while alive.
pub struct MonitorGuard {
    checker: Arc<HealthChecker>,
}

impl MonitorGuard {
    pub fn checker(&self) -> &Arc<HealthChecker> {
        &self.checker
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.checker.abort();
    }
}

impl Shared {
    async fn run(self: Arc<Self>) {
        let interval = self.settings.interval;
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.probe_all().await;
        }
    }

    async fn probe_all(&self) -> Arc<HealthSnapshot> {
        let ping_path = self.ping_path.load_full();
        let probes = self.pool.iter().map(|target| self.probe(target, &ping_path));
        let outcomes = join_all(probes).await;

        let previous = self.snapshot.rcu(|current| current.advance(&outcomes));
        let next = self.snapshot.load_full();
        report(&previous, &next);
        next
    }

    async fn probe(&self, target: &Target, default_path: &str) -> ProbeOutcome {
        let path = target.probe_path.as_deref().unwrap_or(default_path);
        let uri = match target.uri_for(path, None) {
            Ok(uri) => uri,
            Err(e) => return ProbeOutcome::Failed(ProbeFailure::Connect(e.to_string())),
        };

        let request = match Request::builder()
            .method(self.settings.method.clone())
            .uri(uri)
            .header(header::USER_AGENT, PROBE_USER_AGENT)
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => return ProbeOutcome::Failed(ProbeFailure::Connect(e.to_string())),
        };

        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let response = match time::timeout_at(deadline, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return ProbeOutcome::Failed(ProbeFailure::Connect(e.to_string())),
            Err(_) => return ProbeOutcome::Failed(ProbeFailure::Timeout),
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let status = response.status();

        // Read the body so the pooled connection can be reused.
        let body = Body::new(response.into_body());
        let _ = time::timeout_at(deadline, axum::body::to_bytes(body, PROBE_BODY_LIMIT)).await;

        if status.as_u16() < 400 {
            ProbeOutcome::Healthy { latency_ms }
        } else {
            ProbeOutcome::Failed(ProbeFailure::Status(status))
        }
    }
}

fn report(previous: &HealthSnapshot, next: &HealthSnapshot) {
    for (before, after) in previous.targets().iter().zip(next.targets()) {
        log_transition(before, after);

        let key = after.target.key();
        metrics::record_target_health(key, after.healthy, after.latency());
        if let Some(failure) = &after.last_failure {
            metrics::record_probe_failure(key, failure.kind());
        }
    }

    tracing::debug!(
        generation = next.generation(),
        healthy = next.healthy().count(),
        total = next.targets().len(),
        "Health check pass complete"
    );
}

fn log_transition(before: &TargetStatus, after: &TargetStatus) {
    let target = after.target.key();
    match (before.healthy, after.healthy) {
        (false, true) => tracing::info!(
            target_host = %target,
            latency_ms = after.latency_ms,
            "Target is UP"
        ),
        (true, false) => tracing::warn!(
            target_host = %target,
            error = ?after.last_failure,
            "Target is DOWN"
        ),
        (false, false) if before.last_checked.is_none() => tracing::warn!(
            target_host = %target,
            error = ?after.last_failure,
            "Target is DOWN"
        ),
        (false, false) => tracing::debug!(
            target_host = %target,
            failures = after.consecutive_failures,
            error = ?after.last_failure,
            "Target still down"
        ),
        (true, true) => {}
    }
}
