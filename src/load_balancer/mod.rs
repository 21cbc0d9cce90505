//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! select_target()
//!     → match RoutingMode:
//!         - RoundRobin: round_robin.rs (atomic cursor over the pool)
//!         - Latency:    latency.rs (fastest healthy target under its limit)
//!         - Static:     the one configured target
//!     → counters.rs (count the request)
//!     → RoutingDecision or None
//! ```
//!
//! # Design Decisions
//! - No background work and no lifecycle; every call reads current data
//! - No healthy target is `None`, not an error
//! - Counters reset whenever the health checker publishes a new pass
//! - Round-robin and static modes may carry a monitor; its results are
//!   reported but never consulted for selection

pub mod counters;
pub mod latency;
pub mod round_robin;

use std::fmt;
use std::sync::Arc;

use crate::error::BalancerError;
use crate::health::{HealthChecker, Target, TargetPool};
use self::counters::RequestCounters;
use self::round_robin::RoundRobin;

/// Where selection reads its targets from.
pub enum RoutingMode {
    /// Static ordered list, no health awareness.
    RoundRobin(TargetPool),
    /// Fastest healthy target according to the checker.
    Latency(Arc<HealthChecker>),
    /// A single fixed target.
    Static(Arc<Target>),
}

/// Why a target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingReason {
    RoundRobin,
    Latency,
    FallbackStatic,
}

impl RoutingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingReason::RoundRobin => "round_robin",
            RoutingReason::Latency => "latency",
            RoutingReason::FallbackStatic => "static",
        }
    }
}

impl fmt::Display for RoutingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one selection.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub target: Arc<Target>,
    pub reason: RoutingReason,
    /// Probe latency when chosen by latency.
    pub latency_ms: Option<f64>,
}

/// Chooses a target per request.
pub struct LoadBalancer {
    mode: RoutingMode,
    cursor: RoundRobin,
    counters: RequestCounters,
    max_requests: Option<u32>,
    monitor: Option<Arc<HealthChecker>>,
}

impl LoadBalancer {
    pub fn new(mode: RoutingMode) -> Self {
        let len = match &mode {
            RoutingMode::RoundRobin(pool) => pool.len(),
            RoutingMode::Latency(checker) => checker.pool().len(),
            RoutingMode::Static(_) => 1,
        };
        Self {
            mode,
            cursor: RoundRobin::new(),
            counters: RequestCounters::new(len),
            max_requests: None,
            monitor: None,
        }
    }

    pub fn round_robin(pool: TargetPool) -> Self {
        Self::new(RoutingMode::RoundRobin(pool))
    }

    pub fn latency(checker: Arc<HealthChecker>) -> Self {
        Self::new(RoutingMode::Latency(checker))
    }

    /// Always route to `target`.
    pub fn fixed(target: Target) -> Self {
        Self::new(RoutingMode::Static(Arc::new(Target { index: 0, ..target })))
    }

    /// Attach a health monitor for reporting only.
    ///
    /// Ignored in latency mode, which already routes on its own checker.
    pub fn with_monitor(mut self, checker: Arc<HealthChecker>) -> Self {
        if !matches!(self.mode, RoutingMode::Latency(_)) {
            self.monitor = Some(checker);
        }
        self
    }

    pub fn mode(&self) -> &RoutingMode {
        &self.mode
    }

    /// Choose a target for one request and count it.
    pub fn select_target(&self) -> Option<RoutingDecision> {
        let decision = self.decide(true);
        if decision.is_none() {
            tracing::debug!("No healthy targets available");
        }
        decision
    }

    /// The decision `select_target` would make, without side effects.
    pub fn peek(&self) -> Option<RoutingDecision> {
        self.decide(false)
    }

    fn decide(&self, commit: bool) -> Option<RoutingDecision> {
        match &self.mode {
            RoutingMode::RoundRobin(pool) => {
                let index = if commit {
                    self.cursor.next_index(pool.len())?
                } else {
                    self.cursor.peek_index(pool.len())?
                };
                if commit {
                    self.counters.record(index);
                }
                Some(RoutingDecision {
                    target: pool.get(index)?.clone(),
                    reason: RoutingReason::RoundRobin,
                    latency_ms: None,
                })
            }
            RoutingMode::Latency(checker) => {
                let snapshot = checker.snapshot();
                let personalized = checker.pool().is_personalized();
                let status = latency::select(
                    &snapshot,
                    &self.counters,
                    |target| {
                        if personalized {
                            target.max_requests
                        } else {
                            self.max_requests
                        }
                    },
                    commit,
                )?;
                Some(RoutingDecision {
                    target: status.target.clone(),
                    reason: RoutingReason::Latency,
                    latency_ms: status.latency(),
                })
            }
            RoutingMode::Static(target) => {
                if commit {
                    self.counters.record(0);
                }
                Some(RoutingDecision {
                    target: target.clone(),
                    reason: RoutingReason::FallbackStatic,
                    latency_ms: None,
                })
            }
        }
    }

    /// Every target this balancer can route to.
    pub fn targets(&self) -> Vec<Arc<Target>> {
        match &self.mode {
            RoutingMode::RoundRobin(pool) => pool.iter().cloned().collect(),
            RoutingMode::Latency(checker) => checker.pool().iter().cloned().collect(),
            RoutingMode::Static(target) => vec![target.clone()],
        }
    }

    /// Move the round-robin cursor.
    pub fn set_index(&self, index: usize) -> Result<(), BalancerError> {
        let RoutingMode::RoundRobin(pool) = &self.mode else {
            return Err(BalancerError::UnsupportedMode { operation: "set_index" });
        };
        if index >= pool.len() {
            return Err(BalancerError::IndexOutOfRange {
                index,
                len: pool.len(),
            });
        }
        self.cursor.set_index(index);
        Ok(())
    }

    /// Global request limit per target between two health passes.
    pub fn max_requests(&self) -> Result<Option<u32>, BalancerError> {
        self.ensure_global_limits()?;
        Ok(self.max_requests)
    }

    pub fn set_max_requests(&mut self, limit: Option<u32>) -> Result<(), BalancerError> {
        self.ensure_global_limits()?;
        self.max_requests = limit;
        Ok(())
    }

    fn ensure_global_limits(&self) -> Result<(), BalancerError> {
        match &self.mode {
            RoutingMode::Latency(checker) if checker.pool().is_personalized() => {
                Err(BalancerError::PersonalizedLimits)
            }
            _ => Ok(()),
        }
    }

    /// Requests routed to the target at `index` since the last reset.
    pub fn request_count(&self, index: usize) -> u64 {
        self.counters.get(index)
    }

    /// Health generation the counters were last reset for.
    pub fn observed_generation(&self) -> u64 {
        self.counters.generation()
    }

    /// The checker backing latency mode, or the attached monitor.
    pub fn health_checker(&self) -> Option<&Arc<HealthChecker>> {
        match &self.mode {
            RoutingMode::Latency(checker) => Some(checker),
            _ => self.monitor.as_ref(),
        }
    }
}
