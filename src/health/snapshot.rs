//! Immutable health state.
//!
//! # State Transitions
//! ```text
//! Unknown → Healthy:   first successful probe
//! * → Unhealthy:       any failed probe (no debounce)
//! Unhealthy → Healthy: next successful probe
//! ```
//!
//! # Design Decisions
//! - One snapshot per probe pass, published atomically by the checker
//! - Readers hold an `Arc` to a consistent copy; nothing is mutated in place
//! - Latency of an unhealthy target is kept but never read

use std::sync::Arc;
use std::time::Instant;

use crate::error::ProbeFailure;
use crate::health::target::{Target, TargetPool};

/// Result of probing one target.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy { latency_ms: f64 },
    Failed(ProbeFailure),
}

/// Health of a single target at snapshot time.
#[derive(Debug, Clone)]
pub struct TargetStatus {
    pub target: Arc<Target>,
    pub healthy: bool,
    pub latency_ms: f64,
    pub last_checked: Option<Instant>,
    pub consecutive_failures: u32,
    pub last_failure: Option<ProbeFailure>,
}

impl TargetStatus {
    fn unknown(target: Arc<Target>) -> Self {
        Self {
            target,
            healthy: false,
            latency_ms: 0.0,
            last_checked: None,
            consecutive_failures: 0,
            last_failure: None,
        }
    }

    /// Latency if the target is healthy.
    pub fn latency(&self) -> Option<f64> {
        self.healthy.then_some(self.latency_ms)
    }

    fn apply(&self, outcome: &ProbeOutcome, at: Instant) -> Self {
        let mut next = self.clone();
        next.last_checked = Some(at);
        match outcome {
            ProbeOutcome::Healthy { latency_ms } => {
                next.healthy = true;
                next.latency_ms = *latency_ms;
                next.consecutive_failures = 0;
                next.last_failure = None;
            }
            ProbeOutcome::Failed(failure) => {
                next.healthy = false;
                next.consecutive_failures = self.consecutive_failures.saturating_add(1);
                next.last_failure = Some(failure.clone());
            }
        }
        next
    }
}

/// Point-in-time copy of every target's health.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    generation: u64,
    taken_at: Option<Instant>,
    targets: Vec<TargetStatus>,
}

impl HealthSnapshot {
    /// Snapshot before any probe: every target unknown and not eligible.
    pub fn initial(pool: &TargetPool) -> Self {
        Self {
            generation: 0,
            taken_at: None,
            targets: pool.iter().cloned().map(TargetStatus::unknown).collect(),
        }
    }

    /// Next snapshot after a probe pass. `outcomes` is indexed like the pool.
    pub fn advance(&self, outcomes: &[ProbeOutcome]) -> Self {
        let now = Instant::now();
        let targets = self
            .targets
            .iter()
            .zip(outcomes)
            .map(|(status, outcome)| status.apply(outcome, now))
            .collect();

        Self {
            generation: self.generation + 1,
            taken_at: Some(now),
            targets,
        }
    }

    /// Number of completed probe passes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn taken_at(&self) -> Option<Instant> {
        self.taken_at
    }

    pub fn targets(&self) -> &[TargetStatus] {
        &self.targets
    }

    pub fn status(&self, index: usize) -> Option<&TargetStatus> {
        self.targets.get(index)
    }

    pub fn healthy(&self) -> impl Iterator<Item = &TargetStatus> {
        self.targets.iter().filter(|s| s.healthy)
    }

    /// Healthy target with the lowest latency. Ties go to the earlier target.
    pub fn fastest(&self) -> Option<&TargetStatus> {
        self.healthy()
            .min_by(|a, b| a.latency_ms.total_cmp(&b.latency_ms))
    }

    pub fn healthy_targets(&self) -> Vec<Arc<Target>> {
        self.healthy().map(|s| s.target.clone()).collect()
    }

    /// Latency of every healthy target.
    pub fn response_times(&self) -> Vec<(Arc<Target>, f64)> {
        self.healthy()
            .map(|s| (s.target.clone(), s.latency_ms))
            .collect()
    }

    pub fn is_healthy(&self, index: usize) -> bool {
        self.status(index).is_some_and(|s| s.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn pool() -> TargetPool {
        TargetPool::from_hosts(&["a:1", "b:2", "c:3"]).unwrap()
    }

    fn healthy(ms: f64) -> ProbeOutcome {
        ProbeOutcome::Healthy { latency_ms: ms }
    }

    #[test]
    fn initial_snapshot_has_no_healthy_targets() {
        let snapshot = HealthSnapshot::initial(&pool());
        assert_eq!(snapshot.generation(), 0);
        assert!(snapshot.fastest().is_none());
        assert!(snapshot.healthy_targets().is_empty());
    }

    #[test]
    fn fastest_is_minimum_healthy_latency() {
        let snapshot = HealthSnapshot::initial(&pool()).advance(&[
            healthy(40.0),
            ProbeOutcome::Failed(ProbeFailure::Timeout),
            healthy(12.5),
        ]);

        let fastest = snapshot.fastest().unwrap();
        assert_eq!(fastest.target.index, 2);
        assert_eq!(snapshot.healthy_targets().len(), 2);
        assert_eq!(snapshot.generation(), 1);
    }

    #[test]
    fn ties_resolve_to_pool_order() {
        let snapshot =
            HealthSnapshot::initial(&pool()).advance(&[healthy(5.0), healthy(5.0), healthy(5.0)]);
        assert_eq!(snapshot.fastest().unwrap().target.index, 0);
    }

    #[test]
    fn single_failure_flips_health() {
        let first = HealthSnapshot::initial(&pool()).advance(&[healthy(1.0), healthy(2.0), healthy(3.0)]);
        assert!(first.is_healthy(0));

        let second = first.advance(&[
            ProbeOutcome::Failed(ProbeFailure::Status(StatusCode::INTERNAL_SERVER_ERROR)),
            healthy(2.0),
            healthy(3.0),
        ]);
        let status = second.status(0).unwrap();
        assert!(!status.healthy);
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.latency(), None);
        // Stale latency is kept but unused.
        assert_eq!(status.latency_ms, 1.0);
        assert_eq!(second.fastest().unwrap().target.index, 1);
    }

    #[test]
    fn all_unhealthy_has_no_fastest() {
        let failed = ProbeOutcome::Failed(ProbeFailure::Connect("refused".into()));
        let snapshot = HealthSnapshot::initial(&pool()).advance(&[failed.clone(), failed.clone(), failed]);
        assert!(snapshot.fastest().is_none());
        assert_eq!(snapshot.status(2).unwrap().consecutive_failures, 1);
    }

    #[test]
    fn success_resets_failures() {
        let failed = ProbeOutcome::Failed(ProbeFailure::Timeout);
        let snapshot = HealthSnapshot::initial(&pool())
            .advance(&[failed.clone(), healthy(1.0), healthy(1.0)])
            .advance(&[failed, healthy(1.0), healthy(1.0)]);
        assert_eq!(snapshot.status(0).unwrap().consecutive_failures, 2);

        let recovered = snapshot.advance(&[healthy(9.0), healthy(1.0), healthy(1.0)]);
        assert_eq!(recovered.status(0).unwrap().consecutive_failures, 0);
        assert_eq!(recovered.status(0).unwrap().latency(), Some(9.0));
    }
}
