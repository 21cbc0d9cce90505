//! Latency-based selection.
//!
//! Picks the healthy target with the lowest probe latency that is still under
//! its request limit. Falls through to the next fastest when a target is full.

use crate::health::{HealthSnapshot, Target, TargetStatus};
use crate::load_balancer::counters::RequestCounters;

/// Select from `snapshot`. With `commit`, the chosen target's counter is incremented.
pub fn select<'a, F>(
    snapshot: &'a HealthSnapshot,
    counters: &RequestCounters,
    limit_for: F,
    commit: bool,
) -> Option<&'a TargetStatus>
where
    F: Fn(&Target) -> Option<u32>,
{
    counters.observe(snapshot.generation());

    let mut candidates: Vec<&TargetStatus> = snapshot.healthy().collect();
    candidates.sort_by(|a, b| a.latency_ms.total_cmp(&b.latency_ms));

    candidates.into_iter().find(|status| {
        let index = status.target.index;
        let limit = limit_for(status.target.as_ref());
        if commit {
            counters.try_acquire(index, limit)
        } else {
            counters.has_capacity(index, limit)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeFailure;
    use crate::health::{ProbeOutcome, TargetPool};

    fn snapshot() -> HealthSnapshot {
        let pool = TargetPool::from_hosts(&["a:1", "b:2", "c:3"]).unwrap();
        HealthSnapshot::initial(&pool).advance(&[
            ProbeOutcome::Healthy { latency_ms: 30.0 },
            ProbeOutcome::Healthy { latency_ms: 10.0 },
            ProbeOutcome::Failed(ProbeFailure::Timeout),
        ])
    }

    #[test]
    fn picks_fastest() {
        let snapshot = snapshot();
        let counters = RequestCounters::new(3);
        let chosen = select(&snapshot, &counters, |_| None, true).unwrap();
        assert_eq!(chosen.target.index, 1);
        assert_eq!(counters.get(1), 1);
    }

    #[test]
    fn full_target_falls_through_to_next_fastest() {
        let snapshot = snapshot();
        let counters = RequestCounters::new(3);
        let picks: Vec<_> = (0..4)
            .map(|_| select(&snapshot, &counters, |_| Some(2), true).map(|s| s.target.index))
            .collect();
        assert_eq!(picks, vec![Some(1), Some(1), Some(0), Some(0)]);
        assert!(select(&snapshot, &counters, |_| Some(2), true).is_none());
    }

    #[test]
    fn peek_leaves_counts_alone() {
        let snapshot = snapshot();
        let counters = RequestCounters::new(3);
        select(&snapshot, &counters, |_| Some(1), false);
        select(&snapshot, &counters, |_| Some(1), false);
        assert_eq!(counters.get(1), 0);
    }

    #[test]
    fn counts_reset_on_new_pass() {
        let first = snapshot();
        let counters = RequestCounters::new(3);
        select(&first, &counters, |_| Some(1), true);
        select(&first, &counters, |_| Some(1), true);
        assert!(select(&first, &counters, |_| Some(1), true).is_none());

        let second = first.advance(&[
            ProbeOutcome::Healthy { latency_ms: 30.0 },
            ProbeOutcome::Healthy { latency_ms: 10.0 },
            ProbeOutcome::Failed(ProbeFailure::Timeout),
        ]);
        assert_eq!(select(&second, &counters, |_| Some(1), true).unwrap().target.index, 1);
    }
}
