//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! target.rs:   config specs → TargetPool (immutable)
//! checker.rs:  start() → probe pass → spawn loop
//!                  every interval: probe all targets concurrently
//!                  → snapshot.rs: previous.advance(outcomes)
//!                  → atomic swap of Arc<HealthSnapshot>
//! readers:     load the current Arc, never lock
//! ```
//!
//! # Design Decisions
//! - A single failed probe marks a target unhealthy (fast failover over flap resistance)
//! - Probe failures are state, never errors
//! - Only the checker writes health state

pub mod checker;
pub mod snapshot;
pub mod target;

pub use checker::{HealthChecker, MonitorGuard, ProbeSettings};
pub use snapshot::{HealthSnapshot, ProbeOutcome, TargetStatus};
pub use target::{Target, TargetPool};
