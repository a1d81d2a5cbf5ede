//! Heartbeat checking and failover for broker nodes
//!
//! This module provides:
//! - Debounced failure detection over published heartbeat sequences
//! - Immediate scheduling cutoff for workers the registry reports gone
//! - Failover (mark dead, migrate, remove queue, disable) once a failure is
//!   confirmed
//! - A leader-gated, fixed-delay check loop driving the above

mod checker;
mod failover;
mod record;
mod tracker;

pub use checker::{HealthCheckLoop, HealthError, TickSummary};
pub use failover::{FailoverController, FailoverReport, FailoverStep};
pub use record::{HeartbeatRecord, WorkerId, DEFAULT_STOPPED_SEQUENCE};
pub use tracker::{Decision, Reachability, SuspicionState, SuspicionTracker, Verdict};
