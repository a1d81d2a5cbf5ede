//! Failure detection and failover for broker nodes of a task execution engine
//!
//! The master process watches the heartbeat records workers publish in the
//! coordination registry, debounces stalls and session losses into a
//! suspicion count, and fails a worker over exactly once per confirmed
//! failure. Only the elected leader acts.

pub mod config;
pub mod health;
pub mod metrics;
pub mod registry;
