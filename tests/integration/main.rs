//! Integration test entry point
//!
//! Drives the heartbeat check loop against the in-memory collaborators.
//!
//! Run with: cargo test --test integration

mod scenarios;

use std::sync::Arc;

use broker_failover::config::FailoverConfig;
use broker_failover::health::{FailoverController, HealthCheckLoop, TickSummary};
use broker_failover::registry::{
    CallLog, MemoryCoordination, MemoryMachineRegistry, MemoryMigrator, StaticLeader,
};

/// A checker wired to in-memory collaborators sharing one call log
pub struct Cluster {
    pub log: CallLog,
    pub coordination: Arc<MemoryCoordination>,
    pub machines: Arc<MemoryMachineRegistry>,
    pub migrator: Arc<MemoryMigrator>,
    pub leader: Arc<StaticLeader>,
    pub checker: HealthCheckLoop,
}

impl Cluster {
    pub fn new(threshold: u32) -> Self {
        Self::with_config(FailoverConfig {
            failure_threshold_ticks: threshold,
            ..FailoverConfig::default()
        })
    }

    pub fn with_config(config: FailoverConfig) -> Self {
        let log = CallLog::new();
        let coordination = Arc::new(MemoryCoordination::with_log(log.clone()));
        let machines = Arc::new(MemoryMachineRegistry::with_log(log.clone()));
        let migrator = Arc::new(MemoryMigrator::with_log(log.clone()));
        let leader = Arc::new(StaticLeader::new(true));
        let controller =
            FailoverController::new(coordination.clone(), machines.clone(), migrator.clone());
        let checker =
            HealthCheckLoop::new(coordination.clone(), leader.clone(), controller, config);
        Self {
            log,
            coordination,
            machines,
            migrator,
            leader,
            checker,
        }
    }

    /// Run one tick the way the scheduled loop does
    pub async fn tick(&mut self) -> TickSummary {
        self.checker
            .run_once()
            .await
            .expect("tick should not fail")
    }
}
