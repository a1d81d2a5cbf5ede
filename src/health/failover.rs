//! Failover side effects
//!
//! Turns tracker decisions into calls on the machine registry, the
//! coordination registry and the migration collaborator. Every call is
//! idempotent on the collaborator side, so a newly promoted leader can
//! re-drive a half-finished failover without harm. Errors are logged and
//! reported, never propagated: one failing collaborator must not block the
//! remaining steps.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::metrics::metrics;
use crate::registry::{CoordinationClient, MachineRegistry, Migrator};

use super::tracker::{Decision, Reachability};

/// A single side effect issued by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailoverStep {
    EnableMachine,
    DisableMachine,
    MarkDead,
    Migrate,
    RemoveQueue,
}

impl FailoverStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnableMachine => "enable_machine",
            Self::DisableMachine => "disable_machine",
            Self::MarkDead => "mark_dead",
            Self::Migrate => "migrate",
            Self::RemoveQueue => "remove_queue",
        }
    }
}

impl fmt::Display for FailoverStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps issued for one worker, in order, and which of them failed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailoverReport {
    pub attempted: Vec<FailoverStep>,
    pub failed: Vec<FailoverStep>,
}

impl FailoverReport {
    /// No step failed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.attempted.is_empty()
    }

    fn record(&mut self, step: FailoverStep, ok: bool) {
        self.attempted.push(step);
        if !ok {
            metrics().record_step_error(step.as_str());
            self.failed.push(step);
        }
    }
}

/// Issues registry and migration side effects for tracker decisions
pub struct FailoverController {
    coordination: Arc<dyn CoordinationClient>,
    machines: Arc<dyn MachineRegistry>,
    migrator: Arc<dyn Migrator>,
}

impl FailoverController {
    pub fn new(
        coordination: Arc<dyn CoordinationClient>,
        machines: Arc<dyn MachineRegistry>,
        migrator: Arc<dyn Migrator>,
    ) -> Self {
        Self {
            coordination,
            machines,
            migrator,
        }
    }

    /// Act on one worker's decision for this tick
    ///
    /// Order: enable on first sight, then the reachability toggle, then the
    /// failover sequence. A worker first seen already unreachable is enabled
    /// and immediately disabled again.
    pub async fn apply(&self, worker: &str, decision: &Decision) -> FailoverReport {
        let mut report = FailoverReport::default();

        if decision.first_seen {
            info!(worker = %worker, "New worker observed, enabling machine");
            self.enable(worker, &mut report).await;
        }

        match decision.reachability {
            Some(Reachability::Lost) => {
                warn!(worker = %worker, "Worker unreachable, disabling machine");
                self.disable(worker, &mut report).await;
            }
            Some(Reachability::Regained) => {
                info!(worker = %worker, "Worker reachable again, enabling machine");
                self.enable(worker, &mut report).await;
            }
            None => {}
        }

        if decision.is_confirmed_failed() {
            let failover = self.fail_over(worker).await;
            report.attempted.extend(failover.attempted);
            report.failed.extend(failover.failed);
        }

        report
    }

    /// Retire a failed worker: mark dead, migrate, remove its queue, disable
    /// its machine
    ///
    /// Each step runs even if an earlier one failed. Migration is attempted
    /// exactly once; retrying is the migrator's own business.
    pub async fn fail_over(&self, worker: &str) -> FailoverReport {
        let mut report = FailoverReport::default();
        warn!(worker = %worker, "Worker confirmed failed, starting failover");
        metrics().record_failover();

        let result = self.coordination.mark_dead(worker).await;
        if let Err(e) = &result {
            warn!(worker = %worker, error = %e, "Failed to mark heartbeat dead");
        }
        report.record(FailoverStep::MarkDead, result.is_ok());

        let result = self.migrator.migrate(worker).await;
        if let Err(e) = &result {
            error!(worker = %worker, error = %e, "Migration failed, continuing with queue removal");
        }
        report.record(FailoverStep::Migrate, result.is_ok());

        let result = self.coordination.remove_queue(worker).await;
        if let Err(e) = &result {
            warn!(worker = %worker, error = %e, "Failed to remove work queue");
        }
        report.record(FailoverStep::RemoveQueue, result.is_ok());

        // A worker that stalled while reachable was never disabled
        self.disable(worker, &mut report).await;

        if report.is_clean() {
            info!(worker = %worker, "Failover complete");
        } else {
            warn!(
                worker = %worker,
                failed = ?report.failed,
                "Failover finished with errors"
            );
        }
        report
    }

    async fn enable(&self, worker: &str, report: &mut FailoverReport) {
        let result = self.machines.enable_machine(worker).await;
        match &result {
            Ok(()) => metrics().record_machine_toggle("enabled"),
            Err(e) => warn!(worker = %worker, error = %e, "Failed to enable machine"),
        }
        report.record(FailoverStep::EnableMachine, result.is_ok());
    }

    async fn disable(&self, worker: &str, report: &mut FailoverReport) {
        let result = self.machines.disable_machine(worker).await;
        match &result {
            Ok(()) => metrics().record_machine_toggle("disabled"),
            Err(e) => warn!(worker = %worker, error = %e, "Failed to disable machine"),
        }
        report.record(FailoverStep::DisableMachine, result.is_ok());
    }
}
