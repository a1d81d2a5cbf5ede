//! Leader-gated heartbeat check loop
//!
//! Runs on a fixed delay: the next tick is scheduled only after the current
//! one has finished, so ticks never overlap and the tracker needs no locking.
//! Followers return immediately from every tick; leadership is re-read each
//! time so a handoff is picked up within one interval.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::FailoverConfig;
use crate::metrics::metrics;
use crate::registry::{CoordinationClient, LeaderElection, RegistryError};

use super::failover::{FailoverController, FailoverStep};
use super::record::WorkerId;
use super::tracker::{Reachability, SuspicionTracker, Verdict};

/// Error that aborts a whole tick
#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("Failed to list workers: {0}")]
    ListWorkers(#[source] RegistryError),
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Whether this process was leader at the top of the tick
    pub leader: bool,
    /// Workers whose heartbeat was read and evaluated
    pub checked: usize,
    /// Workers skipped because their heartbeat could not be read
    pub skipped: Vec<WorkerId>,
    /// Workers dropped because the registry no longer lists them
    pub pruned: Vec<WorkerId>,
    /// Workers confirmed failed on this tick
    pub failed_over: Vec<WorkerId>,
    /// Workers holding suspicion state after the tick
    pub tracked: usize,
}

/// Periodic driver for failure detection and failover
pub struct HealthCheckLoop {
    coordination: Arc<dyn CoordinationClient>,
    leader: Arc<dyn LeaderElection>,
    controller: FailoverController,
    tracker: SuspicionTracker,
    config: FailoverConfig,
    /// Ticks run as leader, for progress logging
    leader_ticks: u64,
    was_leader: bool,
}

impl HealthCheckLoop {
    pub fn new(
        coordination: Arc<dyn CoordinationClient>,
        leader: Arc<dyn LeaderElection>,
        controller: FailoverController,
        config: FailoverConfig,
    ) -> Self {
        let tracker = SuspicionTracker::new(
            config.failure_threshold_ticks,
            config.stopped_sequence_sentinel,
        );
        Self {
            coordination,
            leader,
            controller,
            tracker,
            config,
            leader_ticks: 0,
            was_leader: false,
        }
    }

    pub fn tracker(&self) -> &SuspicionTracker {
        &self.tracker
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Run one tick, propagating errors
    pub async fn tick(&mut self) -> Result<TickSummary, HealthError> {
        if !self.leader.is_leader() {
            if self.was_leader {
                info!(
                    tracked = self.tracker.len(),
                    "Leadership lost, dropping suspicion state"
                );
                self.was_leader = false;
                self.tracker.clear();
                metrics().set_tracked_workers(0);
            }
            return Ok(TickSummary::default());
        }
        if !self.was_leader {
            info!("Leadership acquired, starting heartbeat checks");
            self.was_leader = true;
        }
        self.leader_ticks += 1;

        let mut summary = TickSummary {
            leader: true,
            ..TickSummary::default()
        };

        let workers = self
            .coordination
            .list_workers()
            .await
            .map_err(HealthError::ListWorkers)?;

        let members: HashSet<WorkerId> = workers.iter().cloned().collect();
        summary.pruned = self.tracker.prune(&members);
        for worker in &summary.pruned {
            info!(worker = %worker, "Worker left registry, dropping suspicion state");
        }

        for worker in &workers {
            let record = match self.coordination.read_heartbeat(worker).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(worker = %worker, error = %e, "Failed to read heartbeat, skipping");
                    summary.skipped.push(worker.clone());
                    continue;
                }
            };

            let decision = self.tracker.update(worker, record.as_ref());
            summary.checked += 1;

            match decision.verdict {
                Verdict::Tracking { suspicion } if suspicion > 0 => {
                    debug!(worker = %worker, suspicion = suspicion, "Worker suspicious");
                }
                Verdict::ConfirmedFailed => {
                    summary.failed_over.push(worker.clone());
                }
                _ => {}
            }

            if decision.has_effects() {
                let report = self.controller.apply(worker, &decision).await;
                if let Some(reachability) = decision.reachability {
                    let step = match reachability {
                        Reachability::Lost => FailoverStep::DisableMachine,
                        Reachability::Regained => FailoverStep::EnableMachine,
                    };
                    // Retry the toggle on the worker's next tick
                    if report.failed.contains(&step) && !decision.is_confirmed_failed() {
                        self.tracker.undo_reachability(worker, reachability);
                    }
                }
            }
        }

        summary.tracked = self.tracker.len();
        metrics().set_tracked_workers(summary.tracked);

        let every = self.config.progress_log_every_ticks;
        if every > 0 && self.leader_ticks % every == 0 {
            info!(
                ticks = self.leader_ticks,
                workers = workers.len(),
                tracked = summary.tracked,
                "Heartbeat check running"
            );
        }

        Ok(summary)
    }

    /// Run one tick, logging and swallowing errors and panics
    pub async fn run_once(&mut self) -> Option<TickSummary> {
        match AssertUnwindSafe(self.tick()).catch_unwind().await {
            Ok(Ok(summary)) => {
                metrics().record_tick(if summary.leader { "checked" } else { "follower" });
                Some(summary)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Heartbeat check tick failed");
                metrics().record_tick("error");
                None
            }
            Err(panic) => {
                error!(panic = %panic_message(&*panic), "Heartbeat check tick panicked");
                metrics().record_tick("panic");
                None
            }
        }
    }

    /// Spawn the loop; the first tick runs immediately
    pub fn start(mut self, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.check_interval();
        info!(
            interval_secs = self.config.check_interval_seconds,
            threshold = self.config.failure_threshold_ticks,
            "Heartbeat checker started"
        );

        tokio::spawn(async move {
            while !shutdown.is_cancelled() {
                self.run_once().await;

                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("Heartbeat checker shutting down");
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
