//! In-memory collaborators
//!
//! Used by the standalone binary and by tests. Every call is appended to a
//! [`CallLog`] that can be shared between collaborators, so the relative
//! order of side effects across them can be inspected.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::health::{HeartbeatRecord, WorkerId, DEFAULT_STOPPED_SEQUENCE};

use super::{
    CoordinationClient, LeaderElection, MachineRegistry, MigrationError, Migrator, RegistryError,
};

/// One call made against an in-memory collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegistryCall {
    ListWorkers,
    ReadHeartbeat(WorkerId),
    MarkDead(WorkerId),
    RemoveQueue(WorkerId),
    EnableMachine(WorkerId),
    DisableMachine(WorkerId),
    Migrate(WorkerId),
}

impl RegistryCall {
    /// Whether the call changes registry or cluster state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::ListWorkers | Self::ReadHeartbeat(_))
    }
}

/// Ordered, shareable record of calls
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<RegistryCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: RegistryCall) {
        self.calls.lock().push(call);
    }

    /// Snapshot of all calls so far
    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().clone()
    }

    /// Only the state-changing calls
    pub fn mutations(&self) -> Vec<RegistryCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Number of recorded calls equal to `call`
    pub fn count(&self, call: &RegistryCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

// ============================================================================
// Coordination registry
// ============================================================================

/// Heartbeat records and work queues held in process memory
#[derive(Default)]
pub struct MemoryCoordination {
    heartbeats: DashMap<WorkerId, HeartbeatRecord>,
    /// Members listed by the registry, possibly without a heartbeat record
    members: DashMap<WorkerId, ()>,
    queues: DashMap<WorkerId, ()>,
    unreadable: DashMap<WorkerId, ()>,
    unavailable: AtomicBool,
    log: CallLog,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that records into a shared log
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Register a live worker with sequence 0 and an empty work queue
    pub fn register(&self, worker: &str) {
        self.publish(HeartbeatRecord::alive(worker, 0));
        self.queues.insert(worker.to_string(), ());
    }

    /// Publish (or overwrite) a worker's heartbeat record
    pub fn publish(&self, record: HeartbeatRecord) {
        self.members.insert(record.worker_id.clone(), ());
        self.heartbeats.insert(record.worker_id.clone(), record);
    }

    /// Advance a live worker's sequence, as a successful heartbeat would
    pub fn beat(&self, worker: &str) {
        if let Some(mut record) = self.heartbeats.get_mut(worker) {
            record.alive = true;
            record.sequence += 1;
        }
    }

    /// Publish the stopped sentinel, as a gracefully shutting down worker would
    pub fn stop(&self, worker: &str) {
        if let Some(mut record) = self.heartbeats.get_mut(worker) {
            record.alive = true;
            record.sequence = DEFAULT_STOPPED_SEQUENCE;
        }
    }

    /// Flip the alive flag, as a session loss would
    pub fn set_alive(&self, worker: &str, alive: bool) {
        if let Some(mut record) = self.heartbeats.get_mut(worker) {
            record.alive = alive;
        }
    }

    /// Drop the heartbeat record but keep the member listed
    pub fn drop_record(&self, worker: &str) {
        self.heartbeats.remove(worker);
    }

    /// Remove the worker from the registry entirely
    pub fn deregister(&self, worker: &str) {
        self.members.remove(worker);
        self.heartbeats.remove(worker);
        self.queues.remove(worker);
    }

    /// Make `read_heartbeat` fail for one worker
    pub fn set_unreadable(&self, worker: &str, unreadable: bool) {
        if unreadable {
            self.unreadable.insert(worker.to_string(), ());
        } else {
            self.unreadable.remove(worker);
        }
    }

    /// Make every call fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn heartbeat(&self, worker: &str) -> Option<HeartbeatRecord> {
        self.heartbeats.get(worker).map(|r| r.value().clone())
    }

    pub fn has_queue(&self, worker: &str) -> bool {
        self.queues.contains_key(worker)
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    fn check_available(&self) -> Result<(), RegistryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("coordination registry offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordination {
    async fn list_workers(&self) -> Result<Vec<WorkerId>, RegistryError> {
        self.log.push(RegistryCall::ListWorkers);
        self.check_available()?;
        let mut workers: Vec<WorkerId> = self.members.iter().map(|e| e.key().clone()).collect();
        workers.sort();
        Ok(workers)
    }

    async fn read_heartbeat(&self, worker: &str) -> Result<Option<HeartbeatRecord>, RegistryError> {
        self.log.push(RegistryCall::ReadHeartbeat(worker.to_string()));
        self.check_available()?;
        if self.unreadable.contains_key(worker) {
            return Err(RegistryError::Unavailable(format!(
                "heartbeat node for {} unreadable",
                worker
            )));
        }
        Ok(self.heartbeat(worker))
    }

    async fn mark_dead(&self, worker: &str) -> Result<(), RegistryError> {
        self.log.push(RegistryCall::MarkDead(worker.to_string()));
        self.check_available()?;
        if let Some(mut record) = self.heartbeats.get_mut(worker) {
            record.alive = false;
        }
        Ok(())
    }

    async fn remove_queue(&self, worker: &str) -> Result<(), RegistryError> {
        self.log.push(RegistryCall::RemoveQueue(worker.to_string()));
        self.check_available()?;
        self.queues.remove(worker);
        Ok(())
    }
}

// ============================================================================
// Leadership
// ============================================================================

/// Leadership flag set from outside (config, election callback, tests)
#[derive(Debug, Default)]
pub struct StaticLeader {
    leader: AtomicBool,
}

impl StaticLeader {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        let was = self.leader.swap(leader, Ordering::SeqCst);
        if was != leader {
            info!(leader = leader, "Leadership changed");
        }
    }
}

impl LeaderElection for StaticLeader {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Machine registry
// ============================================================================

/// Scheduling eligibility of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Enabled,
    Disabled,
}

#[derive(Default)]
pub struct MemoryMachineRegistry {
    machines: DashMap<WorkerId, MachineState>,
    failing: AtomicBool,
    log: CallLog,
}

impl MemoryMachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn state(&self, worker: &str) -> Option<MachineState> {
        self.machines.get(worker).map(|s| *s)
    }

    /// Workers currently eligible for scheduled work
    pub fn enabled(&self) -> HashSet<WorkerId> {
        self.machines
            .iter()
            .filter(|e| *e.value() == MachineState::Enabled)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Make every toggle fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    fn toggle(&self, worker: &str, state: MachineState) -> Result<(), RegistryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RegistryError::Rejected {
                worker: worker.to_string(),
                reason: "machine table locked".into(),
            });
        }
        self.machines.insert(worker.to_string(), state);
        Ok(())
    }
}

#[async_trait]
impl MachineRegistry for MemoryMachineRegistry {
    async fn enable_machine(&self, worker: &str) -> Result<(), RegistryError> {
        self.log.push(RegistryCall::EnableMachine(worker.to_string()));
        self.toggle(worker, MachineState::Enabled)
    }

    async fn disable_machine(&self, worker: &str) -> Result<(), RegistryError> {
        self.log.push(RegistryCall::DisableMachine(worker.to_string()));
        self.toggle(worker, MachineState::Disabled)
    }
}

// ============================================================================
// Migration
// ============================================================================

/// Records migrations instead of moving anything
#[derive(Default)]
pub struct MemoryMigrator {
    failing: AtomicBool,
    log: CallLog,
}

impl MemoryMigrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }
}

#[async_trait]
impl Migrator for MemoryMigrator {
    async fn migrate(&self, worker: &str) -> Result<(), MigrationError> {
        self.log.push(RegistryCall::Migrate(worker.to_string()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(MigrationError::Failed {
                worker: worker.to_string(),
                reason: "no surviving worker accepted the tasks".into(),
            });
        }
        debug!(worker = %worker, "Migration recorded");
        Ok(())
    }
}
