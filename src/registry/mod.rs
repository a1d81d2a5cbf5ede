//! Capabilities the heartbeat checker consumes
//!
//! The coordination registry, leadership flag, machine registry and migration
//! action all live outside this crate. They are reached through the traits
//! below so the check loop can be driven against any backend, including the
//! in-memory one in [`memory`].

mod memory;

use async_trait::async_trait;

use crate::health::{HeartbeatRecord, WorkerId};

pub use memory::{
    CallLog, MachineState, MemoryCoordination, MemoryMachineRegistry, MemoryMigrator,
    RegistryCall, StaticLeader,
};

/// Error from the coordination registry or machine registry
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
    #[error("Registry rejected operation on {worker}: {reason}")]
    Rejected { worker: WorkerId, reason: String },
}

/// Error from the migration collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum MigrationError {
    #[error("Migration of {worker} failed: {reason}")]
    Failed { worker: WorkerId, reason: String },
}

/// Shared store of per-worker heartbeat records and work queues
///
/// Listing is best-effort and may lag behind the workers' own view.
/// `mark_dead` and `remove_queue` must be idempotent.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Current registry membership
    async fn list_workers(&self) -> Result<Vec<WorkerId>, RegistryError>;

    /// Latest published heartbeat, `None` if the entry is gone
    async fn read_heartbeat(&self, worker: &str) -> Result<Option<HeartbeatRecord>, RegistryError>;

    /// Set the worker's alive flag to false
    async fn mark_dead(&self, worker: &str) -> Result<(), RegistryError>;

    /// Delete the worker's pending-work entry
    async fn remove_queue(&self, worker: &str) -> Result<(), RegistryError>;
}

/// Answers "is this process currently the leader?"
///
/// Read on every tick; implementations must not cache a stale answer.
pub trait LeaderElection: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Persistent registry of machines eligible for scheduled work
#[async_trait]
pub trait MachineRegistry: Send + Sync {
    async fn enable_machine(&self, worker: &str) -> Result<(), RegistryError>;
    async fn disable_machine(&self, worker: &str) -> Result<(), RegistryError>;
}

/// Moves a failed worker's tasks and data ownership to the rest of the cluster
#[async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(&self, worker: &str) -> Result<(), MigrationError>;
}
