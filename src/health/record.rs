//! Heartbeat records published by workers

/// Stable identifier of a worker (broker) node
pub type WorkerId = String;

/// Sequence a live worker publishes when it has stopped heartbeating on purpose
pub const DEFAULT_STOPPED_SEQUENCE: i64 = -1;

/// Snapshot of one worker's published liveness
///
/// Read-only to the checker apart from `mark_dead`, which only ever clears
/// `alive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub worker_id: WorkerId,
    /// Cleared by the worker, or by the registry on session loss
    pub alive: bool,
    /// Bumped on every successful heartbeat
    pub sequence: i64,
}

impl HeartbeatRecord {
    pub fn new(worker_id: impl Into<WorkerId>, alive: bool, sequence: i64) -> Self {
        Self {
            worker_id: worker_id.into(),
            alive,
            sequence,
        }
    }

    pub fn alive(worker_id: impl Into<WorkerId>, sequence: i64) -> Self {
        Self::new(worker_id, true, sequence)
    }

    pub fn dead(worker_id: impl Into<WorkerId>, sequence: i64) -> Self {
        Self::new(worker_id, false, sequence)
    }

    /// Whether the worker has opted out of health checking
    ///
    /// Only a live record carrying the sentinel counts; a dead record with the
    /// sentinel is still evaluated.
    pub fn is_stopped(&self, sentinel: i64) -> bool {
        self.alive && self.sequence == sentinel
    }
}
