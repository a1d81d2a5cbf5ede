//! Suspicion tracking for worker heartbeats
//!
//! Converts the stream of heartbeat snapshots into a per-worker suspicion
//! count. Any forward progress resets the count to zero; a stalled sequence or
//! a cleared alive flag adds one per tick. Once the count exceeds the failure
//! threshold the worker is confirmed failed and retired: its record is
//! ignored until it leaves the registry or comes back alive with a new
//! sequence.
//!
//! The tracker is owned by the check loop and mutated from one task only, so
//! it holds a plain `HashMap`.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::record::{HeartbeatRecord, WorkerId, DEFAULT_STOPPED_SEQUENCE};

/// Per-worker suspicion state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspicionState {
    /// Sequence seen on the previous tick
    pub last_observed_sequence: i64,
    /// Consecutive ticks without progress or liveness
    pub suspicion_count: u32,
    /// Whether the current episode already reported the worker unreachable
    pub unreachable: bool,
}

impl SuspicionState {
    fn new(sequence: i64) -> Self {
        Self {
            last_observed_sequence: sequence,
            suspicion_count: 0,
            unreachable: false,
        }
    }
}

/// Outcome of evaluating one heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not tracked (record absent or worker opted out)
    Ignore,
    /// Tracked, below the failure threshold
    Tracking { suspicion: u32 },
    /// Threshold exceeded; state has been discarded
    ConfirmedFailed,
}

/// Change in registry-reported reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// First not-alive tick of an episode
    Lost,
    /// First alive tick after an unreachable episode
    Regained,
}

/// Everything the failover controller needs to act on for one worker tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    /// State was created on this tick
    pub first_seen: bool,
    pub reachability: Option<Reachability>,
}

impl Decision {
    fn ignore() -> Self {
        Self {
            verdict: Verdict::Ignore,
            first_seen: false,
            reachability: None,
        }
    }

    pub fn is_confirmed_failed(&self) -> bool {
        self.verdict == Verdict::ConfirmedFailed
    }

    pub fn is_ignored(&self) -> bool {
        self.verdict == Verdict::Ignore
    }

    /// Whether acting on this decision changes anything outside the tracker
    pub fn has_effects(&self) -> bool {
        self.first_seen || self.reachability.is_some() || self.is_confirmed_failed()
    }
}

/// Debounced failure detector over heartbeat snapshots
#[derive(Debug)]
pub struct SuspicionTracker {
    states: HashMap<WorkerId, SuspicionState>,
    /// Failed-over workers and the sequence they were retired at
    retired: HashMap<WorkerId, i64>,
    failure_threshold: u32,
    stopped_sequence: i64,
}

impl SuspicionTracker {
    pub fn new(failure_threshold: u32, stopped_sequence: i64) -> Self {
        Self {
            states: HashMap::new(),
            retired: HashMap::new(),
            failure_threshold,
            stopped_sequence,
        }
    }

    /// Create with the default stopped sentinel
    pub fn with_threshold(failure_threshold: u32) -> Self {
        Self::new(failure_threshold, DEFAULT_STOPPED_SEQUENCE)
    }

    /// Evaluate one worker's heartbeat for this tick
    ///
    /// The first observation is evaluated on the tick it is created, so a
    /// worker whose sequence never moves reaches `ConfirmedFailed` on the
    /// `failure_threshold + 1`-th observation.
    pub fn update(&mut self, worker: &str, record: Option<&HeartbeatRecord>) -> Decision {
        let Some(record) = record else {
            self.retired.remove(worker);
            if self.states.remove(worker).is_some() {
                debug!(worker = %worker, "Heartbeat record gone, dropping suspicion state");
            }
            return Decision::ignore();
        };

        if let Some(&retired_at) = self.retired.get(worker) {
            if !record.alive || record.sequence == retired_at {
                return Decision::ignore();
            }
            debug!(
                worker = %worker,
                sequence = record.sequence,
                "Retired worker is heartbeating again"
            );
            self.retired.remove(worker);
        }

        if record.is_stopped(self.stopped_sequence) {
            if self.states.remove(worker).is_some() {
                debug!(worker = %worker, "Worker stopped heartbeating, dropping suspicion state");
            }
            return Decision::ignore();
        }

        let mut first_seen = false;
        let state = self.states.entry(worker.to_string()).or_insert_with(|| {
            first_seen = true;
            SuspicionState::new(record.sequence)
        });

        let mut reachability = None;
        if record.alive {
            if record.sequence == state.last_observed_sequence {
                // Reachable but stalled
                state.suspicion_count += 1;
            } else {
                state.suspicion_count = 0;
            }
            if state.unreachable {
                state.unreachable = false;
                reachability = Some(Reachability::Regained);
            }
        } else {
            state.suspicion_count += 1;
            if !state.unreachable {
                state.unreachable = true;
                reachability = Some(Reachability::Lost);
            }
        }
        state.last_observed_sequence = record.sequence;

        let suspicion = state.suspicion_count;
        let verdict = if suspicion > self.failure_threshold {
            self.states.remove(worker);
            self.retired.insert(worker.to_string(), record.sequence);
            Verdict::ConfirmedFailed
        } else {
            Verdict::Tracking { suspicion }
        };

        Decision {
            verdict,
            first_seen,
            reachability,
        }
    }

    /// Roll back a reachability change the caller failed to act on
    ///
    /// The same change is reported again on the worker's next tick.
    pub fn undo_reachability(&mut self, worker: &str, reachability: Reachability) {
        if let Some(state) = self.states.get_mut(worker) {
            state.unreachable = match reachability {
                Reachability::Lost => false,
                Reachability::Regained => true,
            };
        }
    }

    /// Drop state for workers no longer listed by the registry
    ///
    /// Returns the pruned tracked ids. Retired ids that left are forgotten too.
    pub fn prune(&mut self, members: &HashSet<WorkerId>) -> Vec<WorkerId> {
        self.retired.retain(|id, _| members.contains(id));
        let gone: Vec<WorkerId> = self
            .states
            .keys()
            .filter(|id| !members.contains(*id))
            .cloned()
            .collect();
        for id in &gone {
            self.states.remove(id);
        }
        gone
    }

    /// Forget every tracked and retired worker
    pub fn clear(&mut self) {
        self.states.clear();
        self.retired.clear();
    }

    pub fn is_retired(&self, worker: &str) -> bool {
        self.retired.contains_key(worker)
    }

    pub fn suspicion(&self, worker: &str) -> Option<u32> {
        self.states.get(worker).map(|s| s.suspicion_count)
    }

    pub fn state(&self, worker: &str) -> Option<&SuspicionState> {
        self.states.get(worker)
    }

    pub fn is_tracked(&self, worker: &str) -> bool {
        self.states.contains_key(worker)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }
}
