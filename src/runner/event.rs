use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::core::{Timestamp, TxnId, Value};
use crate::lock::LockMode;

use super::workload::Protocol;

/// One entry of a run's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Position in the timeline, from 0.
    pub seq: usize,
    pub txn: TxnId,
    /// Microseconds since the run started.
    pub at_us: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Started {
        protocol: Protocol,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_ts: Option<Timestamp>,
    },
    LockAcquired {
        resource: String,
        mode: LockMode,
    },
    LockUpgraded {
        resource: String,
    },
    LockWaiting {
        resource: String,
        mode: LockMode,
        holder: TxnId,
    },
    LockConflict {
        resource: String,
        mode: LockMode,
        holder: TxnId,
    },
    LockReleased {
        resource: String,
    },
    Read {
        resource: String,
        value: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        version_ts: Option<Timestamp>,
    },
    Write {
        resource: String,
        before: Value,
        after: Value,
        delta: Value,
    },
    WriteConflict {
        resource: String,
        committed_by: TxnId,
    },
    ProtocolViolation {
        resource: String,
    },
    DeadlockDetected {
        cycle: Vec<TxnId>,
        victim: TxnId,
    },
    Committed {
        #[serde(skip_serializing_if = "Option::is_none")]
        commit_ts: Option<Timestamp>,
    },
    Aborted {
        reason: String,
    },
}

impl Event {
    /// Conflict markers: refused or queued lock requests and write conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.kind,
            EventKind::LockConflict { .. }
                | EventKind::LockWaiting { .. }
                | EventKind::WriteConflict { .. }
        )
    }

    pub fn is_abort(&self) -> bool {
        matches!(self.kind, EventKind::Aborted { .. })
    }

    pub fn is_commit(&self) -> bool {
        matches!(self.kind, EventKind::Committed { .. })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let txn = self.txn;
        match &self.kind {
            EventKind::Started { protocol, .. } => {
                write!(f, "Transaction T{txn} started ({protocol})")
            }
            EventKind::LockAcquired { resource, mode } => {
                write!(f, "T{txn} - Acquired {mode} lock on {resource}")
            }
            EventKind::LockUpgraded { resource } => {
                write!(f, "T{txn} - Upgraded SHARED lock to EXCLUSIVE lock on {resource}")
            }
            EventKind::LockWaiting {
                resource,
                mode,
                holder,
            } => write!(
                f,
                "T{txn} - Waiting for {mode} lock on {resource} (held by T{holder})"
            ),
            EventKind::LockConflict {
                resource,
                mode,
                holder,
            } => write!(
                f,
                "T{txn} - Lock conflict on {resource}: T{holder} blocks {mode} request"
            ),
            EventKind::LockReleased { resource } => {
                write!(f, "T{txn} - Released lock on {resource}")
            }
            EventKind::Read {
                resource, value, ..
            } => write!(f, "T{txn} - Read {resource} = {value}"),
            EventKind::Write {
                resource,
                after,
                delta,
                ..
            } => write!(f, "T{txn} - Write {resource} = {after} (changed by {delta})"),
            EventKind::WriteConflict {
                resource,
                committed_by,
            } => write!(
                f,
                "T{txn} - Write conflict on {resource}: T{committed_by} committed a newer version"
            ),
            EventKind::ProtocolViolation { resource } => write!(
                f,
                "T{txn} - Protocol violation: lock on {resource} requested after release"
            ),
            EventKind::DeadlockDetected { cycle, victim } => {
                f.write_str("Deadlock detected: ")?;
                for member in cycle {
                    write!(f, "T{member} → ")?;
                }
                if let Some(first) = cycle.first() {
                    write!(f, "T{first}")?;
                }
                write!(f, ", aborting T{victim}")
            }
            EventKind::Committed { .. } => write!(f, "Transaction T{txn} committed"),
            EventKind::Aborted { reason } => write!(f, "Transaction T{txn} aborted: {reason}"),
        }
    }
}

/// Append-only event log for one run.
///
/// Clones share the same log, so worker threads and the deadlock watchdog
/// all append to one sequence in the threaded schedule.
#[derive(Debug, Clone)]
pub(crate) struct Timeline {
    started: Instant,
    events: Arc<Mutex<Vec<Event>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, txn: TxnId, kind: EventKind) {
        let mut events = self.events.lock();
        let event = Event {
            seq: events.len(),
            txn,
            at_us: self.started.elapsed().as_micros() as u64,
            kind,
        };
        debug!(seq = event.seq, txn, "{event}");
        events.push(event);
    }

    pub fn into_events(self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }
}
