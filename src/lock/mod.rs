//! Two-phase lock manager.
//!
//! `table` holds the pure bookkeeping (grants, FIFO wait queues, transaction
//! phases); `manager` wraps it in a mutex and condition variable so callers
//! on different threads can block on each other.

mod manager;
mod table;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{ResourceId, TxnId};

pub use manager::LockManager;

/// Grantable lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }

    /// True when holding `self` already satisfies a request for `wanted`.
    pub fn covers(self, wanted: LockMode) -> bool {
        self == LockMode::Exclusive || wanted == LockMode::Shared
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => f.write_str("SHARED"),
            LockMode::Exclusive => f.write_str("EXCLUSIVE"),
        }
    }
}

/// 2PL transaction phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Committed | Phase::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Growing => "growing",
            Phase::Shrinking => "shrinking",
            Phase::Committed => "committed",
            Phase::Aborted => "aborted",
        }
    }
}

/// Result of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LockOutcome {
    Granted,
    /// The request was queued behind `holder`; it is granted once the holder lets go.
    Blocked { holder: TxnId },
    /// No-wait request refused because of `holder`. Nothing was recorded.
    Conflict { holder: TxnId },
}

/// How one transaction relates to one resource in the lock table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Held(LockMode),
    /// Blocked request for the given mode. Not a grant.
    Waiting(LockMode),
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Held(mode) => write!(f, "{mode}"),
            LockState::Waiting(_) => f.write_str("WAITING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockEntry {
    pub txn: TxnId,
    pub resource: ResourceId,
    pub state: LockState,
}

impl LockEntry {
    pub fn shared(txn: TxnId, resource: ResourceId) -> Self {
        Self {
            txn,
            resource,
            state: LockState::Held(LockMode::Shared),
        }
    }

    pub fn exclusive(txn: TxnId, resource: ResourceId) -> Self {
        Self {
            txn,
            resource,
            state: LockState::Held(LockMode::Exclusive),
        }
    }

    /// A waiting entry whose requested mode is unknown counts as an exclusive request.
    pub fn waiting(txn: TxnId, resource: ResourceId) -> Self {
        Self::waiting_for(txn, resource, LockMode::Exclusive)
    }

    pub fn waiting_for(txn: TxnId, resource: ResourceId, mode: LockMode) -> Self {
        Self {
            txn,
            resource,
            state: LockState::Waiting(mode),
        }
    }
}

/// Consistent copy of the lock table.
///
/// Entries are grouped by resource id; within a resource, grants come first
/// in grant order followed by waiters in queue order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    pub entries: Vec<LockEntry>,
    /// Transactions that are neither committed nor aborted.
    pub live: BTreeSet<TxnId>,
}

impl LockSnapshot {
    /// Build a snapshot by hand; every transaction mentioned counts as live.
    pub fn from_entries(entries: Vec<LockEntry>) -> Self {
        let live = entries.iter().map(|entry| entry.txn).collect();
        Self { entries, live }
    }

    pub fn holders(&self, resource: ResourceId) -> impl Iterator<Item = (TxnId, LockMode)> + '_ {
        self.entries.iter().filter_map(move |entry| match entry.state {
            LockState::Held(mode) if entry.resource == resource => Some((entry.txn, mode)),
            _ => None,
        })
    }

    pub fn exclusive_holders(&self, resource: ResourceId) -> usize {
        self.holders(resource)
            .filter(|(_, mode)| *mode == LockMode::Exclusive)
            .count()
    }

    pub fn locks_held(&self, txn: TxnId) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.txn == txn && matches!(entry.state, LockState::Held(_)))
            .count()
    }

    pub fn resources(&self) -> BTreeSet<ResourceId> {
        self.entries.iter().map(|entry| entry.resource).collect()
    }
}

#[cfg(test)]
mod tests;
