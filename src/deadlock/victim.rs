use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::core::TxnId;
use crate::lock::LockSnapshot;

/// Chooses which member of a deadlock cycle to abort.
///
/// `cycle` is never empty and is ordered as the detector discovered it.
/// Implementations must be deterministic for identical input.
pub trait VictimPolicy: Debug + Send + Sync {
    fn select(&self, cycle: &[TxnId], snapshot: &LockSnapshot) -> TxnId;
}

/// The first transaction of the cycle as discovered.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstInCycle;

impl VictimPolicy for FirstInCycle {
    fn select(&self, cycle: &[TxnId], _snapshot: &LockSnapshot) -> TxnId {
        cycle[0]
    }
}

/// The most recently started transaction (largest id).
#[derive(Debug, Clone, Copy, Default)]
pub struct Youngest;

impl VictimPolicy for Youngest {
    fn select(&self, cycle: &[TxnId], _snapshot: &LockSnapshot) -> TxnId {
        cycle.iter().copied().max().unwrap_or(cycle[0])
    }
}

/// The oldest transaction (smallest id).
#[derive(Debug, Clone, Copy, Default)]
pub struct Oldest;

impl VictimPolicy for Oldest {
    fn select(&self, cycle: &[TxnId], _snapshot: &LockSnapshot) -> TxnId {
        cycle.iter().copied().min().unwrap_or(cycle[0])
    }
}

/// The cheapest transaction to roll back: fewest granted locks, ties to the smallest id.
#[derive(Debug, Clone, Copy, Default)]
pub struct FewestLocks;

impl VictimPolicy for FewestLocks {
    fn select(&self, cycle: &[TxnId], snapshot: &LockSnapshot) -> TxnId {
        cycle
            .iter()
            .copied()
            .min_by_key(|txn| (snapshot.locks_held(*txn), *txn))
            .unwrap_or(cycle[0])
    }
}

/// Configuration-friendly name for the built-in policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VictimPolicyKind {
    #[default]
    FirstInCycle,
    Youngest,
    Oldest,
    FewestLocks,
}

impl VictimPolicyKind {
    pub fn build(self) -> Box<dyn VictimPolicy> {
        match self {
            VictimPolicyKind::FirstInCycle => Box::new(FirstInCycle),
            VictimPolicyKind::Youngest => Box::new(Youngest),
            VictimPolicyKind::Oldest => Box::new(Oldest),
            VictimPolicyKind::FewestLocks => Box::new(FewestLocks),
        }
    }
}

/// Default victim choice: the first transaction of `cycle`.
pub fn select_victim(cycle: &[TxnId]) -> Option<TxnId> {
    cycle.first().copied()
}
