use serde::Serialize;
use tracing::{debug, warn};

use crate::core::TxnId;
use crate::lock::{LockManager, LockSnapshot};

use super::graph::{find_cycles, first_cycle, WaitForEdge, WaitForGraph};
use super::victim::{FirstInCycle, VictimPolicy, VictimPolicyKind};

/// Outcome of one detection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeadlockReport {
    pub edges: Vec<WaitForEdge>,
    pub cycles: Vec<Vec<TxnId>>,
    /// Chosen from the first cycle; `None` when there is no deadlock.
    pub victim: Option<TxnId>,
}

impl DeadlockReport {
    pub fn is_deadlocked(&self) -> bool {
        !self.cycles.is_empty()
    }
}

/// One broken cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub cycle: Vec<TxnId>,
    pub victim: TxnId,
}

#[derive(Debug)]
pub struct DeadlockDetector {
    policy: Box<dyn VictimPolicy>,
}

impl Default for DeadlockDetector {
    fn default() -> Self {
        Self::new(Box::new(FirstInCycle))
    }
}

impl DeadlockDetector {
    pub fn new(policy: Box<dyn VictimPolicy>) -> Self {
        Self { policy }
    }

    pub fn with_policy(kind: VictimPolicyKind) -> Self {
        Self::new(kind.build())
    }

    /// Single pass over `snapshot`. Pure: the same snapshot always yields the same report.
    pub fn detect(&self, snapshot: &LockSnapshot) -> DeadlockReport {
        let graph = WaitForGraph::build(snapshot);
        let cycles = find_cycles(&graph);
        let victim = cycles
            .first()
            .map(|cycle| self.policy.select(cycle, snapshot));
        DeadlockReport {
            edges: graph.edges().to_vec(),
            cycles,
            victim,
        }
    }

    /// The cycle and victim `detect` would report first, without listing every cycle.
    pub fn first_deadlock(&self, snapshot: &LockSnapshot) -> Option<Resolution> {
        let cycle = first_cycle(&WaitForGraph::build(snapshot))?;
        let victim = self.policy.select(&cycle, snapshot);
        Some(Resolution { cycle, victim })
    }

    /// Abort victims until the lock manager's wait-for graph is acyclic.
    ///
    /// Each round detects and aborts under the lock table mutex. Breaking one
    /// cycle can dissolve others, so detection is re-run after every abort.
    pub fn resolve(&self, lock_manager: &LockManager) -> Vec<Resolution> {
        self.resolve_with(lock_manager, |_| {})
    }

    /// Like `resolve`, calling `on_resolve` for every broken cycle while the
    /// lock table is still held, before the victim can see its abort.
    pub fn resolve_with<F>(&self, lock_manager: &LockManager, mut on_resolve: F) -> Vec<Resolution>
    where
        F: FnMut(&Resolution),
    {
        let mut resolutions = Vec::new();
        while let Some((victim, cycle)) = lock_manager.abort_selected(|snapshot| {
            let resolution = self.first_deadlock(snapshot)?;
            on_resolve(&resolution);
            Some((resolution.victim, resolution.cycle))
        }) {
            warn!(victim, ?cycle, "deadlock detected, victim aborted");
            resolutions.push(Resolution { cycle, victim });
        }
        if resolutions.is_empty() {
            debug!("no deadlock found");
        }
        resolutions
    }
}

/// Detect deadlocks in a lock snapshot with the default victim policy.
pub fn detect_deadlocks(snapshot: &LockSnapshot) -> DeadlockReport {
    DeadlockDetector::default().detect(snapshot)
}
