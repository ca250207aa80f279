//! Replay of hand-written lock sequences, as used by the deadlock walkthrough.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::errors::Result;
use crate::core::TxnId;
use crate::lock::{LockManager, LockMode, LockOutcome, LockSnapshot};
use crate::registry::{ResourceRegistry, ResourceSpec};

use super::detector::DeadlockDetector;
use super::graph::WaitForEdge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptLock {
    Shared,
    Exclusive,
    /// An exclusive request that is expected to block.
    Waiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStep {
    pub txn: TxnId,
    pub resource: String,
    pub lock: ScriptLock,
}

impl LockStep {
    pub fn new(txn: TxnId, resource: impl Into<String>, lock: ScriptLock) -> Self {
        Self {
            txn,
            resource: resource.into(),
            lock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockScript {
    pub resources: Vec<ResourceSpec>,
    pub steps: Vec<LockStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptStep {
    pub step: usize,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn: Option<TxnId>,
    pub deadlock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub victim: Option<TxnId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockScriptReport {
    pub transactions: Vec<TxnId>,
    pub steps: Vec<ScriptStep>,
    /// Lock table after the script ran, before any victim was aborted.
    pub locks: LockSnapshot,
    pub wait_for: Vec<WaitForEdge>,
    pub cycles: Vec<Vec<TxnId>>,
    pub victims: Vec<TxnId>,
    pub locks_after: LockSnapshot,
}

struct CyclePath<'a>(&'a [TxnId]);

impl fmt::Display for CyclePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for txn in self.0 {
            write!(f, "T{txn} → ")?;
        }
        match self.0.first() {
            Some(first) => write!(f, "T{first}"),
            None => Ok(()),
        }
    }
}

/// Apply `script` to a fresh lock manager, then detect and break deadlocks.
pub fn run_lock_script(script: &LockScript, detector: &DeadlockDetector) -> Result<LockScriptReport> {
    let registry = ResourceRegistry::from_specs(&script.resources)?;
    let lock_manager = LockManager::new();
    let mut steps = Vec::new();
    let mut transactions = BTreeSet::new();

    for op in &script.steps {
        let resource = registry.resolve(&op.resource)?;
        transactions.insert(op.txn);
        let mode = match op.lock {
            ScriptLock::Shared => LockMode::Shared,
            ScriptLock::Exclusive | ScriptLock::Waiting => LockMode::Exclusive,
        };
        let action = match lock_manager.acquire(op.txn, resource, mode)? {
            LockOutcome::Granted => format!(
                "Transaction T{} acquires {} lock on {}",
                op.txn,
                mode.to_string().to_lowercase(),
                op.resource
            ),
            LockOutcome::Blocked { holder } | LockOutcome::Conflict { holder } => format!(
                "Transaction T{} waits for lock on {} (held by T{holder})",
                op.txn, op.resource
            ),
        };
        steps.push(ScriptStep {
            step: steps.len() + 1,
            action,
            txn: Some(op.txn),
            deadlock: false,
            victim: None,
        });
    }

    let locks = lock_manager.snapshot();
    let report = detector.detect(&locks);
    for cycle in &report.cycles {
        steps.push(ScriptStep {
            step: steps.len() + 1,
            action: format!("Deadlock detected: {}", CyclePath(cycle)),
            txn: None,
            deadlock: true,
            victim: None,
        });
    }
    if report.cycles.is_empty() {
        steps.push(ScriptStep {
            step: steps.len() + 1,
            action: "No deadlocks detected in the wait-for graph.".to_string(),
            txn: None,
            deadlock: false,
            victim: None,
        });
    }

    let resolutions = detector.resolve(&lock_manager);
    for resolution in &resolutions {
        steps.push(ScriptStep {
            step: steps.len() + 1,
            action: format!(
                "Deadlock resolved by aborting Transaction T{} (victim selection)",
                resolution.victim
            ),
            txn: Some(resolution.victim),
            deadlock: false,
            victim: Some(resolution.victim),
        });
    }
    info!(
        steps = script.steps.len(),
        cycles = report.cycles.len(),
        victims = resolutions.len(),
        "lock script replayed"
    );

    Ok(LockScriptReport {
        transactions: transactions.into_iter().collect(),
        steps,
        locks,
        wait_for: report.edges,
        cycles: report.cycles,
        victims: resolutions.into_iter().map(|r| r.victim).collect(),
        locks_after: lock_manager.snapshot(),
    })
}
