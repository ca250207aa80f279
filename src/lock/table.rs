use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::core::errors::{Result, TxnLabError};
use crate::core::{ResourceId, TxnId};

use super::{LockEntry, LockMode, LockSnapshot, LockState, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Grant {
    txn: TxnId,
    mode: LockMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Waiter {
    txn: TxnId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct ResourceLocks {
    granted: Vec<Grant>,
    waiting: VecDeque<Waiter>,
}

impl ResourceLocks {
    fn held_mode(&self, txn: TxnId) -> Option<LockMode> {
        self.granted
            .iter()
            .find(|grant| grant.txn == txn)
            .map(|grant| grant.mode)
    }

    /// First other holder whose grant is incompatible with `mode`.
    fn blocker(&self, txn: TxnId, mode: LockMode) -> Option<TxnId> {
        self.granted
            .iter()
            .find(|grant| grant.txn != txn && !grant.mode.compatible_with(mode))
            .map(|grant| grant.txn)
    }

    fn is_waiting(&self, txn: TxnId) -> bool {
        self.waiting.iter().any(|waiter| waiter.txn == txn)
    }

    fn is_idle(&self) -> bool {
        self.granted.is_empty() && self.waiting.is_empty()
    }
}

#[derive(Debug)]
struct TxnLocks {
    phase: Phase,
    /// Held resources in acquisition order.
    held: Vec<ResourceId>,
    /// Set when the transaction was aborted to break this wait-for cycle.
    broken_cycle: Option<Vec<TxnId>>,
}

impl TxnLocks {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            held: Vec::new(),
            broken_cycle: None,
        }
    }
}

/// What a request did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Request {
    Granted { upgraded: bool },
    AlreadyHeld,
    Blocked { holder: TxnId },
}

/// A waiting request that was turned into a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Promotion {
    pub(super) txn: TxnId,
    pub(super) resource: ResourceId,
    pub(super) mode: LockMode,
}

/// Grants, wait queues and 2PL phases. Not synchronized.
///
/// Invariant: after every mutation each remaining waiter conflicts with at
/// least one holder of its resource, so every waiting entry has an edge in
/// the wait-for graph.
#[derive(Debug, Default)]
pub(super) struct LockTable {
    resources: BTreeMap<ResourceId, ResourceLocks>,
    txns: BTreeMap<TxnId, TxnLocks>,
}

impl LockTable {
    pub(super) fn begin(&mut self, txn: TxnId) -> Result<()> {
        if self.txns.contains_key(&txn) {
            return Err(TxnLabError::DuplicateTransaction(txn));
        }
        self.txns.insert(txn, TxnLocks::new(Phase::Growing));
        Ok(())
    }

    pub(super) fn phase(&self, txn: TxnId) -> Option<Phase> {
        self.txns.get(&txn).map(|state| state.phase)
    }

    /// Check that `txn` may still acquire. Unknown transactions start growing.
    pub(super) fn admit(&mut self, txn: TxnId, resource: ResourceId) -> Result<()> {
        let state = self
            .txns
            .entry(txn)
            .or_insert_with(|| TxnLocks::new(Phase::Growing));
        match state.phase {
            Phase::Growing => Ok(()),
            Phase::Shrinking => Err(TxnLabError::ProtocolViolation { txn, resource }),
            Phase::Committed => Err(TxnLabError::TransactionClosed {
                txn,
                state: Phase::Committed.as_str(),
            }),
            Phase::Aborted => Err(TxnLabError::Aborted(txn)),
        }
    }

    /// Grant `mode` on `resource` if every other holder is compatible.
    ///
    /// When blocked and `enqueue` is set, a waiting entry is recorded once;
    /// upgrades queue ahead of fresh requests.
    pub(super) fn request(
        &mut self,
        txn: TxnId,
        resource: ResourceId,
        mode: LockMode,
        enqueue: bool,
    ) -> Request {
        let locks = self.resources.entry(resource).or_default();
        let held = locks.held_mode(txn);
        if held.is_some_and(|held| held.covers(mode)) {
            return Request::AlreadyHeld;
        }

        if let Some(holder) = locks.blocker(txn, mode) {
            if enqueue && !locks.is_waiting(txn) {
                let waiter = Waiter { txn, mode };
                if held.is_some() {
                    locks.waiting.push_front(waiter);
                } else {
                    locks.waiting.push_back(waiter);
                }
            } else if !enqueue && locks.is_idle() {
                self.resources.remove(&resource);
            }
            return Request::Blocked { holder };
        }

        locks.waiting.retain(|waiter| waiter.txn != txn);
        match locks.granted.iter_mut().find(|grant| grant.txn == txn) {
            Some(grant) => {
                grant.mode = mode;
                Request::Granted { upgraded: true }
            }
            None => {
                locks.granted.push(Grant { txn, mode });
                if let Some(state) = self.txns.get_mut(&txn) {
                    state.held.push(resource);
                }
                Request::Granted { upgraded: false }
            }
        }
    }

    /// Drop one grant and flip the transaction into its shrinking phase.
    ///
    /// A shrinking transaction may not gain locks, so its pending waits are dropped too.
    pub(super) fn release(&mut self, txn: TxnId, resource: ResourceId) -> Result<Vec<Promotion>> {
        let state = self
            .txns
            .get_mut(&txn)
            .ok_or(TxnLabError::UnknownTransaction(txn))?;
        match state.phase {
            Phase::Committed => {
                return Err(TxnLabError::TransactionClosed {
                    txn,
                    state: Phase::Committed.as_str(),
                })
            }
            Phase::Aborted => return Err(TxnLabError::Aborted(txn)),
            Phase::Growing | Phase::Shrinking => {}
        }
        let pos = state
            .held
            .iter()
            .position(|held| *held == resource)
            .ok_or(TxnLabError::NotHeld { txn, resource })?;
        state.held.remove(pos);
        state.phase = Phase::Shrinking;

        let mut touched = BTreeSet::from([resource]);
        for (id, locks) in self.resources.iter_mut() {
            if *id == resource {
                locks.granted.retain(|grant| grant.txn != txn);
            }
            if locks.is_waiting(txn) {
                locks.waiting.retain(|waiter| waiter.txn != txn);
                touched.insert(*id);
            }
        }
        Ok(touched
            .into_iter()
            .flat_map(|id| self.promote(id))
            .collect())
    }

    /// Move `txn` to a terminal phase, dropping all its grants and waits.
    ///
    /// Returns `None` when the transaction was already terminal.
    pub(super) fn finish(&mut self, txn: TxnId, phase: Phase) -> Option<Vec<Promotion>> {
        let state = self
            .txns
            .entry(txn)
            .or_insert_with(|| TxnLocks::new(Phase::Growing));
        if state.phase.is_terminal() {
            return None;
        }
        state.phase = phase;

        let mut touched: BTreeSet<ResourceId> = std::mem::take(&mut state.held).into_iter().collect();
        for (resource, locks) in self.resources.iter_mut() {
            if locks.is_waiting(txn) {
                locks.waiting.retain(|waiter| waiter.txn != txn);
                touched.insert(*resource);
            }
        }

        let mut promoted = Vec::new();
        for resource in touched {
            if let Some(locks) = self.resources.get_mut(&resource) {
                locks.granted.retain(|grant| grant.txn != txn);
            }
            promoted.extend(self.promote(resource));
        }
        Some(promoted)
    }

    /// Remember that an aborted `txn` was the victim of `cycle`.
    pub(super) fn mark_victim(&mut self, txn: TxnId, cycle: Vec<TxnId>) {
        if let Some(state) = self.txns.get_mut(&txn) {
            state.broken_cycle = Some(cycle);
        }
    }

    /// Why an aborted transaction can no longer proceed.
    pub(super) fn abort_error(&self, txn: TxnId) -> TxnLabError {
        match self.txns.get(&txn).and_then(|state| state.broken_cycle.clone()) {
            Some(cycle) => TxnLabError::Deadlock { victim: txn, cycle },
            None => TxnLabError::Aborted(txn),
        }
    }

    /// Remove a waiting entry (used when a blocking request gives up).
    pub(super) fn withdraw(&mut self, txn: TxnId, resource: ResourceId) {
        let idle = match self.resources.get_mut(&resource) {
            Some(locks) => {
                locks.waiting.retain(|waiter| waiter.txn != txn);
                locks.is_idle()
            }
            None => false,
        };
        if idle {
            self.resources.remove(&resource);
        }
    }

    /// Serve waiters in request order, granting each one that no longer conflicts.
    fn promote(&mut self, resource: ResourceId) -> Vec<Promotion> {
        let mut promoted = Vec::new();
        let idle = match self.resources.get_mut(&resource) {
            Some(locks) => {
                let mut still_waiting = VecDeque::with_capacity(locks.waiting.len());
                while let Some(waiter) = locks.waiting.pop_front() {
                    if locks.blocker(waiter.txn, waiter.mode).is_some() {
                        still_waiting.push_back(waiter);
                        continue;
                    }
                    match locks.granted.iter_mut().find(|grant| grant.txn == waiter.txn) {
                        Some(grant) => grant.mode = waiter.mode,
                        None => {
                            locks.granted.push(Grant {
                                txn: waiter.txn,
                                mode: waiter.mode,
                            });
                            if let Some(state) = self.txns.get_mut(&waiter.txn) {
                                state.held.push(resource);
                            }
                        }
                    }
                    promoted.push(Promotion {
                        txn: waiter.txn,
                        resource,
                        mode: waiter.mode,
                    });
                }
                locks.waiting = still_waiting;
                locks.is_idle()
            }
            None => false,
        };
        if idle {
            self.resources.remove(&resource);
        }
        promoted
    }

    pub(super) fn held_mode(&self, txn: TxnId, resource: ResourceId) -> Option<LockMode> {
        self.resources
            .get(&resource)
            .and_then(|locks| locks.held_mode(txn))
    }

    pub(super) fn holds(&self, txn: TxnId, resource: ResourceId, mode: LockMode) -> bool {
        self.held_mode(txn, resource)
            .is_some_and(|held| held.covers(mode))
    }

    pub(super) fn is_waiting(&self, txn: TxnId, resource: ResourceId) -> bool {
        self.resources
            .get(&resource)
            .is_some_and(|locks| locks.is_waiting(txn))
    }

    pub(super) fn held_locks(&self, txn: TxnId) -> Vec<(ResourceId, LockMode)> {
        let Some(state) = self.txns.get(&txn) else {
            return Vec::new();
        };
        state
            .held
            .iter()
            .filter_map(|resource| {
                self.resources
                    .get(resource)
                    .and_then(|locks| locks.held_mode(txn))
                    .map(|mode| (*resource, mode))
            })
            .collect()
    }

    pub(super) fn snapshot(&self) -> LockSnapshot {
        let mut entries = Vec::new();
        for (resource, locks) in &self.resources {
            for grant in &locks.granted {
                entries.push(LockEntry {
                    txn: grant.txn,
                    resource: *resource,
                    state: LockState::Held(grant.mode),
                });
            }
            for waiter in &locks.waiting {
                entries.push(LockEntry {
                    txn: waiter.txn,
                    resource: *resource,
                    state: LockState::Waiting(waiter.mode),
                });
            }
        }
        let live = self
            .txns
            .iter()
            .filter(|(_, state)| !state.phase.is_terminal())
            .map(|(txn, _)| *txn)
            .collect();
        LockSnapshot { entries, live }
    }
}
