use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::core::errors::{Result, TxnLabError};
use crate::core::lock_stats::{LockHoldGuard, LockStatKind, LockStats, LockStatsSnapshot};
use crate::core::{ResourceId, TxnId};

use super::table::{LockTable, Promotion, Request};
use super::{LockMode, LockOutcome, LockSnapshot, Phase};

/// Lock table guard that also accounts hold time.
struct TableGuard<'a> {
    table: MutexGuard<'a, LockTable>,
    _hold: LockHoldGuard,
}

impl Deref for TableGuard<'_> {
    type Target = LockTable;

    fn deref(&self) -> &LockTable {
        &self.table
    }
}

impl DerefMut for TableGuard<'_> {
    fn deref_mut(&mut self) -> &mut LockTable {
        &mut self.table
    }
}

/// Shared 2PL lock manager.
///
/// Every operation runs under one mutex, so a snapshot or a victim abort
/// always sees (and leaves) a consistent table. Blocked callers park on a
/// condition variable that is signalled whenever grants change hands.
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    changed: Condvar,
    stats: Arc<LockStats>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_stats(LockStats::new(false))
    }

    pub fn with_stats(stats: Arc<LockStats>) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            changed: Condvar::new(),
            stats,
        }
    }

    fn lock_table(&self) -> TableGuard<'_> {
        let start = Instant::now();
        let table = self.table.lock();
        self.stats.record_wait(LockStatKind::LockTable, start.elapsed());
        TableGuard {
            table,
            _hold: self.stats.begin_hold(LockStatKind::LockTable),
        }
    }

    /// Register a transaction in its growing phase.
    pub fn begin(&self, txn: TxnId) -> Result<()> {
        self.lock_table().begin(txn)
    }

    /// Request a lock, recording a waiting entry when blocked.
    ///
    /// A waiting transaction is granted automatically once the blocker lets
    /// go; calling `acquire` again reports the current state without queueing
    /// twice.
    pub fn acquire(&self, txn: TxnId, resource: ResourceId, mode: LockMode) -> Result<LockOutcome> {
        let mut table = self.lock_table();
        self.request_locked(&mut table, txn, resource, mode, true)
    }

    /// No-wait request: refused requests return `Conflict` and leave no trace.
    pub fn try_acquire(
        &self,
        txn: TxnId,
        resource: ResourceId,
        mode: LockMode,
    ) -> Result<LockOutcome> {
        let mut table = self.lock_table();
        self.request_locked(&mut table, txn, resource, mode, false)
    }

    /// Upgrade a shared lock held by `txn` to exclusive.
    pub fn upgrade(&self, txn: TxnId, resource: ResourceId) -> Result<LockOutcome> {
        let mut table = self.lock_table();
        if !table.holds(txn, resource, LockMode::Shared) {
            return Err(TxnLabError::NotHeld { txn, resource });
        }
        self.request_locked(&mut table, txn, resource, LockMode::Exclusive, true)
    }

    /// Request a lock and park until it is granted.
    ///
    /// Gives up with `Deadlock` if the transaction is chosen as a deadlock
    /// victim while waiting, `Aborted` if it is aborted for any other reason,
    /// or `LockTimeout` once `timeout` elapses.
    pub fn acquire_blocking(
        &self,
        txn: TxnId,
        resource: ResourceId,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut table = self.lock_table();
        if let LockOutcome::Granted = self.request_locked(&mut table, txn, resource, mode, true)? {
            return Ok(());
        }

        loop {
            let timed_out = match deadline {
                Some(deadline) => self.changed.wait_until(&mut table.table, deadline).timed_out(),
                None => {
                    self.changed.wait(&mut table.table);
                    false
                }
            };

            if table.phase(txn) == Some(Phase::Aborted) {
                return Err(table.abort_error(txn));
            }
            if table.holds(txn, resource, mode) {
                return Ok(());
            }
            if timed_out {
                table.withdraw(txn, resource);
                warn!(txn, resource, %mode, "lock wait timed out");
                return Err(TxnLabError::LockTimeout { txn, resource });
            }
        }
    }

    fn request_locked(
        &self,
        table: &mut LockTable,
        txn: TxnId,
        resource: ResourceId,
        mode: LockMode,
        enqueue: bool,
    ) -> Result<LockOutcome> {
        if let Err(err) = table.admit(txn, resource) {
            if let TxnLabError::ProtocolViolation { .. } = err {
                warn!(txn, resource, %mode, "acquire after release, aborting transaction");
                if let Some(promoted) = table.finish(txn, Phase::Aborted) {
                    self.wake(&promoted);
                }
            }
            return Err(err);
        }

        match table.request(txn, resource, mode, enqueue) {
            Request::AlreadyHeld => Ok(LockOutcome::Granted),
            Request::Granted { upgraded } => {
                debug!(txn, resource, %mode, upgraded, "lock granted");
                Ok(LockOutcome::Granted)
            }
            Request::Blocked { holder } if enqueue => {
                debug!(txn, resource, %mode, holder, "lock request waiting");
                Ok(LockOutcome::Blocked { holder })
            }
            Request::Blocked { holder } => {
                debug!(txn, resource, %mode, holder, "lock request refused");
                Ok(LockOutcome::Conflict { holder })
            }
        }
    }

    /// Release one lock. The first release moves `txn` into its shrinking phase.
    pub fn release(&self, txn: TxnId, resource: ResourceId) -> Result<()> {
        let mut table = self.lock_table();
        let promoted = table.release(txn, resource)?;
        debug!(txn, resource, "lock released");
        self.wake(&promoted);
        Ok(())
    }

    /// Release every lock in acquisition order, returning the released resources.
    pub fn release_all(&self, txn: TxnId) -> Result<Vec<ResourceId>> {
        let mut table = self.lock_table();
        let held: Vec<ResourceId> = table.held_locks(txn).into_iter().map(|(r, _)| r).collect();
        let mut promoted = Vec::new();
        for resource in &held {
            promoted.extend(table.release(txn, *resource)?);
            debug!(txn, resource, "lock released");
        }
        self.wake(&promoted);
        Ok(held)
    }

    /// Release whatever is left and mark the transaction committed.
    pub fn commit(&self, txn: TxnId) -> Result<()> {
        let mut table = self.lock_table();
        match table.phase(txn) {
            None => return Err(TxnLabError::UnknownTransaction(txn)),
            Some(Phase::Aborted) => return Err(TxnLabError::Aborted(txn)),
            Some(Phase::Committed) => {
                return Err(TxnLabError::TransactionClosed {
                    txn,
                    state: Phase::Committed.as_str(),
                })
            }
            Some(Phase::Growing | Phase::Shrinking) => {}
        }
        if let Some(promoted) = table.finish(txn, Phase::Committed) {
            self.wake(&promoted);
        }
        debug!(txn, "2pl transaction committed");
        Ok(())
    }

    /// Abort `txn`, dropping its grants and waiting entries.
    ///
    /// Safe at any point of the lifecycle; returns false if the transaction
    /// was already committed or aborted.
    pub fn abort(&self, txn: TxnId) -> bool {
        let mut table = self.lock_table();
        match table.finish(txn, Phase::Aborted) {
            Some(promoted) => {
                debug!(txn, "2pl transaction aborted");
                self.wake(&promoted);
                // A victim parked in `acquire_blocking` must notice the abort.
                self.changed.notify_all();
                true
            }
            None => false,
        }
    }

    /// Let `select` pick a deadlock victim and the cycle it breaks from a
    /// snapshot, then abort it, all under the table mutex so the choice cannot
    /// go stale before the abort lands.
    ///
    /// A victim parked in `acquire_blocking` wakes up with `Deadlock`.
    pub fn abort_selected<F>(&self, select: F) -> Option<(TxnId, Vec<TxnId>)>
    where
        F: FnOnce(&LockSnapshot) -> Option<(TxnId, Vec<TxnId>)>,
    {
        let mut table = self.lock_table();
        let snapshot = table.snapshot();
        let (victim, cycle) = select(&snapshot)?;
        let promoted = table.finish(victim, Phase::Aborted)?;
        table.mark_victim(victim, cycle.clone());
        self.wake(&promoted);
        self.changed.notify_all();
        Some((victim, cycle))
    }

    fn wake(&self, promoted: &[Promotion]) {
        for promotion in promoted {
            debug!(
                txn = promotion.txn,
                resource = promotion.resource,
                mode = %promotion.mode,
                "waiting lock granted"
            );
        }
        if !promoted.is_empty() {
            self.changed.notify_all();
        }
    }

    pub fn phase(&self, txn: TxnId) -> Option<Phase> {
        self.lock_table().phase(txn)
    }

    pub fn holds(&self, txn: TxnId, resource: ResourceId, mode: LockMode) -> bool {
        self.lock_table().holds(txn, resource, mode)
    }

    pub fn held_mode(&self, txn: TxnId, resource: ResourceId) -> Option<LockMode> {
        self.lock_table().held_mode(txn, resource)
    }

    pub fn is_waiting(&self, txn: TxnId, resource: ResourceId) -> bool {
        self.lock_table().is_waiting(txn, resource)
    }

    /// Locks held by `txn`, in acquisition order.
    pub fn held_locks(&self, txn: TxnId) -> Vec<(ResourceId, LockMode)> {
        self.lock_table().held_locks(txn)
    }

    pub fn snapshot(&self) -> LockSnapshot {
        self.lock_table().snapshot()
    }

    pub fn stats(&self) -> LockStatsSnapshot {
        self.stats.snapshot()
    }
}
