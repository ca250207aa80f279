use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::core::errors::{Result, TxnLabError};
use crate::core::lock_stats::{LockHoldGuard, LockStatKind, LockStats, LockStatsSnapshot};
use crate::core::{ResourceId, Timestamp, TxnId, Value, TS_NONE};
use crate::registry::ResourceRegistry;

use super::transaction::MvccTransaction;
use super::version::{Version, VersionChain};
use super::TxnStatus;

#[derive(Debug)]
struct StoreInner {
    chains: BTreeMap<ResourceId, VersionChain>,
    statuses: BTreeMap<TxnId, TxnStatus>,
    last_commit_ts: Timestamp,
}

impl StoreInner {
    fn chain(&self, resource: ResourceId) -> Result<&VersionChain> {
        self.chains
            .get(&resource)
            .ok_or_else(|| TxnLabError::UnknownResource(format!("#{resource}")))
    }
}

/// Store guard that also accounts hold time.
struct StoreGuard<'a> {
    inner: MutexGuard<'a, StoreInner>,
    _hold: LockHoldGuard,
}

impl Deref for StoreGuard<'_> {
    type Target = StoreInner;

    fn deref(&self) -> &StoreInner {
        &self.inner
    }
}

impl DerefMut for StoreGuard<'_> {
    fn deref_mut(&mut self) -> &mut StoreInner {
        &mut self.inner
    }
}

/// Multi-version store with snapshot reads and first-committer-wins writes.
///
/// Reads and conflict checks never wait on other transactions; the mutex
/// only serializes access to the chains. A commit installs its whole write
/// set under one timestamp while holding the mutex, so no reader can observe
/// half of it.
#[derive(Debug)]
pub struct VersionStore {
    inner: Mutex<StoreInner>,
    registry: Arc<ResourceRegistry>,
    stats: Arc<LockStats>,
}

impl VersionStore {
    /// Seed one chain per registered resource, bootstrapped from its current value.
    pub fn new(registry: Arc<ResourceRegistry>) -> Result<Self> {
        Self::with_stats(registry, LockStats::new(false))
    }

    pub fn with_stats(registry: Arc<ResourceRegistry>, stats: Arc<LockStats>) -> Result<Self> {
        let mut chains = BTreeMap::new();
        for id in registry.ids() {
            chains.insert(id, VersionChain::new(registry.value(id)?));
        }
        Ok(Self {
            inner: Mutex::new(StoreInner {
                chains,
                statuses: BTreeMap::new(),
                last_commit_ts: TS_NONE,
            }),
            registry,
            stats,
        })
    }

    fn lock_inner(&self) -> StoreGuard<'_> {
        let start = Instant::now();
        let inner = self.inner.lock();
        self.stats
            .record_wait(LockStatKind::VersionStore, start.elapsed());
        StoreGuard {
            inner,
            _hold: self.stats.begin_hold(LockStatKind::VersionStore),
        }
    }

    /// Start a transaction whose snapshot is everything committed so far.
    pub fn begin(&self, txn: TxnId) -> Result<MvccTransaction> {
        let mut inner = self.lock_inner();
        if inner.statuses.contains_key(&txn) {
            return Err(TxnLabError::DuplicateTransaction(txn));
        }
        inner.statuses.insert(txn, TxnStatus::Active);
        let start_ts = inner.last_commit_ts;
        debug!(txn, start_ts, "mvcc transaction started");
        Ok(MvccTransaction::new(txn, start_ts))
    }

    /// Snapshot read: value of the newest version committed at or before `start_ts`.
    pub fn read(&self, start_ts: Timestamp, resource: ResourceId) -> Result<Value> {
        Ok(self.read_version(start_ts, resource)?.0)
    }

    /// Like `read`, also returning the commit timestamp of the version seen.
    pub fn read_version(&self, start_ts: Timestamp, resource: ResourceId) -> Result<(Value, Timestamp)> {
        let inner = self.lock_inner();
        Ok(inner.chain(resource)?.visible_at(start_ts))
    }

    /// First-committer-wins check for a write by `txn` whose snapshot is `start_ts`.
    pub fn check_write(&self, txn: TxnId, start_ts: Timestamp, resource: ResourceId) -> Result<()> {
        let inner = self.lock_inner();
        match inner.chain(resource)?.first_conflict(txn, start_ts) {
            Some(version) => Err(TxnLabError::WriteConflict {
                txn,
                resource,
                committed_by: version.writer,
                commit_ts: version.commit_ts,
            }),
            None => Ok(()),
        }
    }

    /// Install the transaction's write set atomically.
    ///
    /// The write set is revalidated first; if any resource has a newer
    /// version from another writer nothing is installed and the transaction
    /// ends aborted. Read-only transactions commit without a timestamp.
    pub fn commit(&self, txn: &mut MvccTransaction) -> Result<Option<Timestamp>> {
        txn.ensure_active()?;
        let mut inner = self.lock_inner();

        let mut conflict = None;
        for resource in txn.write_set().keys() {
            if let Some(version) = inner.chain(*resource)?.first_conflict(txn.id(), txn.start_ts()) {
                conflict = Some(TxnLabError::WriteConflict {
                    txn: txn.id(),
                    resource: *resource,
                    committed_by: version.writer,
                    commit_ts: version.commit_ts,
                });
                break;
            }
        }
        if let Some(err) = conflict {
            warn!(txn = txn.id(), error = %err, "commit rejected, aborting");
            txn.mark_aborted();
            inner.statuses.insert(txn.id(), TxnStatus::Aborted);
            return Err(err);
        }

        let commit_ts = if txn.write_set().is_empty() {
            None
        } else {
            let commit_ts = inner.last_commit_ts + 1;
            inner.last_commit_ts = commit_ts;
            for (resource, value) in txn.write_set() {
                if let Some(chain) = inner.chains.get_mut(resource) {
                    chain.install(Version {
                        resource: *resource,
                        value: *value,
                        writer: txn.id(),
                        commit_ts,
                    });
                }
                self.registry.set_value(*resource, *value)?;
            }
            Some(commit_ts)
        };

        txn.mark_committed(commit_ts);
        inner.statuses.insert(txn.id(), TxnStatus::Committed);
        debug!(txn = txn.id(), ?commit_ts, "mvcc transaction committed");
        Ok(commit_ts)
    }

    /// Discard the write set. No-op (returns false) once the transaction is terminal.
    pub fn abort(&self, txn: &mut MvccTransaction) -> bool {
        if txn.status() != TxnStatus::Active {
            return false;
        }
        txn.mark_aborted();
        self.lock_inner()
            .statuses
            .insert(txn.id(), TxnStatus::Aborted);
        debug!(txn = txn.id(), "mvcc transaction aborted");
        true
    }

    pub fn status(&self, txn: TxnId) -> Option<TxnStatus> {
        self.lock_inner().statuses.get(&txn).copied()
    }

    pub fn active_transactions(&self) -> Vec<TxnId> {
        self.lock_inner()
            .statuses
            .iter()
            .filter(|(_, status)| **status == TxnStatus::Active)
            .map(|(txn, _)| *txn)
            .collect()
    }

    /// Committed versions of `resource`, oldest first.
    pub fn versions(&self, resource: ResourceId) -> Result<Vec<Version>> {
        Ok(self.lock_inner().chain(resource)?.versions().to_vec())
    }

    /// All committed versions across resources, ordered by commit timestamp.
    pub fn all_versions(&self) -> Vec<Version> {
        let inner = self.lock_inner();
        let mut versions: Vec<Version> = inner
            .chains
            .values()
            .flat_map(|chain| chain.versions().iter().copied())
            .collect();
        versions.sort_by_key(|version| (version.commit_ts, version.resource));
        versions
    }

    pub fn latest(&self, resource: ResourceId) -> Result<Value> {
        Ok(self.lock_inner().chain(resource)?.latest())
    }

    pub fn last_commit_ts(&self) -> Timestamp {
        self.lock_inner().last_commit_ts
    }

    pub fn stats(&self) -> LockStatsSnapshot {
        self.stats.snapshot()
    }
}
