use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::errors::{Result, TxnLabError};
use crate::core::{ResourceId, Timestamp, TxnId, Value};

use super::store::VersionStore;
use super::TxnStatus;

/// What a read observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadRecord {
    pub value: Value,
    /// Commit timestamp of the version read (`TS_NONE` for the bootstrap value).
    pub version_ts: Timestamp,
    /// The value came from this transaction's own staged write.
    pub own_write: bool,
}

/// Result of a delta write: the base the delta was applied to, and the staged value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeltaWrite {
    pub before: Value,
    pub after: Value,
}

/// A snapshot-isolated transaction. Owned by its caller; the shared state
/// lives in the `VersionStore` passed to each operation.
#[derive(Debug)]
pub struct MvccTransaction {
    id: TxnId,
    start_ts: Timestamp,
    reads: BTreeMap<ResourceId, ReadRecord>,
    writes: BTreeMap<ResourceId, Value>,
    status: TxnStatus,
    commit_ts: Option<Timestamp>,
}

impl MvccTransaction {
    pub(super) fn new(id: TxnId, start_ts: Timestamp) -> Self {
        Self {
            id,
            start_ts,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            status: TxnStatus::Active,
            commit_ts: None,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    pub fn commit_ts(&self) -> Option<Timestamp> {
        self.commit_ts
    }

    pub fn read_set(&self) -> &BTreeMap<ResourceId, ReadRecord> {
        &self.reads
    }

    pub fn write_set(&self) -> &BTreeMap<ResourceId, Value> {
        &self.writes
    }

    pub(super) fn ensure_active(&self) -> Result<()> {
        match self.status {
            TxnStatus::Active => Ok(()),
            TxnStatus::Committed => Err(TxnLabError::TransactionClosed {
                txn: self.id,
                state: "committed",
            }),
            TxnStatus::Aborted => Err(TxnLabError::Aborted(self.id)),
        }
    }

    pub(super) fn mark_committed(&mut self, commit_ts: Option<Timestamp>) {
        self.status = TxnStatus::Committed;
        self.commit_ts = commit_ts;
    }

    pub(super) fn mark_aborted(&mut self) {
        self.status = TxnStatus::Aborted;
        self.writes.clear();
    }

    /// Read `resource` as of this transaction's snapshot, or its own staged write.
    pub fn read(&mut self, store: &VersionStore, resource: ResourceId) -> Result<ReadRecord> {
        self.ensure_active()?;
        if let Some(value) = self.writes.get(&resource) {
            return Ok(ReadRecord {
                value: *value,
                version_ts: self.start_ts,
                own_write: true,
            });
        }
        let (value, version_ts) = store.read_version(self.start_ts, resource)?;
        let record = ReadRecord {
            value,
            version_ts,
            own_write: false,
        };
        self.reads.insert(resource, record);
        debug!(txn = self.id, resource, value, version_ts, "snapshot read");
        Ok(record)
    }

    /// Stage `value` for `resource`.
    ///
    /// A newer version committed by another transaction since our snapshot is
    /// a write conflict: nothing is staged and the transaction is aborted.
    pub fn write(&mut self, store: &VersionStore, resource: ResourceId, value: Value) -> Result<()> {
        self.ensure_active()?;
        if let Err(err) = store.check_write(self.id, self.start_ts, resource) {
            if let TxnLabError::WriteConflict { .. } = err {
                warn!(txn = self.id, resource, error = %err, "write conflict, aborting");
                store.abort(self);
            }
            return Err(err);
        }
        self.writes.insert(resource, value);
        debug!(txn = self.id, resource, value, "write staged");
        Ok(())
    }

    /// Stage `base + delta`, where the base is what this transaction sees:
    /// its own staged value, else the value it read, else a fresh snapshot read.
    pub fn apply_delta(
        &mut self,
        store: &VersionStore,
        resource: ResourceId,
        delta: Value,
    ) -> Result<DeltaWrite> {
        self.ensure_active()?;
        let before = match (self.writes.get(&resource), self.reads.get(&resource)) {
            (Some(staged), _) => *staged,
            (None, Some(read)) => read.value,
            (None, None) => self.read(store, resource)?.value,
        };
        let after = before.checked_add(delta).ok_or_else(|| {
            TxnLabError::InvalidWorkload(format!(
                "T{}: {before} + {delta} overflows resource {resource}",
                self.id
            ))
        })?;
        self.write(store, resource, after)?;
        Ok(DeltaWrite { before, after })
    }

    pub fn commit(&mut self, store: &VersionStore) -> Result<Option<Timestamp>> {
        store.commit(self)
    }

    pub fn abort(&mut self, store: &VersionStore) -> bool {
        store.abort(self)
    }
}
