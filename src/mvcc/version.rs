use serde::Serialize;

use crate::core::{ResourceId, Timestamp, TxnId, Value, TS_NONE};

/// One committed value of a resource. Never mutated once installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Version {
    pub resource: ResourceId,
    pub value: Value,
    pub writer: TxnId,
    pub commit_ts: Timestamp,
}

/// Append-only history of one resource, oldest first.
///
/// The bootstrap value is what every snapshot sees before the first commit;
/// it is not a version and has no writer.
#[derive(Debug, Clone)]
pub struct VersionChain {
    bootstrap: Value,
    versions: Vec<Version>,
}

impl VersionChain {
    pub fn new(bootstrap: Value) -> Self {
        Self {
            bootstrap,
            versions: Vec::new(),
        }
    }

    pub fn bootstrap(&self) -> Value {
        self.bootstrap
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// Value visible at `start_ts` and the commit timestamp it came from
    /// (`TS_NONE` for the bootstrap value).
    pub fn visible_at(&self, start_ts: Timestamp) -> (Value, Timestamp) {
        self.versions
            .iter()
            .rev()
            .find(|version| version.commit_ts <= start_ts)
            .map(|version| (version.value, version.commit_ts))
            .unwrap_or((self.bootstrap, TS_NONE))
    }

    /// Earliest version committed after `start_ts` by someone other than `txn`.
    pub fn first_conflict(&self, txn: TxnId, start_ts: Timestamp) -> Option<&Version> {
        self.versions
            .iter()
            .find(|version| version.commit_ts > start_ts && version.writer != txn)
    }

    pub fn latest(&self) -> Value {
        self.versions
            .last()
            .map(|version| version.value)
            .unwrap_or(self.bootstrap)
    }

    pub fn last_commit_ts(&self) -> Timestamp {
        self.versions
            .last()
            .map(|version| version.commit_ts)
            .unwrap_or(TS_NONE)
    }

    pub(super) fn install(&mut self, version: Version) {
        debug_assert!(version.commit_ts > self.last_commit_ts());
        self.versions.push(version);
    }
}
