use thiserror::Error;

use crate::core::{ResourceId, Timestamp, TxnId};

#[derive(Debug, Error)]
pub enum TxnLabError {
    #[error("protocol violation: T{txn} tried to lock resource {resource} after entering its shrinking phase")]
    ProtocolViolation { txn: TxnId, resource: ResourceId },

    #[error("lock conflict: T{txn} cannot lock resource {resource}, held by T{holder}")]
    LockConflict {
        txn: TxnId,
        resource: ResourceId,
        holder: TxnId,
    },

    #[error("write conflict: T{txn} cannot write resource {resource}, T{committed_by} committed a newer version at ts {commit_ts}")]
    WriteConflict {
        txn: TxnId,
        resource: ResourceId,
        committed_by: TxnId,
        commit_ts: Timestamp,
    },

    #[error("deadlock: T{victim} aborted to break cycle {cycle:?}")]
    Deadlock { victim: TxnId, cycle: Vec<TxnId> },

    #[error("transaction T{0} was aborted")]
    Aborted(TxnId),

    #[error("T{txn} timed out waiting for resource {resource}")]
    LockTimeout { txn: TxnId, resource: ResourceId },

    #[error("T{txn} does not hold a lock on resource {resource}")]
    NotHeld { txn: TxnId, resource: ResourceId },

    #[error("transaction T{txn} is already {state}")]
    TransactionClosed { txn: TxnId, state: &'static str },

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("unknown transaction: T{0}")]
    UnknownTransaction(TxnId),

    #[error("duplicate transaction id: T{0}")]
    DuplicateTransaction(TxnId),

    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),

    #[error("invalid workload: {0}")]
    InvalidWorkload(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TxnLabError>;
