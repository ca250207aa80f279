pub mod errors;
pub mod lock_stats;

pub type TxnId = u64;
pub const TXN_NONE: TxnId = 0;

pub type ResourceId = u64;

pub type Timestamp = u64;
pub const TS_NONE: Timestamp = 0;

/// Resource values are integral amounts (item counts, account balances).
pub type Value = i64;
