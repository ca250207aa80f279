//! Multi-version store with snapshot isolation.

mod store;
mod transaction;
mod version;

use serde::Serialize;

pub use store::VersionStore;
pub use transaction::{DeltaWrite, MvccTransaction, ReadRecord};
pub use version::{Version, VersionChain};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

#[cfg(test)]
mod tests;
