mod core;

pub mod bench;
pub mod deadlock;
pub mod engine;
pub mod lock;
pub mod mvcc;
pub mod registry;
pub mod runner;
pub mod scenarios;

pub use crate::bench::{compare, Comparison, ProtocolMetrics};
pub use crate::core::errors::{Result, TxnLabError};
pub use crate::core::lock_stats::{LockCounterSnapshot, LockStats, LockStatsSnapshot};
pub use crate::core::{ResourceId, Timestamp, TxnId, Value, TS_NONE, TXN_NONE};
pub use crate::deadlock::{detect_deadlocks, find_cycles, select_victim, DeadlockDetector, DeadlockReport, WaitForGraph};
pub use crate::engine::{BlockPolicy, Schedule, Simulation, SimulationConfig};
pub use crate::lock::{LockEntry, LockManager, LockMode, LockOutcome, LockSnapshot, LockState, Phase};
pub use crate::mvcc::{MvccTransaction, TxnStatus, Version, VersionStore};
pub use crate::registry::{ResourceRegistry, ResourceSpec, ResourceState};
pub use crate::runner::{run_workload, Event, EventKind, Op, OpKind, Protocol, RunReport, TxnScript, Workload};
