//! Deadlock detection over the lock manager's wait-for graph.

mod detector;
mod graph;
mod script;
mod victim;
mod watchdog;

pub use detector::{detect_deadlocks, DeadlockDetector, DeadlockReport, Resolution};
pub use graph::{find_cycles, first_cycle, WaitForEdge, WaitForGraph};
pub use script::{run_lock_script, LockScript, LockScriptReport, LockStep, ScriptLock, ScriptStep};
pub use victim::{
    select_victim, FewestLocks, FirstInCycle, Oldest, VictimPolicy, VictimPolicyKind, Youngest,
};
pub use watchdog::Watchdog;
