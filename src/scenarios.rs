//! Canonical workloads: the item transfers used for protocol comparison, the
//! account transfer with a concurrent deposit, and the four-way deadlock ring.

use crate::core::errors::{Result, TxnLabError};
use crate::deadlock::{LockScript, LockStep, ScriptLock};
use crate::registry::ResourceSpec;
use crate::runner::{Op, TxnScript, Workload};

pub const SCENARIOS: [&str; 3] = ["items", "accounts", "deadlock"];

/// Four items and three transactions that read two items and move value between them.
pub fn item_transfers() -> Workload {
    item_transfers_from(201)
}

/// Same scripts with ids `first`, `first + 1`, `first + 2`.
pub fn item_transfers_from(first: u64) -> Workload {
    Workload::new(
        vec![
            ResourceSpec::new("Item 1", 100),
            ResourceSpec::new("Item 2", 200),
            ResourceSpec::new("Item 3", 300),
            ResourceSpec::new("Item 4", 400),
        ],
        vec![
            TxnScript::new(
                first,
                vec![
                    Op::read("Item 1"),
                    Op::read("Item 3"),
                    Op::write("Item 1", 50),
                    Op::write("Item 3", -30),
                ],
            ),
            TxnScript::new(
                first + 1,
                vec![
                    Op::read("Item 2"),
                    Op::read("Item 1"),
                    Op::write("Item 2", -20),
                    Op::write("Item 1", 10),
                ],
            ),
            TxnScript::new(
                first + 2,
                vec![
                    Op::read("Item 3"),
                    Op::read("Item 4"),
                    Op::write("Item 4", 25),
                    Op::write("Item 3", 15),
                ],
            ),
        ],
    )
}

/// T1 moves 200 from Alice to Bob while T2 deposits 500 into Bob's account.
pub fn account_transfer() -> Workload {
    Workload::new(
        vec![ResourceSpec::new("Alice", 1000), ResourceSpec::new("Bob", 2000)],
        vec![
            TxnScript::new(
                1,
                vec![
                    Op::read("Alice"),
                    Op::read("Bob"),
                    Op::write("Alice", -200),
                    Op::write("Bob", 200),
                ],
            ),
            TxnScript::new(2, vec![Op::read("Bob"), Op::write("Bob", 500)]),
        ],
    )
}

/// T101..T104 each hold one resource and wait for the next one's.
pub fn deadlock_ring() -> LockScript {
    let resources = ["Resource A", "Resource B", "Resource C", "Resource D"];
    let mut steps = Vec::new();
    for (idx, resource) in resources.iter().enumerate() {
        steps.push(LockStep::new(101 + idx as u64, *resource, ScriptLock::Exclusive));
    }
    for (idx, _) in resources.iter().enumerate() {
        let wanted = resources[(idx + 1) % resources.len()];
        steps.push(LockStep::new(101 + idx as u64, wanted, ScriptLock::Waiting));
    }
    LockScript {
        resources: resources
            .iter()
            .map(|name| ResourceSpec::new(*name, 0))
            .collect(),
        steps,
    }
}

/// Look up a transaction workload by name.
pub fn workload(name: &str) -> Result<Workload> {
    match name {
        "items" => Ok(item_transfers()),
        "accounts" => Ok(account_transfer()),
        other => Err(TxnLabError::InvalidWorkload(format!(
            "unknown scenario: {other} (expected one of {SCENARIOS:?})"
        ))),
    }
}
