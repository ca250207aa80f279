use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{LockEntry, LockManager, LockMode, LockOutcome, LockState, Phase};
use crate::core::errors::TxnLabError;

const R1: u64 = 1;
const R2: u64 = 2;

#[test]
fn shared_locks_are_compatible() {
    let lm = LockManager::new();
    assert_eq!(lm.acquire(1, R1, LockMode::Shared).unwrap(), LockOutcome::Granted);
    assert_eq!(lm.acquire(2, R1, LockMode::Shared).unwrap(), LockOutcome::Granted);

    let snap = lm.snapshot();
    assert_eq!(snap.holders(R1).count(), 2);
    assert_eq!(snap.exclusive_holders(R1), 0);
}

#[test]
fn exclusive_blocks_everyone_else() {
    let lm = LockManager::new();
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();
    assert_eq!(
        lm.acquire(2, R1, LockMode::Shared).unwrap(),
        LockOutcome::Blocked { holder: 1 }
    );
    assert_eq!(
        lm.try_acquire(3, R1, LockMode::Exclusive).unwrap(),
        LockOutcome::Conflict { holder: 1 }
    );

    let snap = lm.snapshot();
    assert_eq!(snap.exclusive_holders(R1), 1);
    assert!(snap
        .entries
        .contains(&LockEntry::waiting_for(2, R1, LockMode::Shared)));
    // The no-wait request left nothing behind.
    assert!(!snap.entries.iter().any(|entry| entry.txn == 3));
}

#[test]
fn repeated_acquire_is_idempotent() {
    let lm = LockManager::new();
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();
    assert_eq!(lm.acquire(1, R1, LockMode::Shared).unwrap(), LockOutcome::Granted);
    assert_eq!(lm.acquire(1, R1, LockMode::Exclusive).unwrap(), LockOutcome::Granted);
    assert_eq!(lm.held_locks(1), vec![(R1, LockMode::Exclusive)]);

    lm.acquire(2, R1, LockMode::Shared).unwrap();
    lm.acquire(2, R1, LockMode::Shared).unwrap();
    let waiting = lm
        .snapshot()
        .entries
        .iter()
        .filter(|entry| matches!(entry.state, LockState::Waiting(_)))
        .count();
    assert_eq!(waiting, 1);
}

#[test]
fn upgrade_requires_sole_holder() {
    let lm = LockManager::new();
    lm.acquire(1, R1, LockMode::Shared).unwrap();
    assert_eq!(lm.upgrade(1, R1).unwrap(), LockOutcome::Granted);
    assert!(lm.holds(1, R1, LockMode::Exclusive));

    lm.acquire(2, R2, LockMode::Shared).unwrap();
    lm.acquire(3, R2, LockMode::Shared).unwrap();
    assert_eq!(lm.upgrade(2, R2).unwrap(), LockOutcome::Blocked { holder: 3 });
    assert!(lm.is_waiting(2, R2));

    // Once the other reader is gone the queued upgrade is granted.
    lm.release(3, R2).unwrap();
    assert!(lm.holds(2, R2, LockMode::Exclusive));
    assert!(!lm.is_waiting(2, R2));
}

#[test]
fn upgrade_without_shared_lock_is_rejected() {
    let lm = LockManager::new();
    assert!(matches!(
        lm.upgrade(1, R1),
        Err(TxnLabError::NotHeld { txn: 1, resource: R1 })
    ));
}

#[test]
fn acquire_after_release_is_protocol_violation() {
    let lm = LockManager::new();
    lm.begin(7).unwrap();
    lm.acquire(7, R1, LockMode::Shared).unwrap();
    lm.acquire(7, R2, LockMode::Shared).unwrap();
    lm.release(7, R1).unwrap();
    assert_eq!(lm.phase(7), Some(Phase::Shrinking));

    let err = lm.acquire(7, R1, LockMode::Shared).unwrap_err();
    assert!(matches!(err, TxnLabError::ProtocolViolation { txn: 7, resource: R1 }));
    // The violation is fatal: the transaction is aborted and its locks are gone.
    assert_eq!(lm.phase(7), Some(Phase::Aborted));
    assert!(lm.held_locks(7).is_empty());
    assert!(matches!(
        lm.try_acquire(7, R2, LockMode::Shared),
        Err(TxnLabError::Aborted(7))
    ));
}

#[test]
fn release_of_unheld_lock_fails() {
    let lm = LockManager::new();
    lm.begin(1).unwrap();
    assert!(matches!(
        lm.release(1, R1),
        Err(TxnLabError::NotHeld { txn: 1, resource: R1 })
    ));
    assert!(matches!(
        lm.release(99, R1),
        Err(TxnLabError::UnknownTransaction(99))
    ));
}

#[test]
fn duplicate_begin_is_rejected() {
    let lm = LockManager::new();
    lm.begin(1).unwrap();
    assert!(matches!(lm.begin(1), Err(TxnLabError::DuplicateTransaction(1))));
}

#[test]
fn waiters_are_served_in_request_order() {
    let lm = LockManager::new();
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();
    lm.acquire(2, R1, LockMode::Exclusive).unwrap();
    lm.acquire(3, R1, LockMode::Exclusive).unwrap();

    lm.commit(1).unwrap();
    assert!(lm.holds(2, R1, LockMode::Exclusive));
    assert!(lm.is_waiting(3, R1));

    lm.commit(2).unwrap();
    assert!(lm.holds(3, R1, LockMode::Exclusive));
}

#[test]
fn consecutive_shared_waiters_are_granted_together() {
    let lm = LockManager::new();
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();
    lm.acquire(2, R1, LockMode::Shared).unwrap();
    lm.acquire(3, R1, LockMode::Shared).unwrap();
    lm.acquire(4, R1, LockMode::Exclusive).unwrap();

    lm.commit(1).unwrap();
    assert!(lm.holds(2, R1, LockMode::Shared));
    assert!(lm.holds(3, R1, LockMode::Shared));
    assert!(lm.is_waiting(4, R1));
}

#[test]
fn abort_is_idempotent_and_frees_waiters() {
    let lm = LockManager::new();
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();
    lm.acquire(2, R1, LockMode::Exclusive).unwrap();

    assert!(lm.abort(1));
    assert!(!lm.abort(1));
    assert_eq!(lm.phase(1), Some(Phase::Aborted));
    assert!(lm.holds(2, R1, LockMode::Exclusive));

    lm.commit(2).unwrap();
    assert!(!lm.abort(2));
    assert!(matches!(
        lm.commit(2),
        Err(TxnLabError::TransactionClosed { txn: 2, .. })
    ));
}

#[test]
fn abort_withdraws_waiting_entries() {
    let lm = LockManager::new();
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();
    lm.acquire(2, R1, LockMode::Exclusive).unwrap();
    assert!(lm.abort(2));
    assert!(!lm.is_waiting(2, R1));
    assert!(!lm.snapshot().live.contains(&2));
}

#[test]
fn shrinking_transaction_stops_waiting() {
    let lm = LockManager::new();
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();
    lm.acquire(2, R2, LockMode::Shared).unwrap();
    lm.acquire(2, R1, LockMode::Shared).unwrap();
    assert!(lm.is_waiting(2, R1));

    lm.release(2, R2).unwrap();
    assert!(!lm.is_waiting(2, R1));
    lm.release(1, R1).unwrap();
    assert!(!lm.holds(2, R1, LockMode::Shared));
}

#[test]
fn release_all_keeps_acquisition_order() {
    let lm = LockManager::new();
    lm.acquire(1, R2, LockMode::Shared).unwrap();
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();
    assert_eq!(lm.release_all(1).unwrap(), vec![R2, R1]);
    assert_eq!(lm.phase(1), Some(Phase::Shrinking));
    lm.commit(1).unwrap();
    assert!(lm.snapshot().entries.is_empty());
}

#[test]
fn blocking_acquire_wakes_on_release() {
    let lm = Arc::new(LockManager::new());
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();

    let waiter = {
        let lm = Arc::clone(&lm);
        thread::spawn(move || lm.acquire_blocking(2, R1, LockMode::Exclusive, None))
    };
    while !lm.is_waiting(2, R1) {
        thread::yield_now();
    }
    lm.commit(1).unwrap();

    waiter.join().unwrap().unwrap();
    assert!(lm.holds(2, R1, LockMode::Exclusive));
}

#[test]
fn blocking_acquire_times_out_and_withdraws() {
    let lm = LockManager::new();
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();
    let err = lm
        .acquire_blocking(2, R1, LockMode::Shared, Some(Duration::from_millis(20)))
        .unwrap_err();
    assert!(matches!(err, TxnLabError::LockTimeout { txn: 2, resource: R1 }));
    assert!(!lm.is_waiting(2, R1));
}

#[test]
fn blocking_acquire_reports_victim_abort() {
    let lm = Arc::new(LockManager::new());
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();

    let waiter = {
        let lm = Arc::clone(&lm);
        thread::spawn(move || lm.acquire_blocking(2, R1, LockMode::Exclusive, None))
    };
    while !lm.is_waiting(2, R1) {
        thread::yield_now();
    }
    assert!(lm.abort(2));

    let err = waiter.join().unwrap().unwrap_err();
    assert!(matches!(err, TxnLabError::Aborted(2)));
    assert!(lm.holds(1, R1, LockMode::Exclusive));
}

#[test]
fn deadlock_victim_learns_the_cycle() {
    let lm = Arc::new(LockManager::new());
    lm.acquire(1, R1, LockMode::Exclusive).unwrap();

    let waiter = {
        let lm = Arc::clone(&lm);
        thread::spawn(move || lm.acquire_blocking(2, R1, LockMode::Exclusive, None))
    };
    while !lm.is_waiting(2, R1) {
        thread::yield_now();
    }
    let aborted = lm.abort_selected(|snapshot| {
        assert!(snapshot.live.contains(&2));
        Some((2, vec![1, 2]))
    });
    assert_eq!(aborted, Some((2, vec![1, 2])));

    let err = waiter.join().unwrap().unwrap_err();
    assert!(matches!(err, TxnLabError::Deadlock { victim: 2, ref cycle } if cycle == &vec![1, 2]));
    assert_eq!(lm.phase(2), Some(Phase::Aborted));
    assert!(lm.abort_selected(|_| None).is_none());
}
