use std::sync::Arc;

use txnlab::{
    LockManager, LockMode, LockOutcome, Phase, ResourceRegistry, ResourceSpec, TxnLabError, TxnStatus, VersionStore,
};

fn accounts() -> Arc<ResourceRegistry> {
    Arc::new(
        ResourceRegistry::from_specs(&[ResourceSpec::new("Alice", 1000), ResourceSpec::new("Bob", 2000)]).unwrap(),
    )
}

#[test]
fn lock_after_release_violates_two_phase_locking() {
    let locks = LockManager::new();
    assert_eq!(locks.acquire(5, 1, LockMode::Shared).unwrap(), LockOutcome::Granted);
    locks.release(5, 1).unwrap();

    let err = locks.acquire(5, 2, LockMode::Shared).unwrap_err();
    assert!(matches!(err, TxnLabError::ProtocolViolation { txn: 5, resource: 2 }));
    assert_eq!(locks.phase(5), Some(Phase::Aborted));
    assert!(locks.snapshot().entries.is_empty());
}

#[test]
fn snapshot_reads_ignore_later_commits() {
    let registry = accounts();
    let store = VersionStore::new(registry).unwrap();

    let mut reader = store.begin(1).unwrap();
    assert_eq!(reader.read(&store, 2).unwrap().value, 2000);

    for (id, delta) in [(2, 500), (3, -100)] {
        let mut writer = store.begin(id).unwrap();
        writer.apply_delta(&store, 2, delta).unwrap();
        writer.commit(&store).unwrap();
    }
    assert_eq!(store.latest(2).unwrap(), 2400);

    // Same value on every read, for resources read before and after the commits.
    assert_eq!(reader.read(&store, 2).unwrap().value, 2000);
    assert_eq!(reader.read(&store, 1).unwrap().value, 1000);
    assert_eq!(store.read(reader.start_ts(), 2).unwrap(), 2000);
    assert_eq!(reader.commit(&store).unwrap(), None);
}

#[test]
fn concurrent_writers_first_committer_wins() {
    let registry = accounts();
    let store = VersionStore::new(Arc::clone(&registry)).unwrap();

    let mut transfer = store.begin(1).unwrap();
    let mut deposit = store.begin(2).unwrap();
    transfer.apply_delta(&store, 1, -200).unwrap();
    transfer.apply_delta(&store, 2, 200).unwrap();
    deposit.apply_delta(&store, 2, 500).unwrap();

    let ts = deposit.commit(&store).unwrap();
    assert_eq!(ts, Some(1));

    let err = transfer.commit(&store).unwrap_err();
    assert!(matches!(
        err,
        TxnLabError::WriteConflict {
            txn: 1,
            resource: 2,
            committed_by: 2,
            commit_ts: 1
        }
    ));
    assert_eq!(transfer.status(), TxnStatus::Aborted);
    // Nothing of the losing transaction was installed.
    assert!(store.versions(1).unwrap().is_empty());
    assert_eq!(registry.value(1).unwrap(), 1000);
    assert_eq!(registry.value(2).unwrap(), 2500);
}
