use std::sync::Arc;

use super::{TxnStatus, VersionStore};
use crate::core::errors::TxnLabError;
use crate::core::lock_stats::LockStats;
use crate::core::TS_NONE;
use crate::registry::{ResourceRegistry, ResourceSpec};

const ALICE: u64 = 1;
const BOB: u64 = 2;

fn accounts() -> Arc<ResourceRegistry> {
    Arc::new(
        ResourceRegistry::from_specs(&[
            ResourceSpec::new("Alice", 1000),
            ResourceSpec::new("Bob", 2000),
        ])
        .unwrap(),
    )
}

#[test]
fn unwritten_resources_read_bootstrap_value() {
    let store = VersionStore::new(accounts()).unwrap();
    assert_eq!(store.read(0, ALICE).unwrap(), 1000);
    assert_eq!(store.read(42, BOB).unwrap(), 2000);
    assert_eq!(store.read_version(42, BOB).unwrap(), (2000, TS_NONE));
    assert!(matches!(
        store.read(0, 9),
        Err(TxnLabError::UnknownResource(_))
    ));
}

#[test]
fn snapshot_reads_are_repeatable() {
    let store = VersionStore::new(accounts()).unwrap();
    let mut reader = store.begin(1).unwrap();
    let first = reader.read(&store, BOB).unwrap();

    let mut writer = store.begin(2).unwrap();
    writer.apply_delta(&store, BOB, 500).unwrap();
    writer.commit(&store).unwrap();

    let again = reader.read(&store, BOB).unwrap();
    assert_eq!(first.value, 2000);
    assert_eq!(again.value, 2000);
    for _ in 0..3 {
        assert_eq!(store.read(reader.start_ts(), BOB).unwrap(), 2000);
    }

    let late = store.begin(3).unwrap();
    assert_eq!(store.read(late.start_ts(), BOB).unwrap(), 2500);
}

#[test]
fn write_after_concurrent_commit_conflicts() {
    let store = VersionStore::new(accounts()).unwrap();
    let mut a = store.begin(1).unwrap();
    let mut b = store.begin(2).unwrap();

    b.apply_delta(&store, BOB, 500).unwrap();
    let commit_ts = b.commit(&store).unwrap();
    assert_eq!(commit_ts, Some(1));

    let err = a.apply_delta(&store, BOB, 200).unwrap_err();
    assert!(matches!(
        err,
        TxnLabError::WriteConflict {
            txn: 1,
            resource: BOB,
            committed_by: 2,
            commit_ts: 1
        }
    ));
    assert_eq!(a.status(), TxnStatus::Aborted);
    assert_eq!(store.status(1), Some(TxnStatus::Aborted));
    assert_eq!(store.versions(BOB).unwrap().len(), 1);
    assert_eq!(store.latest(BOB).unwrap(), 2500);
}

#[test]
fn first_committer_wins_at_commit_time() {
    let store = VersionStore::new(accounts()).unwrap();
    let mut a = store.begin(1).unwrap();
    let mut b = store.begin(2).unwrap();

    // Both stage before either commits: the write checks pass.
    a.apply_delta(&store, ALICE, -200).unwrap();
    a.apply_delta(&store, BOB, 200).unwrap();
    b.apply_delta(&store, BOB, 500).unwrap();

    b.commit(&store).unwrap();
    let err = a.commit(&store).unwrap_err();
    assert!(matches!(err, TxnLabError::WriteConflict { resource: BOB, .. }));

    // Nothing from the loser is visible, not even the non-conflicting Alice write.
    assert!(store.versions(ALICE).unwrap().is_empty());
    assert_eq!(store.latest(ALICE).unwrap(), 1000);
    assert_eq!(store.latest(BOB).unwrap(), 2500);
    assert!(a.write_set().is_empty());
}

#[test]
fn commit_installs_all_writes_under_one_timestamp() {
    let registry = accounts();
    let store = VersionStore::new(Arc::clone(&registry)).unwrap();
    let mut t = store.begin(1).unwrap();
    t.apply_delta(&store, ALICE, -200).unwrap();
    t.apply_delta(&store, BOB, 200).unwrap();
    let ts = t.commit(&store).unwrap().unwrap();

    let versions = store.all_versions();
    assert_eq!(versions.len(), 2);
    assert!(versions.iter().all(|v| v.commit_ts == ts && v.writer == 1));
    assert_eq!(registry.value(ALICE).unwrap(), 800);
    assert_eq!(registry.value(BOB).unwrap(), 2200);
}

#[test]
fn read_your_own_writes_and_delta_base() {
    let store = VersionStore::new(accounts()).unwrap();
    let mut t = store.begin(1).unwrap();
    t.read(&store, ALICE).unwrap();
    let first = t.apply_delta(&store, ALICE, 50).unwrap();
    let second = t.apply_delta(&store, ALICE, 25).unwrap();
    assert_eq!((first.before, first.after), (1000, 1050));
    assert_eq!((second.before, second.after), (1050, 1075));
    assert!(t.read(&store, ALICE).unwrap().own_write);
    assert_eq!(t.read(&store, ALICE).unwrap().value, 1075);
}

#[test]
fn read_only_commit_takes_no_timestamp() {
    let store = VersionStore::new(accounts()).unwrap();
    let mut t = store.begin(1).unwrap();
    t.read(&store, ALICE).unwrap();
    assert_eq!(t.commit(&store).unwrap(), None);
    assert_eq!(store.last_commit_ts(), TS_NONE);
    assert_eq!(t.status(), TxnStatus::Committed);
}

#[test]
fn abort_is_idempotent_and_discards_writes() {
    let store = VersionStore::new(accounts()).unwrap();
    let mut t = store.begin(1).unwrap();
    t.apply_delta(&store, ALICE, 10).unwrap();
    assert!(t.abort(&store));
    assert!(!t.abort(&store));
    assert!(t.write_set().is_empty());
    assert!(matches!(t.read(&store, ALICE), Err(TxnLabError::Aborted(1))));
    assert!(matches!(t.commit(&store), Err(TxnLabError::Aborted(1))));
    assert!(store.active_transactions().is_empty());
}

#[test]
fn duplicate_transaction_ids_are_rejected() {
    let store = VersionStore::new(accounts()).unwrap();
    let _t = store.begin(1).unwrap();
    assert!(matches!(
        store.begin(1),
        Err(TxnLabError::DuplicateTransaction(1))
    ));
}

#[test]
fn version_chains_stay_ordered() {
    let store = VersionStore::new(accounts()).unwrap();
    for id in 1..=5 {
        let mut t = store.begin(id).unwrap();
        t.apply_delta(&store, BOB, 1).unwrap();
        t.commit(&store).unwrap();
    }
    let versions = store.versions(BOB).unwrap();
    assert_eq!(versions.len(), 5);
    assert!(versions.windows(2).all(|w| w[0].commit_ts < w[1].commit_ts));
    assert_eq!(store.latest(BOB).unwrap(), 2005);
}

#[test]
fn enabled_stats_account_store_hold_time() {
    let stats = LockStats::new(true);
    let store = VersionStore::with_stats(accounts(), Arc::clone(&stats)).unwrap();

    let mut txn = store.begin(1).unwrap();
    txn.read(&store, ALICE).unwrap();
    txn.apply_delta(&store, BOB, 10).unwrap();
    txn.commit(&store).unwrap();

    let counters = store.stats().version_store;
    assert!(counters.acquires >= 4);
    assert!(counters.hold_ns > 0);
    assert_eq!(stats.snapshot().lock_table.acquires, 0);
}
