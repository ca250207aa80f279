use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Which internal mutex a measurement belongs to.
#[derive(Debug, Clone, Copy)]
pub enum LockStatKind {
    LockTable,
    VersionStore,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct LockCounterSnapshot {
    pub acquires: u64,
    pub wait_ns: u64,
    pub hold_ns: u64,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct LockStatsSnapshot {
    pub lock_table: LockCounterSnapshot,
    pub version_store: LockCounterSnapshot,
}

#[derive(Debug, Default)]
struct LockCounter {
    acquires: AtomicU64,
    wait_ns: AtomicU64,
    hold_ns: AtomicU64,
}

impl LockCounter {
    fn record_wait(&self, wait: Duration) {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        self.wait_ns
            .fetch_add(duration_as_u64_ns(wait), Ordering::Relaxed);
    }

    fn record_hold(&self, hold: Duration) {
        self.hold_ns
            .fetch_add(duration_as_u64_ns(hold), Ordering::Relaxed);
    }

    fn snapshot(&self) -> LockCounterSnapshot {
        LockCounterSnapshot {
            acquires: self.acquires.load(Ordering::Relaxed),
            wait_ns: self.wait_ns.load(Ordering::Relaxed),
            hold_ns: self.hold_ns.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.acquires.store(0, Ordering::Relaxed);
        self.wait_ns.store(0, Ordering::Relaxed);
        self.hold_ns.store(0, Ordering::Relaxed);
    }
}

/// Contention counters for the engine's internal mutexes.
///
/// Each simulation owns its own instance so independent runs never mix their
/// numbers. Whether anything is counted is fixed when the instance is created.
#[derive(Debug, Default)]
pub struct LockStats {
    enabled: AtomicBool,
    lock_table: LockCounter,
    version_store: LockCounter,
}

impl LockStats {
    pub fn new(enabled: bool) -> Arc<Self> {
        let stats = Self::default();
        stats.enabled.store(enabled, Ordering::Relaxed);
        Arc::new(stats)
    }

    fn counter(&self, kind: LockStatKind) -> &LockCounter {
        match kind {
            LockStatKind::LockTable => &self.lock_table,
            LockStatKind::VersionStore => &self.version_store,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.lock_table.reset();
        self.version_store.reset();
    }

    pub fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot {
            lock_table: self.lock_table.snapshot(),
            version_store: self.version_store.snapshot(),
        }
    }

    pub fn record_wait(&self, kind: LockStatKind, wait: Duration) {
        if !self.enabled() {
            return;
        }
        self.counter(kind).record_wait(wait);
    }

    pub fn begin_hold(self: &Arc<Self>, kind: LockStatKind) -> LockHoldGuard {
        LockHoldGuard {
            stats: Arc::clone(self),
            kind,
            start: Instant::now(),
            enabled: self.enabled(),
        }
    }
}

pub struct LockHoldGuard {
    stats: Arc<LockStats>,
    kind: LockStatKind,
    start: Instant,
    enabled: bool,
}

impl Drop for LockHoldGuard {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        self.stats
            .counter(self.kind)
            .record_hold(self.start.elapsed());
    }
}

fn duration_as_u64_ns(duration: Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}
