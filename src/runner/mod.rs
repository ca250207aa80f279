//! Drives transaction scripts through one protocol and records what happened.
//!
//! Both protocols are written as steppers: one call to `step` performs one
//! intent (or the commit) of one transaction. The serial and interleaved
//! schedules are then just different orders of calling `step`. The threaded
//! schedule runs each script on its own thread instead.

mod event;
mod mvcc;
mod two_phase;
mod workload;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::info;
use uuid::Uuid;

use crate::core::errors::Result;
use crate::core::lock_stats::{LockStats, LockStatsSnapshot};
use crate::core::{ResourceId, TxnId, Value};
use crate::engine::config::{Schedule, SimulationConfig};
use crate::mvcc::Version;
use crate::registry::{ResourceRegistry, ResourceState};

pub use event::{Event, EventKind};
pub use workload::{Op, OpKind, Protocol, TxnScript, Workload};

pub(crate) use event::Timeline;
pub(crate) use workload::{resolve_scripts, Intent, ResolvedScript};

/// What one call to `Stepper::step` achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Advanced,
    Blocked,
    /// The transaction committed or aborted; further steps are no-ops.
    Finished,
}

pub(crate) trait Stepper {
    /// Run the next intent of transaction `slot`; the first call starts it.
    fn step(&mut self, slot: usize, timeline: &Timeline) -> Result<Progress>;

    /// Called when a whole round made no progress.
    fn stalled(&mut self, timeline: &Timeline) -> Result<()>;
}

pub(crate) fn drive<S: Stepper>(
    stepper: &mut S,
    slots: usize,
    schedule: Schedule,
    timeline: &Timeline,
) -> Result<()> {
    if schedule == Schedule::Serial {
        for slot in 0..slots {
            loop {
                match stepper.step(slot, timeline)? {
                    Progress::Finished => break,
                    Progress::Advanced => {}
                    Progress::Blocked => stepper.stalled(timeline)?,
                }
            }
        }
        return Ok(());
    }

    let mut finished = vec![false; slots];
    while finished.iter().any(|done| !done) {
        let mut progressed = false;
        for slot in 0..slots {
            if finished[slot] {
                continue;
            }
            match stepper.step(slot, timeline)? {
                Progress::Finished => {
                    finished[slot] = true;
                    progressed = true;
                }
                Progress::Advanced => progressed = true,
                Progress::Blocked => {}
            }
        }
        if !progressed {
            stepper.stalled(timeline)?;
        }
    }
    Ok(())
}

/// Everything observed during one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub protocol: Protocol,
    pub schedule: Schedule,
    pub timeline: Vec<Event>,
    pub final_state: Vec<ResourceState>,
    pub commits: usize,
    pub conflicts: usize,
    pub aborts: usize,
    pub deadlocks: usize,
    /// Resources whose final value differs from start + committed deltas.
    pub lost_updates: usize,
    #[serde(rename = "duration_us", serialize_with = "serialize_micros")]
    pub duration: Duration,
    /// Committed versions (MVCC only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<Version>,
    pub lock_stats: LockStatsSnapshot,
}

fn serialize_micros<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_micros() as u64)
}

impl RunReport {
    pub fn committed(&self) -> BTreeSet<TxnId> {
        txns_where(&self.timeline, Event::is_commit)
    }

    pub fn aborted(&self) -> BTreeSet<TxnId> {
        txns_where(&self.timeline, Event::is_abort)
    }

    pub fn value_of(&self, name: &str) -> Option<Value> {
        self.final_state
            .iter()
            .find(|state| state.name == name)
            .map(|state| state.value)
    }

    /// Human-readable timeline, one line per event.
    pub fn describe(&self) -> Vec<String> {
        self.timeline.iter().map(ToString::to_string).collect()
    }
}

fn txns_where(timeline: &[Event], pred: fn(&Event) -> bool) -> BTreeSet<TxnId> {
    timeline.iter().filter(|event| pred(event)).map(|event| event.txn).collect()
}

/// Run `scripts` against the registry's current values under `protocol`.
///
/// Scripts are validated before anything runs. Committed writes are left in
/// the registry; callers that want a clean slate reset it first.
pub fn run_workload(
    registry: &Arc<ResourceRegistry>,
    protocol: Protocol,
    scripts: &[TxnScript],
    config: &SimulationConfig,
) -> Result<RunReport> {
    let resolved = resolve_scripts(registry, scripts)?;
    let start_state = registry.snapshot();
    let stats = LockStats::new(config.lock_stats_enabled);
    info!(%protocol, schedule = ?config.schedule, transactions = scripts.len(), "run started");

    let started = Instant::now();
    let (timeline, versions) = match protocol {
        Protocol::TwoPhaseLocking => (
            two_phase::run(registry, &resolved, config, &stats)?,
            Vec::new(),
        ),
        Protocol::Mvcc => mvcc::run(registry, &resolved, config, &stats)?,
    };
    let duration = started.elapsed();

    let final_state = registry.snapshot();
    let committed = txns_where(&timeline, Event::is_commit);
    let lost_updates = count_lost_updates(&start_state, &final_state, &resolved, &committed);
    let report = RunReport {
        run_id: None,
        protocol,
        schedule: config.schedule,
        commits: committed.len(),
        conflicts: timeline.iter().filter(|e| e.is_conflict()).count(),
        aborts: timeline.iter().filter(|e| e.is_abort()).count(),
        deadlocks: timeline
            .iter()
            .filter(|e| matches!(e.kind, EventKind::DeadlockDetected { .. }))
            .count(),
        lost_updates,
        timeline,
        final_state,
        duration,
        versions,
        lock_stats: stats.snapshot(),
    };
    info!(
        %protocol,
        commits = report.commits,
        conflicts = report.conflicts,
        aborts = report.aborts,
        lost_updates = report.lost_updates,
        duration_us = report.duration.as_micros() as u64,
        "run finished"
    );
    Ok(report)
}

fn count_lost_updates(
    start: &[ResourceState],
    finish: &[ResourceState],
    scripts: &[ResolvedScript],
    committed: &BTreeSet<TxnId>,
) -> usize {
    let mut expected: BTreeMap<ResourceId, Value> =
        start.iter().map(|state| (state.id, state.value)).collect();
    for script in scripts.iter().filter(|s| committed.contains(&s.id)) {
        for intent in script.intents.iter().filter(|i| i.kind == OpKind::Write) {
            let value = expected.entry(intent.resource).or_default();
            *value = value.saturating_add(intent.delta);
        }
    }
    finish
        .iter()
        .filter(|state| expected.get(&state.id) != Some(&state.value))
        .count()
}
