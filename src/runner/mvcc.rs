use std::panic;
use std::sync::Arc;
use std::thread;

use crate::core::errors::{Result, TxnLabError};
use crate::core::lock_stats::LockStats;
use crate::core::TxnId;
use crate::engine::config::{Schedule, SimulationConfig};
use crate::mvcc::{DeltaWrite, MvccTransaction, Version, VersionStore};
use crate::registry::ResourceRegistry;

use super::{drive, Event, EventKind, OpKind, Progress, Protocol, ResolvedScript, Stepper, Timeline};

pub(super) fn run(
    registry: &Arc<ResourceRegistry>,
    scripts: &[ResolvedScript],
    config: &SimulationConfig,
    stats: &Arc<LockStats>,
) -> Result<(Vec<Event>, Vec<Version>)> {
    let store = VersionStore::with_stats(Arc::clone(registry), Arc::clone(stats))?;
    let timeline = Timeline::new();
    let mut workers: Vec<Worker<'_>> = scripts.iter().map(Worker::new).collect();

    match config.schedule {
        Schedule::Serial | Schedule::Interleaved => {
            let mut stepper = MvccStepper {
                registry,
                store: &store,
                workers,
            };
            drive(&mut stepper, scripts.len(), config.schedule, &timeline)?;
        }
        Schedule::Threaded => {
            let results: Vec<Result<()>> = thread::scope(|scope| {
                let handles: Vec<_> = workers
                    .iter_mut()
                    .map(|worker| {
                        let (store, timeline) = (&store, &timeline);
                        scope.spawn(move || worker.run_to_end(registry, store, timeline))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
                    .collect()
            });
            results.into_iter().collect::<Result<()>>()?;
        }
    }
    Ok((timeline.into_events(), store.all_versions()))
}

/// One MVCC transaction being driven through its script.
#[derive(Debug)]
struct Worker<'a> {
    script: &'a ResolvedScript,
    txn: Option<MvccTransaction>,
    next: usize,
    done: bool,
}

impl<'a> Worker<'a> {
    fn new(script: &'a ResolvedScript) -> Self {
        Self {
            script,
            txn: None,
            next: 0,
            done: false,
        }
    }

    fn run_to_end(&mut self, registry: &ResourceRegistry, store: &VersionStore, timeline: &Timeline) -> Result<()> {
        while self.step(registry, store, timeline)? != Progress::Finished {}
        Ok(())
    }

    fn step(&mut self, registry: &ResourceRegistry, store: &VersionStore, timeline: &Timeline) -> Result<Progress> {
        let id = self.script.id;
        if self.done {
            return Ok(Progress::Finished);
        }
        let Some(txn) = self.txn.as_mut() else {
            let txn = store.begin(id)?;
            timeline.push(
                id,
                EventKind::Started {
                    protocol: Protocol::Mvcc,
                    start_ts: Some(txn.start_ts()),
                },
            );
            self.txn = Some(txn);
            return Ok(Progress::Advanced);
        };

        let Some(intent) = self.script.intents.get(self.next) else {
            self.done = true;
            match txn.commit(store) {
                Ok(commit_ts) => timeline.push(id, EventKind::Committed { commit_ts }),
                Err(TxnLabError::WriteConflict {
                    resource,
                    committed_by,
                    ..
                }) => {
                    let name = registry.name(resource)?.to_string();
                    conflict(id, name, committed_by, timeline);
                }
                Err(err) => return Err(err),
            }
            return Ok(Progress::Finished);
        };

        match intent.kind {
            OpKind::Read => {
                let record = txn.read(store, intent.resource)?;
                timeline.push(
                    id,
                    EventKind::Read {
                        resource: intent.name.clone(),
                        value: record.value,
                        version_ts: Some(record.version_ts),
                    },
                );
            }
            OpKind::Write => match txn.apply_delta(store, intent.resource, intent.delta) {
                Ok(DeltaWrite { before, after }) => timeline.push(
                    id,
                    EventKind::Write {
                        resource: intent.name.clone(),
                        before,
                        after,
                        delta: intent.delta,
                    },
                ),
                Err(TxnLabError::WriteConflict { committed_by, .. }) => {
                    conflict(id, intent.name.clone(), committed_by, timeline);
                    self.done = true;
                    return Ok(Progress::Finished);
                }
                Err(err) => return Err(err),
            },
        }
        self.next += 1;
        Ok(Progress::Advanced)
    }
}

/// The version store already aborted the transaction; record why.
fn conflict(txn: TxnId, resource: String, committed_by: TxnId, timeline: &Timeline) {
    let reason = format!("write conflict on {resource} with T{committed_by}");
    timeline.push(
        txn,
        EventKind::WriteConflict {
            resource,
            committed_by,
        },
    );
    timeline.push(txn, EventKind::Aborted { reason });
}

struct MvccStepper<'a> {
    registry: &'a ResourceRegistry,
    store: &'a VersionStore,
    workers: Vec<Worker<'a>>,
}

impl Stepper for MvccStepper<'_> {
    fn step(&mut self, slot: usize, timeline: &Timeline) -> Result<Progress> {
        self.workers[slot].step(self.registry, self.store, timeline)
    }

    /// Snapshot reads and writes never wait, so there is nothing to break.
    fn stalled(&mut self, _timeline: &Timeline) -> Result<()> {
        Ok(())
    }
}
