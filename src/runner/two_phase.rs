use std::collections::BTreeMap;
use std::panic;
use std::sync::Arc;
use std::thread;

use tracing::warn;

use crate::core::errors::{Result, TxnLabError};
use crate::core::lock_stats::LockStats;
use crate::core::{ResourceId, TxnId, Value};
use crate::deadlock::{DeadlockDetector, Watchdog};
use crate::engine::config::{BlockPolicy, Schedule, SimulationConfig};
use crate::lock::{LockManager, LockMode, LockOutcome, Phase};
use crate::registry::ResourceRegistry;

use super::{drive, Event, EventKind, Intent, OpKind, Progress, Protocol, ResolvedScript, Stepper, Timeline};

pub(super) fn run(
    registry: &ResourceRegistry,
    scripts: &[ResolvedScript],
    config: &SimulationConfig,
    stats: &Arc<LockStats>,
) -> Result<Vec<Event>> {
    let locks = Arc::new(LockManager::with_stats(Arc::clone(stats)));
    let timeline = Timeline::new();
    match config.schedule {
        Schedule::Serial | Schedule::Interleaved => {
            let mut stepper = TwoPhaseStepper {
                registry,
                locks: &locks,
                detector: DeadlockDetector::with_policy(config.victim_policy),
                policy: config.block_policy,
                slots: scripts.iter().map(TxnSlot::new).collect(),
            };
            drive(&mut stepper, scripts.len(), config.schedule, &timeline)?;
        }
        Schedule::Threaded => run_threaded(registry, scripts, config, &locks, &timeline)?,
    }
    Ok(timeline.into_events())
}

fn mode_for(kind: OpKind) -> LockMode {
    match kind {
        OpKind::Read => LockMode::Shared,
        OpKind::Write => LockMode::Exclusive,
    }
}

/// Event for a grant, given what was held before. `None` when nothing changed.
fn grant_event(intent: &Intent, before: Option<LockMode>, mode: LockMode) -> Option<EventKind> {
    match before {
        Some(held) if held.covers(mode) => None,
        Some(_) => Some(EventKind::LockUpgraded {
            resource: intent.name.clone(),
        }),
        None => Some(EventKind::LockAcquired {
            resource: intent.name.clone(),
            mode,
        }),
    }
}

/// The data part of an intent, once its lock is held. Writes are deferred to commit.
fn perform(registry: &ResourceRegistry, txn: TxnId, intent: &Intent, timeline: &Timeline) -> Result<()> {
    if intent.kind == OpKind::Read {
        let value = registry.value(intent.resource)?;
        timeline.push(
            txn,
            EventKind::Read {
                resource: intent.name.clone(),
                value,
                version_ts: None,
            },
        );
    }
    Ok(())
}

/// Apply the deferred writes, release every lock and commit.
fn finish(
    registry: &ResourceRegistry,
    locks: &LockManager,
    script: &ResolvedScript,
    timeline: &Timeline,
) -> Result<()> {
    let txn = script.id;
    let mut staged: BTreeMap<ResourceId, Value> = BTreeMap::new();
    let mut writes = Vec::new();
    for intent in script.intents.iter().filter(|i| i.kind == OpKind::Write) {
        let before = match staged.get(&intent.resource) {
            Some(value) => *value,
            None => registry.value(intent.resource)?,
        };
        let after = before.checked_add(intent.delta).ok_or_else(|| {
            TxnLabError::InvalidWorkload(format!(
                "T{txn}: {before} + {} overflows {}",
                intent.delta, intent.name
            ))
        })?;
        staged.insert(intent.resource, after);
        writes.push(EventKind::Write {
            resource: intent.name.clone(),
            before,
            after,
            delta: intent.delta,
        });
    }
    for (resource, value) in &staged {
        registry.set_value(*resource, *value)?;
    }
    for write in writes {
        timeline.push(txn, write);
    }

    for resource in locks.release_all(txn)? {
        timeline.push(
            txn,
            EventKind::LockReleased {
                resource: registry.name(resource)?.to_string(),
            },
        );
    }
    locks.commit(txn)?;
    timeline.push(txn, EventKind::Committed { commit_ts: None });
    Ok(())
}

fn abort(locks: &LockManager, txn: TxnId, reason: String, timeline: &Timeline) {
    locks.abort(txn);
    timeline.push(txn, EventKind::Aborted { reason });
}

/// The lock manager already aborted the transaction; record why.
fn violation(txn: TxnId, intent: &Intent, timeline: &Timeline) {
    timeline.push(
        txn,
        EventKind::ProtocolViolation {
            resource: intent.name.clone(),
        },
    );
    timeline.push(
        txn,
        EventKind::Aborted {
            reason: "two-phase locking violation".to_string(),
        },
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Running,
    Waiting { upgrade: bool },
    Done,
}

#[derive(Debug)]
struct TxnSlot<'a> {
    script: &'a ResolvedScript,
    next: usize,
    state: SlotState,
}

impl<'a> TxnSlot<'a> {
    fn new(script: &'a ResolvedScript) -> Self {
        Self {
            script,
            next: 0,
            state: SlotState::Pending,
        }
    }
}

struct TwoPhaseStepper<'a> {
    registry: &'a ResourceRegistry,
    locks: &'a LockManager,
    detector: DeadlockDetector,
    policy: BlockPolicy,
    slots: Vec<TxnSlot<'a>>,
}

impl Stepper for TwoPhaseStepper<'_> {
    fn step(&mut self, slot: usize, timeline: &Timeline) -> Result<Progress> {
        let Self {
            registry,
            locks,
            policy,
            slots,
            ..
        } = self;
        let txn_slot = &mut slots[slot];
        let txn = txn_slot.script.id;

        match txn_slot.state {
            SlotState::Done => return Ok(Progress::Finished),
            SlotState::Pending => {
                locks.begin(txn)?;
                timeline.push(
                    txn,
                    EventKind::Started {
                        protocol: Protocol::TwoPhaseLocking,
                        start_ts: None,
                    },
                );
                txn_slot.state = SlotState::Running;
                return Ok(Progress::Advanced);
            }
            SlotState::Running | SlotState::Waiting { .. } => {}
        }
        if locks.phase(txn) == Some(Phase::Aborted) {
            txn_slot.state = SlotState::Done;
            return Ok(Progress::Finished);
        }

        let Some(intent) = txn_slot.script.intents.get(txn_slot.next) else {
            finish(registry, locks, txn_slot.script, timeline)?;
            txn_slot.state = SlotState::Done;
            return Ok(Progress::Finished);
        };
        let mode = mode_for(intent.kind);

        if let SlotState::Waiting { upgrade } = txn_slot.state {
            if !locks.holds(txn, intent.resource, mode) {
                return Ok(Progress::Blocked);
            }
            let before = upgrade.then_some(LockMode::Shared);
            if let Some(event) = grant_event(intent, before, mode) {
                timeline.push(txn, event);
            }
        } else {
            let before = locks.held_mode(txn, intent.resource);
            let outcome = match policy {
                BlockPolicy::Wait => locks.acquire(txn, intent.resource, mode),
                BlockPolicy::FailFast => locks.try_acquire(txn, intent.resource, mode),
            };
            match outcome {
                Ok(LockOutcome::Granted) => {
                    if let Some(event) = grant_event(intent, before, mode) {
                        timeline.push(txn, event);
                    }
                }
                Ok(LockOutcome::Blocked { holder }) => {
                    timeline.push(
                        txn,
                        EventKind::LockWaiting {
                            resource: intent.name.clone(),
                            mode,
                            holder,
                        },
                    );
                    txn_slot.state = SlotState::Waiting {
                        upgrade: before.is_some(),
                    };
                    return Ok(Progress::Blocked);
                }
                Ok(LockOutcome::Conflict { holder }) => {
                    timeline.push(
                        txn,
                        EventKind::LockConflict {
                            resource: intent.name.clone(),
                            mode,
                            holder,
                        },
                    );
                    let conflict = TxnLabError::LockConflict {
                        txn,
                        resource: intent.resource,
                        holder,
                    };
                    abort(locks, txn, conflict.to_string(), timeline);
                    txn_slot.state = SlotState::Done;
                    return Ok(Progress::Finished);
                }
                Err(TxnLabError::ProtocolViolation { .. }) => {
                    violation(txn, intent, timeline);
                    txn_slot.state = SlotState::Done;
                    return Ok(Progress::Finished);
                }
                Err(err) => return Err(err),
            }
        }

        perform(registry, txn, intent, timeline)?;
        txn_slot.state = SlotState::Running;
        txn_slot.next += 1;
        Ok(Progress::Advanced)
    }

    fn stalled(&mut self, timeline: &Timeline) -> Result<()> {
        let resolutions = self.detector.resolve(self.locks);
        for resolution in &resolutions {
            let victim = resolution.victim;
            timeline.push(
                victim,
                EventKind::DeadlockDetected {
                    cycle: resolution.cycle.clone(),
                    victim,
                },
            );
            timeline.push(
                victim,
                EventKind::Aborted {
                    reason: "deadlock victim".to_string(),
                },
            );
            if let Some(slot) = self.slots.iter_mut().find(|s| s.script.id == victim) {
                slot.state = SlotState::Done;
            }
        }
        if !resolutions.is_empty() {
            return Ok(());
        }

        // Every waiter should be part of a cycle; if none was found, give up
        // on the oldest waiter rather than spin.
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| matches!(s.state, SlotState::Waiting { .. }))
        {
            let txn = slot.script.id;
            warn!(txn, "no runnable transaction and no deadlock, aborting waiter");
            abort(self.locks, txn, "no runnable transaction".to_string(), timeline);
            slot.state = SlotState::Done;
        }
        Ok(())
    }
}

fn run_threaded(
    registry: &ResourceRegistry,
    scripts: &[ResolvedScript],
    config: &SimulationConfig,
    locks: &Arc<LockManager>,
    timeline: &Timeline,
) -> Result<()> {
    let watchdog = (config.block_policy == BlockPolicy::Wait).then(|| {
        let timeline = timeline.clone();
        Watchdog::spawn_with(
            DeadlockDetector::with_policy(config.victim_policy),
            Arc::clone(locks),
            config.deadlock_check_interval(),
            move |resolution| {
                timeline.push(
                    resolution.victim,
                    EventKind::DeadlockDetected {
                        cycle: resolution.cycle.clone(),
                        victim: resolution.victim,
                    },
                )
            },
        )
    });

    let results: Vec<Result<()>> = thread::scope(|scope| {
        let workers: Vec<_> = scripts
            .iter()
            .map(|script| scope.spawn(move || run_one(registry, locks, script, config, timeline)))
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect()
    });

    if let Some(watchdog) = watchdog {
        watchdog.stop();
    }
    results.into_iter().collect()
}

/// One transaction on its own thread, blocking on conflicts under the wait policy.
fn run_one(
    registry: &ResourceRegistry,
    locks: &LockManager,
    script: &ResolvedScript,
    config: &SimulationConfig,
    timeline: &Timeline,
) -> Result<()> {
    let txn = script.id;
    locks.begin(txn)?;
    timeline.push(
        txn,
        EventKind::Started {
            protocol: Protocol::TwoPhaseLocking,
            start_ts: None,
        },
    );

    for intent in &script.intents {
        let mode = mode_for(intent.kind);
        let before = locks.held_mode(txn, intent.resource);
        match locks.try_acquire(txn, intent.resource, mode) {
            Ok(LockOutcome::Granted) => {}
            Ok(LockOutcome::Conflict { holder } | LockOutcome::Blocked { holder }) => {
                if config.block_policy == BlockPolicy::FailFast {
                    timeline.push(
                        txn,
                        EventKind::LockConflict {
                            resource: intent.name.clone(),
                            mode,
                            holder,
                        },
                    );
                    let conflict = TxnLabError::LockConflict {
                        txn,
                        resource: intent.resource,
                        holder,
                    };
                    abort(locks, txn, conflict.to_string(), timeline);
                    return Ok(());
                }
                timeline.push(
                    txn,
                    EventKind::LockWaiting {
                        resource: intent.name.clone(),
                        mode,
                        holder,
                    },
                );
                match locks.acquire_blocking(txn, intent.resource, mode, config.lock_timeout()) {
                    Ok(()) => {}
                    Err(TxnLabError::Deadlock { .. }) => {
                        timeline.push(
                            txn,
                            EventKind::Aborted {
                                reason: "deadlock victim".to_string(),
                            },
                        );
                        return Ok(());
                    }
                    Err(err @ TxnLabError::Aborted(_)) => {
                        timeline.push(txn, EventKind::Aborted { reason: err.to_string() });
                        return Ok(());
                    }
                    Err(TxnLabError::LockTimeout { .. }) => {
                        let reason = format!("lock wait on {} timed out", intent.name);
                        abort(locks, txn, reason, timeline);
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(TxnLabError::ProtocolViolation { .. }) => {
                violation(txn, intent, timeline);
                return Ok(());
            }
            Err(err) => return Err(err),
        }
        if let Some(event) = grant_event(intent, before, mode) {
            timeline.push(txn, event);
        }
        perform(registry, txn, intent, timeline)?;
    }
    finish(registry, locks, script, timeline)
}
