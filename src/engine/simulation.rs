use std::sync::Arc;

use tracing::info_span;
use uuid::Uuid;

use crate::bench::{self, Comparison};
use crate::core::errors::Result;
use crate::core::lock_stats::LockStats;
use crate::deadlock::{self, DeadlockDetector, DeadlockReport, LockScript, LockScriptReport};
use crate::lock::{LockManager, LockSnapshot};
use crate::registry::{ResourceRegistry, ResourceSpec, ResourceState};
use crate::runner::{self, Protocol, RunReport, TxnScript, Workload};

use super::config::SimulationConfig;

/// A set of resources plus the configuration to run workloads against them.
///
/// Each simulation gets a random run id that tags its tracing spans and reports.
#[derive(Debug)]
pub struct Simulation {
    run_id: Uuid,
    registry: Arc<ResourceRegistry>,
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(resources: &[ResourceSpec], config: SimulationConfig) -> Result<Self> {
        Ok(Self::with_registry(
            ResourceRegistry::from_specs(resources)?,
            config,
        ))
    }

    pub fn with_registry(registry: ResourceRegistry, config: SimulationConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            registry: Arc::new(registry),
            config,
        }
    }

    /// Simulation over the workload's resources. The scripts are validated, not run.
    pub fn from_workload(workload: &Workload, config: SimulationConfig) -> Result<Self> {
        workload.validate()?;
        Self::new(&workload.resources, config)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn resources(&self) -> Vec<ResourceState> {
        self.registry.snapshot()
    }

    /// Restore every resource to its initial value.
    pub fn reset(&self) {
        self.registry.reset();
    }

    /// A lock manager wired to this simulation's lock statistics setting.
    pub fn lock_manager(&self) -> Arc<LockManager> {
        Arc::new(LockManager::with_stats(LockStats::new(
            self.config.lock_stats_enabled,
        )))
    }

    pub fn detector(&self) -> DeadlockDetector {
        DeadlockDetector::with_policy(self.config.victim_policy)
    }

    /// Run `scripts` from the current resource values.
    pub fn run_workload(&self, protocol: Protocol, scripts: &[TxnScript]) -> Result<RunReport> {
        let span = info_span!("run_workload", run_id = %self.run_id, %protocol);
        let _enter = span.enter();
        let mut report = runner::run_workload(&self.registry, protocol, scripts, &self.config)?;
        report.run_id = Some(self.run_id);
        Ok(report)
    }

    pub fn detect_deadlocks(&self, snapshot: &LockSnapshot) -> DeadlockReport {
        self.detector().detect(snapshot)
    }

    pub fn run_lock_script(&self, script: &LockScript) -> Result<LockScriptReport> {
        let span = info_span!("run_lock_script", run_id = %self.run_id);
        let _enter = span.enter();
        deadlock::run_lock_script(script, &self.detector())
    }

    /// Run `scripts` under both protocols from the initial resource values.
    pub fn compare(&self, scripts: &[TxnScript]) -> Result<Comparison> {
        let span = info_span!("compare", run_id = %self.run_id);
        let _enter = span.enter();
        let mut comparison = bench::compare(&self.registry, scripts, &self.config)?;
        for report in &mut comparison.reports {
            report.run_id = Some(self.run_id);
        }
        Ok(comparison)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios;

    #[test]
    fn runs_continue_from_current_values_until_reset() {
        let workload = scenarios::account_transfer();
        let sim = Simulation::from_workload(&workload, SimulationConfig::default()).unwrap();

        let first = sim.run_workload(Protocol::Mvcc, &workload.transactions).unwrap();
        assert_eq!(first.run_id, Some(sim.run_id()));
        assert_eq!(first.value_of("Alice"), Some(800));
        assert_eq!(first.value_of("Bob"), Some(2700));

        let second = sim.run_workload(Protocol::TwoPhaseLocking, &workload.transactions).unwrap();
        assert_eq!(second.value_of("Alice"), Some(600));

        sim.reset();
        assert_eq!(
            sim.resources().iter().map(|r| r.value).collect::<Vec<_>>(),
            vec![1000, 2000]
        );
    }

    #[test]
    fn compare_starts_both_protocols_from_baseline() {
        let workload = scenarios::account_transfer();
        let sim = Simulation::from_workload(&workload, SimulationConfig::default()).unwrap();
        sim.registry().set_value(1, 5).unwrap();

        let comparison = sim.compare(&workload.transactions).unwrap();
        for report in &comparison.reports {
            assert_eq!(report.value_of("Alice"), Some(800));
            assert_eq!(report.run_id, Some(sim.run_id()));
        }
    }
}
