//! Runs one workload through both protocols and compares the outcomes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::core::errors::Result;
use crate::engine::config::SimulationConfig;
use crate::registry::ResourceRegistry;
use crate::runner::{run_workload, Protocol, RunReport, TxnScript};

/// Aggregates for one protocol run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolMetrics {
    pub protocol: Protocol,
    #[serde(rename = "duration_us", serialize_with = "serialize_micros")]
    pub duration: Duration,
    pub conflicts: usize,
    pub aborts: usize,
    pub commits: usize,
    pub lost_updates: usize,
}

fn serialize_micros<S: serde::Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_micros() as u64)
}

impl From<&RunReport> for ProtocolMetrics {
    fn from(report: &RunReport) -> Self {
        Self {
            protocol: report.protocol,
            duration: report.duration,
            conflicts: report.conflicts,
            aborts: report.aborts,
            commits: report.commits,
            lost_updates: report.lost_updates,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub two_phase_locking: ProtocolMetrics,
    pub mvcc: ProtocolMetrics,
    pub faster: Protocol,
    /// `|1 - mvcc / 2pl| * 100`, or 0 when the 2PL run took no measurable time.
    pub difference_pct: f64,
    pub conflict_difference: usize,
    pub abort_difference: usize,
    pub reports: Vec<RunReport>,
}

impl Comparison {
    pub fn from_reports(two_phase: RunReport, mvcc: RunReport) -> Self {
        let two_phase_locking = ProtocolMetrics::from(&two_phase);
        let mvcc_metrics = ProtocolMetrics::from(&mvcc);
        let faster = if mvcc_metrics.duration < two_phase_locking.duration {
            Protocol::Mvcc
        } else {
            Protocol::TwoPhaseLocking
        };
        Self {
            faster,
            difference_pct: difference_pct(two_phase_locking.duration, mvcc_metrics.duration),
            conflict_difference: two_phase_locking.conflicts.abs_diff(mvcc_metrics.conflicts),
            abort_difference: two_phase_locking.aborts.abs_diff(mvcc_metrics.aborts),
            two_phase_locking,
            mvcc: mvcc_metrics,
            reports: vec![two_phase, mvcc],
        }
    }
}

pub fn difference_pct(two_phase: Duration, mvcc: Duration) -> f64 {
    let base = two_phase.as_secs_f64();
    if base == 0.0 {
        return 0.0;
    }
    (1.0 - mvcc.as_secs_f64() / base).abs() * 100.0
}

/// Run `scripts` under 2PL and then MVCC, each from the registry's baseline values.
///
/// The registry is left holding the MVCC run's final values.
pub fn compare(
    registry: &Arc<ResourceRegistry>,
    scripts: &[TxnScript],
    config: &SimulationConfig,
) -> Result<Comparison> {
    registry.reset();
    let two_phase = run_workload(registry, Protocol::TwoPhaseLocking, scripts, config)?;
    registry.reset();
    let mvcc = run_workload(registry, Protocol::Mvcc, scripts, config)?;

    let comparison = Comparison::from_reports(two_phase, mvcc);
    info!(
        faster = %comparison.faster,
        difference_pct = comparison.difference_pct,
        conflict_difference = comparison.conflict_difference,
        abort_difference = comparison.abort_difference,
        "protocol comparison finished"
    );
    Ok(comparison)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difference_is_relative_to_two_phase_locking() {
        let pct = difference_pct(Duration::from_millis(200), Duration::from_millis(150));
        assert!((pct - 25.0).abs() < 1e-9);
        let pct = difference_pct(Duration::from_millis(100), Duration::from_millis(150));
        assert!((pct - 50.0).abs() < 1e-9);
        assert_eq!(difference_pct(Duration::ZERO, Duration::from_millis(5)), 0.0);
    }
}
