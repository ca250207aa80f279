use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deadlock::VictimPolicyKind;

/// How the runner interleaves the transactions of a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Each transaction runs to completion before the next one starts.
    #[default]
    Serial,
    /// Round-robin, one operation per transaction per step; commit is the last step.
    Interleaved,
    /// One thread per transaction, blocking on locks.
    Threaded,
}

/// What a 2PL transaction does when a lock is held by someone else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockPolicy {
    /// Abort on the first conflict.
    #[default]
    FailFast,
    /// Queue and retry; deadlocks are broken by the detector.
    Wait,
}

/// Configuration for a simulation.
///
/// Every field has a default, so a JSON config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub schedule: Schedule,
    pub block_policy: BlockPolicy,
    pub victim_policy: VictimPolicyKind,
    /// Give up on a lock after this long (threaded schedule only). `None` waits forever.
    pub lock_timeout_ms: Option<u64>,
    /// How often the deadlock watchdog scans the lock table (threaded schedule only).
    pub deadlock_check_interval_ms: u64,
    /// Enable collection of lock wait/hold counters.
    pub lock_stats_enabled: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            schedule: Schedule::Serial,
            block_policy: BlockPolicy::FailFast,
            victim_policy: VictimPolicyKind::FirstInCycle,
            lock_timeout_ms: Some(1_000),
            deadlock_check_interval_ms: 10,
            lock_stats_enabled: false,
        }
    }
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn block_policy(mut self, policy: BlockPolicy) -> Self {
        self.block_policy = policy;
        self
    }

    pub fn victim_policy(mut self, policy: VictimPolicyKind) -> Self {
        self.victim_policy = policy;
        self
    }

    pub fn lock_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn deadlock_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.deadlock_check_interval_ms = interval_ms;
        self
    }

    pub fn lock_stats_enabled(mut self, enabled: bool) -> Self {
        self.lock_stats_enabled = enabled;
        self
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    pub fn deadlock_check_interval(&self) -> Duration {
        Duration::from_millis(self.deadlock_check_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{"schedule": "interleaved", "block_policy": "wait"}"#).unwrap();
        assert_eq!(config.schedule, Schedule::Interleaved);
        assert_eq!(config.block_policy, BlockPolicy::Wait);
        assert_eq!(config.victim_policy, VictimPolicyKind::FirstInCycle);
        assert_eq!(config.lock_timeout(), Some(Duration::from_secs(1)));
        assert!(!config.lock_stats_enabled);
    }

    #[test]
    fn builder_overrides() {
        let config = SimulationConfig::new()
            .victim_policy(VictimPolicyKind::Youngest)
            .lock_timeout_ms(None)
            .deadlock_check_interval_ms(0);
        assert_eq!(config.victim_policy, VictimPolicyKind::Youngest);
        assert_eq!(config.lock_timeout(), None);
        assert_eq!(config.deadlock_check_interval(), Duration::from_millis(1));
    }
}
