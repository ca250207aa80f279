use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::info;

use crate::lock::LockManager;

use super::detector::{DeadlockDetector, Resolution};

/// Background thread that periodically breaks deadlocks in a shared lock manager.
///
/// Stopping (explicitly or by drop) wakes the thread and joins it.
#[derive(Debug)]
pub struct Watchdog {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Vec<Resolution>>>,
}

impl Watchdog {
    pub fn spawn(detector: DeadlockDetector, lock_manager: Arc<LockManager>, interval: Duration) -> Self {
        Self::spawn_with(detector, lock_manager, interval, |_| {})
    }

    /// Like `spawn`, reporting each broken cycle to `on_resolve` before its
    /// victim is woken.
    pub fn spawn_with<F>(
        detector: DeadlockDetector,
        lock_manager: Arc<LockManager>,
        interval: Duration,
        mut on_resolve: F,
    ) -> Self
    where
        F: FnMut(&Resolution) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut resolved = Vec::new();
                while !stop.load(Ordering::Acquire) {
                    resolved.extend(detector.resolve_with(&lock_manager, &mut on_resolve));
                    thread::park_timeout(interval);
                }
                resolved
            })
        };
        info!(?interval, "deadlock watchdog started");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the watchdog and return every cycle it broke.
    pub fn stop(mut self) -> Vec<Resolution> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Vec<Resolution> {
        self.stop.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return Vec::new();
        };
        handle.thread().unpark();
        let resolved = handle.join().unwrap_or_default();
        info!(resolved = resolved.len(), "deadlock watchdog stopped");
        resolved
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}
