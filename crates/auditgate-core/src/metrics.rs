//! Global atomic counters for audit runs.
//!
//! Counters are process-wide and only ever grow (except through
//! [`Metrics::reset`]). A pipeline run takes a [`MetricsSnapshot`] when it
//! starts and reports what it added with [`Metrics::flush_since`], so
//! back-to-back runs in one process each log their own counts.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    attempts_started: AtomicU64,
    attempts_failed: AtomicU64,
    targets_failed: AtomicU64,
    assertions_failed: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub attempts_started: u64,
    pub attempts_failed: u64,
    pub targets_failed: u64,
    pub assertions_failed: u64,
}

impl MetricsSnapshot {
    /// Counts accumulated since `earlier`.
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts_started: self.attempts_started.saturating_sub(earlier.attempts_started),
            attempts_failed: self.attempts_failed.saturating_sub(earlier.attempts_failed),
            targets_failed: self.targets_failed.saturating_sub(earlier.targets_failed),
            assertions_failed: self.assertions_failed.saturating_sub(earlier.assertions_failed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// All counters at zero.
    pub const fn new() -> Self {
        Self {
            attempts_started: AtomicU64::new(0),
            attempts_failed: AtomicU64::new(0),
            targets_failed: AtomicU64::new(0),
            assertions_failed: AtomicU64::new(0),
        }
    }

    /// Record an engine invocation about to start.
    pub fn inc_attempts_started(&self) {
        self.attempts_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "attempts_started", "counter incremented");
    }

    /// Record an attempt that ended in any failure kind.
    pub fn inc_attempts_failed(&self) {
        self.attempts_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "attempts_failed", "counter incremented");
    }

    /// Record a target that produced no representative run.
    pub fn inc_targets_failed(&self) {
        self.targets_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "targets_failed", "counter incremented");
    }

    /// Record `n` failed budget assertions.
    pub fn add_assertions_failed(&self, n: u64) {
        self.assertions_failed.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "assertions_failed", n, "counter incremented");
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts_started: self.attempts_started(),
            attempts_failed: self.attempts_failed(),
            targets_failed: self.targets_failed(),
            assertions_failed: self.assertions_failed(),
        }
    }

    /// Emit the counts added since `baseline` as a single `info!` event.
    ///
    /// Runs overlapping in the same process are not separated.
    pub fn flush_since(&self, baseline: &MetricsSnapshot) -> MetricsSnapshot {
        let delta = self.snapshot().since(baseline);
        tracing::info!(
            metric = "flush",
            scope = "run",
            attempts_started = delta.attempts_started,
            attempts_failed = delta.attempts_failed,
            targets_failed = delta.targets_failed,
            assertions_failed = delta.assertions_failed,
        );
        delta
    }

    /// Engine invocations started.
    pub fn attempts_started(&self) -> u64 {
        self.attempts_started.load(Ordering::Relaxed)
    }

    /// Attempts that failed, whatever the kind.
    pub fn attempts_failed(&self) -> u64 {
        self.attempts_failed.load(Ordering::Relaxed)
    }

    /// Targets without a representative run.
    pub fn targets_failed(&self) -> u64 {
        self.targets_failed.load(Ordering::Relaxed)
    }

    /// Budget assertions with status `fail`.
    pub fn assertions_failed(&self) -> u64 {
        self.assertions_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.attempts_started.store(0, Ordering::Relaxed);
        self.attempts_failed.store(0, Ordering::Relaxed);
        self.targets_failed.store(0, Ordering::Relaxed);
        self.assertions_failed.store(0, Ordering::Relaxed);
    }
}
