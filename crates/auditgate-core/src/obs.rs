//! Structured observability hooks for the audit lifecycle.
//!
//! Lifecycle events go through the `emit_*` functions below so field names
//! stay consistent across the crate. [`TargetSpan`] scopes log lines to one
//! URL for as long as the guard lives.

use tracing::{info, warn};

use crate::error::AttemptError;

/// RAII guard that enters a target-scoped tracing span.
pub struct TargetSpan {
    _span: tracing::span::EnteredSpan,
}

impl TargetSpan {
    pub fn enter(url: &str) -> Self {
        let span = tracing::info_span!("auditgate.target", url = %url);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_target_started(url: &str, runs: u32) {
    info!(event = "target.started", url = %url, runs = runs);
}

pub fn emit_attempt_succeeded(url: &str, attempt: u32, duration_ms: u64) {
    info!(
        event = "attempt.finished",
        url = %url,
        attempt = attempt,
        duration_ms = duration_ms,
        success = true,
    );
}

pub fn emit_attempt_failed(url: &str, attempt: u32, duration_ms: u64, error: &AttemptError) {
    warn!(
        event = "attempt.finished",
        url = %url,
        attempt = attempt,
        duration_ms = duration_ms,
        success = false,
        kind = %error.kind,
        error = %error.message,
    );
}

/// Target finished; `representative` is `None` when the target failed.
pub fn emit_target_finished(url: &str, succeeded: usize, total: usize, representative: Option<u32>) {
    info!(
        event = "target.finished",
        url = %url,
        succeeded = succeeded,
        total = total,
        representative = ?representative,
    );
}

pub fn emit_assertion_failed(url: &str, key: &str, observed: Option<f64>, threshold: f64) {
    warn!(
        event = "assertion.failed",
        url = %url,
        key = %key,
        observed = ?observed,
        threshold = threshold,
    );
}

pub fn emit_verdict_reduced(run_id: &str, targets: usize, failed_targets: usize, passed: bool) {
    info!(
        event = "verdict.reduced",
        run_id = %run_id,
        targets = targets,
        failed_targets = failed_targets,
        passed = passed,
    );
}
