//! Single audit invocation with timeout, cancellation and failure capture.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};

use crate::cancel::CancelToken;
use crate::config::AuditTarget;
use crate::engine::AuditEngine;
use crate::error::{AttemptError, FailureKind};
use crate::metrics::METRICS;
use crate::obs;
use crate::result::AuditResult;

/// Upper bound for deadlines; roughly thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success { result: AuditResult },
    Failure { error: AttemptError },
}

/// One engine invocation for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditAttempt {
    pub url: String,
    pub attempt_index: u32,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
}

impl AuditAttempt {
    /// True when the engine delivered a result without a runtime error.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }

    /// The classified failure, if the attempt failed.
    pub fn error(&self) -> Option<&AttemptError> {
        match &self.outcome {
            AttemptOutcome::Failure { error } => Some(error),
            AttemptOutcome::Success { .. } => None,
        }
    }
}

/// Runs the engine once per call and never lets a failure escape.
pub struct AuditInvoker {
    engine: Arc<dyn AuditEngine>,
    timeout: Duration,
    cancel_grace: Duration,
}

impl AuditInvoker {
    /// `timeout` bounds each attempt; `cancel_grace` is how long an in-flight
    /// attempt may keep running once cancellation is raised.
    pub fn new(engine: Arc<dyn AuditEngine>, timeout: Duration, cancel_grace: Duration) -> Self {
        Self {
            engine,
            timeout,
            cancel_grace,
        }
    }

    /// Run attempt `attempt_index` for `target`.
    ///
    /// The engine future is dropped (tearing down its process) when the
    /// attempt times out, or when cancellation is raised and the grace
    /// period elapses first.
    pub async fn invoke(
        &self,
        target: &AuditTarget,
        attempt_index: u32,
        cancel: &CancelToken,
    ) -> AuditAttempt {
        let start = Instant::now();
        let deadline = deadline_after(start, self.timeout);
        METRICS.inc_attempts_started();

        let run = AssertUnwindSafe(self.engine.audit(&target.url, &target.engine)).catch_unwind();
        tokio::pin!(run);

        let finished = tokio::select! {
            res = timeout_at(deadline, &mut run) => res.map_err(|_| self.timeout_error()),
            _ = cancel.cancelled() => {
                let grace_deadline = deadline.min(deadline_after(Instant::now(), self.cancel_grace));
                match timeout_at(grace_deadline, &mut run).await {
                    Ok(res) => Ok(res),
                    Err(_) if grace_deadline == deadline => Err(self.timeout_error()),
                    Err(_) => Err(AttemptError::cancelled()),
                }
            }
        };

        let outcome = match finished {
            Err(error) => AttemptOutcome::Failure { error },
            Ok(Err(panic)) => AttemptOutcome::Failure {
                error: AttemptError::new(
                    FailureKind::EngineCrash,
                    format!("audit engine panicked: {}", panic_message(panic.as_ref())),
                ),
            },
            Ok(Ok(Err(engine_err))) => AttemptOutcome::Failure {
                error: engine_err.into(),
            },
            Ok(Ok(Ok(result))) => match &result.runtime_error {
                Some(rt) => AttemptOutcome::Failure {
                    error: AttemptError::new(
                        FailureKind::RuntimeMeasurementError,
                        format!("{}: {}", rt.code, rt.message),
                    ),
                },
                None => AttemptOutcome::Success { result },
            },
        };

        let attempt = AuditAttempt {
            url: target.url.clone(),
            attempt_index,
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if let Some(error) = attempt.error() {
            METRICS.inc_attempts_failed();
            obs::emit_attempt_failed(&attempt.url, attempt_index, attempt.duration_ms, error);
        } else {
            obs::emit_attempt_succeeded(&attempt.url, attempt_index, attempt.duration_ms);
        }
        attempt
    }

    fn timeout_error(&self) -> AttemptError {
        AttemptError::new(
            FailureKind::Timeout,
            format!("attempt exceeded {}s", self.timeout.as_secs_f64()),
        )
    }
}

/// `base + after` with `after` capped at [`FAR_FUTURE`], so huge timeouts
/// mean "effectively never" instead of overflowing the clock.
fn deadline_after(base: Instant, after: Duration) -> Instant {
    base.checked_add(after.min(FAR_FUTURE)).unwrap_or(base)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
