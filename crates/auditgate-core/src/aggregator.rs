//! Multi-run aggregation and representative run selection.
//!
//! Attempts for one target run strictly in order. Among successful attempts
//! the lower median by the sort metric is chosen; equal values keep attempt
//! order, so the earliest attempt wins a tie.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cancel::CancelToken;
use crate::config::AuditTarget;
use crate::error::{AttemptError, FailureKind};
use crate::invoker::{AttemptOutcome, AuditInvoker};
use crate::metrics::METRICS;
use crate::obs;
use crate::result::AuditResult;

/// The successful result chosen to speak for a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeRun {
    pub attempt_index: u32,
    /// Sort metric value, `None` when the result did not report it.
    pub sort_value: Option<f64>,
    pub result: AuditResult,
}

/// Either a representative run or the reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Measured { representative: RepresentativeRun },
    Failed { error: AttemptError },
}

impl TargetOutcome {
    pub fn representative(&self) -> Option<&RepresentativeRun> {
        match self {
            TargetOutcome::Measured { representative } => Some(representative),
            TargetOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&AttemptError> {
        match self {
            TargetOutcome::Failed { error } => Some(error),
            TargetOutcome::Measured { .. } => None,
        }
    }
}

/// Bookkeeping kept for each attempt after aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_index: u32,
    pub duration_ms: u64,
    pub failure: Option<FailureKind>,
}

/// Aggregated outcome for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRun {
    pub url: String,
    pub attempts: Vec<AttemptRecord>,
    pub outcome: TargetOutcome,
}

impl TargetRun {
    /// A target that never got to run.
    pub fn failed(url: &str, error: AttemptError) -> Self {
        Self {
            url: url.to_string(),
            attempts: Vec::new(),
            outcome: TargetOutcome::Failed { error },
        }
    }
}

/// Pick the lower median of `successes` by `sort_metric`.
///
/// `successes` must be in attempt order. Results missing the metric sort
/// last. Returns `None` for an empty set.
pub fn select_median(
    successes: Vec<(u32, AuditResult)>,
    sort_metric: &str,
) -> Option<RepresentativeRun> {
    if successes.is_empty() {
        return None;
    }

    let mut keyed: Vec<(f64, u32, AuditResult)> = successes
        .into_iter()
        .map(|(idx, result)| {
            let key = result.metric(sort_metric).unwrap_or(f64::INFINITY);
            (key, idx, result)
        })
        .collect();
    // Stable: equal keys keep attempt order.
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mid = (keyed.len() - 1) / 2;
    let (_, attempt_index, result) = keyed.swap_remove(mid);
    Some(RepresentativeRun {
        attempt_index,
        sort_value: result.metric(sort_metric),
        result,
    })
}

/// Runs all attempts for a target and reduces them to one outcome.
pub struct RunAggregator {
    invoker: AuditInvoker,
    sort_metric: String,
}

impl RunAggregator {
    pub fn new(invoker: AuditInvoker, sort_metric: impl Into<String>) -> Self {
        Self {
            invoker,
            sort_metric: sort_metric.into(),
        }
    }

    /// Execute `target.runs` attempts sequentially.
    ///
    /// A target interrupted by cancellation fails with
    /// [`FailureKind::Cancelled`] even if some attempts succeeded.
    #[instrument(skip_all, fields(url = %target.url))]
    pub async fn aggregate(&self, target: &AuditTarget, cancel: &CancelToken) -> TargetRun {
        obs::emit_target_started(&target.url, target.runs);

        let mut attempts = Vec::with_capacity(target.runs as usize);
        let mut successes = Vec::new();
        let mut last_error = None;
        let mut interrupted = false;

        for attempt_index in 0..target.runs {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let attempt = self.invoker.invoke(target, attempt_index, cancel).await;
            attempts.push(AttemptRecord {
                attempt_index,
                duration_ms: attempt.duration_ms,
                failure: attempt.error().map(|e| e.kind),
            });

            match attempt.outcome {
                AttemptOutcome::Success { result } => successes.push((attempt_index, result)),
                AttemptOutcome::Failure { error } => {
                    interrupted |= error.kind == FailureKind::Cancelled;
                    last_error = Some(error);
                }
            }
        }

        let succeeded = successes.len();
        let outcome = if interrupted {
            TargetOutcome::Failed {
                error: AttemptError::cancelled(),
            }
        } else {
            match select_median(successes, &self.sort_metric) {
                Some(representative) => TargetOutcome::Measured { representative },
                None => TargetOutcome::Failed {
                    error: last_error.unwrap_or_else(|| {
                        AttemptError::new(FailureKind::EngineCrash, "no attempts were run")
                    }),
                },
            }
        };

        if outcome.error().is_some() {
            METRICS.inc_targets_failed();
        }
        obs::emit_target_finished(
            &target.url,
            succeeded,
            attempts.len(),
            outcome.representative().map(|r| r.attempt_index),
        );

        TargetRun {
            url: target.url.clone(),
            attempts,
            outcome,
        }
    }
}
