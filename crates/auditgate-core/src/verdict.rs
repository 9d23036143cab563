//! Verdict reduction across targets.
//!
//! The overall verdict passes only when every target produced a
//! representative run and no assertion failed. Warnings and not-applicable
//! assertions never fail it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::{AttemptRecord, TargetOutcome, TargetRun};
use crate::budget::{Assertion, AssertionStatus};

/// Result for a single target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetVerdict {
    pub url: String,
    pub outcome: TargetOutcome,
    pub assertions: Vec<Assertion>,
    pub attempts: Vec<AttemptRecord>,
    pub passed: bool,
}

impl TargetVerdict {
    pub fn count(&self, status: AssertionStatus) -> usize {
        self.assertions.iter().filter(|a| a.status == status).count()
    }
}

/// Terminal artifact of a pipeline run, handed to reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub config_digest: String,
    /// One entry per target, in input order.
    pub targets: Vec<TargetVerdict>,
    pub overall_passed: bool,
}

impl Verdict {
    pub fn get(&self, url: &str) -> Option<&TargetVerdict> {
        self.targets.iter().find(|t| t.url == url)
    }

    /// Process exit code: 0 when passed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.overall_passed {
            0
        } else {
            1
        }
    }

    pub fn failed_targets(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| t.outcome.error().is_some())
            .count()
    }

    pub fn failed_assertions(&self) -> usize {
        self.targets
            .iter()
            .map(|t| t.count(AssertionStatus::Fail))
            .sum()
    }

    /// Render the verdict as a Markdown summary.
    pub fn render_markdown(&self) -> String {
        let status = if self.overall_passed { "PASSED" } else { "FAILED" };
        let mut md = format!("# Audit Verdict: {status}\n\n");
        md.push_str(&format!(
            "{} target(s), {} failed, {} failed assertion(s)\n\n",
            self.targets.len(),
            self.failed_targets(),
            self.failed_assertions()
        ));

        md.push_str("| URL | Outcome | Representative | Pass | Warn | Fail | N/A |\n");
        md.push_str("|---|---|---|---|---|---|---|\n");
        for t in &self.targets {
            let (outcome, representative) = match &t.outcome {
                TargetOutcome::Measured { representative } => (
                    "measured".to_string(),
                    match representative.sort_value {
                        Some(v) => format!("attempt {} ({v})", representative.attempt_index),
                        None => format!("attempt {}", representative.attempt_index),
                    },
                ),
                TargetOutcome::Failed { error } => (format!("failed: {}", error.kind), "-".to_string()),
            };
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} |\n",
                t.url,
                outcome,
                representative,
                t.count(AssertionStatus::Pass),
                t.count(AssertionStatus::Warn),
                t.count(AssertionStatus::Fail),
                t.count(AssertionStatus::NotApplicable),
            ));
        }

        for t in &self.targets {
            md.push_str(&format!("\n## {}\n\n", t.url));
            if let Some(error) = t.outcome.error() {
                md.push_str(&format!("- **{}**: {}\n", error.kind, error.message));
                continue;
            }
            if t.assertions.is_empty() {
                md.push_str("no budget rules\n");
            }
            for a in &t.assertions {
                let label = match a.status {
                    AssertionStatus::Pass => "pass",
                    AssertionStatus::Warn => "warn",
                    AssertionStatus::Fail => "FAIL",
                    AssertionStatus::NotApplicable => "n/a",
                };
                md.push_str(&format!("- {label}: {}\n", a.message));
            }
        }

        md
    }
}

/// Combine per-target outcomes and their assertions into one verdict.
pub fn reduce_verdict(entries: Vec<(TargetRun, Vec<Assertion>)>, config_digest: &str) -> Verdict {
    let targets: Vec<TargetVerdict> = entries
        .into_iter()
        .map(|(run, assertions)| {
            let measured = run.outcome.representative().is_some();
            let passed = measured && !assertions.iter().any(Assertion::failed);
            TargetVerdict {
                url: run.url,
                outcome: run.outcome,
                assertions,
                attempts: run.attempts,
                passed,
            }
        })
        .collect();

    let overall_passed = targets.iter().all(|t| t.passed);

    Verdict {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        config_digest: config_digest.to_string(),
        targets,
        overall_passed,
    }
}
