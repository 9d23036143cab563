//! Budget rules engine.
//!
//! Evaluates a representative [`AuditResult`] against an ordered list of
//! [`BudgetRule`]s, producing one [`Assertion`] per rule. Comparisons use the
//! raw units reported by the engine; thresholds must be expressed in the same
//! unit as the observed value.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::result::AuditResult;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// What a rule compares and in which direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonKind {
    /// Resource transfer size in bytes must not exceed the threshold.
    MaxSize,
    /// Resource request count must not exceed the threshold.
    MaxCount,
    /// Metric value must not exceed the threshold.
    MaxNumericValue,
    /// Category score must meet or exceed the threshold.
    MinScore,
}

/// A declarative threshold check against one metric or resource key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRule {
    /// Metric name, resource category or category id.
    pub key: String,
    pub kind: ComparisonKind,
    pub threshold: f64,
    /// Fractional slack that downgrades a failure to a warning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
}

impl BudgetRule {
    pub fn new(key: impl Into<String>, kind: ComparisonKind, threshold: f64) -> Self {
        Self {
            key: key.into(),
            kind,
            threshold,
            tolerance: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRule {
            key: self.key.clone(),
            reason: reason.to_string(),
        };
        if self.key.trim().is_empty() {
            return Err(invalid("key is empty"));
        }
        if !self.threshold.is_finite() {
            return Err(invalid("threshold is not finite"));
        }
        if let Some(tolerance) = self.tolerance {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(invalid("tolerance must be a non-negative number"));
            }
        }
        Ok(())
    }

    fn observe(&self, result: &AuditResult) -> Option<f64> {
        let source = match self.kind {
            ComparisonKind::MaxSize => &result.resource_sizes,
            ComparisonKind::MaxCount => &result.resource_counts,
            ComparisonKind::MaxNumericValue => &result.metrics,
            ComparisonKind::MinScore => &result.category_scores,
        };
        source.get(&self.key).copied()
    }
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

/// Outcome of one rule. `NotApplicable` is neither a pass nor a fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionStatus {
    Pass,
    /// Over the threshold but within tolerance.
    Warn,
    Fail,
    /// The key was absent from the result.
    NotApplicable,
}

/// The evaluated outcome of one rule against one representative run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub rule: BudgetRule,
    pub observed: Option<f64>,
    pub status: AssertionStatus,
    pub message: String,
}

impl Assertion {
    /// Pass or warn. Not-applicable assertions are not considered passed.
    pub fn passed(&self) -> bool {
        matches!(self.status, AssertionStatus::Pass | AssertionStatus::Warn)
    }

    pub fn failed(&self) -> bool {
        self.status == AssertionStatus::Fail
    }

    pub fn is_applicable(&self) -> bool {
        self.status != AssertionStatus::NotApplicable
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluate every rule, in order, against `result`. Pure and idempotent.
pub fn evaluate_budgets(result: &AuditResult, rules: &[BudgetRule]) -> Vec<Assertion> {
    rules.iter().map(|rule| check_rule(rule, result)).collect()
}

fn check_rule(rule: &BudgetRule, result: &AuditResult) -> Assertion {
    let Some(observed) = rule.observe(result) else {
        return Assertion {
            rule: rule.clone(),
            observed: None,
            status: AssertionStatus::NotApplicable,
            message: format!("'{}' not present in result", rule.key),
        };
    };

    let status = compare(rule, observed);
    let op = match rule.kind {
        ComparisonKind::MinScore => ">=",
        _ => "<=",
    };
    let message = match status {
        AssertionStatus::Pass => format!("{} = {} {} {}", rule.key, observed, op, rule.threshold),
        AssertionStatus::Warn => format!(
            "{} = {} misses {} {} but is within tolerance {}",
            rule.key,
            observed,
            op,
            rule.threshold,
            rule.tolerance.unwrap_or_default()
        ),
        _ => format!(
            "{} = {} violates {} {}",
            rule.key, observed, op, rule.threshold
        ),
    };

    Assertion {
        rule: rule.clone(),
        observed: Some(observed),
        status,
        message,
    }
}

fn compare(rule: &BudgetRule, observed: f64) -> AssertionStatus {
    let threshold = rule.threshold;
    let (within, within_tolerance) = match rule.kind {
        ComparisonKind::MinScore => (
            observed >= threshold,
            rule.tolerance
                .is_some_and(|t| observed >= threshold * (1.0 - t)),
        ),
        _ => (
            observed <= threshold,
            rule.tolerance
                .is_some_and(|t| observed <= threshold * (1.0 + t)),
        ),
    };

    if within {
        AssertionStatus::Pass
    } else if within_tolerance {
        AssertionStatus::Warn
    } else {
        AssertionStatus::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> AuditResult {
        AuditResult::new()
            .with_metric("interactive", 4000.0)
            .with_resource("script", 150_000.0, 12.0)
            .with_score("performance", 0.82)
    }

    #[test]
    fn test_max_numeric_value_pass_and_fail() {
        let rules = vec![
            BudgetRule::new("interactive", ComparisonKind::MaxNumericValue, 4500.0),
            BudgetRule::new("interactive", ComparisonKind::MaxNumericValue, 3000.0),
        ];
        let assertions = evaluate_budgets(&result(), &rules);
        assert_eq!(assertions[0].status, AssertionStatus::Pass);
        assert_eq!(assertions[1].status, AssertionStatus::Fail);
        assert_eq!(assertions[1].observed, Some(4000.0));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let rules = vec![BudgetRule::new(
            "interactive",
            ComparisonKind::MaxNumericValue,
            4000.0,
        )];
        assert!(evaluate_budgets(&result(), &rules)[0].passed());
    }

    #[test]
    fn test_tolerance_produces_warning() {
        let rules = vec![
            BudgetRule::new("script", ComparisonKind::MaxSize, 140_000.0).with_tolerance(0.1),
            BudgetRule::new("script", ComparisonKind::MaxSize, 100_000.0).with_tolerance(0.1),
        ];
        let assertions = evaluate_budgets(&result(), &rules);
        assert_eq!(assertions[0].status, AssertionStatus::Warn);
        assert!(assertions[0].passed());
        assert_eq!(assertions[1].status, AssertionStatus::Fail);
    }

    #[test]
    fn test_max_count_reads_request_counts() {
        let rules = vec![BudgetRule::new("script", ComparisonKind::MaxCount, 10.0)];
        let assertions = evaluate_budgets(&result(), &rules);
        assert_eq!(assertions[0].observed, Some(12.0));
        assert!(assertions[0].failed());
    }

    #[test]
    fn test_min_score_direction() {
        let rules = vec![
            BudgetRule::new("performance", ComparisonKind::MinScore, 0.8),
            BudgetRule::new("performance", ComparisonKind::MinScore, 0.9).with_tolerance(0.1),
            BudgetRule::new("performance", ComparisonKind::MinScore, 0.95),
        ];
        let assertions = evaluate_budgets(&result(), &rules);
        assert_eq!(assertions[0].status, AssertionStatus::Pass);
        assert_eq!(assertions[1].status, AssertionStatus::Warn);
        assert_eq!(assertions[2].status, AssertionStatus::Fail);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let rules = vec![
            BudgetRule::new("interactive", ComparisonKind::MaxNumericValue, 3900.0)
                .with_tolerance(0.05),
            BudgetRule::new("script", ComparisonKind::MaxCount, 20.0),
            BudgetRule::new("font", ComparisonKind::MaxSize, 1.0),
        ];
        let run = result();
        assert_eq!(evaluate_budgets(&run, &rules), evaluate_budgets(&run, &rules));
    }

    #[test]
    fn test_absent_key_is_not_applicable() {
        let rules = vec![BudgetRule::new("font", ComparisonKind::MaxSize, 1.0)];
        let assertions = evaluate_budgets(&result(), &rules);
        assert_eq!(assertions[0].status, AssertionStatus::NotApplicable);
        assert!(!assertions[0].passed());
        assert!(!assertions[0].failed());
        assert!(!assertions[0].is_applicable());
        assert!(assertions[0].observed.is_none());
    }

    #[test]
    fn test_rule_kind_selects_source_map() {
        // "interactive" exists only as a metric, not as a resource size
        let rules = vec![BudgetRule::new("interactive", ComparisonKind::MaxSize, 1.0)];
        let assertions = evaluate_budgets(&result(), &rules);
        assert_eq!(assertions[0].status, AssertionStatus::NotApplicable);
    }

    #[test]
    fn test_rule_json_shape() {
        let rule: BudgetRule = serde_json::from_str(
            r#"{ "key": "total", "kind": "max-size", "threshold": 500000, "tolerance": 0.05 }"#,
        )
        .unwrap();
        assert_eq!(rule.kind, ComparisonKind::MaxSize);
        assert_eq!(rule.tolerance, Some(0.05));
    }

    #[test]
    fn test_validate_rejects_negative_tolerance() {
        let rule =
            BudgetRule::new("interactive", ComparisonKind::MaxNumericValue, 1.0).with_tolerance(-0.5);
        assert!(rule.validate().is_err());
    }
}
