//! Audit engine result payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Runtime error flagged inside an otherwise delivered report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub code: String,
    pub message: String,
}

/// Structured result of one audit engine invocation. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    /// URL the engine ended up measuring, after redirects.
    #[serde(default)]
    pub final_url: Option<String>,

    /// Metric name to numeric value (raw engine units).
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,

    /// Resource category to transferred bytes.
    #[serde(default)]
    pub resource_sizes: BTreeMap<String, f64>,

    /// Resource category to request count.
    #[serde(default)]
    pub resource_counts: BTreeMap<String, f64>,

    /// Category id to score in 0.0-1.0.
    #[serde(default)]
    pub category_scores: BTreeMap<String, f64>,

    /// Set when the engine reports it could not measure the page properly.
    #[serde(default)]
    pub runtime_error: Option<RuntimeError>,
}

impl AuditResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a metric value.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Add a resource category with its transfer size and request count.
    pub fn with_resource(mut self, category: impl Into<String>, bytes: f64, count: f64) -> Self {
        let category = category.into();
        self.resource_sizes.insert(category.clone(), bytes);
        self.resource_counts.insert(category, count);
        self
    }

    /// Add a category score.
    pub fn with_score(mut self, category: impl Into<String>, score: f64) -> Self {
        self.category_scores.insert(category.into(), score);
        self
    }

    /// Flag a runtime error.
    pub fn with_runtime_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.runtime_error = Some(RuntimeError {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn has_runtime_error(&self) -> bool {
        self.runtime_error.is_some()
    }

    /// Build a result from an engine JSON report.
    ///
    /// Numeric audit values become metrics keyed by audit id, the
    /// `resource-summary` audit supplies sizes and counts per resource type,
    /// and category scores are kept as-is.
    pub fn from_report_json(report: &Value) -> Result<Self, EngineError> {
        let audits = report
            .get("audits")
            .and_then(Value::as_object)
            .ok_or_else(|| EngineError::InvalidOutput("report has no audits".to_string()))?;

        let mut result = AuditResult::new();

        result.final_url = report
            .get("finalDisplayedUrl")
            .or_else(|| report.get("finalUrl"))
            .and_then(Value::as_str)
            .map(str::to_string);

        for (id, audit) in audits {
            if let Some(value) = audit.get("numericValue").and_then(Value::as_f64) {
                result.metrics.insert(id.clone(), value);
            }
        }

        let items = audits
            .get("resource-summary")
            .and_then(|a| a.pointer("/details/items"))
            .and_then(Value::as_array);
        for item in items.into_iter().flatten() {
            let Some(kind) = item.get("resourceType").and_then(Value::as_str) else {
                continue;
            };
            if let Some(size) = item.get("transferSize").and_then(Value::as_f64) {
                result.resource_sizes.insert(kind.to_string(), size);
            }
            if let Some(count) = item.get("requestCount").and_then(Value::as_f64) {
                result.resource_counts.insert(kind.to_string(), count);
            }
        }

        if let Some(categories) = report.get("categories").and_then(Value::as_object) {
            for (id, category) in categories {
                if let Some(score) = category.get("score").and_then(Value::as_f64) {
                    result.category_scores.insert(id.clone(), score);
                }
            }
        }

        if let Some(err) = report.get("runtimeError") {
            let code = err
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string();
            if code != "NO_ERROR" {
                let message = err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                result.runtime_error = Some(RuntimeError { code, message });
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_report() -> Value {
        json!({
            "finalDisplayedUrl": "https://example.com/",
            "audits": {
                "interactive": { "numericValue": 3512.4 },
                "first-contentful-paint": { "numericValue": 1200.0 },
                "uses-http2": { "score": 1 },
                "resource-summary": {
                    "details": {
                        "items": [
                            { "resourceType": "script", "requestCount": 12, "transferSize": 182044 },
                            { "resourceType": "total", "requestCount": 40, "transferSize": 902311 }
                        ]
                    }
                }
            },
            "categories": {
                "performance": { "score": 0.87 },
                "seo": { "score": null }
            }
        })
    }

    #[test]
    fn test_parse_metrics_and_resources() {
        let result = AuditResult::from_report_json(&sample_report()).unwrap();
        assert_eq!(result.metric("interactive"), Some(3512.4));
        assert_eq!(result.metric("first-contentful-paint"), Some(1200.0));
        assert!(result.metric("uses-http2").is_none());
        assert_eq!(result.resource_sizes.get("script"), Some(&182044.0));
        assert_eq!(result.resource_counts.get("total"), Some(&40.0));
        assert_eq!(result.category_scores.get("performance"), Some(&0.87));
        assert!(!result.category_scores.contains_key("seo"));
        assert_eq!(result.final_url.as_deref(), Some("https://example.com/"));
        assert!(!result.has_runtime_error());
    }

    #[test]
    fn test_parse_runtime_error() {
        let mut report = sample_report();
        report["runtimeError"] = json!({
            "code": "NO_FCP",
            "message": "The page did not paint any content."
        });
        let result = AuditResult::from_report_json(&report).unwrap();
        let err = result.runtime_error.expect("runtime error");
        assert_eq!(err.code, "NO_FCP");
    }

    #[test]
    fn test_no_error_code_is_ignored() {
        let mut report = sample_report();
        report["runtimeError"] = json!({ "code": "NO_ERROR", "message": "" });
        let result = AuditResult::from_report_json(&report).unwrap();
        assert!(!result.has_runtime_error());
    }

    #[test]
    fn test_missing_audits_is_invalid() {
        let err = AuditResult::from_report_json(&json!({ "lighthouseVersion": "12" }));
        assert!(matches!(err, Err(EngineError::InvalidOutput(_))));
    }
}
