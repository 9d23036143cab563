//! Audit run configuration and target identity.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::budget::BudgetRule;
use crate::error::ConfigError;

/// How the engine applies network and CPU throttling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlingMethod {
    /// Simulated throttling applied after an unthrottled load.
    #[default]
    Simulate,
    /// Throttling applied through the browser's devtools protocol.
    Devtools,
    /// No throttling; the environment is assumed to be throttled already.
    Provided,
}

impl ThrottlingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottlingMethod::Simulate => "simulate",
            ThrottlingMethod::Devtools => "devtools",
            ThrottlingMethod::Provided => "provided",
        }
    }
}

/// Options handed to the audit engine on every invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Restrict the audit to these categories (empty = all).
    pub only_categories: Vec<String>,

    pub throttling_method: ThrottlingMethod,

    /// Extra HTTP headers sent with every request.
    pub extra_headers: BTreeMap<String, String>,

    /// Additional flags for the browser process.
    pub chrome_flags: Vec<String>,

    /// Script run before the page is navigated (login flows and the like).
    pub pre_navigation_script: Option<PathBuf>,

    /// Sample size hint forwarded to engines that batch internal samples.
    pub sample_size: Option<u32>,
}

/// A single URL to audit. Immutable once scheduling begins.
#[derive(Debug, Clone)]
pub struct AuditTarget {
    pub url: String,
    pub runs: u32,
    pub engine: Arc<EngineConfig>,
}

/// Complete input for one audit pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Target URLs, in reporting order.
    pub urls: Vec<String>,

    #[serde(default = "default_runs")]
    pub runs: u32,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Metric used to pick the median run.
    #[serde(default = "default_sort_metric")]
    pub sort_metric: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long in-flight attempts may keep running after cancellation.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub budgets: Vec<BudgetRule>,
}

fn default_runs() -> u32 {
    3
}

fn default_concurrency() -> usize {
    1
}

fn default_sort_metric() -> String {
    "interactive".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_cancel_grace_secs() -> u64 {
    10
}

impl AuditConfig {
    /// Create a config for `urls` with default settings and no budgets.
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            runs: default_runs(),
            concurrency: default_concurrency(),
            sort_metric: default_sort_metric(),
            timeout_secs: default_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            engine: EngineConfig::default(),
            budgets: Vec::new(),
        }
    }

    pub fn with_runs(mut self, runs: u32) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_sort_metric(mut self, metric: impl Into<String>) -> Self {
        self.sort_metric = metric.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_budget(mut self, rule: BudgetRule) -> Self {
        self.budgets.push(rule);
        self
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Reject configurations that cannot be scheduled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        let mut seen = HashSet::new();
        for url in &self.urls {
            if url.trim().is_empty() {
                return Err(ConfigError::EmptyUrl);
            }
            if !seen.insert(url.as_str()) {
                return Err(ConfigError::DuplicateUrl(url.clone()));
            }
        }
        if self.runs == 0 {
            return Err(ConfigError::ZeroRuns);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.sort_metric.trim().is_empty() {
            return Err(ConfigError::EmptySortMetric);
        }
        for rule in &self.budgets {
            rule.validate()?;
        }
        Ok(())
    }

    /// One target per URL, in input order, sharing the engine config.
    pub fn targets(&self) -> Vec<AuditTarget> {
        let engine = Arc::new(self.engine.clone());
        self.urls
            .iter()
            .map(|url| AuditTarget {
                url: url.clone(),
                runs: self.runs,
                engine: Arc::clone(&engine),
            })
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    /// Deterministic SHA-256 of the serialized configuration.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::ComparisonKind;

    fn urls() -> Vec<String> {
        vec![
            "https://example.com/".to_string(),
            "https://example.com/about".to_string(),
        ]
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: AuditConfig =
            serde_json::from_str(r#"{ "urls": ["https://example.com/"] }"#).unwrap();
        assert_eq!(config.runs, 3);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.sort_metric, "interactive");
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.engine.throttling_method, ThrottlingMethod::Simulate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_config_from_json() {
        let config: AuditConfig = serde_json::from_str(
            r#"{
                "urls": ["https://example.com/"],
                "engine": {
                    "only_categories": ["performance"],
                    "throttling_method": "devtools",
                    "extra_headers": { "Cookie": "session=1" },
                    "chrome_flags": ["--headless=new"]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.engine.throttling_method, ThrottlingMethod::Devtools);
        assert_eq!(config.engine.extra_headers["Cookie"], "session=1");
        assert_eq!(config.engine.only_categories, vec!["performance"]);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(matches!(
            AuditConfig::new(vec![]).validate(),
            Err(ConfigError::NoTargets)
        ));
        assert!(matches!(
            AuditConfig::new(urls()).with_runs(0).validate(),
            Err(ConfigError::ZeroRuns)
        ));
        assert!(matches!(
            AuditConfig::new(urls()).with_concurrency(0).validate(),
            Err(ConfigError::ZeroConcurrency)
        ));
        assert!(matches!(
            AuditConfig::new(urls()).with_timeout_secs(0).validate(),
            Err(ConfigError::ZeroTimeout)
        ));
        assert!(matches!(
            AuditConfig::new(vec!["  ".to_string()]).validate(),
            Err(ConfigError::EmptyUrl)
        ));
        let dup = vec!["https://a.test/".to_string(), "https://a.test/".to_string()];
        assert!(matches!(
            AuditConfig::new(dup).validate(),
            Err(ConfigError::DuplicateUrl(_))
        ));
    }

    #[test]
    fn test_validate_checks_budget_rules() {
        let config = AuditConfig::new(urls()).with_budget(BudgetRule::new(
            "interactive",
            ComparisonKind::MaxNumericValue,
            f64::NAN,
        ));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_targets_preserve_order() {
        let config = AuditConfig::new(urls()).with_runs(5);
        let targets = config.targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].url, "https://example.com/");
        assert_eq!(targets[1].url, "https://example.com/about");
        assert!(targets.iter().all(|t| t.runs == 5));
    }

    #[test]
    fn test_digest_is_deterministic_and_sensitive() {
        let a = AuditConfig::new(urls());
        let b = AuditConfig::new(urls());
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), b.with_runs(1).digest());
    }

    #[test]
    fn test_from_json_file_errors() {
        let missing = AuditConfig::from_json_file(Path::new("/nonexistent/auditgate.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
