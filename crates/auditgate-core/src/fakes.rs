//! Deterministic fake audit engine (testing only)
//!
//! `ScriptedEngine` replays a per-URL queue of outcomes in call order, so
//! aggregation and scheduling can be exercised without a browser.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::engine::AuditEngine;
use crate::error::EngineError;
use crate::result::AuditResult;

/// One scripted engine response.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Return this result.
    Report(AuditResult),
    /// Fail as if the browser crashed.
    Crash(String),
    /// Never return; only a timeout or cancellation ends the call.
    Hang,
}

impl ScriptedStep {
    /// A report with a single metric.
    pub fn metric(name: &str, value: f64) -> Self {
        ScriptedStep::Report(AuditResult::new().with_metric(name, value))
    }
}

/// In-memory engine driven by per-URL scripts.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedStep>>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue `steps` for `url`, consumed one per call.
    pub fn script(self, url: &str, steps: Vec<ScriptedStep>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(steps);
        self
    }

    /// URLs in the order the engine was called.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl AuditEngine for ScriptedEngine {
    async fn audit(&self, url: &str, _config: &EngineConfig) -> Result<AuditResult, EngineError> {
        self.calls.lock().unwrap().push(url.to_string());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match step {
            Some(ScriptedStep::Report(result)) => Ok(result),
            Some(ScriptedStep::Crash(message)) => Err(EngineError::Launch(message)),
            Some(ScriptedStep::Hang) => std::future::pending().await,
            None => Err(EngineError::InvalidOutput(format!("no scripted step for {url}"))),
        }
    }
}
