//! End-to-end audit pipeline: schedule, aggregate, evaluate, reduce.

use std::sync::Arc;

use tracing::info;

use crate::aggregator::RunAggregator;
use crate::budget::{evaluate_budgets, Assertion};
use crate::cancel::CancelToken;
use crate::config::AuditConfig;
use crate::engine::AuditEngine;
use crate::error::{ConfigError, PipelineError};
use crate::invoker::AuditInvoker;
use crate::metrics::METRICS;
use crate::obs::{self, TargetSpan};
use crate::report::ReportSink;
use crate::scheduler::Scheduler;
use crate::verdict::{reduce_verdict, Verdict};

/// A validated configuration bound to an audit engine.
pub struct AuditPipeline {
    config: AuditConfig,
    scheduler: Scheduler,
}

impl AuditPipeline {
    /// Validate `config`. Nothing is dispatched when this fails.
    pub fn new(config: AuditConfig, engine: Arc<dyn AuditEngine>) -> Result<Self, ConfigError> {
        config.validate()?;
        let invoker = AuditInvoker::new(engine, config.timeout(), config.cancel_grace());
        let aggregator = Arc::new(RunAggregator::new(invoker, config.sort_metric.clone()));
        let scheduler = Scheduler::new(aggregator, config.concurrency)?;
        Ok(Self { config, scheduler })
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Audit every target and reduce the outcomes to a verdict.
    ///
    /// Per-attempt and per-target errors end up in the verdict; only a
    /// configuration the scheduler rejects up front is returned as an error.
    pub async fn run(&self, cancel: &CancelToken) -> Result<Verdict, ConfigError> {
        let config = &self.config;
        let baseline = METRICS.snapshot();
        info!(
            targets = config.urls.len(),
            runs = config.runs,
            concurrency = config.concurrency,
            sort_metric = %config.sort_metric,
            "Starting audit pipeline"
        );

        let runs = self.scheduler.run(config.targets(), cancel).await?;

        let entries: Vec<_> = runs
            .into_iter()
            .map(|run| {
                let assertions = match run.outcome.representative() {
                    Some(representative) => {
                        let _span = TargetSpan::enter(&run.url);
                        let assertions = evaluate_budgets(&representative.result, &config.budgets);
                        record_failures(&run.url, &assertions);
                        assertions
                    }
                    None => Vec::new(),
                };
                (run, assertions)
            })
            .collect();

        let verdict = reduce_verdict(entries, &config.digest());
        obs::emit_verdict_reduced(
            &verdict.run_id.to_string(),
            verdict.targets.len(),
            verdict.failed_targets(),
            verdict.overall_passed,
        );
        METRICS.flush_since(&baseline);
        Ok(verdict)
    }

    /// Run and hand the verdict to `sink`.
    pub async fn run_and_publish(
        &self,
        cancel: &CancelToken,
        sink: &dyn ReportSink,
    ) -> Result<Verdict, PipelineError> {
        let verdict = self.run(cancel).await?;
        sink.publish(&verdict).await?;
        Ok(verdict)
    }
}

fn record_failures(url: &str, assertions: &[Assertion]) {
    let failed: Vec<&Assertion> = assertions.iter().filter(|a| a.failed()).collect();
    for a in &failed {
        obs::emit_assertion_failed(url, &a.rule.key, a.observed, a.rule.threshold);
    }
    METRICS.add_assertions_failed(failed.len() as u64);
}
