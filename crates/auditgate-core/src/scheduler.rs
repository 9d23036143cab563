//! Bounded, fail-independent scheduling of targets.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::aggregator::{RunAggregator, TargetRun};
use crate::cancel::CancelToken;
use crate::config::AuditTarget;
use crate::error::{AttemptError, ConfigError, FailureKind};

/// Aggregates up to `concurrency` targets at once.
pub struct Scheduler {
    aggregator: Arc<RunAggregator>,
    concurrency: usize,
}

impl Scheduler {
    /// Fails with [`ConfigError::ZeroConcurrency`] for a zero limit.
    pub fn new(aggregator: Arc<RunAggregator>, concurrency: usize) -> Result<Self, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(Self {
            aggregator,
            concurrency,
        })
    }

    /// Run every target to completion and return outcomes in input order.
    ///
    /// An empty target list or a target with zero runs is rejected before
    /// anything is dispatched. After that the call never fails: one target
    /// failing never stops the others. Once `cancel` fires, no new target
    /// starts and waiting targets are reported as cancelled.
    pub async fn run(
        &self,
        targets: Vec<AuditTarget>,
        cancel: &CancelToken,
    ) -> Result<Vec<TargetRun>, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if targets.iter().any(|t| t.runs == 0) {
            return Err(ConfigError::ZeroRuns);
        }

        let urls: Vec<String> = targets.iter().map(|t| t.url.clone()).collect();
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for (idx, target) in targets.into_iter().enumerate() {
            let sem = Arc::clone(&sem);
            let aggregator = Arc::clone(&self.aggregator);
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = sem.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    debug!(url = %target.url, "target not started, cancelled");
                    return (idx, TargetRun::failed(&target.url, AttemptError::cancelled()));
                };
                (idx, aggregator.aggregate(&target, &cancel).await)
            });
        }

        let mut slots: Vec<Option<TargetRun>> = urls.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, run)) => slots[idx] = Some(run),
                Err(e) => warn!(error = %e, "audit task did not complete"),
            }
        }

        let runs = slots
            .into_iter()
            .zip(urls)
            .map(|(slot, url)| {
                slot.unwrap_or_else(|| {
                    TargetRun::failed(
                        &url,
                        AttemptError::new(
                            FailureKind::EngineCrash,
                            "audit task terminated unexpectedly",
                        ),
                    )
                })
            })
            .collect();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{engine_fn, AuditEngine};
    use crate::error::EngineError;
    use crate::invoker::AuditInvoker;
    use crate::result::AuditResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn targets(n: usize, runs: u32) -> Vec<AuditTarget> {
        let engine = Arc::new(EngineConfig::default());
        (0..n)
            .map(|i| AuditTarget {
                url: format!("https://example.com/{i}"),
                runs,
                engine: Arc::clone(&engine),
            })
            .collect()
    }

    fn scheduler(engine: Arc<dyn AuditEngine>, concurrency: usize) -> Scheduler {
        let invoker = AuditInvoker::new(engine, Duration::from_secs(60), Duration::from_secs(1));
        Scheduler::new(Arc::new(RunAggregator::new(invoker, "interactive")), concurrency)
            .expect("valid concurrency")
    }

    /// Engine that records the peak number of concurrent audits.
    fn tracking_engine(in_flight: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Arc<dyn AuditEngine> {
        Arc::new(engine_fn(move |url: String, _config: EngineConfig| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Later URLs finish first so completion order differs from input order.
                let i: u64 = url
                    .rsplit('/')
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                let delay = 100 - i * 10;
                tokio::time::sleep(Duration::from_millis(delay)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, EngineError>(AuditResult::new().with_metric("interactive", 1.0))
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_limit_runs_one_at_a_time() {
        let peak = Arc::new(AtomicUsize::new(0));
        let engine = tracking_engine(Arc::new(AtomicUsize::new(0)), Arc::clone(&peak));
        let runs = scheduler(engine, 1)
            .run(targets(4, 2), &CancelToken::never())
            .await
            .expect("scheduled");
        assert_eq!(runs.len(), 4);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_bounds_parallelism() {
        let peak = Arc::new(AtomicUsize::new(0));
        let engine = tracking_engine(Arc::new(AtomicUsize::new(0)), Arc::clone(&peak));
        let runs = scheduler(engine, 3)
            .run(targets(8, 1), &CancelToken::never())
            .await
            .expect("scheduled");
        assert_eq!(runs.len(), 8);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak > 1, "expected parallel execution");
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_keeps_input_order() {
        let engine = tracking_engine(
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        );
        let runs = scheduler(engine, 4)
            .run(targets(6, 1), &CancelToken::never())
            .await
            .expect("scheduled");
        let urls: Vec<_> = runs.iter().map(|r| r.url.as_str()).collect();
        let expected: Vec<_> = (0..6).map(|i| format!("https://example.com/{i}")).collect();
        assert_eq!(urls, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let engine = tracking_engine(
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        );
        let cancellation = crate::cancel::Cancellation::new();
        cancellation.cancel();
        let runs = scheduler(engine, 2)
            .run(targets(3, 3), &cancellation.token())
            .await
            .expect("scheduled");
        assert_eq!(runs.len(), 3);
        for run in runs {
            assert_eq!(run.outcome.error().unwrap().kind, FailureKind::Cancelled);
            assert!(run.attempts.is_empty());
        }
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine: Arc<dyn AuditEngine> = Arc::new(engine_fn({
            let calls = Arc::clone(&calls);
            move |_url: String, _config: EngineConfig| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, EngineError>(AuditResult::new()) }
            }
        }));
        let invoker = AuditInvoker::new(
            Arc::clone(&engine),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        let aggregator = Arc::new(RunAggregator::new(invoker, "interactive"));
        assert!(matches!(
            Scheduler::new(Arc::clone(&aggregator), 0),
            Err(ConfigError::ZeroConcurrency)
        ));

        let scheduler = scheduler(engine, 2);
        let empty = scheduler.run(Vec::new(), &CancelToken::never()).await;
        assert!(matches!(empty, Err(ConfigError::NoTargets)));

        let mut zero_runs = targets(2, 1);
        zero_runs[1].runs = 0;
        let result = scheduler.run(zero_runs, &CancelToken::never()).await;
        assert!(matches!(result, Err(ConfigError::ZeroRuns)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
