//! auditgate core library
//!
//! Audits web pages through an injected audit engine, picks a representative
//! run per URL, checks it against budgets and reduces everything to a single
//! pass/fail verdict:
//! - [`Scheduler`] fans targets out under a concurrency limit
//! - [`RunAggregator`] runs attempts in order and selects the lower median
//! - [`evaluate_budgets`] turns budget rules into assertions
//! - [`reduce_verdict`] produces the final [`Verdict`]

pub mod aggregator;
pub mod budget;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod invoker;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod report;
pub mod result;
pub mod scheduler;
pub mod telemetry;
pub mod verdict;

pub use aggregator::{
    select_median, AttemptRecord, RepresentativeRun, RunAggregator, TargetOutcome, TargetRun,
};
pub use budget::{evaluate_budgets, Assertion, AssertionStatus, BudgetRule, ComparisonKind};
pub use cancel::{CancelToken, Cancellation};
pub use config::{AuditConfig, AuditTarget, EngineConfig, ThrottlingMethod};
pub use engine::{engine_fn, AuditEngine, BrowserProcess, CommandEngine, FnEngine};
pub use error::{
    AttemptError, ConfigError, EngineError, FailureKind, PipelineError, ReportError,
};
pub use invoker::{AttemptOutcome, AuditAttempt, AuditInvoker};
pub use pipeline::AuditPipeline;
pub use report::{read_verdict, JsonReportSink, ReportSink};
pub use result::{AuditResult, RuntimeError};
pub use scheduler::Scheduler;
pub use verdict::{reduce_verdict, TargetVerdict, Verdict};

pub use metrics::{MetricsSnapshot, METRICS};
pub use obs::{
    emit_assertion_failed, emit_attempt_failed, emit_attempt_succeeded, emit_target_finished,
    emit_target_started, emit_verdict_reduced, TargetSpan,
};
pub use telemetry::init_tracing;

/// auditgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
