//! Report sinks that receive finished verdicts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::ReportError;
use crate::verdict::Verdict;

/// Destination for a finished verdict (files, uploads, status APIs).
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(&self, verdict: &Verdict) -> Result<(), ReportError>;
}

/// Writes `<dir>/<run_id>/verdict.json`, `verdict.digest` and `summary.md`.
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persist the verdict and return the path of `verdict.json`.
    pub fn write(&self, verdict: &Verdict) -> Result<PathBuf, ReportError> {
        let run_dir = self.dir.join(verdict.run_id.to_string());
        std::fs::create_dir_all(&run_dir)?;

        let path = run_dir.join("verdict.json");
        let json = serde_json::to_vec_pretty(verdict)?;
        let digest = hex::encode(Sha256::digest(&json));

        std::fs::write(&path, &json)?;
        std::fs::write(run_dir.join("verdict.digest"), digest.as_bytes())?;
        std::fs::write(run_dir.join("summary.md"), verdict.render_markdown())?;

        Ok(path)
    }
}

#[async_trait]
impl ReportSink for JsonReportSink {
    async fn publish(&self, verdict: &Verdict) -> Result<(), ReportError> {
        let path = self.write(verdict)?;
        info!(event = "report.written", path = %path.display(), run_id = %verdict.run_id);
        Ok(())
    }
}

/// Read `<dir>/<run_id>/verdict.json` and verify it against its digest.
pub fn read_verdict(run_id: &str, dir: &Path) -> Result<Verdict, ReportError> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join("verdict.json"))?;
    let expected = std::fs::read_to_string(run_dir.join("verdict.digest"))?;
    let actual = hex::encode(Sha256::digest(&json));
    if expected.trim() != actual {
        return Err(ReportError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}
