//! Run summary: what happened to the batch, and how long it took.

use super::partition::{FailureRecord, PartitionCounts};
use crate::report::ReportEntry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Wall time spent in one phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseTiming {
    pub phase: &'static str,
    pub elapsed_ms: u128,
}

/// Times phases and runs each inside its own tracing span.
#[derive(Debug, Default)]
pub struct PhaseTimer {
    timings: Vec<PhaseTiming>,
}

impl PhaseTimer {
    pub fn time<T>(&mut self, phase: &'static str, f: impl FnOnce() -> T) -> T {
        let span = crate::span_trace!("phase", name = phase);
        let _enter = span.enter();
        let start = Instant::now();
        let out = f();
        self.timings.push(PhaseTiming {
            phase,
            elapsed_ms: start.elapsed().as_millis(),
        });
        out
    }

    pub fn into_timings(self) -> Vec<PhaseTiming> {
        self.timings
    }
}

/// Hex SHA-256 over the sorted report ids, one per line. Two runs over the
/// same set of reports share a digest.
pub fn batch_digest(entries: &[ReportEntry]) -> String {
    let mut ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    ids.sort_unstable();
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Outcome of a whole run, written to `results/run_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub batch_digest: String,
    pub counts: PartitionCounts,
    pub unlabeled_sandbox: usize,
    pub unlabeled_classifier: usize,
    pub undetected: usize,
    pub undigested: usize,
    pub phases: Vec<PhaseTiming>,
    pub total_elapsed_ms: u128,
    pub curation_failures: Vec<FailureRecord>,
    pub classifier_failures: Vec<FailureRecord>,
    pub relocation_failures: Vec<FailureRecord>,
}

impl RunSummary {
    pub fn total_elapsed(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.total_elapsed_ms).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        writeln!(f, "Processed {} reports from {}", c.total, self.input_dir.display())?;
        writeln!(f, "  passed:              {}", c.passed)?;
        writeln!(f, "  with errors:         {}", c.error)?;
        writeln!(f, "  with VT errors:      {}", c.classifier_error)?;
        writeln!(f, "  duplicates:          {}", c.duplicate)?;
        writeln!(f, "  undetected/benign:   {}", self.undetected)?;
        writeln!(f, "  no sandbox label:    {}", self.unlabeled_sandbox)?;
        writeln!(f, "  no classifier label: {}", self.unlabeled_classifier)?;
        if !self.classifier_failures.is_empty() {
            writeln!(f, "  classifier failures: {}", self.classifier_failures.len())?;
        }
        if !self.relocation_failures.is_empty() {
            writeln!(f, "  relocation failures: {}", self.relocation_failures.len())?;
        }
        for phase in &self.phases {
            writeln!(f, "  [{:>10}] {} ms", phase.phase, phase.elapsed_ms)?;
        }
        write!(
            f,
            "Finished in {:.2}s, results in {}",
            self.total_elapsed().as_secs_f64(),
            self.output_dir.join("results").display()
        )
    }
}
