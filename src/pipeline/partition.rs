//! Terminal partitions and soft listings of a run.

use crate::error::{FaultOrigin, Result, SiftError};
use crate::report::{ReportEntry, ReportId};
use crate::validate::{DetectionErrorKind, ReportErrorKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Where a report ends up. Every input report gets exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "partition", content = "kind", rename_all = "snake_case")]
pub enum Partition {
    Passed,
    Error(ReportErrorKind),
    ClassifierError(DetectionErrorKind),
    Duplicate,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Passed => write!(f, "passed"),
            Partition::Error(kind) => write!(f, "error ({kind})"),
            Partition::ClassifierError(kind) => write!(f, "classifier error ({kind})"),
            Partition::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// Number of reports per terminal partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionCounts {
    pub total: usize,
    pub passed: usize,
    pub error: usize,
    pub classifier_error: usize,
    pub duplicate: usize,
}

/// Assignment of reports to terminal partitions.
///
/// Owned by the aggregating thread. A report can be assigned once.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    assignments: BTreeMap<ReportId, Partition>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, id: &ReportId, partition: Partition) -> Result<()> {
        if let Some(existing) = self.assignments.get(id) {
            return Err(SiftError::Internal(format!(
                "report {id} assigned to {partition} but already {existing}"
            )));
        }
        self.assignments.insert(id.clone(), partition);
        Ok(())
    }

    pub fn get(&self, id: &ReportId) -> Option<Partition> {
        self.assignments.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReportId, Partition)> {
        self.assignments.iter().map(|(id, p)| (id, *p))
    }

    pub fn counts(&self) -> PartitionCounts {
        let mut counts = PartitionCounts {
            total: self.len(),
            ..PartitionCounts::default()
        };
        for (_, partition) in self.iter() {
            match partition {
                Partition::Passed => counts.passed += 1,
                Partition::Error(_) => counts.error += 1,
                Partition::ClassifierError(_) => counts.classifier_error += 1,
                Partition::Duplicate => counts.duplicate += 1,
            }
        }
        counts
    }

    /// Checks that every enumerated report, and nothing else, was assigned.
    pub fn ensure_complete(&self, entries: &[ReportEntry]) -> Result<()> {
        let expected: BTreeSet<&ReportId> = entries.iter().map(|e| &e.id).collect();
        let missing: Vec<String> = expected
            .iter()
            .filter(|id| !self.assignments.contains_key(**id))
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SiftError::Internal(format!(
                "reports without a partition: {}",
                missing.join(", ")
            )));
        }
        if let Some(stray) = self.assignments.keys().find(|id| !expected.contains(id)) {
            return Err(SiftError::Internal(format!(
                "report {stray} was assigned but never enumerated"
            )));
        }
        Ok(())
    }
}

/// Non-terminal listings of passed reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftPartitions {
    pub unlabeled_sandbox: BTreeSet<ReportId>,
    pub unlabeled_classifier: BTreeSet<ReportId>,
    pub undetected: BTreeSet<ReportId>,
}

/// A report-local fault the pipeline contained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub report: ReportId,
    pub origin: FaultOrigin,
    pub reason: String,
}

impl FailureRecord {
    pub fn new(report: &ReportId, origin: FaultOrigin, reason: impl Into<String>) -> Self {
        Self {
            report: report.clone(),
            origin,
            reason: reason.into(),
        }
    }
}
