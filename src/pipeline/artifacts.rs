//! Output layout, partition listings and report relocation.

use super::partition::{FailureRecord, Partition, PartitionTable, SoftPartitions};
use crate::dedup::DedupPlan;
use crate::error::{FaultOrigin, Result};
use crate::io;
use crate::report::{ReportEntry, ReportId};
use crate::store::ReportStore;
use crate::validate::{DetectionErrorKind, ReportErrorKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ERRORS_DIR: &str = "reports_with_errors";
const VT_ERRORS_NAME: &str = "reports_with_vt_errors";
const DUPLICATES_DIR: &str = "duplicate_reports";
const RESULTS_DIR: &str = "results";

/// Locations of every artifact under the output root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn errors_listing(&self) -> PathBuf {
        self.root.join(ERRORS_DIR).join(format!("{ERRORS_DIR}.json"))
    }

    pub fn errors_reports_dir(&self) -> PathBuf {
        self.root.join(ERRORS_DIR).join(ERRORS_DIR)
    }

    pub fn vt_errors_listing(&self) -> PathBuf {
        self.root.join(ERRORS_DIR).join(format!("{VT_ERRORS_NAME}.json"))
    }

    pub fn vt_errors_reports_dir(&self) -> PathBuf {
        self.root.join(ERRORS_DIR).join(VT_ERRORS_NAME)
    }

    pub fn duplicates_listing(&self) -> PathBuf {
        self.root
            .join(DUPLICATES_DIR)
            .join(format!("{DUPLICATES_DIR}.json"))
    }

    pub fn duplicates_reports_dir(&self) -> PathBuf {
        self.root.join(DUPLICATES_DIR).join(DUPLICATES_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn statistics(&self) -> PathBuf {
        self.results_dir().join("reports_statistics.json")
    }

    pub fn undetected(&self) -> PathBuf {
        self.results_dir().join("undetected_or_benign_reports.json")
    }

    pub fn unlabeled(&self) -> PathBuf {
        self.results_dir().join("unlabeled_reports.json")
    }

    pub fn summary(&self) -> PathBuf {
        self.results_dir().join("run_summary.json")
    }

    /// Destination directory for reports of a partition; passed reports
    /// stay where they are.
    pub fn destination(&self, partition: Partition) -> Option<PathBuf> {
        match partition {
            Partition::Passed => None,
            Partition::Error(_) => Some(self.errors_reports_dir()),
            Partition::ClassifierError(_) => Some(self.vt_errors_reports_dir()),
            Partition::Duplicate => Some(self.duplicates_reports_dir()),
        }
    }

    /// Creates every listing and relocation directory.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.errors_reports_dir(),
            self.vt_errors_reports_dir(),
            self.duplicates_reports_dir(),
            self.results_dir(),
        ] {
            io::ensure_dir(&dir)?;
        }
        Ok(())
    }
}

/// Listing of reports in a failure partition, grouped by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindListing<K: Ord + Serialize> {
    pub total: usize,
    pub reports: BTreeMap<K, Vec<String>>,
}

impl<K: Ord + Serialize> KindListing<K> {
    fn from_files(files: impl IntoIterator<Item = (K, String)>) -> Self {
        let mut reports: BTreeMap<K, Vec<String>> = BTreeMap::new();
        let mut total = 0;
        for (kind, file) in files {
            reports.entry(kind).or_default().push(file);
            total += 1;
        }
        Self { total, reports }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroupListing {
    pub fingerprint: String,
    pub kept: ReportId,
    pub duplicates: Vec<ReportId>,
    /// `(report, size in bytes)` for every member
    pub members: Vec<(ReportId, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateListing {
    pub total_duplicates: usize,
    pub groups: Vec<DuplicateGroupListing>,
    /// Reports without a usable digest; kept and never compared
    pub undigested: Vec<ReportId>,
}

impl DuplicateListing {
    pub fn from_plan(plan: &DedupPlan) -> Self {
        Self {
            total_duplicates: plan.duplicate_count(),
            groups: plan
                .groups
                .iter()
                .map(|g| DuplicateGroupListing {
                    fingerprint: g.fingerprint.to_string(),
                    kept: g.kept.clone(),
                    duplicates: g.duplicates.clone(),
                    members: g.members.clone(),
                })
                .collect(),
            undigested: plan.undigested.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndetectedListing {
    pub vt_positives_threshold: u32,
    pub total: usize,
    pub reports: Vec<ReportId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlabeledListing {
    pub no_sandbox_consensus: Vec<ReportId>,
    pub no_classifier_consensus: Vec<ReportId>,
}

/// All partition listings of a run.
#[derive(Debug, Clone)]
pub struct Listings {
    pub errors: KindListing<ReportErrorKind>,
    pub vt_errors: KindListing<DetectionErrorKind>,
    pub duplicates: DuplicateListing,
    pub undetected: UndetectedListing,
    pub unlabeled: UnlabeledListing,
}

impl Listings {
    pub fn build(
        entries: &[ReportEntry],
        table: &PartitionTable,
        plan: &DedupPlan,
        soft: &SoftPartitions,
        threshold: u32,
    ) -> Self {
        let mut error_files = Vec::new();
        let mut vt_error_files = Vec::new();
        for entry in entries {
            match table.get(&entry.id) {
                Some(Partition::Error(kind)) => error_files.push((kind, entry.file_name())),
                Some(Partition::ClassifierError(kind)) => {
                    vt_error_files.push((kind, entry.file_name()))
                }
                _ => {}
            }
        }

        Self {
            errors: KindListing::from_files(error_files),
            vt_errors: KindListing::from_files(vt_error_files),
            duplicates: DuplicateListing::from_plan(plan),
            undetected: UndetectedListing {
                vt_positives_threshold: threshold,
                total: soft.undetected.len(),
                reports: soft.undetected.iter().cloned().collect(),
            },
            unlabeled: UnlabeledListing {
                no_sandbox_consensus: soft.unlabeled_sandbox.iter().cloned().collect(),
                no_classifier_consensus: soft.unlabeled_classifier.iter().cloned().collect(),
            },
        }
    }

    /// Writes every listing file atomically.
    pub fn write(&self, layout: &OutputLayout) -> Result<()> {
        io::atomic_write_json_pretty(&layout.errors_listing(), &self.errors)?;
        io::atomic_write_json_pretty(&layout.vt_errors_listing(), &self.vt_errors)?;
        io::atomic_write_json_pretty(&layout.duplicates_listing(), &self.duplicates)?;
        io::atomic_write_json_pretty(&layout.undetected(), &self.undetected)?;
        io::atomic_write_json_pretty(&layout.unlabeled(), &self.unlabeled)?;
        info!(root = %layout.root().display(), "Wrote partition listings");
        Ok(())
    }
}

/// Moves every non-passed report into its partition directory. A report
/// that cannot be moved stays in place and is recorded as a failure.
pub fn relocate_all(
    store: &ReportStore,
    entries: &[ReportEntry],
    table: &PartitionTable,
    layout: &OutputLayout,
) -> Vec<FailureRecord> {
    let mut failures = Vec::new();
    for entry in entries {
        let Some(dest) = table.get(&entry.id).and_then(|p| layout.destination(p)) else {
            continue;
        };
        match store.relocate(entry, &dest) {
            Ok(path) => debug!(report = %entry.id, to = %path.display(), "Relocated report"),
            Err(e) => {
                warn!(report = %entry.id, error = %e, "Relocation failed, report left in place");
                failures.push(FailureRecord::new(&entry.id, FaultOrigin::Relocation, e.to_string()));
            }
        }
    }
    failures
}
