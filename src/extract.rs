//! Dataset extraction from a curated report directory.
//!
//! These utilities work on a directory the pipeline has already curated.
//! Reports are picked per family, either by reading their consensus label
//! or from a family mapping file, and copied out. Reports can also be
//! renamed after their sample digest. Report contents are never modified
//! and existing files are never overwritten.

use crate::dedup::{DigestAlgorithm, Fingerprint};
use crate::error::{Result, SiftError};
use crate::io::{self, error::IoError, IOLimits};
use crate::label::{self, ConsensusLabel};
use crate::report::{self, ReportEntry, CLASSIFIER_LABEL_KEY, SANDBOX_DETECTIONS_KEY};
use crate::store::ReportStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Which consensus label selects a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// The classifier consensus written under `avclass_detection`
    #[default]
    Classifier,
    /// The sandbox's own detections
    Sandbox,
}

impl LabelSource {
    /// Reads this label from a curated document.
    pub fn read(self, document: &Value) -> ConsensusLabel {
        match self {
            LabelSource::Classifier => document
                .get(CLASSIFIER_LABEL_KEY)
                .and_then(Value::as_str)
                .map_or(ConsensusLabel::NoConsensus, ConsensusLabel::from_raw),
            LabelSource::Sandbox => label::sandbox_consensus(document.get(SANDBOX_DETECTIONS_KEY)),
        }
    }
}

impl FromStr for LabelSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avclass" | "a" | "classifier" => Ok(LabelSource::Classifier),
            "cape" | "c" | "sandbox" => Ok(LabelSource::Sandbox),
            other => Err(format!(
                "unknown label source '{other}' (expected 'avclass' or 'cape')"
            )),
        }
    }
}

/// Order in which candidate reports are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Id order, or file order for a mapping
    First,
    /// Reproducible shuffle keyed by the seed
    Shuffled { seed: u64 },
}

impl Selection {
    fn arrange<T>(self, items: &mut [T], key: impl Fn(&T) -> &str) {
        if let Selection::Shuffled { seed } = self {
            items.sort_by_cached_key(|item| shuffle_key(seed, key(item)));
        }
    }
}

fn shuffle_key(seed: u64, name: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(name.as_bytes());
    hasher.finalize().to_vec()
}

/// Splits a comma separated family list.
pub fn parse_families(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalized(families: &[String]) -> BTreeSet<String> {
    families
        .iter()
        .filter_map(|f| ConsensusLabel::from_raw(f).family().map(str::to_string))
        .collect()
}

/// Which reports to extract by label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelQuery {
    pub source: LabelSource,
    /// Families to extract; empty means every family
    pub include: Vec<String>,
    /// Families never extracted; only consulted when `include` is empty
    pub exclude: Vec<String>,
    /// Reports per included family, or in total when `include` is empty
    pub limit: usize,
    pub selection: Selection,
}

impl LabelQuery {
    pub fn new(source: LabelSource, limit: usize) -> Self {
        Self {
            source,
            include: Vec::new(),
            exclude: Vec::new(),
            limit,
            selection: Selection::First,
        }
    }
}

/// Reports chosen for extraction, grouped by family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Chosen reports per family, in selection order
    pub families: BTreeMap<String, Vec<ReportEntry>>,
    /// Requested families with nothing to extract
    pub missing_families: Vec<String>,
    /// Candidates that could not be read
    pub unreadable: Vec<String>,
}

impl Extraction {
    pub fn len(&self) -> usize {
        self.families.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_full(
    families: &BTreeMap<String, Vec<ReportEntry>>,
    include: &BTreeSet<String>,
    limit: usize,
) -> bool {
    if include.is_empty() {
        families.values().map(Vec::len).sum::<usize>() >= limit
    } else {
        include
            .iter()
            .all(|f| families.get(f).map_or(0, Vec::len) >= limit)
    }
}

/// Picks reports from `store` by their consensus label.
///
/// Candidates are read in selection order and the scan stops as soon as
/// the query is satisfied. Reports without a consensus are never picked.
pub fn select_by_label(store: &ReportStore, query: &LabelQuery) -> Result<Extraction> {
    let mut entries = store.enumerate()?;
    query.selection.arrange(&mut entries, |e| e.id.as_str());
    let include = normalized(&query.include);
    let exclude = normalized(&query.exclude);

    let mut extraction = Extraction::default();
    for entry in entries {
        if is_full(&extraction.families, &include, query.limit) {
            break;
        }
        let report = match store.load(&entry) {
            Ok(report) => report,
            Err(e) => {
                warn!(report = %entry.id, error = %e, "Skipping unreadable report");
                extraction.unreadable.push(entry.file_name());
                continue;
            }
        };
        let Some(family) = query.source.read(&report.document).family().map(str::to_string) else {
            continue;
        };
        let wanted = if include.is_empty() {
            !exclude.contains(&family)
        } else {
            include.contains(&family)
                && extraction.families.get(&family).map_or(0, Vec::len) < query.limit
        };
        if wanted {
            debug!(report = %entry.id, family = %family, "Selected report");
            extraction.families.entry(family).or_default().push(entry);
        }
    }

    extraction.missing_families = include
        .into_iter()
        .filter(|f| !extraction.families.contains_key(f))
        .collect();
    info!(
        selected = extraction.len(),
        families = extraction.families.len(),
        "Selected reports by label"
    );
    Ok(extraction)
}

/// One report listed under a family in a mapping file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MappedReport {
    /// File name of the report inside the dataset directory
    pub report: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MappedFamily {
    pub reports: Vec<MappedReport>,
}

/// Family to report file mapping, as published alongside a curated
/// dataset: `{"<family>": {"n_reports": N, "reports": [{"report": "<file>"}]}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct LabelMapping {
    families: BTreeMap<String, MappedFamily>,
}

impl LabelMapping {
    pub fn load(path: &Path) -> Result<Self> {
        let (value, _) = io::read_json_document(path, &IOLimits::default())?;
        serde_json::from_value(value).map_err(|e| {
            SiftError::Serialization(format!("label mapping {}: {e}", path.display()))
        })
    }

    /// Looks a family up by exact name, then ignoring ASCII case.
    pub fn family(&self, name: &str) -> Option<(&str, &MappedFamily)> {
        self.families
            .get_key_value(name)
            .or_else(|| {
                self.families
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
            })
            .map(|(k, v)| (k.as_str(), v))
    }
}

fn is_plain_file_name(name: &str) -> bool {
    Path::new(name).file_name() == Some(OsStr::new(name))
}

/// Picks up to `limit` reports per requested family from a mapping.
///
/// Families missing from the mapping are skipped. Mapped names that are
/// not plain file names are ignored.
pub fn select_from_mapping(
    mapping: &LabelMapping,
    dataset_dir: &Path,
    families: &[String],
    limit: usize,
    selection: Selection,
) -> Extraction {
    let mut extraction = Extraction::default();
    for requested in families {
        let Some((name, family)) = mapping.family(requested) else {
            warn!(family = %requested, "Family not present in mapping, skipping");
            extraction.missing_families.push(requested.clone());
            continue;
        };
        let mut names: Vec<&str> = family
            .reports
            .iter()
            .map(|r| r.report.as_str())
            .filter(|n| {
                let plain = is_plain_file_name(n);
                if !plain {
                    warn!(family = %name, report = %n, "Ignoring mapped report outside the dataset");
                }
                plain
            })
            .collect();
        if names.len() < limit {
            info!(family = %name, available = names.len(), requested = limit, "Extracting every mapped report");
        }
        selection.arrange(&mut names, |n| *n);
        let chosen: Vec<ReportEntry> = names
            .into_iter()
            .take(limit)
            .map(|n| ReportEntry::new(dataset_dir.join(n)))
            .collect();
        if chosen.is_empty() {
            extraction.missing_families.push(name.to_string());
        } else {
            extraction.families.insert(name.to_string(), chosen);
        }
    }
    extraction
}

/// A report an extraction step could not handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub report: String,
    pub reason: String,
}

/// What an extraction copied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionManifest {
    pub output_dir: PathBuf,
    pub total: usize,
    /// Copied file names per family
    pub families: BTreeMap<String, Vec<String>>,
    pub missing_families: Vec<String>,
    pub unreadable: Vec<String>,
    /// Already present in the output directory and left untouched
    pub skipped_existing: Vec<String>,
    pub failed: Vec<FileFailure>,
}

/// Copies the chosen reports into `output_dir`.
pub fn copy_extraction(extraction: &Extraction, output_dir: &Path) -> Result<ExtractionManifest> {
    if output_dir.exists() {
        warn!(output = %output_dir.display(), "Output directory already exists");
    }
    io::ensure_dir(output_dir)?;
    if extraction.is_empty() {
        warn!("No report matched the extraction");
    }

    let mut manifest = ExtractionManifest {
        output_dir: output_dir.to_path_buf(),
        missing_families: extraction.missing_families.clone(),
        unreadable: extraction.unreadable.clone(),
        ..ExtractionManifest::default()
    };
    for (family, entries) in &extraction.families {
        let mut copied = Vec::new();
        for entry in entries {
            match io::copy_or_fail(&entry.path, output_dir) {
                Ok(_) => copied.push(entry.file_name()),
                Err(IoError::DestinationExists { .. }) => {
                    manifest.skipped_existing.push(entry.file_name())
                }
                Err(e) => {
                    warn!(report = %entry.id, error = %e, "Could not copy report");
                    manifest.failed.push(FileFailure {
                        report: entry.file_name(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        manifest.total += copied.len();
        manifest.families.insert(family.clone(), copied);
    }
    info!(
        copied = manifest.total,
        skipped = manifest.skipped_existing.len(),
        failed = manifest.failed.len(),
        output = %output_dir.display(),
        "Extracted reports"
    );
    Ok(manifest)
}

/// A report renamed after its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Renamed {
    pub from: String,
    pub to: String,
}

/// What a digest rename pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenameSummary {
    pub renamed: Vec<Renamed>,
    pub already_named: usize,
    /// Another file already holds the digest name
    pub skipped_existing: Vec<String>,
    pub missing_digest: Vec<String>,
    pub failed: Vec<FileFailure>,
}

/// Renames every report in `store` to `<sha256>.json`, the lowercase hex
/// digest of its sample. Reports sharing a digest keep their names after
/// the first (in id order) has been renamed.
pub fn rename_by_digest(store: &ReportStore) -> Result<RenameSummary> {
    let mut summary = RenameSummary::default();
    for entry in store.enumerate()? {
        let name = entry.file_name();
        let document = match store.load(&entry) {
            Ok(report) => report.document,
            Err(e) => {
                warn!(report = %entry.id, error = %e, "Could not read report");
                summary.failed.push(FileFailure {
                    report: name,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let digest = report::sample_file(&document)
            .and_then(|file| file.get(DigestAlgorithm::Sha256.key()))
            .and_then(Value::as_str)
            .and_then(|v| Fingerprint::parse(DigestAlgorithm::Sha256, v));
        let Some(digest) = digest else {
            debug!(report = %entry.id, "No sample digest");
            summary.missing_digest.push(name);
            continue;
        };

        let target = format!("{}.json", digest.digest);
        if name == target {
            summary.already_named += 1;
            continue;
        }
        match io::rename_or_fail(&entry.path, &entry.path.with_file_name(&target)) {
            Ok(()) => {
                debug!(from = %name, to = %target, "Renamed report");
                summary.renamed.push(Renamed { from: name, to: target });
            }
            Err(IoError::DestinationExists { .. }) => summary.skipped_existing.push(name),
            Err(e) => summary.failed.push(FileFailure {
                report: name,
                reason: e.to_string(),
            }),
        }
    }
    info!(
        renamed = summary.renamed.len(),
        skipped = summary.skipped_existing.len(),
        missing_digest = summary.missing_digest.len(),
        "Renamed reports by digest"
    );
    Ok(summary)
}
