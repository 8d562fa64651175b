//! Content-hash deduplication across a batch.
//!
//! The sandbox already hashed the submitted sample, so the fingerprint is
//! read from the report rather than recomputed. The kept/duplicate
//! decision is global: it needs every fingerprint of the batch, which is
//! why it runs after validation has finished for all reports.

use crate::report::{self, ReportId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Digest algorithms accepted as fingerprints, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha512,
    Sha256,
}

impl DigestAlgorithm {
    const PREFERENCE: [DigestAlgorithm; 2] = [DigestAlgorithm::Sha512, DigestAlgorithm::Sha256];

    /// Metadata key the digest is stored under.
    pub fn key(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha512 => "sha512",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    /// Width of the hex encoding.
    pub fn hex_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha512 => 128,
            DigestAlgorithm::Sha256 => 64,
        }
    }
}

/// Fixed-width content digest of the analysed sample.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub algorithm: DigestAlgorithm,
    /// Lowercase hex
    pub digest: String,
}

impl Fingerprint {
    /// Accepts `value` only if it is valid hex of the algorithm's width.
    pub fn parse(algorithm: DigestAlgorithm, value: &str) -> Option<Self> {
        let digest = value.trim().to_ascii_lowercase();
        if digest.len() != algorithm.hex_len() || hex::decode(&digest).is_err() {
            return None;
        }
        Some(Self { algorithm, digest })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.key(), self.digest)
    }
}

/// Extracts the sample fingerprint from a report, if it carries one.
pub fn fingerprint(document: &Value) -> Option<Fingerprint> {
    let sample = report::sample_file(document)?;
    DigestAlgorithm::PREFERENCE.iter().find_map(|&algorithm| {
        sample
            .get(algorithm.key())
            .and_then(Value::as_str)
            .and_then(|v| Fingerprint::parse(algorithm, v))
    })
}

/// Which member of a duplicate group is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStrategy {
    /// Keep the lowest report id.
    #[default]
    LowestId,
    /// Keep the largest report on disk; ties go to the lowest id.
    Largest,
}

impl FromStr for DuplicateStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lowest-id" | "lowest_id" | "first" => Ok(DuplicateStrategy::LowestId),
            "largest" | "biggest" => Ok(DuplicateStrategy::Largest),
            other => Err(format!(
                "unknown duplicate strategy '{other}' (expected 'lowest-id' or 'largest')"
            )),
        }
    }
}

/// One row of the batch fingerprint table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRow {
    pub id: ReportId,
    pub fingerprint: Option<Fingerprint>,
    /// Report size on disk in bytes
    pub size: u64,
}

/// A group of reports sharing one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    pub kept: ReportId,
    /// Discarded members, sorted by id
    pub duplicates: Vec<ReportId>,
    /// All members with their sizes, sorted by id
    pub members: Vec<(ReportId, u64)>,
}

/// Kept/duplicate decision for a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupPlan {
    /// Reports that continue to the next phase, sorted by id.
    pub kept: Vec<ReportId>,
    /// Groups with more than one member, ordered by fingerprint.
    pub groups: Vec<DuplicateGroup>,
    /// Reports without a usable digest; always kept, never compared.
    pub undigested: Vec<ReportId>,
}

impl DedupPlan {
    pub fn duplicate_count(&self) -> usize {
        self.groups.iter().map(|g| g.duplicates.len()).sum()
    }

    pub fn duplicates(&self) -> impl Iterator<Item = &ReportId> {
        self.groups.iter().flat_map(|g| g.duplicates.iter())
    }
}

/// Groups report ids by fingerprint. Reports without one are left out.
pub fn group_by_fingerprint(rows: &[FingerprintRow]) -> BTreeMap<Fingerprint, Vec<ReportId>> {
    let mut groups: BTreeMap<Fingerprint, Vec<ReportId>> = BTreeMap::new();
    for row in rows {
        if let Some(fp) = &row.fingerprint {
            groups.entry(fp.clone()).or_default().push(row.id.clone());
        }
    }
    for ids in groups.values_mut() {
        ids.sort();
    }
    groups
}

/// Decides which reports are kept. The result depends only on the set of
/// rows, never on their order.
pub fn classify(rows: &[FingerprintRow], strategy: DuplicateStrategy) -> DedupPlan {
    let sizes: BTreeMap<&ReportId, u64> = rows.iter().map(|r| (&r.id, r.size)).collect();
    let mut plan = DedupPlan::default();

    for row in rows.iter().filter(|r| r.fingerprint.is_none()) {
        plan.undigested.push(row.id.clone());
        plan.kept.push(row.id.clone());
    }

    for (fingerprint, ids) in group_by_fingerprint(rows) {
        let kept = match strategy {
            DuplicateStrategy::LowestId => ids[0].clone(),
            DuplicateStrategy::Largest => ids
                .iter()
                .max_by(|a, b| {
                    let (sa, sb) = (sizes.get(a).copied(), sizes.get(b).copied());
                    // larger size wins, then lower id
                    sa.cmp(&sb).then_with(|| b.cmp(a))
                })
                .cloned()
                .unwrap_or_else(|| ids[0].clone()),
        };
        plan.kept.push(kept.clone());
        if ids.len() > 1 {
            let members = ids
                .iter()
                .map(|id| (id.clone(), sizes.get(id).copied().unwrap_or(0)))
                .collect();
            let duplicates = ids.into_iter().filter(|id| *id != kept).collect();
            plan.groups.push(DuplicateGroup {
                fingerprint,
                kept,
                duplicates,
                members,
            });
        }
    }

    plan.kept.sort();
    plan.undigested.sort();
    plan
}
