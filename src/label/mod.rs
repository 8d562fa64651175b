//! Consensus labeling of curated reports.
//!
//! Two independent opinions are formed for each report: the sandbox's own
//! family detections and the family agreed on by the multi-vendor
//! detection labels, the latter delegated to a [`FamilyClassifier`]. A
//! positives count at or below the configured threshold tags the report as
//! undetected or benign.

pub mod classifier;
pub mod plurality;

pub use classifier::{
    from_config, parse_response, ClassifierQuery, FamilyClassifier, ProcessClassifier,
};
pub use plurality::PluralityClassifier;

use crate::report::{
    ReportId, CLASSIFIER_LABEL_KEY, DETECTION_BLOCK, NOT_AVAILABLE, SANDBOX_DETECTIONS_KEY,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// A family label, or the absence of agreement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConsensusLabel {
    Family(String),
    NoConsensus,
}

impl ConsensusLabel {
    /// Normalizes a raw family name. Empty text and the placeholder mean
    /// no consensus.
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == NOT_AVAILABLE {
            return ConsensusLabel::NoConsensus;
        }
        ConsensusLabel::Family(capitalize(raw))
    }

    pub fn family(&self) -> Option<&str> {
        match self {
            ConsensusLabel::Family(f) => Some(f),
            ConsensusLabel::NoConsensus => None,
        }
    }

    pub fn is_consensus(&self) -> bool {
        matches!(self, ConsensusLabel::Family(_))
    }

    pub fn as_str(&self) -> &str {
        self.family().unwrap_or(NOT_AVAILABLE)
    }
}

impl fmt::Display for ConsensusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ConsensusLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConsensusLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ConsensusLabel::from_raw(&raw))
    }
}

/// First character upper case, the rest lower case.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// One vendor's opinion on the sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionRecord {
    pub vendor: String,
    pub detected: bool,
    pub label: Option<String>,
}

/// Vendor opinions from the detection block, keyed by vendor.
pub fn detection_records(document: &Value) -> BTreeMap<String, DetectionRecord> {
    let Some(scans) = document
        .pointer(DETECTION_BLOCK)
        .and_then(|b| b.get("scans"))
        .and_then(Value::as_object)
    else {
        return BTreeMap::new();
    };

    scans
        .iter()
        .filter_map(|(vendor, scan)| {
            let scan = scan.as_object()?;
            let label = scan
                .get("result")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string);
            Some((
                vendor.clone(),
                DetectionRecord {
                    vendor: vendor.clone(),
                    detected: scan.get("detected").and_then(Value::as_bool).unwrap_or(false),
                    label,
                },
            ))
        })
        .collect()
}

/// Number of positive detections: the block's own counter when numeric,
/// otherwise the detected records.
pub fn positives(document: &Value, records: &BTreeMap<String, DetectionRecord>) -> u32 {
    document
        .pointer(DETECTION_BLOCK)
        .and_then(|b| b.get("positives"))
        .and_then(Value::as_u64)
        .map(|p| u32::try_from(p).unwrap_or(u32::MAX))
        .unwrap_or_else(|| records.values().filter(|r| r.detected).count() as u32)
}

/// Family agreed on by the sandbox's own detections.
///
/// A single distinct family wins outright; with several, one must hold a
/// strict majority of the entries.
pub fn sandbox_consensus(detections: Option<&Value>) -> ConsensusLabel {
    let names: Vec<ConsensusLabel> = match detections {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.as_str()),
                Value::Object(o) => o.get("family").and_then(Value::as_str),
                _ => None,
            })
            .map(ConsensusLabel::from_raw)
            .filter(ConsensusLabel::is_consensus)
            .collect(),
        Some(Value::String(s)) => vec![ConsensusLabel::from_raw(s)],
        _ => Vec::new(),
    };

    let mut counts: BTreeMap<&ConsensusLabel, usize> = BTreeMap::new();
    for name in names.iter().filter(|n| n.is_consensus()) {
        *counts.entry(name).or_default() += 1;
    }
    let total: usize = counts.values().sum();
    match counts.len() {
        0 => ConsensusLabel::NoConsensus,
        1 => counts
            .into_keys()
            .next()
            .cloned()
            .unwrap_or(ConsensusLabel::NoConsensus),
        _ => counts
            .into_iter()
            .find(|(_, n)| 2 * n > total)
            .map(|(label, _)| label.clone())
            .unwrap_or(ConsensusLabel::NoConsensus),
    }
}

/// Query for the classifier: the positive vendor labels only.
pub fn classifier_query(id: &ReportId, records: &BTreeMap<String, DetectionRecord>) -> ClassifierQuery {
    ClassifierQuery {
        sample_id: id.to_string(),
        av_labels: records
            .values()
            .filter(|r| r.detected)
            .filter_map(|r| r.label.as_ref().map(|l| (r.vendor.clone(), l.clone())))
            .collect(),
    }
}

/// Result of labeling one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelOutcome {
    pub sandbox: ConsensusLabel,
    pub classifier: ConsensusLabel,
    pub undetected: bool,
    pub positives: u32,
    /// Why the classifier produced nothing, when it failed.
    pub classifier_failure: Option<String>,
}

/// Labels one report and records the classifier's consensus in it.
pub fn label(
    id: &ReportId,
    document: &mut Value,
    threshold: u32,
    classifier: &dyn FamilyClassifier,
) -> LabelOutcome {
    let records = detection_records(document);
    let positives = positives(document, &records);
    let sandbox = sandbox_consensus(document.get(SANDBOX_DETECTIONS_KEY));

    let query = classifier_query(id, &records);
    let (classifier_label, classifier_failure) = if query.av_labels.is_empty() {
        (ConsensusLabel::NoConsensus, None)
    } else {
        match classifier.classify(std::slice::from_ref(&query)) {
            Ok(mut labels) => (
                labels
                    .remove(&query.sample_id)
                    .unwrap_or(ConsensusLabel::NoConsensus),
                None,
            ),
            Err(e) => {
                warn!(report = %id, classifier = classifier.name(), error = %e, "Classifier failed");
                (ConsensusLabel::NoConsensus, Some(e.to_string()))
            }
        }
    };

    if let Value::Object(root) = document {
        root.insert(
            CLASSIFIER_LABEL_KEY.to_string(),
            Value::String(classifier_label.as_str().to_string()),
        );
    }

    let outcome = LabelOutcome {
        sandbox,
        classifier: classifier_label,
        undetected: positives <= threshold,
        positives,
        classifier_failure,
    };
    debug!(
        report = %id,
        sandbox = %outcome.sandbox,
        classifier = %outcome.classifier,
        positives,
        undetected = outcome.undetected,
        "Labeled report"
    );
    outcome
}
