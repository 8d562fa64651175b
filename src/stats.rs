//! Run statistics over the curated reports.
//!
//! Statistics are computed once, after every other phase, from one
//! [`ReportObservation`] per passed report, alongside the partition counts
//! of the whole batch. Observations are sorted by id first so that ties in
//! the extreme values always name the lowest id.

use crate::label::ConsensusLabel;
use crate::pipeline::partition::PartitionCounts;
use crate::report::{self, ReportId};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// What the statistics need to know about one curated report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportObservation {
    pub id: ReportId,
    pub calls_per_process: Vec<usize>,
    pub positives: u32,
    pub sandbox: ConsensusLabel,
    pub classifier: ConsensusLabel,
    pub undetected: bool,
}

impl ReportObservation {
    /// Observes a curated document. Labels come from the labeling phase.
    pub fn from_document(
        id: ReportId,
        document: &Value,
        positives: u32,
        sandbox: ConsensusLabel,
        classifier: ConsensusLabel,
        undetected: bool,
    ) -> Self {
        Self {
            id,
            calls_per_process: report::calls_per_process(document),
            positives,
            sandbox,
            classifier,
            undetected,
        }
    }

    pub fn process_count(&self) -> usize {
        self.calls_per_process.len()
    }
}

/// An extreme value and one report exhibiting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extreme {
    pub value: u64,
    pub example_report: ReportId,
}

/// Frequency of one family label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessStats {
    pub average_spawned_processes: f64,
    pub min_spawned_processes: Option<Extreme>,
    pub max_spawned_processes: Option<Extreme>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HookedCallStats {
    pub average_calls_per_process: f64,
    pub min_calls: Option<Extreme>,
    pub max_calls: Option<Extreme>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionStats {
    pub average_positives: f64,
    pub min_positives: Option<Extreme>,
    pub max_positives: Option<Extreme>,
    /// Sandbox consensus labels of detected reports, most frequent first
    pub sandbox_labels: Vec<LabelCount>,
    /// Classifier consensus labels of detected reports, most frequent first
    pub classifier_labels: Vec<LabelCount>,
}

/// Aggregate statistics of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    /// Partition sizes of the whole batch
    pub partitions: PartitionCounts,
    pub total_reports: usize,
    pub undetected_reports: usize,
    pub process_stats: ProcessStats,
    pub hooked_call_stats: HookedCallStats,
    pub detection_stats: DetectionStats,
}

#[derive(Default)]
struct Extremes {
    min: Option<Extreme>,
    max: Option<Extreme>,
}

impl Extremes {
    fn observe(&mut self, value: u64, id: &ReportId) {
        if self.min.as_ref().map_or(true, |m| value < m.value) {
            self.min = Some(Extreme {
                value,
                example_report: id.clone(),
            });
        }
        if self.max.as_ref().map_or(true, |m| value > m.value) {
            self.max = Some(Extreme {
                value,
                example_report: id.clone(),
            });
        }
    }
}

fn ratio(total: u64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

/// Frequency table ordered by count descending, then label ascending.
pub fn label_frequencies<'a, I>(labels: I, top: Option<usize>) -> Vec<LabelCount>
where
    I: IntoIterator<Item = &'a ConsensusLabel>,
{
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for family in labels.into_iter().filter_map(ConsensusLabel::family) {
        *counts.entry(family).or_default() += 1;
    }
    let mut table: Vec<LabelCount> = counts
        .into_iter()
        .map(|(label, count)| LabelCount {
            label: label.to_string(),
            count,
        })
        .collect();
    table.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    if let Some(top) = top {
        table.truncate(top);
    }
    table
}

impl RunStatistics {
    pub fn compute(
        observations: &[ReportObservation],
        partitions: PartitionCounts,
        top_labels: Option<usize>,
    ) -> Self {
        let mut sorted: Vec<&ReportObservation> = observations.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut processes = Extremes::default();
        let mut calls = Extremes::default();
        let mut positives = Extremes::default();
        let (mut total_processes, mut total_calls, mut total_positives) = (0u64, 0u64, 0u64);

        for obs in &sorted {
            let n = obs.process_count() as u64;
            processes.observe(n, &obs.id);
            total_processes += n;
            for &c in &obs.calls_per_process {
                calls.observe(c as u64, &obs.id);
                total_calls += c as u64;
            }
            positives.observe(u64::from(obs.positives), &obs.id);
            total_positives += u64::from(obs.positives);
        }

        let detected = || sorted.iter().filter(|o| !o.undetected);

        Self {
            partitions,
            total_reports: sorted.len(),
            undetected_reports: sorted.iter().filter(|o| o.undetected).count(),
            process_stats: ProcessStats {
                average_spawned_processes: ratio(total_processes, sorted.len()),
                min_spawned_processes: processes.min,
                max_spawned_processes: processes.max,
            },
            hooked_call_stats: HookedCallStats {
                average_calls_per_process: ratio(total_calls, total_processes as usize),
                min_calls: calls.min,
                max_calls: calls.max,
            },
            detection_stats: DetectionStats {
                average_positives: ratio(total_positives, sorted.len()),
                min_positives: positives.min,
                max_positives: positives.max,
                sandbox_labels: label_frequencies(detected().map(|o| &o.sandbox), top_labels),
                classifier_labels: label_frequencies(detected().map(|o| &o.classifier), top_labels),
            },
        }
    }
}
