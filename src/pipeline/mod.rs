//! The multi-phase report pipeline.
//!
//! 1. validate every report (parallel), partition out failures
//! 2. decide duplicates over the complete fingerprint table (barrier)
//! 3. sanitize and 4. label every kept report (parallel, one task each)
//! 5. relocate, write listings, statistics and the summary
//!
//! Partition tables are owned by the calling thread and only updated from
//! the pool's result channel. Report-local failures never leave their
//! phase; only batch-fatal conditions are returned as errors.

pub mod artifacts;
pub mod partition;
pub mod pool;
pub mod summary;

pub use artifacts::OutputLayout;
pub use partition::{FailureRecord, Partition, PartitionCounts, PartitionTable, SoftPartitions};
pub use pool::WorkerPool;
pub use summary::RunSummary;

use crate::config::PipelineConfig;
use crate::dedup::{self, DedupPlan, FingerprintRow};
use crate::error::{FaultOrigin, Result};
use crate::io;
use crate::label::{self, ConsensusLabel, FamilyClassifier, LabelOutcome};
use crate::report::{ReportEntry, ReportId};
use crate::sanitize::{self, SanitizeReport, SanitizeRules, TermSet};
use crate::stats::{ReportObservation, RunStatistics};
use crate::store::ReportStore;
use crate::validate::{self, ReportErrorKind, ValidationResult};
use artifacts::Listings;
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Instant;
use summary::{batch_digest, PhaseTimer};
use tracing::{debug, info, warn};

/// Result of the validation task for one report.
#[derive(Debug)]
enum Checked {
    Unreadable(String),
    Validated {
        result: ValidationResult,
        row: FingerprintRow,
    },
}

/// Result of the curation task for one kept report.
#[derive(Debug)]
struct Curated {
    sanitized: SanitizeReport,
    labels: LabelOutcome,
    observation: ReportObservation,
}

/// Immutable state shared by every worker during a run.
struct RunContext<'a> {
    store: &'a ReportStore,
    rules: &'a SanitizeRules,
    classifier: &'a dyn FamilyClassifier,
    threshold: u32,
}

fn check_report(store: &ReportStore, entry: &ReportEntry) -> Checked {
    match store.load(entry) {
        Ok(report) => Checked::Validated {
            result: validate::validate(&report.document),
            row: FingerprintRow {
                id: entry.id.clone(),
                fingerprint: dedup::fingerprint(&report.document),
                size: report.size,
            },
        },
        Err(e) => Checked::Unreadable(e.to_string()),
    }
}

/// Loads, sanitizes, labels and rewrites one report.
fn curate_report(ctx: &RunContext<'_>, entry: &ReportEntry) -> Result<Curated> {
    let mut report = ctx.store.load(entry)?;
    let sanitized = sanitize::sanitize(&mut report.document, ctx.rules);
    let labels = label::label(&entry.id, &mut report.document, ctx.threshold, ctx.classifier);
    ctx.store.save(&report)?;

    let observation = ReportObservation::from_document(
        entry.id.clone(),
        &report.document,
        labels.positives,
        labels.sandbox.clone(),
        labels.classifier.clone(),
        labels.undetected,
    );
    Ok(Curated {
        sanitized,
        labels,
        observation,
    })
}

/// Phase 1: validation. Returns the fingerprint rows of valid reports.
fn validation_phase(
    pool: &WorkerPool,
    store: &ReportStore,
    entries: &[ReportEntry],
    table: &mut PartitionTable,
    failures: &mut Vec<FailureRecord>,
) -> Result<Vec<FingerprintRow>> {
    let mut rows = Vec::new();
    let mut outcome: Result<()> = Ok(());

    pool.run(entries, |entry| check_report(store, entry), |entry, checked| {
        let partition = match checked {
            Ok(Checked::Validated { result: ValidationResult::Ok, row }) => {
                rows.push(row);
                return;
            }
            Ok(Checked::Validated {
                result: ValidationResult::Error(kind),
                ..
            }) => Partition::Error(kind),
            Ok(Checked::Validated {
                result: ValidationResult::ClassifierError(kind),
                ..
            }) => Partition::ClassifierError(kind),
            Ok(Checked::Unreadable(reason)) => {
                warn!(report = %entry.id, %reason, "Unreadable report");
                Partition::Error(ReportErrorKind::Unreadable)
            }
            Err(panic) => {
                warn!(report = %entry.id, reason = %panic.message, "Validation task panicked");
                failures.push(FailureRecord::new(
                    &entry.id,
                    FaultOrigin::Validation,
                    panic.message,
                ));
                Partition::Error(ReportErrorKind::Malformed)
            }
        };
        debug!(report = %entry.id, %partition, "Report failed validation");
        if let Err(e) = table.assign(&entry.id, partition) {
            outcome = Err(e);
        }
    });

    outcome?;
    rows.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(rows)
}

/// Phase 2: duplicate decision over the complete fingerprint table.
fn dedup_phase(
    rows: &[FingerprintRow],
    config: &PipelineConfig,
    table: &mut PartitionTable,
) -> Result<DedupPlan> {
    let plan = dedup::classify(rows, config.dedup.strategy);
    for id in plan.duplicates() {
        table.assign(id, Partition::Duplicate)?;
    }
    info!(
        candidates = rows.len(),
        kept = plan.kept.len(),
        duplicates = plan.duplicate_count(),
        undigested = plan.undigested.len(),
        "Duplicate decision made"
    );
    Ok(plan)
}

#[derive(Default)]
struct CurationResults {
    observations: Vec<ReportObservation>,
    soft: SoftPartitions,
    classifier_failures: Vec<FailureRecord>,
    curation_failures: Vec<FailureRecord>,
}

/// Phases 3 and 4: sanitize and label each kept report in one task.
fn curation_phase(
    pool: &WorkerPool,
    ctx: &RunContext<'_>,
    kept: &[ReportEntry],
    table: &mut PartitionTable,
) -> Result<CurationResults> {
    let mut results = CurationResults::default();
    let mut outcome: Result<()> = Ok(());
    let mut redacted_strings = 0usize;

    pool.run(kept, |entry| curate_report(ctx, entry), |entry, curated| {
        let partition = match curated {
            Ok(Ok(curated)) => {
                redacted_strings += curated.sanitized.strings_rewritten;
                let labels = &curated.labels;
                if !labels.sandbox.is_consensus() {
                    results.soft.unlabeled_sandbox.insert(entry.id.clone());
                }
                if labels.classifier == ConsensusLabel::NoConsensus {
                    results.soft.unlabeled_classifier.insert(entry.id.clone());
                }
                if labels.undetected {
                    results.soft.undetected.insert(entry.id.clone());
                }
                if let Some(reason) = &labels.classifier_failure {
                    results.classifier_failures.push(FailureRecord::new(
                        &entry.id,
                        FaultOrigin::Curation,
                        reason.clone(),
                    ));
                }
                results.observations.push(curated.observation);
                Partition::Passed
            }
            Ok(Err(e)) => {
                warn!(report = %entry.id, error = %e, "Curation failed");
                results
                    .curation_failures
                    .push(FailureRecord::new(&entry.id, FaultOrigin::Curation, e.to_string()));
                Partition::Error(ReportErrorKind::CurationFailed)
            }
            Err(panic) => {
                warn!(report = %entry.id, reason = %panic.message, "Curation task panicked");
                results.curation_failures.push(FailureRecord::new(
                    &entry.id,
                    FaultOrigin::Curation,
                    panic.message,
                ));
                Partition::Error(ReportErrorKind::CurationFailed)
            }
        };
        if let Err(e) = table.assign(&entry.id, partition) {
            outcome = Err(e);
        }
    });

    outcome?;
    info!(
        curated = results.observations.len(),
        failed = results.curation_failures.len(),
        redacted_strings,
        "Curation finished"
    );
    Ok(results)
}

/// Runs the whole pipeline over `config.input_dir`.
pub fn run(config: &PipelineConfig) -> Result<RunSummary> {
    let started_at = Utc::now();
    let clock = Instant::now();
    config.validate()?;

    let store = ReportStore::open(&config.input_dir, config.io.limits())?;
    let (terms_path, explicit) = config.terms_source();
    let rules = SanitizeRules::new(TermSet::load(&terms_path, explicit)?, &config.sanitize);
    let classifier = label::from_config(&config.label.classifier)?;
    let pool = WorkerPool::new(config.workers)?;
    let layout = OutputLayout::new(&config.output.output_dir);

    let entries = store.enumerate()?;
    info!(
        input = %config.input_dir.display(),
        reports = entries.len(),
        workers = pool.workers(),
        terms = rules.terms().len(),
        classifier = classifier.name(),
        "Starting run"
    );

    let mut timer = PhaseTimer::default();
    let mut table = PartitionTable::new();
    let mut validation_failures = Vec::new();

    let rows = timer.time("validate", || {
        validation_phase(&pool, &store, &entries, &mut table, &mut validation_failures)
    })?;
    let plan = timer.time("dedup", || dedup_phase(&rows, config, &mut table))?;

    let kept_ids: BTreeSet<&ReportId> = plan.kept.iter().collect();
    let kept: Vec<ReportEntry> = entries
        .iter()
        .filter(|e| kept_ids.contains(&e.id))
        .cloned()
        .collect();
    let ctx = RunContext {
        store: &store,
        rules: &rules,
        classifier: classifier.as_ref(),
        threshold: config.vt_positives_threshold(),
    };
    let curation = timer.time("curate", || curation_phase(&pool, &ctx, &kept, &mut table))?;

    table.ensure_complete(&entries)?;

    let (statistics, listings, relocation_failures) = timer.time("report", || -> Result<_> {
        layout.create_dirs()?;
        let relocation_failures = artifacts::relocate_all(&store, &entries, &table, &layout);
        let listings = Listings::build(
            &entries,
            &table,
            &plan,
            &curation.soft,
            config.vt_positives_threshold(),
        );
        listings.write(&layout)?;
        let statistics = RunStatistics::compute(
            &curation.observations,
            table.counts(),
            config.output.top_labels,
        );
        io::atomic_write_json_pretty(&layout.statistics(), &statistics)?;
        Ok((statistics, listings, relocation_failures))
    })?;

    let mut curation_failures = validation_failures;
    curation_failures.extend(curation.curation_failures);

    let summary = RunSummary {
        started_at,
        input_dir: config.input_dir.clone(),
        output_dir: config.output.output_dir.clone(),
        workers: pool.workers(),
        batch_digest: batch_digest(&entries),
        counts: table.counts(),
        unlabeled_sandbox: listings.unlabeled.no_sandbox_consensus.len(),
        unlabeled_classifier: listings.unlabeled.no_classifier_consensus.len(),
        undetected: listings.undetected.total,
        undigested: listings.duplicates.undigested.len(),
        phases: timer.into_timings(),
        total_elapsed_ms: clock.elapsed().as_millis(),
        curation_failures,
        classifier_failures: curation.classifier_failures,
        relocation_failures,
    };
    io::atomic_write_json_pretty(&layout.summary(), &summary)?;

    info!(
        total = summary.counts.total,
        passed = summary.counts.passed,
        errors = summary.counts.error,
        vt_errors = summary.counts.classifier_error,
        duplicates = summary.counts.duplicate,
        labeled_reports = statistics.total_reports,
        elapsed_ms = summary.total_elapsed_ms as u64,
        "Run finished"
    );
    Ok(summary)
}
