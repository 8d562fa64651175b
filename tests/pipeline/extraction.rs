use crate::common::{digest, Batch, ReportBuilder};
use serde_json::json;
use std::fs;
use tempfile::TempDir;
use tracesift::extract::{self, LabelMapping, LabelQuery, LabelSource, Selection};
use tracesift::io::IOLimits;
use tracesift::store::ReportStore;

fn curated_batch() -> Batch {
    let batch = Batch::new();
    batch.write("r1", &ReportBuilder::valid('1').build());
    batch.write(
        "r2",
        &ReportBuilder::valid('2')
            .virustotal(json!({
                "positives": 30,
                "scans": {
                    "Kaspersky": {"detected": true, "result": "Trojan.Win32.Qakbot.gen"},
                    "ESET-NOD32": {"detected": true, "result": "Win32/Qakbot.CD"}
                }
            }))
            .detections(json!([{"family": "Qakbot"}]))
            .build(),
    );
    batch.write("r3", &ReportBuilder::valid('3').build());
    batch.write("r4", &ReportBuilder::valid('4').without_detections().build());
    tracesift::run(&batch.config()).expect("run");
    batch
}

fn store(batch: &Batch) -> ReportStore {
    ReportStore::open(batch.input.path(), IOLimits::default()).expect("store")
}

#[test]
fn curated_reports_are_extracted_per_family() {
    let batch = curated_batch();
    let out = TempDir::new().expect("output");

    let mut query = LabelQuery::new(LabelSource::Classifier, 1);
    query.include = extract::parse_families("emotet, QAKBOT");
    let extraction = extract::select_by_label(&store(&batch), &query).expect("select");
    let manifest = extract::copy_extraction(&extraction, out.path()).expect("copy");

    assert_eq!(manifest.total, 2);
    assert_eq!(manifest.families["Emotet"], vec!["r1.json"]);
    assert_eq!(manifest.families["Qakbot"], vec!["r2.json"]);
    assert!(manifest.missing_families.is_empty());
    assert_eq!(
        fs::read(out.path().join("r2.json")).expect("copy"),
        fs::read(batch.input.path().join("r2.json")).expect("original")
    );
    // the curated directory is left as it was
    assert!(batch.input_has("r1") && batch.input_has("r2"));
}

#[test]
fn sandbox_labels_skip_reports_without_consensus() {
    let batch = curated_batch();
    let out = TempDir::new().expect("output");

    let mut query = LabelQuery::new(LabelSource::Sandbox, 10);
    query.exclude = vec!["Qakbot".into()];
    query.selection = Selection::Shuffled { seed: 3 };
    let extraction = extract::select_by_label(&store(&batch), &query).expect("select");
    let manifest = extract::copy_extraction(&extraction, out.path()).expect("copy");

    let mut emotet = manifest.families["Emotet"].clone();
    emotet.sort();
    assert_eq!(emotet, vec!["r1.json", "r3.json"]);
    assert_eq!(manifest.total, 2);
    assert!(!out.path().join("r4.json").exists());
}

#[test]
fn mapping_file_drives_extraction() {
    let batch = curated_batch();
    let out = TempDir::new().expect("output");
    let mapping_path = batch.output.path().join("avclass_mapping.json");
    fs::write(
        &mapping_path,
        json!({
            "Emotet": {"n_reports": 3, "reports": [
                {"report": "r3.json"}, {"report": "r1.json"}, {"report": "gone.json"}
            ]}
        })
        .to_string(),
    )
    .expect("write mapping");

    let mapping = LabelMapping::load(&mapping_path).expect("mapping");
    let families = extract::parse_families("Emotet, Virlock");
    let extraction = extract::select_from_mapping(
        &mapping,
        batch.input.path(),
        &families,
        3,
        Selection::First,
    );
    let manifest = extract::copy_extraction(&extraction, out.path()).expect("copy");

    assert_eq!(manifest.families["Emotet"], vec!["r3.json", "r1.json"]);
    assert_eq!(manifest.failed.len(), 1);
    assert_eq!(manifest.failed[0].report, "gone.json");
    assert_eq!(manifest.missing_families, vec!["Virlock"]);
    assert!(!out.path().join("gone.json").exists());
}

#[test]
fn reports_are_renamed_after_their_sample() {
    let batch = curated_batch();
    let summary = extract::rename_by_digest(&store(&batch)).expect("rename");

    assert_eq!(summary.renamed.len(), 4);
    assert!(summary.missing_digest.is_empty());
    for (id, c) in [("r1", '1'), ("r4", '4')] {
        assert!(!batch.input_has(id));
        assert!(batch.input_has(&digest(c)));
    }

    // a second pass finds every report already named
    let again = extract::rename_by_digest(&store(&batch)).expect("rename again");
    assert!(again.renamed.is_empty());
    assert_eq!(again.already_named, 4);
}
