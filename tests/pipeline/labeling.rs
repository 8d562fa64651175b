use crate::common::{Batch, ReportBuilder};
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn undetected_ids(batch: &Batch) -> BTreeSet<String> {
    batch.read_output("results/undetected_or_benign_reports.json")["reports"]
        .as_array()
        .expect("report list")
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

#[test]
fn undetected_set_grows_with_threshold() {
    let batch = Batch::new();
    for (id, c, positives) in [
        ("p00", '0', 0),
        ("p05", '5', 5),
        ("p10", 'a', 10),
        ("p20", 'b', 20),
        ("p40", 'c', 40),
    ] {
        batch.write(id, &ReportBuilder::valid(c).positives(positives).build());
    }

    let mut previous = BTreeSet::new();
    for (threshold, expected) in [(0, 1), (5, 2), (10, 3), (30, 4), (40, 5)] {
        let mut config = batch.config();
        config.label.vt_positives_threshold = threshold;
        let summary = tracesift::run(&config).expect("run");

        let current = undetected_ids(&batch);
        assert_eq!(current.len(), expected, "threshold {threshold}");
        assert_eq!(summary.undetected, expected);
        assert!(previous.is_subset(&current));
        previous = current;
    }
    assert!(previous.contains("p40"));
}

#[test]
fn undetected_reports_still_pass() {
    let batch = Batch::new();
    batch.write("low", &ReportBuilder::valid('1').positives(3).build());

    let summary = tracesift::run(&batch.config()).expect("run");
    assert_eq!(summary.counts.passed, 1);
    assert!(batch.input_has("low"));
    let listing = batch.read_output("results/undetected_or_benign_reports.json");
    assert_eq!(listing["vt_positives_threshold"], 10);
    assert_eq!(listing["reports"], json!(["low"]));
}

#[test]
fn default_classifier_records_vendor_consensus() {
    let batch = Batch::new();
    batch.write("r1", &ReportBuilder::valid('1').build());
    batch.write(
        "r2",
        &ReportBuilder::valid('2')
            .virustotal(json!({
                "positives": 30,
                "scans": {
                    "Kaspersky": {"detected": true, "result": "Trojan.Win32.Zbot.abc"},
                    "Avast": {"detected": false, "result": null}
                }
            }))
            .build(),
    );

    let summary = tracesift::run(&batch.config()).expect("run");

    assert_eq!(batch.read_input("r1")["avclass_detection"], "Emotet");
    // a single vendor is not a consensus
    assert_eq!(batch.read_input("r2")["avclass_detection"], "(n/a)");
    assert_eq!(summary.unlabeled_classifier, 1);
    assert_eq!(
        batch.read_output("results/unlabeled_reports.json")["no_classifier_consensus"],
        json!(["r2"])
    );
}

#[test]
fn split_sandbox_detections_have_no_consensus() {
    let batch = Batch::new();
    batch.write(
        "tied",
        &ReportBuilder::valid('1')
            .detections(json!([{"family": "Emotet"}, {"family": "Qakbot"}]))
            .build(),
    );
    batch.write(
        "majority",
        &ReportBuilder::valid('2')
            .detections(json!([{"family": "emotet"}, {"family": "Emotet"}, {"family": "Qakbot"}]))
            .build(),
    );

    tracesift::run(&batch.config()).expect("run");

    let unlabeled = batch.read_output("results/unlabeled_reports.json");
    assert_eq!(unlabeled["no_sandbox_consensus"], json!(["tied"]));
    let stats = batch.read_output("results/reports_statistics.json");
    assert_eq!(
        stats["detection_stats"]["sandbox_labels"],
        json!([{"label": "Emotet", "count": 1}])
    );
}

#[cfg(unix)]
#[test]
fn classifier_failure_stays_with_its_report() {
    let batch = Batch::new();
    batch.write("good", &ReportBuilder::valid('1').build());
    batch.write("poisoned", &ReportBuilder::valid('2').build());

    let script = r#"input=$(cat); case "$input" in *poison*) exit 1;; esac; printf 'good\tqakbot\npoisoned\tqakbot\n'"#;
    let mut config = batch.config();
    config.label.classifier.command = Some(vec!["sh".into(), "-c".into(), script.into()]);
    config.label.classifier.timeout_secs = 30;

    let summary = tracesift::run(&config).expect("run");

    assert_eq!(summary.counts.passed, 2);
    assert_eq!(summary.classifier_failures.len(), 1);
    assert_eq!(summary.classifier_failures[0].report.to_string(), "poisoned");
    assert!(summary.curation_failures.is_empty());

    assert_eq!(batch.read_input("good")["avclass_detection"], "Qakbot");
    let poisoned = batch.read_input("poisoned");
    assert_eq!(poisoned["avclass_detection"], "(n/a)");
    // sanitization still happened
    assert!(poisoned.get("network").is_none());
    assert_eq!(
        batch.read_output("results/unlabeled_reports.json")["no_classifier_consensus"],
        json!(["poisoned"])
    );
}
