use crate::common::{Batch, ReportBuilder};
use serde_json::json;
use std::fs;
use tracesift::SiftError;

fn mixed_batch() -> Batch {
    let batch = Batch::new();
    batch.write("r01", &ReportBuilder::valid('1').build());
    batch.write("r02", &ReportBuilder::valid('2').build());
    batch.write("r03", &ReportBuilder::valid('3').positives(2).build());
    batch.write("r01_copy", &ReportBuilder::valid('1').build());
    batch.write("e_fatal", &ReportBuilder::valid('6').without_target().build());
    batch.write("e_malformed", &ReportBuilder::valid('7').without_sample_file().build());
    batch.write("e_noproc", &ReportBuilder::valid('8').processes(json!([])).build());
    batch.write(
        "e_nocalls",
        &ReportBuilder::valid('9').processes(json!([{"calls": []}])).build(),
    );
    batch.write_raw("e_unreadable", "{\"target\": ");
    batch.write("v_missing", &ReportBuilder::valid('4').without_virustotal().build());
    batch.write(
        "v_error",
        &ReportBuilder::valid('5')
            .virustotal(json!({"error": "quota exceeded"}))
            .build(),
    );
    batch
}

#[test]
fn every_report_lands_in_exactly_one_partition() {
    let batch = mixed_batch();
    let summary = tracesift::run(&batch.config()).expect("run");

    let c = summary.counts;
    assert_eq!(c.total, 11);
    assert_eq!(c.passed, 3);
    assert_eq!(c.error, 5);
    assert_eq!(c.classifier_error, 2);
    assert_eq!(c.duplicate, 1);
    assert_eq!(c.passed + c.error + c.classifier_error + c.duplicate, c.total);
    assert_eq!(summary.undetected, 1);
    assert!(summary.relocation_failures.is_empty());
    assert!(summary.curation_failures.is_empty());
}

#[test]
fn listing_totals_match_summary_counts() {
    let batch = mixed_batch();
    let summary = tracesift::run(&batch.config()).expect("run");

    let errors = batch.read_output("reports_with_errors/reports_with_errors.json");
    let vt_errors = batch.read_output("reports_with_errors/reports_with_vt_errors.json");
    let duplicates = batch.read_output("duplicate_reports/duplicate_reports.json");
    let undetected = batch.read_output("results/undetected_or_benign_reports.json");

    assert_eq!(errors["total"], summary.counts.error);
    assert_eq!(vt_errors["total"], summary.counts.classifier_error);
    assert_eq!(duplicates["total_duplicates"], summary.counts.duplicate);
    assert_eq!(undetected["total"], summary.undetected);

    assert_eq!(errors["reports"]["fatal"], json!(["e_fatal.json"]));
    assert_eq!(errors["reports"]["malformed"], json!(["e_malformed.json"]));
    assert_eq!(errors["reports"]["no_processes"], json!(["e_noproc.json"]));
    assert_eq!(errors["reports"]["no_hooked_calls"], json!(["e_nocalls.json"]));
    assert_eq!(errors["reports"]["unreadable"], json!(["e_unreadable.json"]));
    assert_eq!(vt_errors["reports"]["no_detection_data"], json!(["v_missing.json"]));
    assert_eq!(vt_errors["reports"]["detection_fetch_failed"], json!(["v_error.json"]));
    assert_eq!(undetected["reports"], json!(["r03"]));

    let written = batch.read_output("results/run_summary.json");
    assert_eq!(written["counts"]["total"], 11);
    assert_eq!(written["batch_digest"], summary.batch_digest);
}

#[test]
fn failed_reports_are_relocated_and_passed_reports_stay() {
    let batch = mixed_batch();
    tracesift::run(&batch.config()).expect("run");

    for id in ["e_fatal", "e_malformed", "e_noproc", "e_nocalls", "e_unreadable"] {
        assert!(!batch.input_has(id), "{id} still in input");
        assert!(batch.output_has(&format!("reports_with_errors/reports_with_errors/{id}.json")));
    }
    for id in ["v_missing", "v_error"] {
        assert!(!batch.input_has(id));
        assert!(batch.output_has(&format!("reports_with_errors/reports_with_vt_errors/{id}.json")));
    }
    assert!(batch.output_has("duplicate_reports/duplicate_reports/r01_copy.json"));
    for id in ["r01", "r02", "r03"] {
        assert!(batch.input_has(id));
    }
}

#[test]
fn passed_reports_are_curated_in_place() {
    let batch = mixed_batch();
    tracesift::run(&batch.config()).expect("run");

    let doc = batch.read_input("r02");
    assert!(doc.get("network").is_none());
    assert!(doc.get("info").is_none());
    assert_eq!(doc["avclass_detection"], "Emotet");
    assert_eq!(doc["behavior"]["processes"][0]["environ"], "[REDACTED]");

    // rejected reports are moved untouched
    let fatal = crate::common::read_json(
        &batch
            .output
            .path()
            .join("reports_with_errors/reports_with_errors/e_noproc.json"),
    );
    assert!(fatal.get("network").is_some());
}

#[test]
fn statistics_cover_passed_reports() {
    let batch = mixed_batch();
    tracesift::run(&batch.config()).expect("run");

    let stats = batch.read_output("results/reports_statistics.json");
    assert_eq!(
        stats["partitions"],
        json!({"total": 11, "passed": 3, "error": 5, "classifier_error": 2, "duplicate": 1})
    );
    assert_eq!(stats["total_reports"], 3);
    assert_eq!(stats["undetected_reports"], 1);
    assert_eq!(stats["process_stats"]["average_spawned_processes"], 1.0);
    assert_eq!(
        stats["detection_stats"]["classifier_labels"],
        json!([{"label": "Emotet", "count": 2}])
    );
}

#[test]
fn empty_directory_produces_empty_artifacts() {
    let batch = Batch::new();
    let summary = tracesift::run(&batch.config()).expect("run");
    assert_eq!(summary.counts.total, 0);
    assert_eq!(batch.read_output("reports_with_errors/reports_with_errors.json")["total"], 0);
    assert_eq!(batch.read_output("results/reports_statistics.json")["total_reports"], 0);
}

#[test]
fn missing_input_directory_is_fatal() {
    let batch = Batch::new();
    let mut config = batch.config();
    config.input_dir = batch.input.path().join("does-not-exist");
    let err = tracesift::run(&config).unwrap_err();
    assert!(matches!(err, SiftError::InputDirectory { .. }));
}

#[test]
fn zero_workers_is_rejected_before_touching_reports() {
    let batch = mixed_batch();
    let mut config = batch.config();
    config.workers = 0;
    assert!(matches!(tracesift::run(&config), Err(SiftError::InvalidConfig(_))));
    assert!(batch.input_has("e_fatal"));
}

#[test]
fn hidden_and_foreign_files_are_not_reports() {
    let batch = Batch::new();
    batch.write("kept", &ReportBuilder::valid('1').build());
    let dir = batch.input.path();
    fs::write(dir.join(".hidden.json"), "{").expect("write hidden");
    fs::write(dir.join("notes.txt"), "not a report").expect("write notes");
    fs::write(dir.join("kept.json.bak"), "{").expect("write backup");
    fs::create_dir(dir.join("nested")).expect("create nested");
    fs::write(dir.join("nested").join("deep.json"), "{").expect("write nested");

    let summary = tracesift::run(&batch.config()).expect("run");

    assert_eq!(summary.counts.total, 1);
    assert_eq!(summary.counts.passed, 1);
    for name in [".hidden.json", "notes.txt", "kept.json.bak", "nested/deep.json"] {
        assert!(dir.join(name).exists(), "{name} was touched");
    }
    assert_eq!(fs::read_to_string(dir.join(".hidden.json")).expect("read"), "{");
}

#[cfg(unix)]
#[test]
fn non_utf8_names_get_distinct_ids() {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let batch = Batch::new();
    let name = |bytes: &[u8]| OsString::from_vec(bytes.to_vec());
    let write = |file: &OsString, doc: serde_json::Value| {
        fs::write(
            batch.input.path().join(file),
            serde_json::to_vec(&doc).expect("serialize"),
        )
        .expect("write report");
    };
    // both names decode lossily to the same text
    let first = name(b"a\xff.json");
    let second = name(b"a\xfe.json");
    let broken = name(b"a\xfd.json");
    write(&first, ReportBuilder::valid('1').build());
    write(&second, ReportBuilder::valid('2').build());
    write(&broken, ReportBuilder::valid('3').processes(json!([])).build());

    let summary = tracesift::run(&batch.config()).expect("run");

    assert_eq!(summary.counts.total, 3);
    assert_eq!(summary.counts.passed, 2);
    assert_eq!(summary.counts.error, 1);
    for file in [&first, &second] {
        let doc = crate::common::read_json(&batch.input.path().join(file));
        assert_eq!(doc["avclass_detection"], "Emotet");
    }
    let errors = batch.read_output("reports_with_errors/reports_with_errors.json");
    assert_eq!(errors["reports"]["no_processes"], json!([r"a\xfd.json"]));
    assert!(batch
        .output
        .path()
        .join("reports_with_errors/reports_with_errors")
        .join(&broken)
        .exists());
}

#[cfg(unix)]
#[test]
fn symlinked_reports_are_processed_not_dropped() {
    use std::os::unix::fs::symlink;

    let batch = Batch::new();
    let elsewhere = tempfile::TempDir::new().expect("link target dir");
    let target = elsewhere.path().join("real.json");
    fs::write(
        &target,
        serde_json::to_vec(&ReportBuilder::valid('2').build()).expect("serialize"),
    )
    .expect("write target");

    let dir = batch.input.path();
    batch.write("plain", &ReportBuilder::valid('1').build());
    symlink(&target, dir.join("linked.json")).expect("link");
    symlink(elsewhere.path().join("missing.json"), dir.join("dangling.json")).expect("dangling link");
    symlink(elsewhere.path(), dir.join("folder.json")).expect("directory link");

    let summary = tracesift::run(&batch.config()).expect("run");

    assert_eq!(summary.counts.total, 3);
    assert_eq!(summary.counts.passed, 2);
    assert_eq!(summary.counts.error, 1);

    // the curated copy replaces the link; the link target is left alone
    let linked = dir.join("linked.json");
    assert!(fs::symlink_metadata(&linked).expect("linked").file_type().is_file());
    assert_eq!(batch.read_input("linked")["avclass_detection"], "Emotet");
    assert!(crate::common::read_json(&target).get("network").is_some());

    let errors = batch.read_output("reports_with_errors/reports_with_errors.json");
    assert_eq!(errors["reports"]["unreadable"], json!(["dangling.json"]));
    let moved = batch
        .output
        .path()
        .join("reports_with_errors/reports_with_errors/dangling.json");
    assert!(fs::symlink_metadata(&moved).expect("moved link").file_type().is_symlink());
    assert!(fs::symlink_metadata(dir.join("folder.json")).is_ok());
}
