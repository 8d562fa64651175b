use crate::common::{Batch, ReportBuilder};
use serde_json::json;
use tracesift::SiftError;

#[test]
fn user_terms_are_redacted_everywhere() {
    let mut batch = Batch::new();
    batch.terms(&["secret-corp.local", ""]);
    let mut doc = ReportBuilder::valid('1')
        .command_line("ping secret-corp.local -n 1")
        .build();
    doc["behavior"]["processes"][0]["calls"][0]["arguments"][0]["value"] =
        json!("\\\\secret-corp.local\\share\\payload.dll");
    batch.write("r1", &doc);

    tracesift::run(&batch.config()).expect("run");

    let doc = batch.read_input("r1");
    let process = &doc["behavior"]["processes"][0];
    assert_eq!(process["command_line"], "ping [REDACTED] -n 1");
    assert_eq!(
        process["calls"][0]["arguments"][0]["value"],
        "\\\\[REDACTED]\\share\\payload.dll"
    );
    assert!(!doc.to_string().contains("secret-corp"));
    // key names are never rewritten
    assert_eq!(process["calls"][0]["api"], "NtCreateFile");
}

#[test]
fn profile_accounts_are_redacted_and_system_paths_kept() {
    let batch = Batch::new();
    let mut doc = ReportBuilder::valid('1').build();
    doc["behavior"]["processes"][0]["calls"]
        .as_array_mut()
        .expect("calls")
        .push(json!({
            "api": "NtOpenFile",
            "arguments": [{"name": "FileName", "value": "C:\\Users\\Public\\Documents\\x.txt"}]
        }));
    batch.write("r1", &doc);

    tracesift::run(&batch.config()).expect("run");

    let doc = batch.read_input("r1");
    assert_eq!(
        doc["target"]["file"]["path"],
        "C:\\Users\\[REDACTED]\\Desktop\\sample.exe"
    );
    let calls = &doc["behavior"]["processes"][0]["calls"];
    assert_eq!(
        calls[0]["arguments"][0]["value"],
        "C:\\Windows\\System32\\drivers\\etc\\hosts"
    );
    assert_eq!(
        calls[1]["arguments"][0]["value"],
        "C:\\Users\\Public\\Documents\\x.txt"
    );
    assert!(!doc.to_string().contains("victim"));
}

#[test]
fn term_covering_a_profile_path_wins() {
    let mut batch = Batch::new();
    batch.terms(&["C:\\Users\\victim"]);
    batch.write("r1", &ReportBuilder::valid('1').build());

    tracesift::run(&batch.config()).expect("run");

    let doc = batch.read_input("r1");
    assert_eq!(doc["target"]["file"]["path"], "[REDACTED]\\Desktop\\sample.exe");
    assert_eq!(
        doc["behavior"]["processes"][0]["command_line"],
        "\"[REDACTED]\\Desktop\\sample.exe\" -run"
    );
}

#[test]
fn rerunning_over_curated_reports_changes_nothing() {
    let mut batch = Batch::new();
    batch.terms(&["DESKTOP-01", "secret-corp.local"]);
    batch.write(
        "r1",
        &ReportBuilder::valid('1')
            .command_line("net use \\\\secret-corp.local C:\\Users\\victim")
            .build(),
    );
    batch.write("r2", &ReportBuilder::valid('2').without_detections().build());

    let first = tracesift::run(&batch.config()).expect("first run");
    let after_first = (batch.read_input("r1"), batch.read_input("r2"));

    let second = tracesift::run(&batch.config()).expect("second run");
    let after_second = (batch.read_input("r1"), batch.read_input("r2"));

    assert_eq!(after_first, after_second);
    assert_eq!(first.counts, second.counts);
    assert_eq!(first.unlabeled_sandbox, second.unlabeled_sandbox);
}

#[test]
fn missing_sandbox_detections_are_defaulted() {
    let batch = Batch::new();
    batch.write("r1", &ReportBuilder::valid('1').without_detections().build());

    tracesift::run(&batch.config()).expect("run");

    let doc = batch.read_input("r1");
    assert_eq!(doc["detections"], "(n/a)");
    let unlabeled = batch.read_output("results/unlabeled_reports.json");
    assert_eq!(unlabeled["no_sandbox_consensus"], json!(["r1"]));
    assert_eq!(unlabeled["no_classifier_consensus"], json!([]));
}

#[test]
fn explicit_missing_terms_file_is_fatal() {
    let batch = Batch::new();
    batch.write("r1", &ReportBuilder::valid('1').build());
    let mut config = batch.config();
    config.anonymize_terms_path = Some(batch.output.path().join("absent.txt"));

    let err = tracesift::run(&config).unwrap_err();
    assert!(matches!(err, SiftError::TermsFile { .. }));

    // nothing was rewritten
    assert!(batch.read_input("r1").get("network").is_some());
}
