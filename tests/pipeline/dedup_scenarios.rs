use crate::common::{digest, Batch, ReportBuilder};
use serde_json::json;
use tracesift::dedup::DuplicateStrategy;

fn colliding_batch() -> Batch {
    let batch = Batch::new();
    batch.write("b", &ReportBuilder::valid('a').build());
    batch.write("a", &ReportBuilder::valid('a').build());
    batch.write("c", &ReportBuilder::valid('c').build());
    batch
}

#[test]
fn collision_keeps_lowest_id() {
    let batch = colliding_batch();
    let summary = tracesift::run(&batch.config()).expect("run");

    assert_eq!(summary.counts.duplicate, 1);
    assert_eq!(summary.counts.passed, 2);
    assert!(batch.input_has("a"));
    assert!(!batch.input_has("b"));
    assert!(batch.output_has("duplicate_reports/duplicate_reports/b.json"));

    let listing = batch.read_output("duplicate_reports/duplicate_reports.json");
    assert_eq!(listing["total_duplicates"], 1);
    assert_eq!(listing["groups"][0]["kept"], "a");
    assert_eq!(listing["groups"][0]["duplicates"], json!(["b"]));
    assert_eq!(listing["groups"][0]["fingerprint"], format!("sha256:{}", digest('a')));
}

#[test]
fn duplicate_decision_is_reproducible() {
    let first = colliding_batch();
    let second = colliding_batch();
    let a = tracesift::run(&first.config()).expect("first run");
    let b = tracesift::run(&second.config()).expect("second run");

    assert_eq!(a.batch_digest, b.batch_digest);
    assert_eq!(a.counts, b.counts);
    assert_eq!(
        first.read_output("duplicate_reports/duplicate_reports.json")["groups"],
        second.read_output("duplicate_reports/duplicate_reports.json")["groups"]
    );
}

#[test]
fn largest_strategy_keeps_biggest_report() {
    let batch = Batch::new();
    batch.write("x", &ReportBuilder::valid('d').build());
    let mut padded = ReportBuilder::valid('d').build();
    padded["padding"] = json!("p".repeat(4096));
    batch.write("y", &padded);

    let mut config = batch.config();
    config.dedup.strategy = DuplicateStrategy::Largest;
    let summary = tracesift::run(&config).expect("run");

    assert_eq!(summary.counts.duplicate, 1);
    assert!(batch.input_has("y"));
    assert!(batch.output_has("duplicate_reports/duplicate_reports/x.json"));
}

#[test]
fn digest_case_does_not_split_groups() {
    let batch = Batch::new();
    batch.write("lower", &ReportBuilder::valid('e').build());
    let mut upper = ReportBuilder::valid('e').build();
    upper["target"]["file"]["sha256"] = json!(digest('E'));
    batch.write("upper", &upper);

    let summary = tracesift::run(&batch.config()).expect("run");
    assert_eq!(summary.counts.duplicate, 1);
    assert!(batch.input_has("lower"));
}

#[test]
fn reports_without_digest_are_kept_and_listed() {
    let batch = Batch::new();
    let mut first = ReportBuilder::valid('f').build();
    first["target"]["file"]["sha256"] = json!("not-a-digest");
    let mut second = ReportBuilder::valid('f').build();
    second["target"]["file"]
        .as_object_mut()
        .expect("file block")
        .remove("sha256");
    batch.write("n1", &first);
    batch.write("n2", &second);

    let summary = tracesift::run(&batch.config()).expect("run");
    assert_eq!(summary.counts.duplicate, 0);
    assert_eq!(summary.counts.passed, 2);
    assert_eq!(summary.undigested, 2);
    assert_eq!(
        batch.read_output("duplicate_reports/duplicate_reports.json")["undigested"],
        json!(["n1", "n2"])
    );
}

#[test]
fn invalid_reports_never_count_as_duplicates() {
    let batch = Batch::new();
    batch.write("a", &ReportBuilder::valid('1').processes(json!([])).build());
    batch.write("b", &ReportBuilder::valid('1').build());

    let summary = tracesift::run(&batch.config()).expect("run");
    assert_eq!(summary.counts.duplicate, 0);
    assert_eq!(summary.counts.error, 1);
    assert!(batch.input_has("b"));
}
