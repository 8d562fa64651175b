#![no_main]
use libfuzzer_sys::fuzz_target;
use tracesift::sanitize::{sanitize, SanitizeRules, TermSet};

fuzz_target!(|data: &[u8]| {
    let Ok(mut doc) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let terms = TermSet::from_lines("victim\nC:\\Users\\victim\ncorp.local").unwrap();
    let rules = SanitizeRules::with_terms(terms);
    sanitize(&mut doc, &rules);
    let once = doc.clone();
    let second = sanitize(&mut doc, &rules);
    assert_eq!(once, doc);
    assert_eq!(second.strings_rewritten, 0);
});
