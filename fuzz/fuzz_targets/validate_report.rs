#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(doc) = serde_json::from_slice::<serde_json::Value>(data) {
        let _ = tracesift::validate::validate(&doc);
        let _ = tracesift::dedup::fingerprint(&doc);
    }
});
