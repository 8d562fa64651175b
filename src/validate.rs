//! Structural validation of sandbox reports.
//!
//! Validation is pure inspection. It separates failures that originate in
//! the sandbox run (nothing executed, broken structure) from failures of
//! the embedded detection source, because the remediation differs: the
//! first means re-running the sample, the second means re-querying the
//! detection service.

use crate::report::{self, DETECTION_BLOCK};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Sandbox-side failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportErrorKind {
    /// The file could not be read or is not JSON.
    Unreadable,
    /// No analysis target: the sandbox could not analyse the sample at all.
    Fatal,
    /// A required block is missing or has the wrong shape.
    Malformed,
    /// The sample spawned no processes.
    NoProcesses,
    /// The main process has no hooked calls.
    NoHookedCalls,
    /// The report passed validation but could not be curated.
    CurationFailed,
}

/// Detection-source failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionErrorKind {
    /// The report carries no multi-vendor detection block.
    NoDetectionData,
    /// The detection block records a lookup failure.
    DetectionFetchFailed,
}

impl fmt::Display for ReportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ReportErrorKind::*;
        match self {
            Unreadable => write!(f, "unreadable"),
            Fatal => write!(f, "fatal"),
            Malformed => write!(f, "malformed"),
            NoProcesses => write!(f, "no processes"),
            NoHookedCalls => write!(f, "no hooked calls"),
            CurationFailed => write!(f, "curation failed"),
        }
    }
}

impl fmt::Display for DetectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionErrorKind::NoDetectionData => write!(f, "no detection data"),
            DetectionErrorKind::DetectionFetchFailed => write!(f, "detection fetch failed"),
        }
    }
}

/// Outcome of validating one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Ok,
    Error(ReportErrorKind),
    ClassifierError(DetectionErrorKind),
}

/// Validates one report document. The first failing check wins.
pub fn validate(document: &Value) -> ValidationResult {
    use ValidationResult::*;

    if document.get("target").is_none() {
        return Error(ReportErrorKind::Fatal);
    }
    if report::sample_file(document).is_none() {
        return Error(ReportErrorKind::Malformed);
    }
    let Some(processes) = report::processes(document) else {
        return Error(ReportErrorKind::Malformed);
    };
    let Some(main_process) = processes.first() else {
        return Error(ReportErrorKind::NoProcesses);
    };
    let has_calls = main_process
        .get("calls")
        .and_then(Value::as_array)
        .is_some_and(|calls| !calls.is_empty());
    if !has_calls {
        return Error(ReportErrorKind::NoHookedCalls);
    }

    match document.pointer(DETECTION_BLOCK) {
        None => ClassifierError(DetectionErrorKind::NoDetectionData),
        Some(Value::Object(block)) if !block.contains_key("error") => Ok,
        Some(_) => ClassifierError(DetectionErrorKind::DetectionFetchFailed),
    }
}
