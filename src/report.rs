//! Report identity and the well-known locations inside a sandbox trace.
//!
//! A report document is kept as a `serde_json::Value`: an explicit sum
//! type over null, bool, number, string, array and object. The pipeline
//! only ever looks at a handful of paths in it; they are collected here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

/// JSON pointer to the analysed sample's metadata block.
pub const SAMPLE_FILE: &str = "/target/file";
/// JSON pointer to the embedded multi-vendor detection block.
pub const DETECTION_BLOCK: &str = "/target/file/virustotal";
/// JSON pointer to the per-process behavioral trace.
pub const PROCESSES: &str = "/behavior/processes";
/// Top-level key holding the sandbox's own family detections.
pub const SANDBOX_DETECTIONS_KEY: &str = "detections";
/// Top-level key the classifier consensus is written under.
pub const CLASSIFIER_LABEL_KEY: &str = "avclass_detection";
/// Placeholder written where a family label is not available.
pub const NOT_AVAILABLE: &str = "(n/a)";

/// Identifier of a report: the stem of its file name.
///
/// A UTF-8 stem without backslashes is used verbatim. Any other stem is
/// escaped (`\\` for a backslash, `\xNN` for every byte outside printable
/// ASCII), so distinct file names always give distinct ids. Ordering is
/// byte order of the id, which is what "lowest id" means wherever the
/// pipeline needs a deterministic tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(String);

impl ReportId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the id from a storage path (`<dir>/<id>.json`).
    pub fn from_path(path: &Path) -> Self {
        Self(path.file_stem().map(stem_id).unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn stem_id(stem: &OsStr) -> String {
    match stem.to_str() {
        Some(s) if !s.contains('\\') => s.to_string(),
        _ => escape_stem(stem),
    }
}

#[cfg(unix)]
fn escape_stem(stem: &OsStr) -> String {
    use std::os::unix::ffi::OsStrExt;

    let mut out = String::with_capacity(stem.len());
    for &b in stem.as_bytes() {
        match b {
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(char::from(b)),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}

#[cfg(windows)]
fn escape_stem(stem: &OsStr) -> String {
    use std::os::windows::ffi::OsStrExt;

    let mut out = String::with_capacity(stem.len());
    for unit in stem.encode_wide() {
        match unit {
            0x5c => out.push_str("\\\\"),
            0x20..=0x7e => out.push(char::from(unit as u8)),
            _ => out.push_str(&format!("\\u{unit:04x}")),
        }
    }
    out
}

#[cfg(not(any(unix, windows)))]
fn escape_stem(stem: &OsStr) -> String {
    stem.to_string_lossy().replace('\\', "\\\\")
}

/// One report file found in the store at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub id: ReportId,
    pub path: PathBuf,
}

impl ReportEntry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            id: ReportId::from_path(&path),
            path,
        }
    }

    /// File name as it appears in listings. Names that are not plain
    /// UTF-8 are listed under their escaped id.
    pub fn file_name(&self) -> String {
        match self.path.file_name().and_then(OsStr::to_str) {
            Some(name) if !name.contains('\\') => name.to_string(),
            _ => format!("{}.json", self.id),
        }
    }
}

/// A loaded report: identity plus its mutable document.
#[derive(Debug, Clone)]
pub struct Report {
    pub entry: ReportEntry,
    pub document: Value,
    /// Size on disk when loaded, in bytes
    pub size: u64,
}

/// The sample metadata block, if present and an object.
pub fn sample_file(document: &Value) -> Option<&Map<String, Value>> {
    document.pointer(SAMPLE_FILE).and_then(Value::as_object)
}

/// The process list, if present and an array.
pub fn processes(document: &Value) -> Option<&Vec<Value>> {
    document.pointer(PROCESSES).and_then(Value::as_array)
}

/// Number of hooked calls recorded for each process, in trace order.
pub fn calls_per_process(document: &Value) -> Vec<usize> {
    processes(document)
        .map(|procs| {
            procs
                .iter()
                .map(|p| p.get("calls").and_then(Value::as_array).map_or(0, Vec::len))
                .collect()
        })
        .unwrap_or_default()
}
