//! Shared fixtures for the integration tests.
//!
//! Reports are built in memory and written into a temporary input
//! directory; every run writes its artifacts into a separate temporary
//! output directory.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracesift::PipelineConfig;

/// A 64 character sha256 hex digest made of one repeated character.
pub fn digest(c: char) -> String {
    std::iter::repeat(c).take(64).collect()
}

/// Builder for CAPE-style report documents.
pub struct ReportBuilder {
    doc: Value,
}

impl ReportBuilder {
    /// A report that passes validation, with 40 positives and agreeing
    /// sandbox and vendor labels.
    pub fn valid(digest_char: char) -> Self {
        let doc = json!({
            "info": {"id": 1, "machine": {"name": "win10-analysis"}},
            "network": {"hosts": ["10.0.0.2"]},
            "target": {"file": {
                "name": "sample.exe",
                "sha256": digest(digest_char),
                "path": "C:\\Users\\victim\\Desktop\\sample.exe",
                "virustotal": {
                    "positives": 40,
                    "total": 70,
                    "scans": {
                        "Kaspersky": {"detected": true, "result": "Trojan.Win32.Emotet.gen"},
                        "ESET-NOD32": {"detected": true, "result": "Win32/Emotet.CD"},
                        "Avast": {"detected": false, "result": null}
                    }
                }
            }},
            "behavior": {"processes": [{
                "process_name": "sample.exe",
                "command_line": "\"C:\\Users\\victim\\Desktop\\sample.exe\" -run",
                "environ": {"UserName": "victim", "ComputerName": "DESKTOP-01"},
                "calls": [{
                    "api": "NtCreateFile",
                    "arguments": [{"name": "FileName", "value": "C:\\Windows\\System32\\drivers\\etc\\hosts"}]
                }]
            }]},
            "detections": [{"family": "Emotet"}]
        });
        Self { doc }
    }

    pub fn without_target(mut self) -> Self {
        if let Some(root) = self.doc.as_object_mut() {
            root.remove("target");
        }
        self
    }

    pub fn without_sample_file(mut self) -> Self {
        self.doc["target"] = json!({"category": "file"});
        self
    }

    pub fn processes(mut self, processes: Value) -> Self {
        self.doc["behavior"]["processes"] = processes;
        self
    }

    pub fn without_virustotal(mut self) -> Self {
        if let Some(file) = self.doc["target"]["file"].as_object_mut() {
            file.remove("virustotal");
        }
        self
    }

    pub fn virustotal(mut self, block: Value) -> Self {
        self.doc["target"]["file"]["virustotal"] = block;
        self
    }

    pub fn positives(mut self, positives: u64) -> Self {
        self.doc["target"]["file"]["virustotal"]["positives"] = json!(positives);
        self
    }

    pub fn detections(mut self, detections: Value) -> Self {
        self.doc["detections"] = detections;
        self
    }

    pub fn without_detections(mut self) -> Self {
        if let Some(root) = self.doc.as_object_mut() {
            root.remove("detections");
        }
        self
    }

    pub fn command_line(mut self, command_line: &str) -> Self {
        self.doc["behavior"]["processes"][0]["command_line"] = json!(command_line);
        self
    }

    pub fn build(self) -> Value {
        self.doc
    }
}

/// Input and output directories of one test batch.
pub struct Batch {
    pub input: TempDir,
    pub output: TempDir,
    terms: Option<PathBuf>,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            input: TempDir::new().expect("input dir"),
            output: TempDir::new().expect("output dir"),
            terms: None,
        }
    }

    pub fn write(&self, id: &str, doc: &Value) -> PathBuf {
        let path = self.input.path().join(format!("{id}.json"));
        fs::write(&path, serde_json::to_vec_pretty(doc).expect("serialize")).expect("write report");
        path
    }

    pub fn write_raw(&self, id: &str, contents: &str) -> PathBuf {
        let path = self.input.path().join(format!("{id}.json"));
        fs::write(&path, contents).expect("write raw report");
        path
    }

    /// Writes a terms file next to the outputs and uses it for the run.
    pub fn terms(&mut self, terms: &[&str]) {
        let path = self.output.path().join("terms.txt");
        fs::write(&path, terms.join("\n")).expect("write terms");
        self.terms = Some(path);
    }

    pub fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::for_input(self.input.path());
        config.workers = 4;
        config.output.output_dir = self.output.path().to_path_buf();
        config.anonymize_terms_path = Some(self.terms.clone().unwrap_or_else(|| {
            let empty = self.output.path().join("no_terms.txt");
            fs::write(&empty, "").expect("write empty terms");
            empty
        }));
        config
    }

    pub fn read_input(&self, id: &str) -> Value {
        read_json(&self.input.path().join(format!("{id}.json")))
    }

    pub fn read_output(&self, relative: &str) -> Value {
        read_json(&self.output.path().join(relative))
    }

    pub fn input_has(&self, id: &str) -> bool {
        self.input.path().join(format!("{id}.json")).exists()
    }

    pub fn output_has(&self, relative: &str) -> bool {
        self.output.path().join(relative).exists()
    }
}

pub fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("parse {}: {e}", path.display()))
}
