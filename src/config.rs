//! Configuration for the report pipeline.
//!
//! One immutable `PipelineConfig` is built at startup (defaults, then an
//! optional JSON file, then command line overrides) and passed by
//! reference into every phase.

use crate::dedup::DuplicateStrategy;
use crate::error::{Result, SiftError};
use crate::io::{IOLimits, DEFAULT_MAX_REPORT_SIZE};
use crate::timeout::DEFAULT_CLASSIFIER_TIMEOUT_SECONDS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Terms file looked up when none is given explicitly.
pub const DEFAULT_TERMS_FILE: &str = "terms_to_anonymize.txt";

/// Default number of pipeline workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Default VirusTotal positives threshold for the undetected/benign tag.
pub const DEFAULT_VT_POSITIVES_THRESHOLD: u32 = 10;

/// Master configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the `*.json` reports to process.
    pub input_dir: PathBuf,
    /// Worker pool size.
    pub workers: usize,
    /// Suppress the console summary.
    pub silent: bool,
    /// Newline-delimited terms to redact. `None` means the default file,
    /// which is optional; an explicit path must exist.
    pub anonymize_terms_path: Option<PathBuf>,
    /// Report read limits.
    pub io: IoConfig,
    /// Duplicate resolution.
    pub dedup: DedupConfig,
    /// Sanitization rules.
    pub sanitize: SanitizeConfig,
    /// Labeling and classifier settings.
    pub label: LabelConfig,
    /// Where artifacts go.
    pub output: OutputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            workers: DEFAULT_WORKERS,
            silent: false,
            anonymize_terms_path: None,
            io: IoConfig::default(),
            dedup: DedupConfig::default(),
            sanitize: SanitizeConfig::default(),
            label: LabelConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Configuration with defaults for everything but the input directory.
    pub fn for_input(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SiftError::InvalidConfig(
                "workers must be a positive integer".into(),
            ));
        }
        if let Some(cmd) = &self.label.classifier.command {
            if cmd.is_empty() || cmd[0].trim().is_empty() {
                return Err(SiftError::InvalidConfig(
                    "classifier command must name a program".into(),
                ));
            }
        }
        if self.label.classifier.timeout_secs == 0 {
            return Err(SiftError::InvalidConfig(
                "classifier timeout must be at least one second".into(),
            ));
        }
        Ok(())
    }

    /// Terms file to use and whether it was requested explicitly.
    pub fn terms_source(&self) -> (PathBuf, bool) {
        match &self.anonymize_terms_path {
            Some(p) => (p.clone(), true),
            None => (PathBuf::from(DEFAULT_TERMS_FILE), false),
        }
    }

    pub fn vt_positives_threshold(&self) -> u32 {
        self.label.vt_positives_threshold
    }
}

/// Report read limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Largest report accepted, in bytes (default: 1 GiB).
    pub max_report_size: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            max_report_size: DEFAULT_MAX_REPORT_SIZE,
        }
    }
}

impl IoConfig {
    pub fn limits(&self) -> IOLimits {
        IOLimits {
            max_file_size: self.max_report_size,
        }
    }
}

/// Duplicate resolution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub strategy: DuplicateStrategy,
}

/// Sanitization rules besides the user terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Top-level sections removed from every report.
    pub sections_to_drop: Vec<String>,
    /// Keys whose values are redacted wholesale, at any depth.
    pub sensitive_keys: Vec<String>,
    /// Redact the account name in user profile paths.
    pub redact_profile_paths: bool,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            sections_to_drop: [
                "statistics",
                "info",
                "local_conf",
                "debug",
                "detections2pid",
                "malfamily",
                "malfamily_tag",
                "malscore",
                "network",
                "procmemory",
                "shots",
                "suricata",
                "ttps",
                "url_analysis",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sensitive_keys: [
                "environ",
                "username",
                "user_name",
                "computer_name",
                "computername",
                "hostname",
                "machine_name",
                "userdomain",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            redact_profile_paths: true,
        }
    }
}

/// Labeling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Reports with at most this many positive detections are tagged
    /// undetected/benign.
    pub vt_positives_threshold: u32,
    pub classifier: ClassifierConfig,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            vt_positives_threshold: DEFAULT_VT_POSITIVES_THRESHOLD,
            classifier: ClassifierConfig::default(),
        }
    }
}

/// External classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Program and arguments of an external classifier reading query lines
    /// on stdin. When unset the built-in plurality classifier is used.
    pub command: Option<Vec<String>>,
    /// Per-invocation timeout in seconds.
    pub timeout_secs: u64,
    /// Minimum number of vendors that must agree on a family token for the
    /// built-in classifier to report it.
    pub min_support: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: DEFAULT_CLASSIFIER_TIMEOUT_SECONDS,
            min_support: 2,
        }
    }
}

/// Artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root under which listing directories are created.
    pub output_dir: PathBuf,
    /// Keep only the N most frequent labels per table; `None` keeps all.
    pub top_labels: Option<usize>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            top_labels: None,
        }
    }
}
