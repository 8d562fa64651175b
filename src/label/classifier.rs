//! The family classifier interface and its external-process adapter.
//!
//! Queries go out one JSON object per line:
//! `{"sha256": "<sample id>", "av_labels": [["Vendor", "Label"], ...]}`.
//! Responses come back one `<sample id>\t<family>` line per sample;
//! `SINGLETON:` families, empty families and `(n/a)` mean no consensus.

use super::{ConsensusLabel, PluralityClassifier};
use crate::config::ClassifierConfig;
use crate::error::{Result, SiftError};
use crate::timeout::{block_on_with_timeout, TimeoutConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Family prefix a classifier uses when a sample shares no family token
/// with anything else.
pub const SINGLETON_PREFIX: &str = "SINGLETON:";

/// One sample's positive vendor labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifierQuery {
    #[serde(rename = "sha256")]
    pub sample_id: String,
    /// `(vendor, label)` pairs
    pub av_labels: Vec<(String, String)>,
}

impl ClassifierQuery {
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Maps vendor labels to a family consensus.
///
/// Implementations are shared between workers and must be usable from
/// several threads at once.
pub trait FamilyClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Returns one entry per sample the classifier answered for, keyed by
    /// sample id. Samples left out have no consensus.
    fn classify(&self, queries: &[ClassifierQuery]) -> Result<BTreeMap<String, ConsensusLabel>>;
}

/// Parses classifier response lines.
pub fn parse_response(text: &str) -> BTreeMap<String, ConsensusLabel> {
    text.lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let (id, family) = line
                .split_once('\t')
                .or_else(|| line.trim().split_once(char::is_whitespace))
                .unwrap_or((line.trim(), ""));
            let id = id.trim();
            if id.is_empty() {
                return None;
            }
            let family = family.trim();
            let label = if family.starts_with(SINGLETON_PREFIX) {
                ConsensusLabel::NoConsensus
            } else {
                ConsensusLabel::from_raw(family)
            };
            Some((id.to_string(), label))
        })
        .collect()
}

/// Runs an external classifier program per call.
///
/// The program reads query lines on stdin and writes response lines on
/// stdout. A non-zero exit, or running past the timeout, is a failure; the
/// child is killed when the timeout expires.
#[derive(Debug, Clone)]
pub struct ProcessClassifier {
    program: String,
    args: Vec<String>,
    timeout_secs: u64,
}

impl ProcessClassifier {
    pub fn new(command: &[String], timeout_secs: u64) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SiftError::InvalidConfig("classifier command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout_secs,
        })
    }

    async fn invoke(&self, input: String) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SiftError::Classifier(format!("cannot start {}: {e}", self.program)))?;

        // stdin must be fed while output drains; a child that answers
        // early would otherwise block on a full pipe
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(input.as_bytes()).await {
                // a program that exits without reading its input closes the pipe
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SiftError::Classifier(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| SiftError::Classifier(format!("response is not UTF-8: {e}")))
    }
}

impl FamilyClassifier for ProcessClassifier {
    fn name(&self) -> &str {
        &self.program
    }

    fn classify(&self, queries: &[ClassifierQuery]) -> Result<BTreeMap<String, ConsensusLabel>> {
        let mut input = String::new();
        for query in queries {
            input.push_str(&query.to_line()?);
            input.push('\n');
        }
        let timeout = TimeoutConfig::new(self.timeout_secs, format!("classifier {}", self.program));
        let stdout = block_on_with_timeout(timeout, self.invoke(input))?;
        let labels = parse_response(&stdout);
        debug!(classifier = %self.program, queries = queries.len(), answers = labels.len(), "Classifier answered");
        Ok(labels)
    }
}

/// Builds the configured classifier: the external command when one is set,
/// the built-in plurality vote otherwise.
pub fn from_config(config: &ClassifierConfig) -> Result<Box<dyn FamilyClassifier>> {
    match &config.command {
        Some(command) => Ok(Box::new(ProcessClassifier::new(command, config.timeout_secs)?)),
        None => Ok(Box::new(PluralityClassifier::new(config.min_support))),
    }
}
