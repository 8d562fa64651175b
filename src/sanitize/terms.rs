//! User-supplied literal terms to redact.

use crate::error::{Result, SiftError};
use aho_corasick::{AhoCorasick, MatchKind};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

/// A set of literal terms compiled into one automaton.
///
/// Matching is exact and case-sensitive. Overlapping candidates resolve to
/// the leftmost, then longest, term.
#[derive(Debug, Clone, Default)]
pub struct TermSet {
    terms: Vec<String>,
    automaton: Option<AhoCorasick>,
    replacements: Vec<&'static str>,
}

impl TermSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a set from newline-delimited text. Trailing `\r`, blank lines
    /// and repeated terms are dropped.
    pub fn from_lines(text: &str) -> Result<Self> {
        let unique: BTreeSet<&str> = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .collect();
        Self::new(unique.into_iter().map(str::to_string).collect())
    }

    pub fn new(terms: Vec<String>) -> Result<Self> {
        if terms.is_empty() {
            return Ok(Self::empty());
        }
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&terms)
            .map_err(|e| SiftError::InvalidConfig(format!("terms do not compile: {e}")))?;
        let replacements = vec![super::REDACTION_MARKER; terms.len()];
        Ok(Self {
            terms,
            automaton: Some(automaton),
            replacements,
        })
    }

    /// Loads the terms file. A missing file is only an error when the path
    /// was given explicitly; the default file is optional.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Default terms file not found, no terms will be redacted");
                return Ok(Self::empty());
            }
            Err(e) => {
                return Err(SiftError::TermsFile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        let set = Self::from_lines(&text)?;
        info!(path = %path.display(), terms = set.len(), "Loaded terms to anonymize");
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Replaces every term occurrence with the redaction marker.
    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match &self.automaton {
            Some(ac) if ac.is_match(text) => Cow::Owned(ac.replace_all(text, &self.replacements)),
            _ => Cow::Borrowed(text),
        }
    }
}
