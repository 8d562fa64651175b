//! Removal of sensitive content from report documents.
//!
//! The sanitizer walks the whole document and rewrites string leaves in
//! place. Object keys are never rewritten. Redacted content becomes
//! [`REDACTION_MARKER`]; text is split on existing markers before any rule
//! runs, so marker text is never matched again and sanitizing a sanitized
//! document changes nothing. Leaves holding exactly the
//! [`NOT_AVAILABLE`] placeholder are left alone for the same reason.

pub mod patterns;
pub mod terms;

pub use terms::TermSet;

use crate::config::SanitizeConfig;
use crate::report::{NOT_AVAILABLE, SANDBOX_DETECTIONS_KEY};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;

/// Replacement text for redacted content.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Everything the sanitizer applies to a document. Built once per run and
/// shared read-only between workers.
#[derive(Debug, Clone)]
pub struct SanitizeRules {
    terms: TermSet,
    sensitive_keys: Vec<String>,
    sections_to_drop: Vec<String>,
    redact_profile_paths: bool,
}

impl SanitizeRules {
    pub fn new(terms: TermSet, config: &SanitizeConfig) -> Self {
        Self {
            terms,
            sensitive_keys: config.sensitive_keys.clone(),
            sections_to_drop: config.sections_to_drop.clone(),
            redact_profile_paths: config.redact_profile_paths,
        }
    }

    /// Rules with the default configuration and the given terms.
    pub fn with_terms(terms: TermSet) -> Self {
        Self::new(terms, &SanitizeConfig::default())
    }

    pub fn terms(&self) -> &TermSet {
        &self.terms
    }

    pub fn is_sensitive_key(&self, key: &str) -> bool {
        self.sensitive_keys
            .iter()
            .any(|k| k.eq_ignore_ascii_case(key))
    }

    /// Redacts one string. Returns `None` when nothing changed.
    pub fn redact_text(&self, text: &str) -> Option<String> {
        let after_terms = rewrite_segments(text, |seg| self.terms.redact(seg));
        let after_paths = if self.redact_profile_paths {
            match rewrite_segments(&after_terms, redact_profile_names) {
                Cow::Owned(s) => Some(s),
                Cow::Borrowed(_) => None,
            }
        } else {
            None
        };
        let redacted = match (after_paths, after_terms) {
            (Some(s), _) | (None, Cow::Owned(s)) => s,
            (None, Cow::Borrowed(_)) => return None,
        };
        (redacted != text).then_some(redacted)
    }
}

/// What a sanitize pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SanitizeReport {
    pub sections_removed: usize,
    pub values_redacted: usize,
    pub strings_rewritten: usize,
    pub detections_defaulted: bool,
}

impl SanitizeReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Sanitizes `document` in place. Never fails; missing sub-fields are
/// simply not visited.
pub fn sanitize(document: &mut Value, rules: &SanitizeRules) -> SanitizeReport {
    let mut report = SanitizeReport::default();

    if let Value::Object(root) = document {
        for section in &rules.sections_to_drop {
            if root.remove(section).is_some() {
                report.sections_removed += 1;
            }
        }
    }

    walk(document, rules, &mut report);

    if let Value::Object(root) = document {
        if !root.contains_key(SANDBOX_DETECTIONS_KEY) {
            root.insert(
                SANDBOX_DETECTIONS_KEY.to_string(),
                Value::String(NOT_AVAILABLE.to_string()),
            );
            report.detections_defaulted = true;
        }
    }
    report
}

fn walk(value: &mut Value, rules: &SanitizeRules, report: &mut SanitizeReport) {
    match value {
        Value::String(text) if text.as_str() == NOT_AVAILABLE => {}
        Value::String(text) => {
            if let Some(redacted) = rules.redact_text(text) {
                *text = redacted;
                report.strings_rewritten += 1;
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, rules, report);
            }
        }
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if rules.is_sensitive_key(key) {
                    if child.as_str() != Some(REDACTION_MARKER) {
                        *child = Value::String(REDACTION_MARKER.to_string());
                        report.values_redacted += 1;
                    }
                } else {
                    walk(child, rules, report);
                }
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Applies `f` to the text between marker occurrences and rejoins.
fn rewrite_segments<'a, F>(text: &'a str, f: F) -> Cow<'a, str>
where
    F: Fn(&str) -> Cow<'_, str>,
{
    let mut changed = false;
    let mut out = String::with_capacity(text.len());
    for (i, segment) in text.split(REDACTION_MARKER).enumerate() {
        if i > 0 {
            out.push_str(REDACTION_MARKER);
        }
        let rewritten = f(segment);
        if let Cow::Owned(_) = rewritten {
            changed = true;
        }
        out.push_str(&rewritten);
    }
    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

fn redact_profile_names(segment: &str) -> Cow<'_, str> {
    let replace = |caps: &regex::Captures<'_>| {
        if patterns::is_shared_profile(&caps[2]) {
            caps[0].to_string()
        } else {
            format!("{}{}", &caps[1], REDACTION_MARKER)
        }
    };
    let windows = patterns::RE_WINDOWS_PROFILE.replace_all(segment, replace);
    let posix = match patterns::RE_POSIX_HOME.replace_all(&windows, replace) {
        Cow::Owned(s) => Some(s),
        Cow::Borrowed(_) => None,
    };
    match posix {
        Some(s) => Cow::Owned(s),
        None => windows,
    }
}
