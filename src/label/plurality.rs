//! Built-in family classifier: a plurality vote over vendor label tokens.
//!
//! Each vendor label is split into tokens; platform, category and other
//! generic tokens are dropped, and each remaining token gets one vote per
//! vendor. A token wins if it is the unique most voted token and enough
//! vendors agree on it.

use super::classifier::{ClassifierQuery, FamilyClassifier};
use super::{capitalize, ConsensusLabel};
use crate::error::Result;
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Tokens that describe platform, file type or behavior class rather than
/// a family.
static GENERIC_TOKENS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // platforms and file types
        "win", "win32", "win64", "w32", "w64", "msil", "net", "dotnet", "linux", "android", "html",
        "script", "js", "vbs", "vba", "pdf", "doc", "xls", "macro", "exe", "dll", "elf", "apk",
        "pe", "x86", "x64", "bat", "lnk", "php", "java", "office", "o97m", "w97m", "x97m",
        // categories
        "trojan", "virus", "worm", "backdoor", "malware", "adware", "spyware", "ransom",
        "ransomware", "downloader", "dropper", "injector", "packed", "packer", "riskware",
        "tool", "hacktool", "pua", "pup", "unwanted", "application", "program", "grayware",
        "banker", "stealer", "keylogger", "rootkit", "exploit", "bot", "rat", "miner",
        "coinminer", "psw", "spy", "dldr", "trj", "troj", "tr", "bds", "susp", "suspicious",
        // heuristics and vendor noise
        "generic", "gen", "gen2", "heur", "heuristic", "agent", "variant", "behaveslike",
        "malicious", "high", "confidence", "score", "ai", "ml", "cloud", "static", "dynamic",
        "reputation", "artemis", "attribute", "highconfidence", "kcloud", "genetic", "moderate",
        "obfuscated", "crypt", "cryptor", "krypt", "kryptik", "razy", "zusy", "tiggre", "lazy",
        "other", "unknown", "sample", "file", "a", "b", "c",
    ]
    .into_iter()
    .collect()
});

/// Shortest token considered a family name.
const MIN_TOKEN_LEN: usize = 3;

/// Family tokens of one vendor label, lower cased and deduplicated.
pub fn family_tokens(label: &str) -> BTreeSet<String> {
    label
        .split(|c: char| !c.is_ascii_alphanumeric())
        .map(str::to_ascii_lowercase)
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .filter(|t| !t.bytes().all(|b| b.is_ascii_digit()))
        .filter(|t| !(t.len() >= 6 && t.bytes().all(|b| b.is_ascii_hexdigit())))
        .filter(|t| !GENERIC_TOKENS.contains(t.as_str()))
        .collect()
}

/// In-process classifier used when no external command is configured.
#[derive(Debug, Clone)]
pub struct PluralityClassifier {
    min_support: usize,
}

impl PluralityClassifier {
    pub fn new(min_support: usize) -> Self {
        Self {
            min_support: min_support.max(1),
        }
    }

    /// Votes on one sample's labels.
    pub fn vote(&self, av_labels: &[(String, String)]) -> ConsensusLabel {
        let mut votes: BTreeMap<String, usize> = BTreeMap::new();
        let mut seen_vendors = HashSet::new();
        for (vendor, label) in av_labels {
            if !seen_vendors.insert(vendor.as_str()) {
                continue;
            }
            for token in family_tokens(label) {
                *votes.entry(token).or_default() += 1;
            }
        }

        let Some(top) = votes.values().copied().max() else {
            return ConsensusLabel::NoConsensus;
        };
        let mut leaders = votes.iter().filter(|(_, n)| **n == top);
        match (leaders.next(), leaders.next()) {
            (Some((token, _)), None) if top >= self.min_support => {
                ConsensusLabel::Family(capitalize(token))
            }
            _ => ConsensusLabel::NoConsensus,
        }
    }
}

impl Default for PluralityClassifier {
    fn default() -> Self {
        Self::new(2)
    }
}

impl FamilyClassifier for PluralityClassifier {
    fn name(&self) -> &str {
        "plurality"
    }

    fn classify(&self, queries: &[ClassifierQuery]) -> Result<BTreeMap<String, ConsensusLabel>> {
        Ok(queries
            .iter()
            .map(|q| (q.sample_id.clone(), self.vote(&q.av_labels)))
            .collect())
    }
}
