//! Precompiled patterns for intrinsically sensitive text.
//!
//! Patterns carry no anchors or lookaround. The sanitizer relies on that:
//! a pattern that matched nothing inside a stretch of text cannot start
//! matching once that stretch is cut out on its own.

use once_cell::sync::Lazy;
use regex::Regex;

// Windows profile directories; group 2 is the account name
pub static RE_WINDOWS_PROFILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)([A-Z]:\\(?:Users|Documents and Settings)\\)([^\\/\s"]+)"#)
        .expect("valid windows profile regex")
});

// POSIX and macOS home directories; group 2 is the account name
pub static RE_POSIX_HOME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(/home/|/Users/)([^/\s"]+)"#).expect("valid posix home regex"));

/// Profile directory names that do not identify a person.
pub const SHARED_PROFILES: &[&str] = &["public", "default", "all", "default user", "all users"];

pub fn is_shared_profile(name: &str) -> bool {
    SHARED_PROFILES.iter().any(|p| p.eq_ignore_ascii_case(name))
}
