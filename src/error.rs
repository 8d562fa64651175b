//! Error types for the tracesift report pipeline.
//!
//! Only batch-fatal conditions surface as [`SiftError`] from
//! [`crate::pipeline::run`]. Report-local failures are captured as
//! partitions and never reach the caller as errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tracesift operations.
#[derive(Debug, Error)]
pub enum SiftError {
    /// Input report directory missing or unreadable
    #[error("Input directory {path} is not readable: {reason}")]
    InputDirectory { path: PathBuf, reason: String },

    /// Explicitly requested terms file missing or unreadable
    #[error("Terms file {path} is not readable: {reason}")]
    TermsFile { path: PathBuf, reason: String },

    /// Configuration rejected before the run started
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report store errors (bounded reads, relocations, atomic writes)
    #[error("Store error: {0}")]
    Store(#[from] crate::io::error::IoError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// External classifier invocation errors
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Operation timeout
    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    /// Worker pool construction errors
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SiftError {
    fn from(err: serde_json::Error) -> Self {
        SiftError::Serialization(err.to_string())
    }
}

/// Result type alias for tracesift operations
pub type Result<T> = std::result::Result<T, SiftError>;

/// Where a failure originated, used when reporting a report-local fault
/// that was contained by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultOrigin {
    Validation,
    Curation,
    Relocation,
}

impl fmt::Display for FaultOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultOrigin::Validation => write!(f, "validation"),
            FaultOrigin::Curation => write!(f, "curation"),
            FaultOrigin::Relocation => write!(f, "relocation"),
        }
    }
}
