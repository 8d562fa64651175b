//! tracesift: curation of sandbox execution-trace reports.
//!
//! A batch of CAPE-style JSON reports is validated, deduplicated by sample
//! digest, scrubbed of sensitive content, labeled by family consensus and
//! summarized. See [`pipeline::run`] for the entry point.

/// Run configuration
pub mod config;
/// Duplicate detection by sample fingerprint
pub mod dedup;
/// Error types
pub mod error;
/// Dataset extraction and digest renaming
pub mod extract;
/// Bounded reads and atomic filesystem writes
pub mod io;
/// Family consensus labeling
pub mod label;
/// Logging and tracing setup
pub mod logging;
/// Phase driver, worker pool and artifacts
pub mod pipeline;
/// Report identity and document paths
pub mod report;
/// Sensitive content removal
pub mod sanitize;
/// Run statistics
pub mod stats;
/// Report directory access
pub mod store;
/// Timeouts for external calls
pub mod timeout;
/// Structural validation
pub mod validate;

pub use config::PipelineConfig;
pub use error::{Result, SiftError};
pub use pipeline::{run, RunSummary};
