//! Timeout utilities for external collaborator calls.
//!
//! The external classifier runs as a child process that can hang on a
//! pathological sample. These helpers bound such calls so a single report
//! cannot stall a worker forever.

use crate::error::{Result, SiftError};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default timeout for one classifier invocation, in seconds
pub const DEFAULT_CLASSIFIER_TIMEOUT_SECONDS: u64 = 60;

/// Bound on one external call
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub duration: Duration,
    /// Name used in log events
    pub operation_name: String,
}

impl TimeoutConfig {
    pub fn new(seconds: u64, operation: impl Into<String>) -> Self {
        Self {
            duration: Duration::from_secs(seconds),
            operation_name: operation.into(),
        }
    }
}

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(config: TimeoutConfig, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    debug!(
        operation = %config.operation_name,
        timeout_secs = config.duration.as_secs(),
        "Starting bounded operation"
    );

    match timeout(config.duration, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation = %config.operation_name,
                timeout_secs = config.duration.as_secs(),
                "Operation timed out"
            );
            Err(SiftError::Timeout {
                seconds: config.duration.as_secs(),
            })
        }
    }
}

/// Run `future` to completion on a fresh current-thread runtime, bounded by
/// `config`. Used from synchronous worker threads.
pub fn block_on_with_timeout<T, F>(config: TimeoutConfig, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(with_timeout(config, future))
}
