//! Custom error types for the I/O module.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("File size of {found} bytes exceeds the maximum allowed size of {limit} bytes.")]
    FileTooLarge { limit: u64, found: u64 },

    #[error("Refusing to overwrite existing destination {}", path.display())]
    DestinationExists { path: PathBuf },

    #[error("Document {} is not valid JSON: {message}", path.display())]
    Json { path: PathBuf, message: String },

    #[error("An underlying I/O error occurred: {0}")]
    StdIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IoError>;
