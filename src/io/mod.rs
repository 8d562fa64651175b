//! Bounded and atomic file operations for the report store.
//!
//! Reports are read through a `SafeReader`, which memory-maps the file and
//! enforces a size ceiling before any parsing happens. Every write the
//! pipeline performs (in-place report rewrites, listing artifacts) goes
//! through a temp file plus `rename`, and relocations are single `rename`
//! calls that refuse to overwrite. A run killed at any point therefore
//! leaves each file either fully old or fully new.

pub mod error;

use crate::io::error::{IoError, Result};
use memmap2::Mmap;
use serde::Serialize;
use serde_json::Value;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Default ceiling for a single report (1 GiB). Sandbox traces of chatty
/// samples routinely reach hundreds of megabytes.
pub const DEFAULT_MAX_REPORT_SIZE: u64 = 1024 * 1024 * 1024;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Defines the resource limits for report reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_REPORT_SIZE,
        }
    }
}

/// A bounded, read-only view of one report file.
pub struct SafeReader {
    path: PathBuf,
    // None when the file size is zero; memmap cannot map empty files.
    mmap: Option<Mmap>,
    file_size: u64,
}

impl SafeReader {
    /// Opens a file and memory-maps it.
    ///
    /// This function will fail if the file size exceeds `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        trace!(path = %path.display(), size = file_size, "Opening report");

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "Report is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        let mmap = if file_size == 0 {
            None
        } else {
            // Safety: read-only map of a regular file. Reports are only
            // rewritten through rename, which never mutates the mapped inode.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            file_size,
        })
    }

    /// Returns the total size of the underlying file in bytes.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// The mapped file contents.
    pub fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// Parses the whole file as one JSON document.
    pub fn parse_json(&self) -> Result<Value> {
        serde_json::from_slice(self.bytes()).map_err(|e| IoError::Json {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

/// Reads and parses one JSON document, returning it with its on-disk size.
pub fn read_json_document(path: &Path, limits: &IOLimits) -> Result<(Value, u64)> {
    let reader = SafeReader::open(path, limits)?;
    let value = reader.parse_json()?;
    Ok((value, reader.size()))
}

/// Creates `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Writes `bytes` to `path` through a sibling temp file and `rename`.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, std::process::id(), seq));

    let write = || -> Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote file atomically");
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn atomic_write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| IoError::Json {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    atomic_write_bytes(path, &bytes)
}

fn file_name_of(src: &Path) -> Result<&OsStr> {
    src.file_name().ok_or_else(|| {
        IoError::StdIo(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", src.display()),
        ))
    })
}

/// Renames `src` to `dest` unless something already exists at `dest`,
/// including a dangling symlink.
pub fn rename_or_fail(src: &Path, dest: &Path) -> Result<()> {
    if fs::symlink_metadata(dest).is_ok() {
        return Err(IoError::DestinationExists {
            path: dest.to_path_buf(),
        });
    }
    fs::rename(src, dest)?;
    Ok(())
}

/// Moves `src` into `dest_dir`, keeping its file name.
///
/// The move is a single `rename`: it either happens completely or not at
/// all. An existing file at the destination is never overwritten.
pub fn move_or_fail(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    ensure_dir(dest_dir)?;
    let dest = dest_dir.join(file_name_of(src)?);
    rename_or_fail(src, &dest)?;
    debug!(from = %src.display(), to = %dest.display(), "Relocated report");
    Ok(dest)
}

/// Copies `src` into `dest_dir`, keeping its file name.
///
/// The destination is created exclusively, so an existing file is never
/// overwritten. A failed copy removes its partial output.
pub fn copy_or_fail(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    ensure_dir(dest_dir)?;
    let dest = dest_dir.join(file_name_of(src)?);
    let mut from = File::open(src)?;
    let mut to = match OpenOptions::new().write(true).create_new(true).open(&dest) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(IoError::DestinationExists { path: dest });
        }
        Err(e) => return Err(e.into()),
    };
    let copied = std::io::copy(&mut from, &mut to).and_then(|_| to.sync_all());
    if let Err(e) = copied {
        let _ = fs::remove_file(&dest);
        return Err(e.into());
    }
    debug!(from = %src.display(), to = %dest.display(), "Copied report");
    Ok(dest)
}
