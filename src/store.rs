//! Filesystem-backed report store.
//!
//! The store is a single directory of `*.json` reports. Enumeration is a
//! one-shot snapshot sorted by id; files that show up later are not part
//! of the run.

use crate::error::{Result, SiftError};
use crate::io::{self, IOLimits};
use crate::report::{Report, ReportEntry};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Directory of sandbox reports.
#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
    limits: IOLimits,
}

impl ReportStore {
    /// Opens the store, failing when `root` is not a readable directory.
    pub fn open(root: impl Into<PathBuf>, limits: IOLimits) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SiftError::InputDirectory {
                path: root,
                reason: "does not exist or is not a directory".to_string(),
            });
        }
        std::fs::read_dir(&root).map_err(|e| SiftError::InputDirectory {
            path: root.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { root, limits })
    }

    /// Snapshot of every report currently in the store, sorted by id.
    ///
    /// Reports are the `*.json` entries directly inside the root that are
    /// regular files or symlinks. A symlink is taken even when its target
    /// is missing, so the failed read lands the report in an error
    /// partition instead of dropping it. Hidden files (including in-flight
    /// temp files) are skipped; so is any other entry, with a warning when
    /// its name looks like a report.
    pub fn enumerate(&self) -> Result<Vec<ReportEntry>> {
        let mut entries = Vec::new();
        for item in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
        {
            let item = match item {
                Ok(item) => item,
                Err(e) if e.depth() == 0 => {
                    return Err(SiftError::InputDirectory {
                        path: self.root.clone(),
                        reason: e.to_string(),
                    })
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let name = item.file_name().to_string_lossy();
            if name.starts_with('.') {
                trace!(path = %item.path().display(), "Skipping hidden file");
                continue;
            }
            if !name.ends_with(".json") {
                continue;
            }
            let file_type = item.file_type();
            let is_report = if file_type.is_file() {
                true
            } else if file_type.is_symlink() {
                // a dangling link stays a report; a link to a directory does not
                !std::fs::metadata(item.path()).is_ok_and(|m| m.is_dir())
            } else {
                false
            };
            if !is_report {
                warn!(path = %item.path().display(), "Skipping report-named entry that is not a file");
                continue;
            }
            entries.push(ReportEntry::new(item.into_path()));
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.path.cmp(&b.path)));
        debug!(root = %self.root.display(), reports = entries.len(), "Enumerated store");
        Ok(entries)
    }

    /// Loads and parses one report.
    pub fn load(&self, entry: &ReportEntry) -> io::error::Result<Report> {
        let (document, size) = io::read_json_document(&entry.path, &self.limits)?;
        Ok(Report {
            entry: entry.clone(),
            document,
            size,
        })
    }

    /// Rewrites a report in place, atomically. A symlinked report is
    /// replaced by a regular file; the link target is never written.
    pub fn save(&self, report: &Report) -> io::error::Result<()> {
        io::atomic_write_json_pretty(&report.entry.path, &report.document)
    }

    /// Moves a report out of the store into `dest_dir`.
    pub fn relocate(&self, entry: &ReportEntry, dest_dir: &Path) -> io::error::Result<PathBuf> {
        io::move_or_fail(&entry.path, dest_dir)
    }
}
