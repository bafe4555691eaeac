//! Local tree scanning.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use photopush_common::{hash_file, Error, Result};

use crate::record::LocalFileRecord;

/// Recursively enumerates the files below a local root.
#[derive(Debug, Clone)]
pub struct LocalScanner {
    root: PathBuf,
    skip: HashSet<String>,
}

impl LocalScanner {
    /// Create a scanner for `root` that ignores every entry whose base name
    /// is in `skip` (a skipped directory is not descended into).
    pub fn new(root: impl Into<PathBuf>, skip: impl IntoIterator<Item = String>) -> Self {
        Self {
            root: root.into(),
            skip: skip.into_iter().collect(),
        }
    }

    /// Local root being scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the tree and hash every file.
    ///
    /// Unreadable directories are logged and skipped. Any other entry that
    /// cannot be read, including a dangling link, fails the whole scan.
    pub fn scan(&self) -> Result<Vec<LocalFileRecord>> {
        if !self.root.is_dir() {
            warn!("Local root {} is not a directory, nothing to scan", self.root.display());
            return Ok(Vec::new());
        }

        info!("Reading local state under {}", self.root.display());
        let mut records = Vec::new();

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| !self.is_skipped(entry.file_name().to_string_lossy().as_ref()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let Some(path) = err.path().map(Path::to_path_buf) else {
                        warn!("Skipping unreadable entry: {}", err);
                        continue;
                    };
                    if path.is_dir() {
                        warn!("Skipping unreadable directory {}: {}", path.display(), err);
                        continue;
                    }
                    let message = err.to_string();
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other(message));
                    return Err(Error::Scan { path, source });
                }
            };

            if entry.file_type().is_dir() {
                debug!("Reading {}", entry.path().display());
                continue;
            }

            records.push(self.record_for(entry.path())?);
        }

        records.sort_by(|a, b| a.relative.cmp(&b.relative));
        info!("Found {} local files", records.len());
        Ok(records)
    }

    fn is_skipped(&self, name: &str) -> bool {
        self.skip.contains(name)
    }

    fn record_for(&self, path: &Path) -> Result<LocalFileRecord> {
        let scan_error = |source| Error::Scan {
            path: path.to_path_buf(),
            source,
        };

        let metadata = std::fs::metadata(path).map_err(scan_error)?;
        let hash = hash_file(path).map_err(scan_error)?;

        let created: DateTime<Utc> = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(LocalFileRecord {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            relative: relative_string(&self.root, path),
            hash,
            size: metadata.len(),
            created,
        })
    }
}

/// `/`-separated path of `path` below `root`.
pub(crate) fn relative_string(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
