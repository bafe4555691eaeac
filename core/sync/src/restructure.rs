//! Moves misplaced local files to the paths their remote copies use.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use photopush_common::{Error, RemotePath, Result};

use crate::diff::{Confidence, MisplacedFile};

/// What a restructuring pass did.
#[derive(Debug, Default)]
pub struct RestructureReport {
    /// `(from, to)` for every completed move.
    pub moved: Vec<(PathBuf, PathBuf)>,
    /// Ambiguous entries left where they are.
    pub skipped: Vec<MisplacedFile>,
    pub created_dirs: Vec<PathBuf>,
}

/// Rearranges the local tree to mirror the remote layout.
pub struct Restructurer {
    local_root: PathBuf,
    remote_root: RemotePath,
}

impl Restructurer {
    pub fn new(local_root: impl Into<PathBuf>, remote_root: RemotePath) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root,
        }
    }

    /// Move every unambiguous entry to the local mirror of its remote
    /// candidate. Stops at the first failed move.
    pub fn apply(&self, misplaced: &[MisplacedFile]) -> Result<RestructureReport> {
        let mut report = RestructureReport::default();

        for entry in misplaced {
            if entry.confidence() == Confidence::Ambiguous {
                warn!(
                    "Not moving {}: {} remote candidates ({})",
                    entry.local.relative,
                    entry.candidates.len(),
                    entry
                        .candidates
                        .iter()
                        .map(|c| c.path.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                report.skipped.push(entry.clone());
                continue;
            }

            let candidate = &entry.candidates[0];
            let relative = candidate.relative(&self.remote_root).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{} is not below {}",
                    candidate.path, self.remote_root
                ))
            })?;
            let destination = relative
                .split('/')
                .fold(self.local_root.clone(), |path, comp| path.join(comp));

            self.move_file(&entry.local.path, &destination, &mut report)?;
        }

        info!(
            "Moved {} files, skipped {} ambiguous",
            report.moved.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn move_file(&self, from: &Path, to: &Path, report: &mut RestructureReport) -> Result<()> {
        let move_failed = |reason: String| Error::MoveFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            reason,
        };

        if to.exists() {
            return Err(move_failed("destination already exists".to_string()));
        }

        if let Some(parent) = to.parent() {
            if !parent.is_dir() {
                info!("Creating directory {}", parent.display());
                std::fs::create_dir_all(parent).map_err(|e| move_failed(e.to_string()))?;
                report.created_dirs.push(parent.to_path_buf());
            }
        }

        info!("Moving {} to {}", from.display(), to.display());
        std::fs::rename(from, to).map_err(|e| move_failed(e.to_string()))?;
        report.moved.push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }
}
