//! Comparison of the local tree against the remote snapshot.
//!
//! Two independent questions are answered here:
//!
//! - which local files are missing at the mirrored remote path
//!   ([`Diff::strict_upload_set`]), and
//! - which local files already exist remotely with identical content but
//!   somewhere else ([`Diff::misplaced`]).
//!
//! Path matching ignores case; content matching requires equal size and
//! equal content hash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use photopush_common::RemotePath;

use crate::record::{LocalFileRecord, RemoteFileRecord};

/// A local file whose mirrored remote path holds different content.
///
/// Reported and never uploaded, so an accidental local edit cannot clobber
/// the remote copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMismatch {
    pub local: LocalFileRecord,
    pub remote: RemoteFileRecord,
}

/// Outcome of the strict (path-mirrored) comparison.
#[derive(Debug, Clone, Default)]
pub struct StrictUploadSet {
    /// Local files with no remote file at the mirrored path.
    pub uploads: Vec<LocalFileRecord>,
    /// Local files already present with identical content.
    pub already_synced: usize,
    /// Local files whose mirrored remote path has different content.
    pub mismatches: Vec<ContentMismatch>,
}

impl StrictUploadSet {
    /// Total bytes that would be uploaded.
    pub fn upload_bytes(&self) -> u64 {
        self.uploads.iter().map(|r| r.size).sum()
    }
}

/// How many remote files could be the home of a misplaced local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Exactly one candidate.
    Unambiguous,
    /// Two or more candidates; never acted upon automatically.
    Ambiguous,
}

/// A local file whose content exists remotely at a different relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MisplacedFile {
    pub local: LocalFileRecord,
    pub candidates: Vec<RemoteFileRecord>,
}

impl MisplacedFile {
    pub fn confidence(&self) -> Confidence {
        if self.candidates.len() == 1 {
            Confidence::Unambiguous
        } else {
            Confidence::Ambiguous
        }
    }
}

/// Local and remote views of the same tree.
pub struct Diff<'a> {
    local_root: PathBuf,
    remote_root: RemotePath,
    locals: &'a [LocalFileRecord],
    remotes: &'a [RemoteFileRecord],
}

impl<'a> Diff<'a> {
    pub fn new(
        local_root: impl AsRef<Path>,
        remote_root: &RemotePath,
        locals: &'a [LocalFileRecord],
        remotes: &'a [RemoteFileRecord],
    ) -> Self {
        Self {
            local_root: local_root.as_ref().to_path_buf(),
            remote_root: remote_root.clone(),
            locals,
            remotes,
        }
    }

    /// Local files whose mirrored remote path is free.
    pub fn strict_upload_set(&self) -> StrictUploadSet {
        let by_path: HashMap<String, &RemoteFileRecord> = self
            .remotes
            .iter()
            .filter_map(|r| r.key(&self.remote_root).map(|key| (key, r)))
            .collect();

        let mut set = StrictUploadSet::default();
        for local in self.locals {
            match by_path.get(&local.key()) {
                None => set.uploads.push(local.clone()),
                Some(remote) if local.same_content_as(remote) => set.already_synced += 1,
                Some(remote) => {
                    warn!(
                        "Local file {} ({} bytes, {}) differs from remote {} ({} bytes, {}); not uploading",
                        self.local_root.join(&local.relative).display(),
                        local.size,
                        local.hash,
                        remote.path,
                        remote.size,
                        remote.hash
                    );
                    set.mismatches.push(ContentMismatch {
                        local: local.clone(),
                        remote: (*remote).clone(),
                    });
                }
            }
        }

        info!(
            "Already uploaded {}, to upload {}, mismatched {}",
            set.already_synced,
            set.uploads.len(),
            set.mismatches.len()
        );
        set
    }

    /// Local files whose content is already stored at another remote path.
    pub fn misplaced(&self) -> Vec<MisplacedFile> {
        let mut by_name: HashMap<String, Vec<(String, &RemoteFileRecord)>> = HashMap::new();
        for remote in self.remotes {
            if let Some(key) = remote.key(&self.remote_root) {
                by_name
                    .entry(remote.name.to_lowercase())
                    .or_default()
                    .push((key, remote));
            }
        }

        let mut misplaced: Vec<MisplacedFile> = self
            .locals
            .iter()
            .filter_map(|local| {
                let local_key = local.key();
                let candidates: Vec<RemoteFileRecord> = by_name
                    .get(&local.name.to_lowercase())?
                    .iter()
                    .filter(|(key, remote)| *key != local_key && local.same_content_as(remote))
                    .map(|(_, remote)| (*remote).clone())
                    .collect();

                if candidates.is_empty() {
                    return None;
                }
                debug!(
                    "{} has {} remote candidate(s)",
                    local.relative,
                    candidates.len()
                );
                Some(MisplacedFile {
                    local: local.clone(),
                    candidates,
                })
            })
            .collect();

        misplaced.sort_by(|a, b| a.local.relative.cmp(&b.local.relative));
        misplaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn local(relative: &str, hash: &str, size: u64) -> LocalFileRecord {
        LocalFileRecord {
            name: relative.rsplit('/').next().unwrap_or(relative).to_string(),
            path: Path::new("/local").join(relative),
            relative: relative.to_string(),
            hash: hash.to_string(),
            size,
            created: Utc::now(),
        }
    }

    fn remote(path: &str, hash: &str, size: u64) -> RemoteFileRecord {
        let path = RemotePath::parse(path).unwrap();
        RemoteFileRecord {
            name: path.name().unwrap().to_string(),
            client_modified: Utc::now(),
            server_modified: Utc::now(),
            path,
            hash: hash.to_string(),
            size,
        }
    }

    fn root() -> RemotePath {
        RemotePath::parse("/photos").unwrap()
    }

    #[test]
    fn test_strict_set_is_missing_files_only() {
        let locals = vec![local("a.jpg", "h1", 3), local("b.jpg", "h2", 4)];
        let remotes = vec![remote("/photos/a.jpg", "h1", 3)];

        let set = Diff::new("/local", &root(), &locals, &remotes).strict_upload_set();
        assert_eq!(set.uploads.len(), 1);
        assert_eq!(set.uploads[0].relative, "b.jpg");
        assert_eq!(set.already_synced, 1);
        assert!(set.mismatches.is_empty());
        assert_eq!(set.upload_bytes(), 4);
    }

    #[test]
    fn test_path_match_ignores_case() {
        let locals = vec![local("2020/IMG.JPG", "h1", 3)];
        let remotes = vec![remote("/Photos/2020/img.jpg", "h1", 3)];

        let set = Diff::new("/local", &root(), &locals, &remotes).strict_upload_set();
        assert!(set.uploads.is_empty());
        assert_eq!(set.already_synced, 1);
    }

    #[test]
    fn test_content_mismatch_is_neither_uploaded_nor_synced() {
        let locals = vec![local("a.jpg", "h1", 3)];
        let remotes = vec![remote("/photos/a.jpg", "h9", 3)];

        let set = Diff::new("/local", &root(), &locals, &remotes).strict_upload_set();
        assert!(set.uploads.is_empty());
        assert_eq!(set.already_synced, 0);
        assert_eq!(set.mismatches.len(), 1);
        assert_eq!(set.mismatches[0].remote.hash, "h9");
    }

    #[test]
    fn test_same_hash_different_size_is_mismatch() {
        let locals = vec![local("a.jpg", "h1", 3)];
        let remotes = vec![remote("/photos/a.jpg", "h1", 5)];

        let set = Diff::new("/local", &root(), &locals, &remotes).strict_upload_set();
        assert_eq!(set.mismatches.len(), 1);
    }

    #[test]
    fn test_remotes_outside_root_are_ignored() {
        let locals = vec![local("a.jpg", "h1", 3)];
        let remotes = vec![remote("/other/a.jpg", "h1", 3), remote("/backup/x/a.jpg", "h1", 3)];

        let diff = Diff::new("/local", &root(), &locals, &remotes);
        assert_eq!(diff.strict_upload_set().uploads.len(), 1);
        assert!(diff.misplaced().is_empty());
    }

    #[test]
    fn test_misplaced_single_candidate() {
        let locals = vec![local("x.jpg", "h", 10)];
        let remotes = vec![remote("/photos/2021/x.jpg", "h", 10)];

        let misplaced = Diff::new("/local", &root(), &locals, &remotes).misplaced();
        assert_eq!(misplaced.len(), 1);
        assert_eq!(misplaced[0].confidence(), Confidence::Unambiguous);
        assert_eq!(misplaced[0].candidates[0].path.to_string_path(), "/photos/2021/x.jpg");
    }

    #[test]
    fn test_misplaced_two_candidates_is_ambiguous() {
        let locals = vec![local("x.jpg", "h", 10)];
        let remotes = vec![
            remote("/photos/2021/x.jpg", "h", 10),
            remote("/photos/2022/x.jpg", "h", 10),
        ];

        let misplaced = Diff::new("/local", &root(), &locals, &remotes).misplaced();
        assert_eq!(misplaced.len(), 1);
        assert_eq!(misplaced[0].confidence(), Confidence::Ambiguous);
    }

    #[test]
    fn test_file_at_its_own_path_is_not_misplaced() {
        let locals = vec![local("2021/x.jpg", "h", 10)];
        let remotes = vec![remote("/photos/2021/X.jpg", "h", 10)];

        assert!(Diff::new("/local", &root(), &locals, &remotes).misplaced().is_empty());
    }

    #[test]
    fn test_synced_file_with_remote_duplicate_reports_the_copy() {
        let locals = vec![local("x.jpg", "h", 10)];
        let remotes = vec![
            remote("/photos/x.jpg", "h", 10),
            remote("/photos/backup/x.jpg", "h", 10),
        ];

        let misplaced = Diff::new("/local", &root(), &locals, &remotes).misplaced();
        assert_eq!(misplaced.len(), 1);
        assert_eq!(misplaced[0].confidence(), Confidence::Unambiguous);
        assert_eq!(misplaced[0].candidates[0].path.to_string_path(), "/photos/backup/x.jpg");
    }

    #[test]
    fn test_same_name_different_content_is_not_misplaced() {
        let locals = vec![local("x.jpg", "h", 10)];
        let remotes = vec![remote("/photos/2021/x.jpg", "other", 10)];

        assert!(Diff::new("/local", &root(), &locals, &remotes).misplaced().is_empty());
    }

    #[test]
    fn test_misplaced_is_sorted_by_local_path() {
        let locals = vec![local("b.jpg", "hb", 1), local("a.jpg", "ha", 1)];
        let remotes = vec![remote("/photos/x/b.jpg", "hb", 1), remote("/photos/x/a.jpg", "ha", 1)];

        let misplaced = Diff::new("/local", &root(), &locals, &remotes).misplaced();
        let order: Vec<&str> = misplaced.iter().map(|m| m.local.relative.as_str()).collect();
        assert_eq!(order, vec!["a.jpg", "b.jpg"]);
    }
}
