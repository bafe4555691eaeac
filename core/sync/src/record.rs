//! Normalized file records on both sides of a sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use photopush_common::RemotePath;
use photopush_storage::FileMetadata;

/// A file found by the local tree scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileRecord {
    /// Base name.
    pub name: String,
    /// Filesystem path, local root joined with `relative`. Used for reads
    /// and moves.
    pub path: PathBuf,
    /// Path below the local root, `/`-separated, exact case.
    pub relative: String,
    /// Block-wise content hash.
    pub hash: String,
    /// Size in bytes.
    pub size: u64,
    /// Creation time (modification time where creation is not reported).
    pub created: DateTime<Utc>,
}

impl LocalFileRecord {
    /// Case-normalized relative path used to match remote records.
    pub fn key(&self) -> String {
        self.relative.to_lowercase()
    }

    /// Same size and same content hash.
    pub fn same_content_as(&self, remote: &RemoteFileRecord) -> bool {
        self.size == remote.size && self.hash == remote.hash
    }
}

/// A file in the remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileRecord {
    pub name: String,
    pub client_modified: DateTime<Utc>,
    pub server_modified: DateTime<Utc>,
    /// Absolute remote path in display case.
    pub path: RemotePath,
    pub hash: String,
    pub size: u64,
}

impl RemoteFileRecord {
    /// Relative path below `root` in original case.
    pub fn relative(&self, root: &RemotePath) -> Option<String> {
        self.path.relative_to(root)
    }

    /// Case-normalized relative path below `root`.
    pub fn key(&self, root: &RemotePath) -> Option<String> {
        self.relative(root).map(|r| r.to_lowercase())
    }
}

impl From<FileMetadata> for RemoteFileRecord {
    fn from(meta: FileMetadata) -> Self {
        Self {
            name: meta.name,
            client_modified: meta.client_modified,
            server_modified: meta.server_modified,
            path: meta.path,
            hash: meta.content_hash,
            size: meta.size,
        }
    }
}
