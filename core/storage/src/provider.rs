//! Remote store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use photopush_common::{Error, RemotePath, Result};

/// Metadata for a file stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Base name of the file.
    pub name: String,
    /// Absolute path in display case.
    pub path: RemotePath,
    /// Size in bytes.
    pub size: u64,
    /// Block-wise content hash (lowercase hex).
    pub content_hash: String,
    /// Modification time declared by the uploading client.
    pub client_modified: DateTime<Utc>,
    /// Time the store last accepted new content.
    pub server_modified: DateTime<Utc>,
}

/// Metadata for a remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMetadata {
    pub name: String,
    pub path: RemotePath,
}

/// One entry of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEntry {
    File(FileMetadata),
    Folder(FolderMetadata),
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    /// Continuation cursor for the next page.
    pub cursor: Option<String>,
    /// Whether more entries are available through `cursor`.
    pub has_more: bool,
}

/// Opaque identifier of an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write mode for committed uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Fail if something already exists at the path.
    Add,
    /// Replace whatever is at the path.
    #[default]
    Overwrite,
}

/// Final commit information for an upload session.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub path: RemotePath,
    pub mode: WriteMode,
    pub client_modified: Option<DateTime<Utc>>,
}

/// Capability of a remote object store used by the sync engine.
///
/// Implementations handle their own transport and authentication and map
/// failures onto the common error kinds: [`Error::RateLimited`] and
/// [`Error::Network`] are transient, [`Error::RemoteRejected`],
/// [`Error::SessionExpired`] and [`Error::Authentication`] are not.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the store name (e.g., "dropbox", "memory").
    fn name(&self) -> &str;

    /// List the direct children of a folder, first page.
    async fn list_folder(&self, path: &RemotePath) -> Result<ListPage>;

    /// Continue a listing from a cursor returned by a previous page.
    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage>;

    /// Upload a complete file in a single request, overwriting the target.
    async fn upload_small(&self, path: &RemotePath, data: Vec<u8>) -> Result<FileMetadata>;

    /// Open a new upload session.
    async fn start_session(&self) -> Result<SessionId>;

    /// Append `data` at `offset`; offset must equal the bytes sent so far.
    async fn append_session(&self, session: &SessionId, offset: u64, data: Vec<u8>) -> Result<()>;

    /// Close a session and commit its content.
    ///
    /// `offset` is the total number of bytes appended.
    async fn finish_session(
        &self,
        session: &SessionId,
        offset: u64,
        commit: CommitInfo,
    ) -> Result<FileMetadata>;
}

/// List every file below `root`, following cursors and descending into
/// folders until the tree is exhausted.
///
/// A missing root is reported as [`Error::Listing`] like any other failure.
pub async fn list_folder_recursive<S>(store: &S, root: &RemotePath) -> Result<Vec<FileMetadata>>
where
    S: RemoteStore + ?Sized,
{
    let mut files = Vec::new();
    let mut pending = vec![root.clone()];

    while let Some(folder) = pending.pop() {
        debug!("Listing {}", folder);
        let mut page = store
            .list_folder(&folder)
            .await
            .map_err(|e| listing_error(&folder, e))?;

        loop {
            for entry in page.entries.drain(..) {
                match entry {
                    RemoteEntry::File(file) => files.push(file),
                    RemoteEntry::Folder(sub) => pending.push(sub.path),
                }
            }

            if !page.has_more {
                break;
            }
            let cursor = page.cursor.take().ok_or_else(|| {
                Error::Listing(format!("{folder}: listing has more entries but no cursor"))
            })?;
            page = store
                .list_folder_continue(&cursor)
                .await
                .map_err(|e| listing_error(&folder, e))?;
        }
    }

    Ok(files)
}

fn listing_error(folder: &RemotePath, err: Error) -> Error {
    match err {
        Error::Listing(msg) => Error::Listing(msg),
        other => Error::Listing(format!("{folder}: {other}")),
    }
}
