//! Single-file upload strategies.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use photopush_common::{RemotePath, Result};
use photopush_storage::{CommitInfo, FileMetadata, RemoteStore, WriteMode};

use crate::record::LocalFileRecord;

/// Largest file sent in a single request.
pub const DEFAULT_SMALL_FILE_LIMIT: u64 = 100 * 1024 * 1024;

/// Bytes appended per session request.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Size thresholds for choosing an upload strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// Files up to this size (inclusive) go up in one request.
    pub small_file_limit: u64,
    /// Chunk size for session uploads.
    pub chunk_size: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            small_file_limit: DEFAULT_SMALL_FILE_LIMIT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// How a file is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// One request carrying the whole file.
    Single,
    /// Start a session, append fixed-size chunks, then commit.
    Session,
}

impl UploadStrategy {
    pub fn for_size(size: u64, small_file_limit: u64) -> Self {
        if size <= small_file_limit {
            UploadStrategy::Single
        } else {
            UploadStrategy::Session
        }
    }
}

/// `(offset, length)` of every chunk of a `size`-byte file.
pub fn chunk_ranges(size: u64, chunk_size: usize) -> Vec<(u64, u64)> {
    let chunk = chunk_size.max(1) as u64;
    let mut ranges = Vec::with_capacity(size.div_ceil(chunk) as usize);
    let mut offset = 0;
    while offset < size {
        let len = chunk.min(size - offset);
        ranges.push((offset, len));
        offset += len;
    }
    ranges
}

/// One file to transfer.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub local: LocalFileRecord,
    pub destination: RemotePath,
}

impl UploadJob {
    /// Job mirroring `local` below `remote_root`.
    pub fn mirrored(local: LocalFileRecord, remote_root: &RemotePath) -> Result<Self> {
        let destination = remote_root.join_relative(&local.relative)?;
        Ok(Self { local, destination })
    }
}

/// Transfers single files into a remote store.
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn RemoteStore>,
    options: UploadOptions,
}

impl Uploader {
    pub fn new(store: Arc<dyn RemoteStore>, options: UploadOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Upload one file, overwriting whatever is at the destination.
    ///
    /// Each call is a complete attempt; a session is never resumed.
    pub async fn upload(&self, job: &UploadJob) -> Result<FileMetadata> {
        match UploadStrategy::for_size(job.local.size, self.options.small_file_limit) {
            UploadStrategy::Single => self.upload_single(job).await,
            UploadStrategy::Session => self.upload_session(job).await,
        }
    }

    async fn upload_single(&self, job: &UploadJob) -> Result<FileMetadata> {
        let data = tokio::fs::read(&job.local.path).await?;
        self.check_size(job, data.len() as u64);
        debug!("Uploading {} in one request", job.destination);
        self.store.upload_small(&job.destination, data).await
    }

    async fn upload_session(&self, job: &UploadJob) -> Result<FileMetadata> {
        let mut file = File::open(&job.local.path).await?;
        let session = self.store.start_session().await?;
        debug!(
            "Uploading {} in session {} ({} chunks)",
            job.destination,
            session,
            chunk_ranges(job.local.size, self.options.chunk_size).len()
        );

        let mut offset: u64 = 0;
        loop {
            let chunk = read_chunk(&mut file, self.options.chunk_size).await?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len() as u64;
            self.store.append_session(&session, offset, chunk).await?;
            offset += len;
            debug!("{}: {} of {} bytes sent", job.destination, offset, job.local.size);
        }
        self.check_size(job, offset);

        let commit = CommitInfo {
            path: job.destination.clone(),
            mode: WriteMode::Overwrite,
            client_modified: Some(job.local.created),
        };
        self.store.finish_session(&session, offset, commit).await
    }

    fn check_size(&self, job: &UploadJob, read: u64) {
        if read != job.local.size {
            warn!(
                "{} changed since scanning: expected {} bytes, read {}",
                job.local.path.display(),
                job.local.size,
                read
            );
        }
    }
}

/// Read up to `size` bytes; shorter only at end of file.
async fn read_chunk(file: &mut File, size: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; size.max(1)];
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}
