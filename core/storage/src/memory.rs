//! In-memory remote store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use uuid::Uuid;

use photopush_common::{ContentHasher, Error, RemotePath, Result};

use crate::provider::{
    CommitInfo, FileMetadata, FolderMetadata, ListPage, RemoteEntry, RemoteStore, SessionId,
    WriteMode,
};

/// Kind of failure a scripted fault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Network,
    RateLimited,
    Rejected,
}

impl Fault {
    fn to_error(self, path: &RemotePath) -> Error {
        match self {
            Fault::Network => Error::Network(format!("connection reset while writing {path}")),
            Fault::RateLimited => Error::RateLimited {
                message: format!("too_many_write_operations on {path}"),
                retry_after: None,
            },
            Fault::Rejected => Error::RemoteRejected(format!("path/disallowed_name: {path}")),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    metadata: FileMetadata,
}

#[derive(Default)]
struct Inner {
    /// Files keyed by normalized path.
    files: BTreeMap<String, StoredFile>,
    /// Explicitly created folders, normalized path to display path.
    folders: BTreeMap<String, RemotePath>,
    sessions: HashMap<String, Vec<u8>>,
    cursors: HashMap<String, VecDeque<RemoteEntry>>,
    faults: HashMap<String, (u32, Fault)>,
    fail_listing: bool,
}

/// Call counters, useful for asserting on the traffic a sync produced.
#[derive(Debug, Default)]
pub struct CallStats {
    pub list_calls: AtomicU32,
    pub small_uploads: AtomicU32,
    pub sessions_started: AtomicU32,
    pub appends: AtomicU32,
    pub sessions_finished: AtomicU32,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

/// In-memory remote store.
///
/// Hashes content with the real content hasher, paginates listings and
/// enforces exact session offsets, so it behaves like the real service for
/// everything the sync engine relies on.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    page_size: usize,
    latency: Option<Duration>,
    stats: CallStats,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            page_size: 100,
            latency: None,
            stats: CallStats::default(),
        }
    }

    /// Limit listing pages to `page_size` entries.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay every upload call, which makes concurrent uploads overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seed a file directly.
    pub fn put_file(&self, path: &RemotePath, data: &[u8], client_modified: DateTime<Utc>) {
        let metadata = Self::metadata_for(path, data, client_modified);
        self.write().files.insert(
            path.normalized(),
            StoredFile {
                data: data.to_vec(),
                metadata,
            },
        );
    }

    /// Create an (empty) folder.
    pub fn create_folder(&self, path: &RemotePath) {
        self.write().folders.insert(path.normalized(), path.clone());
    }

    /// Read a stored file back.
    pub fn read(&self, path: &RemotePath) -> Option<Vec<u8>> {
        self.read_lock()
            .files
            .get(&path.normalized())
            .map(|f| f.data.clone())
    }

    /// Metadata of a stored file.
    pub fn metadata(&self, path: &RemotePath) -> Option<FileMetadata> {
        self.read_lock()
            .files
            .get(&path.normalized())
            .map(|f| f.metadata.clone())
    }

    /// Number of stored files.
    pub fn file_count(&self) -> usize {
        self.read_lock().files.len()
    }

    /// Make the next `times` writes of `path` fail with `fault`.
    pub fn fail_writes(&self, path: &RemotePath, times: u32, fault: Fault) {
        self.write().faults.insert(path.normalized(), (times, fault));
    }

    /// Make every listing call fail.
    pub fn fail_listing(&self, fail: bool) {
        self.write().fail_listing = fail;
    }

    /// Call counters.
    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn metadata_for(path: &RemotePath, data: &[u8], client_modified: DateTime<Utc>) -> FileMetadata {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        FileMetadata {
            name: path.name().unwrap_or("/").to_string(),
            path: path.clone(),
            size: data.len() as u64,
            content_hash: hasher.finalize(),
            client_modified,
            server_modified: Utc::now(),
        }
    }

    fn take_fault(&self, path: &RemotePath) -> Option<Error> {
        let mut inner = self.write();
        let key = path.normalized();
        let (remaining, fault) = inner.faults.get_mut(&key)?;
        let err = fault.to_error(path);
        *remaining -= 1;
        if *remaining == 0 {
            inner.faults.remove(&key);
        }
        Some(err)
    }

    fn store(&self, path: &RemotePath, data: Vec<u8>, mode: WriteMode, client_modified: DateTime<Utc>) -> Result<FileMetadata> {
        let mut inner = self.write();
        let key = path.normalized();
        if mode == WriteMode::Add && inner.files.contains_key(&key) {
            return Err(Error::RemoteRejected(format!("path/conflict/file: {path}")));
        }
        let metadata = Self::metadata_for(path, &data, client_modified);
        inner.files.insert(
            key,
            StoredFile {
                data,
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    /// Direct children of `folder`, folders first, then files, by name.
    fn children(inner: &Inner, folder: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let mut folders: BTreeMap<String, RemotePath> = BTreeMap::new();
        let mut files = Vec::new();
        let mut exists = folder.is_root() || inner.folders.contains_key(&folder.normalized());

        let candidate_paths = inner
            .files
            .values()
            .map(|f| &f.metadata.path)
            .chain(inner.folders.values());

        for path in candidate_paths {
            let Some(relative) = path.relative_to(folder) else {
                continue;
            };
            exists = true;
            match relative.split_once('/') {
                None => {
                    if let Some(file) = inner.files.get(&path.normalized()) {
                        files.push(RemoteEntry::File(file.metadata.clone()));
                    } else {
                        folders.entry(relative.to_lowercase()).or_insert_with(|| path.clone());
                    }
                }
                Some((first, _)) => {
                    let sub = folder.join(first)?;
                    folders.entry(first.to_lowercase()).or_insert(sub);
                }
            }
        }

        if !exists {
            return Err(Error::NotFound(format!("path/not_found: {folder}")));
        }

        let mut entries: Vec<RemoteEntry> = folders
            .into_values()
            .map(|path| {
                RemoteEntry::Folder(FolderMetadata {
                    name: path.name().unwrap_or("/").to_string(),
                    path,
                })
            })
            .collect();
        entries.extend(files);
        Ok(entries)
    }

    fn next_page(&self, inner: &mut Inner, mut remaining: VecDeque<RemoteEntry>) -> ListPage {
        let take = self.page_size.min(remaining.len());
        let entries: Vec<RemoteEntry> = remaining.drain(..take).collect();
        if remaining.is_empty() {
            ListPage {
                entries,
                cursor: None,
                has_more: false,
            }
        } else {
            let cursor = Uuid::new_v4().to_string();
            inner.cursors.insert(cursor.clone(), remaining);
            ListPage {
                entries,
                cursor: Some(cursor),
                has_more: true,
            }
        }
    }

    async fn enter_upload(&self) {
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn leave_upload(&self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_folder(&self, path: &RemotePath) -> Result<ListPage> {
        self.stats.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.write();
        if inner.fail_listing {
            return Err(Error::Network("listing unavailable".to_string()));
        }
        let entries = Self::children(&inner, path)?;
        Ok(self.next_page(&mut inner, entries.into()))
    }

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage> {
        self.stats.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.write();
        if inner.fail_listing {
            return Err(Error::Network("listing unavailable".to_string()));
        }
        let remaining = inner
            .cursors
            .remove(cursor)
            .ok_or_else(|| Error::RemoteRejected(format!("reset: unknown cursor {cursor}")))?;
        Ok(self.next_page(&mut inner, remaining))
    }

    async fn upload_small(&self, path: &RemotePath, data: Vec<u8>) -> Result<FileMetadata> {
        self.stats.small_uploads.fetch_add(1, Ordering::SeqCst);
        self.enter_upload().await;
        let result = match self.take_fault(path) {
            Some(err) => Err(err),
            None => self.store(path, data, WriteMode::Overwrite, Utc::now()),
        };
        self.leave_upload();
        result
    }

    async fn start_session(&self) -> Result<SessionId> {
        self.stats.sessions_started.fetch_add(1, Ordering::SeqCst);
        let id = Uuid::new_v4().to_string();
        self.write().sessions.insert(id.clone(), Vec::new());
        Ok(SessionId(id))
    }

    async fn append_session(&self, session: &SessionId, offset: u64, data: Vec<u8>) -> Result<()> {
        self.stats.appends.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.write();
        let buffer = inner
            .sessions
            .get_mut(session.as_str())
            .ok_or_else(|| Error::SessionExpired(format!("not_found: {session}")))?;
        if buffer.len() as u64 != offset {
            return Err(Error::RemoteRejected(format!(
                "incorrect_offset: expected {}, got {}",
                buffer.len(),
                offset
            )));
        }
        buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish_session(
        &self,
        session: &SessionId,
        offset: u64,
        commit: CommitInfo,
    ) -> Result<FileMetadata> {
        self.stats.sessions_finished.fetch_add(1, Ordering::SeqCst);
        self.enter_upload().await;
        let result = self.finish_inner(session, offset, commit);
        self.leave_upload();
        result
    }
}

impl MemoryStore {
    fn finish_inner(&self, session: &SessionId, offset: u64, commit: CommitInfo) -> Result<FileMetadata> {
        if let Some(err) = self.take_fault(&commit.path) {
            self.write().sessions.remove(session.as_str());
            return Err(err);
        }
        let data = {
            let mut inner = self.write();
            let data = inner
                .sessions
                .remove(session.as_str())
                .ok_or_else(|| Error::SessionExpired(format!("not_found: {session}")))?;
            if data.len() as u64 != offset {
                return Err(Error::RemoteRejected(format!(
                    "incorrect_offset: expected {}, got {}",
                    data.len(),
                    offset
                )));
            }
            data
        };
        self.store(
            &commit.path,
            data,
            commit.mode,
            commit.client_modified.unwrap_or_else(Utc::now),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::list_folder_recursive;

    fn path(p: &str) -> RemotePath {
        RemotePath::parse(p).unwrap()
    }

    #[tokio::test]
    async fn test_upload_and_read() {
        let store = MemoryStore::new();
        let meta = store.upload_small(&path("/photos/a.jpg"), b"aaa".to_vec()).await.unwrap();

        assert_eq!(meta.name, "a.jpg");
        assert_eq!(meta.size, 3);
        assert_eq!(store.read(&path("/Photos/A.JPG")).unwrap(), b"aaa");
    }

    #[tokio::test]
    async fn test_listing_paginates_and_recurses() {
        let store = MemoryStore::new().with_page_size(2);
        for i in 0..5 {
            store.put_file(&path(&format!("/photos/2020/{i}.jpg")), b"x", Utc::now());
        }
        store.put_file(&path("/photos/top.jpg"), b"y", Utc::now());
        store.put_file(&path("/music/song.mp3"), b"z", Utc::now());

        let files = list_folder_recursive(&store, &path("/photos")).await.unwrap();
        assert_eq!(files.len(), 6);
        assert!(files.iter().all(|f| f.path.to_string_path().starts_with("/photos/")));
        // 1 page for /photos, 3 pages for /photos/2020
        assert_eq!(store.stats().list_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_listing_missing_folder_fails() {
        let store = MemoryStore::new();
        let err = list_folder_recursive(&store, &path("/nope")).await.unwrap_err();
        assert!(matches!(err, Error::Listing(_)));
    }

    #[tokio::test]
    async fn test_empty_created_folder_lists_empty() {
        let store = MemoryStore::new();
        store.create_folder(&path("/photos"));
        let files = list_folder_recursive(&store, &path("/photos")).await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_session_rejects_gaps() {
        let store = MemoryStore::new();
        let session = store.start_session().await.unwrap();
        store.append_session(&session, 0, vec![1, 2, 3]).await.unwrap();

        let err = store.append_session(&session, 4, vec![4]).await.unwrap_err();
        assert!(matches!(err, Error::RemoteRejected(_)));

        store.append_session(&session, 3, vec![4]).await.unwrap();
        let meta = store
            .finish_session(
                &session,
                4,
                CommitInfo {
                    path: path("/big.bin"),
                    mode: WriteMode::Overwrite,
                    client_modified: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(meta.size, 4);
        assert_eq!(store.read(&path("/big.bin")).unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_scripted_faults_run_out() {
        let store = MemoryStore::new();
        let target = path("/a.jpg");
        store.fail_writes(&target, 2, Fault::Network);

        assert!(store.upload_small(&target, b"a".to_vec()).await.unwrap_err().is_transient());
        assert!(store.upload_small(&target, b"a".to_vec()).await.unwrap_err().is_transient());
        assert!(store.upload_small(&target, b"a".to_vec()).await.is_ok());
    }
}
