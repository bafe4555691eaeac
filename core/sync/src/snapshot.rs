//! Cached snapshot of the remote tree.
//!
//! The snapshot is written as JSON lines: a header object naming the format,
//! version and remote root, followed by one object per file. Presence of the
//! file means "trust it"; it is removed once a sync pass fully succeeds so
//! the next run observes the real remote state again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use photopush_common::{Error, RemotePath, Result};
use photopush_storage::{list_folder_recursive, RemoteStore};

use crate::record::RemoteFileRecord;

/// Default cache file name, relative to the working directory.
pub const DEFAULT_CACHE_FILE: &str = ".photopush-snapshot";

const FORMAT: &str = "photopush-snapshot";
const VERSION: u32 = 1;

/// First line of a snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub format: String,
    pub version: u32,
    pub root: RemotePath,
    pub created: DateTime<Utc>,
    pub count: usize,
}

/// On-disk cache of one remote listing.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    /// Cache stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a snapshot is currently cached.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Return the cached snapshot for `root`, or list the store and cache
    /// the result.
    ///
    /// `refresh` ignores any existing cache. A listing failure leaves the
    /// cache untouched.
    pub async fn load_or_fetch<S>(
        &self,
        store: &S,
        root: &RemotePath,
        refresh: bool,
    ) -> Result<Vec<RemoteFileRecord>>
    where
        S: RemoteStore + ?Sized,
    {
        if !refresh {
            if let Some((header, records)) = self.read().await? {
                if header.root.normalized() == root.normalized() {
                    info!(
                        "Using cached remote snapshot from {} ({} files)",
                        header.created,
                        records.len()
                    );
                    return Ok(records);
                }
                warn!(
                    "Cached snapshot is for {}, not {}; listing again",
                    header.root, root
                );
            }
        }

        info!("Reading remote state under {} from {}", root, store.name());
        let records: Vec<RemoteFileRecord> = list_folder_recursive(store, root)
            .await?
            .into_iter()
            .map(RemoteFileRecord::from)
            .collect();
        info!("Found {} remote files", records.len());

        self.write(root, &records).await?;
        Ok(records)
    }

    /// Read the cache file, if present.
    ///
    /// # Errors
    /// - Unknown format or version
    /// - Malformed records or a record count that disagrees with the header
    pub async fn read(&self) -> Result<Option<(SnapshotHeader, Vec<RemoteFileRecord>)>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header_line = lines
            .next()
            .ok_or_else(|| self.corrupt("file is empty"))?;
        let header: SnapshotHeader =
            serde_json::from_str(header_line).map_err(|e| self.corrupt(&e.to_string()))?;

        if header.format != FORMAT || header.version != VERSION {
            return Err(self.corrupt(&format!(
                "unsupported format {} v{}",
                header.format, header.version
            )));
        }

        let records = lines
            .map(|line| serde_json::from_str(line).map_err(|e| self.corrupt(&e.to_string())))
            .collect::<Result<Vec<RemoteFileRecord>>>()?;

        if records.len() != header.count {
            return Err(self.corrupt(&format!(
                "expected {} records, found {}",
                header.count,
                records.len()
            )));
        }

        Ok(Some((header, records)))
    }

    /// Persist `records` as the snapshot of `root`.
    pub async fn write(&self, root: &RemotePath, records: &[RemoteFileRecord]) -> Result<()> {
        let header = SnapshotHeader {
            format: FORMAT.to_string(),
            version: VERSION,
            root: root.clone(),
            created: Utc::now(),
            count: records.len(),
        };

        let mut content = to_json_line(&header)?;
        for record in records {
            content.push_str(&to_json_line(record)?);
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Delete the cache file. Returns whether a file was removed.
    pub async fn invalidate(&self) -> Result<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Removed remote snapshot cache {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn corrupt(&self, detail: &str) -> Error {
        Error::Serialization(format!(
            "snapshot cache {} is unreadable ({}); run `clean-cache` to rebuild it",
            self.path.display(),
            detail
        ))
    }
}

fn to_json_line<T: Serialize>(value: &T) -> Result<String> {
    let mut line = serde_json::to_string(value).map_err(|e| Error::Serialization(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use photopush_storage::MemoryStore;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn path(p: &str) -> RemotePath {
        RemotePath::parse(p).unwrap()
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new().with_page_size(1);
        store.put_file(&path("/photos/a.jpg"), b"aaa", Utc::now());
        store.put_file(&path("/photos/2020/b.jpg"), b"bb", Utc::now());
        store
    }

    #[tokio::test]
    async fn test_fetch_then_reuse_cache() {
        let dir = TempDir::new().unwrap();
        let cache = SnapshotCache::new(dir.path().join(DEFAULT_CACHE_FILE));
        let store = seeded_store();
        let root = path("/photos");

        let first = cache.load_or_fetch(&store, &root, false).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(cache.exists());
        let calls = store.stats().list_calls.load(Ordering::SeqCst);

        // New remote content is not seen while the cache is present.
        store.put_file(&path("/photos/c.jpg"), b"c", Utc::now());
        let second = cache.load_or_fetch(&store, &root, false).await.unwrap();
        assert_eq!(store.stats().list_calls.load(Ordering::SeqCst), calls);

        let mut a = first.clone();
        let mut b = second.clone();
        a.sort_by(|x, y| x.path.normalized().cmp(&y.path.normalized()));
        b.sort_by(|x, y| x.path.normalized().cmp(&y.path.normalized()));
        assert_eq!(a, b);

        let refreshed = cache.load_or_fetch(&store, &root, true).await.unwrap();
        assert_eq!(refreshed.len(), 3);
    }

    #[tokio::test]
    async fn test_listing_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = SnapshotCache::new(dir.path().join(DEFAULT_CACHE_FILE));
        let store = seeded_store();
        store.fail_listing(true);

        let err = cache.load_or_fetch(&store, &path("/photos"), false).await.unwrap_err();
        assert!(matches!(err, Error::Listing(_)));
        assert!(!cache.exists());
    }

    #[tokio::test]
    async fn test_other_root_is_relisted() {
        let dir = TempDir::new().unwrap();
        let cache = SnapshotCache::new(dir.path().join(DEFAULT_CACHE_FILE));
        let store = seeded_store();
        store.put_file(&path("/music/song.mp3"), b"s", Utc::now());

        cache.load_or_fetch(&store, &path("/photos"), false).await.unwrap();
        let music = cache.load_or_fetch(&store, &path("/music"), false).await.unwrap();
        assert_eq!(music.len(), 1);

        let (header, _) = cache.read().await.unwrap().unwrap();
        assert_eq!(header.root, path("/music"));
    }

    #[tokio::test]
    async fn test_truncated_cache_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = SnapshotCache::new(dir.path().join(DEFAULT_CACHE_FILE));
        let store = seeded_store();
        cache.load_or_fetch(&store, &path("/photos"), false).await.unwrap();

        let content = std::fs::read_to_string(cache.path()).unwrap();
        let truncated: Vec<&str> = content.lines().take(2).collect();
        std::fs::write(cache.path(), truncated.join("\n")).unwrap();

        let err = cache.read().await.unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[tokio::test]
    async fn test_invalidate() {
        let dir = TempDir::new().unwrap();
        let cache = SnapshotCache::new(dir.path().join(DEFAULT_CACHE_FILE));
        assert!(!cache.invalidate().await.unwrap());

        cache.write(&path("/photos"), &[]).await.unwrap();
        assert!(cache.exists());
        assert!(cache.invalidate().await.unwrap());
        assert!(!cache.exists());
    }
}
