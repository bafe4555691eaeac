//! Core sync engine that orchestrates all sync operations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use photopush_common::{Error, RemotePath, Result};
use photopush_storage::RemoteStore;

use crate::diff::{Confidence, Diff, StrictUploadSet};
use crate::record::{LocalFileRecord, RemoteFileRecord};
use crate::restructure::{RestructureReport, Restructurer};
use crate::retry::RetryConfig;
use crate::scanner::LocalScanner;
use crate::scheduler::{UploadReport, UploadScheduler, DEFAULT_CONCURRENCY};
use crate::snapshot::{SnapshotCache, DEFAULT_CACHE_FILE};
use crate::upload::{UploadJob, UploadOptions, Uploader};

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local tree to push.
    pub local_root: PathBuf,
    /// Remote folder mirroring `local_root`.
    pub remote_root: RemotePath,
    /// Base names ignored while scanning.
    pub skip_list: Vec<String>,
    /// Number of concurrent uploads.
    pub concurrency: usize,
    /// Remote snapshot cache location.
    pub cache_file: PathBuf,
    pub retry: RetryConfig,
    pub upload: UploadOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("."),
            remote_root: RemotePath::root(),
            skip_list: vec![".DS_Store".to_string()],
            concurrency: DEFAULT_CONCURRENCY,
            cache_file: PathBuf::from(DEFAULT_CACHE_FILE),
            retry: RetryConfig::default(),
            upload: UploadOptions::default(),
        }
    }
}

/// Both sides of the tree as last observed.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub locals: Vec<LocalFileRecord>,
    pub remotes: Vec<RemoteFileRecord>,
}

/// Counts describing how far apart the two trees are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub local_files: usize,
    pub remote_files: usize,
    pub to_upload: usize,
    pub upload_bytes: u64,
    pub already_synced: usize,
    pub mismatched: usize,
    pub misplaced: usize,
    pub ambiguous: usize,
}

/// Result of an upload pass.
#[derive(Debug)]
pub struct UploadSummary {
    /// What the diff asked for.
    pub plan: StrictUploadSet,
    /// `None` for a dry run.
    pub report: Option<UploadReport>,
}

impl UploadSummary {
    pub fn is_success(&self) -> bool {
        self.report.as_ref().map_or(true, UploadReport::is_success)
    }
}

/// Main engine pushing a local tree into a remote store.
pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    scanner: LocalScanner,
    cache: SnapshotCache,
    config: SyncConfig,
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(store: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        let scanner = LocalScanner::new(&config.local_root, config.skip_list.clone());
        let cache = SnapshotCache::new(&config.cache_file);
        Self {
            store,
            scanner,
            cache,
            config,
        }
    }

    /// Get configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get the snapshot cache.
    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Scan the local tree and load the remote snapshot.
    pub async fn load(&self, refresh: bool) -> Result<SyncState> {
        let locals = self.scan_local().await?;
        let remotes = self
            .cache
            .load_or_fetch(self.store.as_ref(), &self.config.remote_root, refresh)
            .await?;
        Ok(SyncState { locals, remotes })
    }

    /// Hashing reads every local file, so the scan runs on the blocking pool.
    async fn scan_local(&self) -> Result<Vec<LocalFileRecord>> {
        let scanner = self.scanner.clone();
        tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    fn diff<'a>(&self, state: &'a SyncState) -> Diff<'a> {
        Diff::new(
            &self.config.local_root,
            &self.config.remote_root,
            &state.locals,
            &state.remotes,
        )
    }

    /// Populate the snapshot cache and summarize the differences.
    pub async fn prefetch(&self, refresh: bool) -> Result<DiffSummary> {
        let state = self.load(refresh).await?;
        let diff = self.diff(&state);
        let plan = diff.strict_upload_set();
        let misplaced = diff.misplaced();

        let summary = DiffSummary {
            local_files: state.locals.len(),
            remote_files: state.remotes.len(),
            to_upload: plan.uploads.len(),
            upload_bytes: plan.upload_bytes(),
            already_synced: plan.already_synced,
            mismatched: plan.mismatches.len(),
            misplaced: misplaced.len(),
            ambiguous: misplaced
                .iter()
                .filter(|m| m.confidence() == Confidence::Ambiguous)
                .count(),
        };
        info!(
            "{} local, {} remote; {} to upload ({} bytes), {} misplaced",
            summary.local_files,
            summary.remote_files,
            summary.to_upload,
            summary.upload_bytes,
            summary.misplaced
        );
        Ok(summary)
    }

    /// Upload every local file missing at its mirrored remote path.
    ///
    /// Refuses to start while misplaced files exist. The snapshot cache is
    /// dropped only when every upload succeeded.
    pub async fn upload(&self, dry_run: bool) -> Result<UploadSummary> {
        let state = self.load(false).await?;
        let diff = self.diff(&state);

        let misplaced = diff.misplaced();
        if !misplaced.is_empty() {
            for entry in &misplaced {
                for candidate in &entry.candidates {
                    warn!(
                        "{} is already stored at {}",
                        entry.local.path.display(),
                        candidate.path
                    );
                }
            }
            return Err(Error::MisplacedFiles {
                count: misplaced.len(),
            });
        }

        let plan = diff.strict_upload_set();
        if dry_run {
            for local in &plan.uploads {
                info!("Would upload {} ({} bytes)", local.relative, local.size);
            }
            return Ok(UploadSummary { plan, report: None });
        }

        let mut jobs = Vec::with_capacity(plan.uploads.len());
        let mut unmappable = Vec::new();
        for local in plan.uploads.iter().cloned() {
            let path = local.path.display().to_string();
            match UploadJob::mirrored(local, &self.config.remote_root) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    error!("Can't build a remote path for {}: {}", path, e);
                    unmappable.push(Error::UploadFailed {
                        path,
                        attempts: 0,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let scheduler = UploadScheduler::new(
            Uploader::new(self.store.clone(), self.config.upload),
            self.config.retry.clone(),
            self.config.concurrency,
        );
        let mut report = scheduler.run(jobs).await;
        report.scheduled += unmappable.len();
        report.failed.extend(unmappable);

        if report.is_success() {
            self.cache.invalidate().await?;
        } else {
            warn!(
                "Keeping snapshot cache {}: {} of {} uploads failed",
                self.cache.path().display(),
                report.failed.len() + report.lost(),
                report.scheduled
            );
        }

        Ok(UploadSummary {
            plan,
            report: Some(report),
        })
    }

    /// Move misplaced local files to the paths their remote copies use,
    /// then rescan.
    pub async fn restructure(&self) -> Result<RestructureReport> {
        let state = self.load(false).await?;
        let misplaced = self.diff(&state).misplaced();
        if misplaced.is_empty() {
            info!("Nothing to restructure");
            return Ok(RestructureReport::default());
        }

        let report = Restructurer::new(&self.config.local_root, self.config.remote_root.clone())
            .apply(&misplaced)?;

        let rescanned = SyncState {
            locals: self.scan_local().await?,
            remotes: state.remotes,
        };
        let remaining = self.diff(&rescanned).misplaced().len();
        if remaining > 0 {
            warn!("{} misplaced files remain after restructuring", remaining);
        }
        Ok(report)
    }

    /// Drop the snapshot cache so the next run lists the remote again.
    pub async fn clean_cache(&self) -> Result<bool> {
        self.cache.invalidate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use photopush_storage::{Fault, MemoryStore};
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        local: PathBuf,
        store: Arc<MemoryStore>,
        engine: SyncEngine,
    }

    fn remote(p: &str) -> RemotePath {
        RemotePath::parse(p).unwrap()
    }

    fn write(root: &Path, relative: &str, data: &[u8]) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local");
        std::fs::create_dir(&local).unwrap();

        let store = Arc::new(MemoryStore::new().with_page_size(2));
        store.create_folder(&remote("/photos"));

        let config = SyncConfig {
            local_root: local.clone(),
            remote_root: remote("/photos"),
            cache_file: dir.path().join("snapshot"),
            concurrency: 2,
            retry: RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(4))
                .with_jitter(0.0),
            ..SyncConfig::default()
        };
        let engine = SyncEngine::new(store.clone(), config);

        Fixture {
            _dir: dir,
            local,
            store,
            engine,
        }
    }

    #[tokio::test]
    async fn test_upload_pushes_missing_and_drops_cache() {
        let f = fixture();
        write(&f.local, "a.jpg", b"a");
        write(&f.local, "2020/b.jpg", b"bb");
        write(&f.local, ".DS_Store", b"junk");
        f.store.put_file(&remote("/photos/a.jpg"), b"a", Utc::now());

        let summary = f.engine.upload(false).await.unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.plan.already_synced, 1);
        assert_eq!(summary.plan.uploads.len(), 1);
        assert_eq!(f.store.read(&remote("/photos/2020/b.jpg")).unwrap(), b"bb");
        assert!(f.store.read(&remote("/photos/.DS_Store")).is_none());
        assert!(!f.engine.cache().exists());
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_cache() {
        let f = fixture();
        write(&f.local, "a.jpg", b"a");
        write(&f.local, "b.jpg", b"b");
        f.store.fail_writes(&remote("/photos/b.jpg"), 10, Fault::Network);

        f.engine.prefetch(false).await.unwrap();
        let cached = std::fs::read(f.engine.cache().path()).unwrap();

        let summary = f.engine.upload(false).await.unwrap();

        assert!(!summary.is_success());
        assert_eq!(std::fs::read(f.engine.cache().path()).unwrap(), cached);
        assert!(f.store.read(&remote("/photos/a.jpg")).is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unmappable_name_fails_only_that_file() {
        let f = fixture();
        write(&f.local, "a\\b.jpg", b"odd");
        write(&f.local, "c.jpg", b"c");

        let summary = f.engine.upload(false).await.unwrap();
        let report = summary.report.as_ref().unwrap();

        assert!(!summary.is_success());
        assert_eq!(report.scheduled, 2);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            &report.failed[0],
            Error::UploadFailed { path, .. } if path.ends_with("a\\b.jpg")
        ));
        assert!(f.store.read(&remote("/photos/c.jpg")).is_some());
        assert!(f.engine.cache().exists());
    }

    #[tokio::test]
    async fn test_misplaced_files_block_upload() {
        let f = fixture();
        write(&f.local, "x.jpg", b"pixels");
        write(&f.local, "new.jpg", b"new");
        f.store.put_file(&remote("/photos/2021/x.jpg"), b"pixels", Utc::now());

        let err = f.engine.upload(false).await.unwrap_err();

        assert!(matches!(err, Error::MisplacedFiles { count: 1 }));
        assert_eq!(f.store.stats().small_uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dry_run_uploads_nothing() {
        let f = fixture();
        write(&f.local, "a.jpg", b"a");

        let summary = f.engine.upload(true).await.unwrap();

        assert!(summary.report.is_none());
        assert_eq!(summary.plan.uploads.len(), 1);
        assert_eq!(f.store.file_count(), 0);
        assert!(f.engine.cache().exists());
    }

    #[tokio::test]
    async fn test_restructure_then_upload() {
        let f = fixture();
        write(&f.local, "x.jpg", b"pixels");
        write(&f.local, "new.jpg", b"new");
        f.store.put_file(&remote("/photos/2021/x.jpg"), b"pixels", Utc::now());

        let report = f.engine.restructure().await.unwrap();
        assert_eq!(report.moved.len(), 1);
        assert!(f.local.join("2021").join("x.jpg").is_file());

        let summary = f.engine.upload(false).await.unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.plan.uploads.len(), 1);
        assert_eq!(summary.plan.uploads[0].relative, "new.jpg");
    }

    #[tokio::test]
    async fn test_prefetch_summary() {
        let f = fixture();
        write(&f.local, "a.jpg", b"a");
        write(&f.local, "b.jpg", b"changed");
        write(&f.local, "c.jpg", b"c");
        f.store.put_file(&remote("/photos/a.jpg"), b"a", Utc::now());
        f.store.put_file(&remote("/photos/b.jpg"), b"original", Utc::now());

        let summary = f.engine.prefetch(false).await.unwrap();

        assert_eq!(summary.local_files, 3);
        assert_eq!(summary.remote_files, 2);
        assert_eq!(summary.to_upload, 1);
        assert_eq!(summary.upload_bytes, 1);
        assert_eq!(summary.already_synced, 1);
        assert_eq!(summary.mismatched, 1);
        assert_eq!(summary.misplaced, 0);
        assert!(f.engine.cache().exists());

        assert!(f.engine.clean_cache().await.unwrap());
        assert!(!f.engine.clean_cache().await.unwrap());
    }
}
