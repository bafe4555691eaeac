//! PhotoPush Sync Engine
//!
//! Pushes a local photo tree into a remote store:
//! - Block-hash scanning of the local tree
//! - Cached snapshot of the remote tree
//! - Path-mirrored diff and misplaced-file detection
//! - Bounded concurrent uploads with exponential backoff
//! - Local restructuring to match the remote layout

pub mod diff;
pub mod engine;
pub mod record;
pub mod restructure;
pub mod retry;
pub mod scanner;
pub mod scheduler;
pub mod snapshot;
pub mod upload;

// Re-export main types
pub use diff::{Confidence, ContentMismatch, Diff, MisplacedFile, StrictUploadSet};
pub use engine::{DiffSummary, SyncConfig, SyncEngine, SyncState, UploadSummary};
pub use record::{LocalFileRecord, RemoteFileRecord};
pub use restructure::{RestructureReport, Restructurer};
pub use retry::{RetryConfig, RetryError, RetryExecutor};
pub use scanner::LocalScanner;
pub use scheduler::{UploadReport, UploadScheduler, DEFAULT_CONCURRENCY};
pub use snapshot::{SnapshotCache, SnapshotHeader, DEFAULT_CACHE_FILE};
pub use upload::{chunk_ranges, UploadJob, UploadOptions, UploadStrategy, Uploader};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let config = SyncConfig::default();
        assert_eq!(config.skip_list, vec![".DS_Store".to_string()]);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.retry, RetryConfig::default());
        let _options = UploadOptions::default();
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let json = r#"{"remote_root": "/Photos", "concurrency": 8}"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.remote_root.to_string(), "/Photos");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.skip_list, vec![".DS_Store".to_string()]);
    }
}
