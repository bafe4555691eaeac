//! Common error types for PhotoPush.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for PhotoPush operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A local file could not be read while scanning the tree.
    #[error("Failed to scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Listing the remote tree failed; no snapshot was recorded.
    #[error("Remote listing failed: {0}")]
    Listing(String),

    /// Transient network failure talking to the remote store.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote store asked us to slow down.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The remote store refused the request (bad path, quota, ...).
    #[error("Rejected by remote store: {0}")]
    RemoteRejected(String),

    /// An upload session is no longer usable.
    #[error("Upload session expired: {0}")]
    SessionExpired(String),

    /// Credentials were missing or refused.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local files exist remotely under another path; uploading would
    /// duplicate them.
    #[error("Can't sync, {count} misplaced file(s) found; run `restructure` or move them manually")]
    MisplacedFiles { count: usize },

    /// A single file could not be uploaded.
    #[error("Upload of {path} failed after {attempts} attempt(s): {reason}")]
    UploadFailed {
        path: String,
        attempts: u32,
        reason: String,
    },

    /// Moving a local file into its remote-mirrored location failed.
    #[error("Can't move {} to {}: {reason}", from.display(), to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },
}

impl Error {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::RateLimited { .. } => true,
            Error::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Server-provided delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("reset".into()).is_transient());
        assert!(Error::RateLimited {
            message: "too_many_requests".into(),
            retry_after: None
        }
        .is_transient());
        assert!(Error::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).is_transient());

        assert!(!Error::RemoteRejected("path/malformed_path".into()).is_transient());
        assert!(!Error::Authentication("expired".into()).is_transient());
        assert!(!Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_transient());
    }

    #[test]
    fn test_retry_after_only_for_rate_limit() {
        let err = Error::RateLimited {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(Error::Network("x".into()).retry_after(), None);
    }
}
