//! Remote store abstraction for PhotoPush.
//!
//! This module provides a trait-based interface for the remote object store
//! the local tree is pushed to, an in-memory implementation for tests and a
//! Dropbox implementation for real use.
//!
//! # Design Principles
//! - Transport isolation: no HTTP or API specifics leak into the sync engine
//! - Async operations: all remote I/O is async
//! - Unified error semantics: transient vs terminal failures map onto the
//!   same error kinds for every store

pub mod dropbox;
pub mod memory;
pub mod provider;

pub use dropbox::{DropboxConfig, DropboxStore};
pub use memory::{Fault, MemoryStore};
pub use provider::{
    list_folder_recursive, CommitInfo, FileMetadata, FolderMetadata, ListPage, RemoteEntry,
    RemoteStore, SessionId, WriteMode,
};
