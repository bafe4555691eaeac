//! Common utilities and types shared across PhotoPush modules.
//!
//! This module provides the error taxonomy, the remote path type and the
//! block-wise content hasher used to compare local and remote files
//! without transferring them.

pub mod error;
pub mod hash;
pub mod types;

pub use error::{Error, Result};
pub use hash::{hash_file, hash_reader, ContentHasher, BLOCK_SIZE};
pub use types::RemotePath;
