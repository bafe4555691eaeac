//! Block-wise content hash compatible with the remote store's `content_hash`.
//!
//! The input is split into fixed 4 MiB blocks, each block is hashed with
//! SHA-256, the block digests are concatenated in order and the
//! concatenation is hashed once more. Block boundaries depend only on the
//! byte offset, never on how the caller feeds the data in.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Size of a hashing block.
pub const BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Read buffer used by [`hash_reader`].
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental content hasher.
#[derive(Clone, Default)]
pub struct ContentHasher {
    overall: Sha256,
    block: Sha256,
    block_len: usize,
}

impl ContentHasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes.
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.block_len == BLOCK_SIZE {
                self.flush_block();
            }
            let take = (BLOCK_SIZE - self.block_len).min(data.len());
            self.block.update(&data[..take]);
            self.block_len += take;
            data = &data[take..];
        }
    }

    fn flush_block(&mut self) {
        let digest = std::mem::take(&mut self.block).finalize();
        self.overall.update(digest);
        self.block_len = 0;
    }

    /// Finish and return the lowercase hex digest.
    pub fn finalize(mut self) -> String {
        if self.block_len > 0 {
            self.flush_block();
        }
        hex::encode(self.overall.finalize())
    }
}

/// Hash everything readable from `reader`.
pub fn hash_reader(mut reader: impl Read) -> std::io::Result<String> {
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Hash the file at `path`.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    hash_reader(File::open(path)?)
}
