//! Content-addressed storage for inline scripts and data payloads.

use std::path::{Path, PathBuf};

use crate::builder::errors::BuildError;
use crate::util::fs::write_with_mode;
use crate::util::hash::short_digest;

/// Directory below the build root holding blobs.
pub const BLOB_DIR: &str = "DATA";

/// Number of digest bytes naming a blob.
const BLOB_HASH_BYTES: usize = 16;

/// Writes blobs to `<build root>/DATA/<digest>`.
///
/// Identical contents and mode map to the same file, so writing is idempotent.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Create a store below the given build root.
    pub fn new(build_root: impl AsRef<Path>) -> Self {
        BlobStore {
            dir: build_root.as_ref().join(BLOB_DIR),
        }
    }

    /// Store `contents` with the given permissions and return the blob path.
    pub fn write(&self, contents: &[u8], mode: u32) -> Result<PathBuf, BuildError> {
        let mut keyed = format!("{:o}\0", mode).into_bytes();
        keyed.extend_from_slice(contents);
        let path = self.dir.join(short_digest(&keyed, BLOB_HASH_BYTES));

        if let Ok(existing) = std::fs::read(&path) {
            if existing == contents {
                tracing::debug!("blob {} up to date", path.display());
                return Ok(path);
            }
        }

        write_with_mode(&path, contents, mode).map_err(|source| BuildError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}
