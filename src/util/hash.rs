//! Hashing utilities for configuration hashes and content-addressed blobs.

use sha2::{Digest, Sha256};

/// Upper-case hex digest of the first `len` bytes of the SHA256 of `data`.
///
/// `len` is clamped to the digest size.
pub fn short_digest(data: &[u8], len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let len = len.min(digest.len());
    hex::encode_upper(&digest[..len])
}
