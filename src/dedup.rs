//! Content-Hash Dedup Policy (§4.5).
//!
//! `content_hash` is computed exactly once, by the fetcher, from the
//! normalized fetched bytes. It is the sole idempotency key between persist
//! and index, and the sole cache key for the cleaner's skip path. Nothing
//! downstream may recompute it from `clean_content` - mutating
//! `clean_content` must never change the hash.

use sha2::{Digest, Sha256};

/// Normalize then hash fetched content bytes into a stable hex digest.
///
/// Normalization here is limited to stripping trailing whitespace per line
/// and collapsing line endings to `\n`, which keeps the hash stable across
/// refetches of semantically identical bytes that differ only in
/// incidental whitespace (a common source of false "edit" detections).
pub fn compute_content_hash(raw: &[u8]) -> String {
    let normalized = normalize(raw);
    let mut hasher = Sha256::new();
    hasher.update(&normalized);
    hex::encode(hasher.finalize())
}

fn normalize(raw: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(raw);
    text.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_hash_identically() {
        let a = compute_content_hash(b"hello world\n");
        let b = compute_content_hash(b"hello world\n");
        assert_eq!(a, b);
    }

    #[test]
    fn trailing_whitespace_does_not_change_hash() {
        let a = compute_content_hash(b"hello world\n");
        let b = compute_content_hash(b"hello world   \n");
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_hashes_differently() {
        let a = compute_content_hash(b"version one");
        let b = compute_content_hash(b"version two");
        assert_ne!(a, b);
    }
}
