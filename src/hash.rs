//! Content hashing: SHA-1 hex digests for object-store content addressing,
//! base64 digests for the `sha1_sum` metadata value, and the canonical
//! archive-content hash used by the `LambdaCode` directive.

use base64::Engine;
use sha1::{Digest, Sha1};

pub const HASH_METADATA_KEY: &str = "sha1_sum";

/// Lower-case hex SHA-1 digest of `bytes`. Used for content-addressed
/// object keys.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Base64 SHA-1 digest of `bytes`. Used for the `sha1_sum` object metadata
/// value — intentionally a different encoding than `sha1_hex`, preserving
/// the asymmetry called out in the external-interfaces contract.
pub fn sha1_base64(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// One file entry contributing to a canonical archive hash: its path
/// within the archive and its raw contents.
pub struct ArchiveEntry {
    pub path: String,
    pub contents: Vec<u8>,
}

/// Canonical archive-content hash (§4.2 LambdaCode / §6): entries sorted by
/// in-archive path; each contributes a big-endian u64 path length, the raw
/// path bytes, a big-endian u64 content length, and the raw content bytes.
/// Hashing this stream rather than the archive bytes keeps the key stable
/// across runs even though zip files embed timestamps.
pub fn canonical_archive_hash(entries: &mut [ArchiveEntry]) -> String {
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha1::new();
    for entry in entries.iter() {
        let path_bytes = entry.path.as_bytes();
        hasher.update((path_bytes.len() as u64).to_be_bytes());
        hasher.update(path_bytes);
        hasher.update((entry.contents.len() as u64).to_be_bytes());
        hasher.update(&entry.contents);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_hash_is_stable_under_entry_reordering() {
        let mut a = vec![
            ArchiveEntry { path: "b.js".into(), contents: b"2".to_vec() },
            ArchiveEntry { path: "a.js".into(), contents: b"1".to_vec() },
        ];
        let mut b = vec![
            ArchiveEntry { path: "a.js".into(), contents: b"1".to_vec() },
            ArchiveEntry { path: "b.js".into(), contents: b"2".to_vec() },
        ];
        assert_eq!(canonical_archive_hash(&mut a), canonical_archive_hash(&mut b));
    }

    #[test]
    fn canonical_hash_changes_with_content() {
        let mut a = vec![ArchiveEntry { path: "h.js".into(), contents: b"hi".to_vec() }];
        let mut b = vec![ArchiveEntry { path: "h.js".into(), contents: b"bye".to_vec() }];
        assert_ne!(canonical_archive_hash(&mut a), canonical_archive_hash(&mut b));
    }

    #[test]
    fn hex_and_base64_digests_differ_in_encoding_only() {
        let hex_digest = sha1_hex(b"hi");
        let b64_digest = sha1_base64(b"hi");
        let decoded = base64::engine::general_purpose::STANDARD.decode(b64_digest).unwrap();
        assert_eq!(hex::encode(decoded), hex_digest);
    }
}
