//! Content fingerprints for change detection.

use xxhash_rust::xxh3::xxh3_128;

/// Compute XXH128 hash of a byte slice.
///
/// # Arguments
/// * `data` - Bytes to hash
///
/// # Returns
/// 32-character lowercase hex string (128 bits).
pub fn hash_bytes(data: &[u8]) -> String {
    let hash: u128 = xxh3_128(data);
    format!("{:032x}", hash)
}

/// Compute a coarse content fingerprint from file size and modification time.
///
/// Two stats with the same size and mtime produce the same fingerprint, so this
/// only detects change. It says nothing about integrity.
///
/// # Arguments
/// * `size` - File size in bytes
/// * `mtime_ms` - Modification time in milliseconds since epoch
///
/// # Returns
/// 32-character lowercase hex string.
pub fn approximate_content_hash(size: u64, mtime_ms: i64) -> String {
    let mut key: [u8; 16] = [0u8; 16];
    key[..8].copy_from_slice(&size.to_le_bytes());
    key[8..].copy_from_slice(&mtime_ms.to_le_bytes());
    hash_bytes(&key)
}
