//! Content addressing for uploads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// BLAKE3 digest of the raw bytes of an upload, as lowercase hex.
///
/// Only the bytes feed the digest. File name, MIME type and any later
/// transcoding have no influence on it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(data);
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex characters, for logs and responses.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_hex_256_bit() {
        let hash = ContentHash::of(b"hello");
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash.short().len(), 8);
    }

    #[test]
    fn test_hash_depends_only_on_bytes() {
        let a = ContentHash::of(b"\x89PNG same bytes");
        let b = ContentHash::of(b"\x89PNG same bytes");
        assert_eq!(a, b);
        assert_ne!(a, ContentHash::of(b"\x89PNG other bytes"));
    }

    #[test]
    fn test_hash_matches_blake3() {
        let hash = ContentHash::of(b"abc");
        assert_eq!(hash.as_str(), blake3::hash(b"abc").to_hex().as_str());
    }
}
