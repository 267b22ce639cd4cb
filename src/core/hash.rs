use crate::core::fingerprint::{Fingerprint, HashStrategy};
use crate::core::frame::VideoMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Stable, filesystem-safe key derived from a video's path string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_path(path: &Path) -> Self {
        let hash = blake3::hash(path.to_string_lossy().as_bytes());
        CacheKey(hash.to_hex().to_string())
    }

    /// Rebuild a key from a stored file stem; rejects anything that is not 64 hex digits.
    pub fn from_hex(hex: &str) -> Option<Self> {
        (hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| CacheKey(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of everything comparison looks at. Equal digests mean the comparator
/// would score the pair 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn compute(
        strategy: HashStrategy,
        metadata: Option<&VideoMetadata>,
        fingerprints: &[Fingerprint],
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[strategy as u8]);
        if let Some(meta) = metadata {
            hasher.update(&meta.width.to_le_bytes());
            hasher.update(&meta.height.to_le_bytes());
        }
        hasher.update(&(fingerprints.len() as u64).to_le_bytes());
        for fingerprint in fingerprints {
            hasher.update(&fingerprint.len().to_le_bytes());
            hasher.update(&fingerprint.to_bytes());
        }
        ContentHash(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
