use crate::core::fingerprint::{fingerprint_frame, Fingerprint, HashStrategy};
use crate::core::frame::{FrameSampler, FrameSource, VideoMetadata};
use crate::core::hash::ContentHash;
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The ordered per-frame fingerprints of one video. Replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSignature {
    pub path: PathBuf,
    /// File modification time in nanoseconds since the epoch, for cache invalidation.
    pub modified_ns: u64,
    pub strategy: HashStrategy,
    pub metadata: Option<VideoMetadata>,
    pub fingerprints: Vec<Fingerprint>,
}

impl VideoSignature {
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn content_hash(&self) -> ContentHash {
        let metadata = if self.strategy.checks_resolution() {
            self.metadata.as_ref()
        } else {
            None
        };
        ContentHash::compute(self.strategy, metadata, &self.fingerprints)
    }
}

/// A candidate video as handed to the detector by its producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub path: PathBuf,
    /// Creation time; the earliest member of a group is its representative.
    pub created: SystemTime,
}

impl VideoFile {
    pub fn new(path: impl Into<PathBuf>, created: SystemTime) -> Self {
        Self {
            path: path.into(),
            created,
        }
    }

    /// Reads the creation time, falling back to the modification time on
    /// filesystems without birth times, then to the epoch.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let created = fs::metadata(&path)
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .unwrap_or(UNIX_EPOCH);
        Self { path, created }
    }
}

pub fn modified_ns(path: &Path) -> io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0))
}

/// Frame sampler plus fingerprint extractor. A pure function of the file's contents.
pub struct SignatureExtractor {
    sampler: FrameSampler,
    strategy: HashStrategy,
    sample_count: usize,
}

impl SignatureExtractor {
    pub fn new(
        source: Arc<dyn FrameSource>,
        strategy: HashStrategy,
        sample_count: usize,
        min_file_size: u64,
    ) -> Self {
        Self {
            sampler: FrameSampler::new(source, sample_count, strategy.frame_size(), min_file_size),
            strategy,
            sample_count,
        }
    }

    pub fn strategy(&self) -> HashStrategy {
        self.strategy
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn extract(&self, path: &Path) -> Result<VideoSignature, DecodeError> {
        let sampled = self.sampler.sample(path)?;
        let modified_ns = modified_ns(path)?;

        let fingerprints = sampled
            .frames
            .iter()
            .map(|frame| fingerprint_frame(frame, self.strategy))
            .collect();

        Ok(VideoSignature {
            path: path.to_path_buf(),
            modified_ns,
            strategy: self.strategy,
            metadata: Some(sampled.metadata),
            fingerprints,
        })
    }
}
