//! Near-duplicate video detection.
//!
//! Videos are reduced to short sequences of perceptual frame fingerprints,
//! compared pairwise by mean per-frame Hamming similarity, and grouped by
//! founder-based single linkage with the earliest-created member as the
//! representative.

pub mod config;
pub mod core;
pub mod error;
pub mod services;

pub use config::DetectorConfig;
pub use self::core::{
    Comparator, DuplicateGroup, FfmpegSource, Fingerprint, FrameSource, GroupMember, HashStrategy,
    ReportRow, VideoFile, VideoMetadata, VideoSignature,
};
pub use error::{CacheError, ConfigError, DecodeError, DetectError, ScanError};
pub use services::{DetectionReport, Detector, DirStore, MemoryStore, SignatureCache, VideoScanner};
