use crate::core::fingerprint::HashStrategy;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on the default worker count, regardless of core count.
pub const MAX_DEFAULT_WORKERS: usize = 16;

/// Files smaller than this are treated as truncated downloads.
pub const DEFAULT_MIN_FILE_SIZE: u64 = 10_000;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Similarity cutoff in [0, 1]; pairs scoring at or above it are duplicates.
    pub threshold: f64,
    pub sample_count: usize,
    pub worker_count: usize,
    pub cache_retention: Duration,
    pub strategy: HashStrategy,
    pub min_file_size: u64,
    pub quick_positions: usize,
    pub quick_frame_threshold: f64,
    pub quick_gate: f64,
    pub min_fingerprints: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            sample_count: 10,
            worker_count: default_worker_count(),
            cache_retention: DEFAULT_RETENTION,
            strategy: HashStrategy::Combined,
            min_file_size: DEFAULT_MIN_FILE_SIZE,
            quick_positions: 5,
            quick_frame_threshold: 0.85,
            quick_gate: 0.7,
            min_fingerprints: 3,
        }
    }
}

impl DetectorConfig {
    /// Reject configurations that would make the run meaningless. Called before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Threshold(self.threshold));
        }
        if self.sample_count == 0 {
            return Err(ConfigError::SampleCount);
        }
        if self.worker_count == 0 {
            return Err(ConfigError::WorkerCount);
        }
        if self.quick_positions == 0 {
            return Err(ConfigError::QuickPositions);
        }
        for (name, value) in [
            ("quick_frame_threshold", self.quick_frame_threshold),
            ("quick_gate", self.quick_gate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Ratio { name, value });
            }
        }
        Ok(())
    }

    /// Replace the retention window with a whole number of days; `None` keeps the current one.
    pub fn with_retention_days(mut self, days: Option<u64>) -> Self {
        if let Some(days) = days {
            self.cache_retention = Duration::from_secs(days * 24 * 3600);
        }
        self
    }

    /// Edge length of the normalized square frames handed to the fingerprinter.
    pub fn frame_size(&self) -> u32 {
        self.strategy.frame_size()
    }
}

pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, MAX_DEFAULT_WORKERS)
}

/// `<cache dir>/viddup/signatures`, or `./.video_cache` when the platform has no cache dir.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("viddup").join("signatures"))
        .unwrap_or_else(|| PathBuf::from(".video_cache"))
}

/// Accepts either a ratio (`0.9`) or a percentage (`90`).
pub fn parse_threshold(raw: f64) -> f64 {
    if raw > 1.0 { raw / 100.0 } else { raw }
}
