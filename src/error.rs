use std::path::PathBuf;
use thiserror::Error;

/// A single video could not be turned into a signature. Never fatal to a run.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("File not found: {path}")]
    Missing { path: PathBuf },

    #[error("File too small ({size} bytes, minimum {min}): {path}")]
    TooSmall { path: PathBuf, size: u64, min: u64 },

    #[error("Invalid container metadata for {path}: {message}")]
    InvalidMetadata { path: PathBuf, message: String },

    #[error("Probe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Decode failed for {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("No usable frames in {path}")]
    NoFrames { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while reading or writing the signature store. Treated as a cache miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt cache record: {message}")]
    Corrupt { message: String },
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: PathBuf },

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Threshold must be within [0, 1], got {0}")]
    Threshold(f64),

    #[error("Sample count must be positive")]
    SampleCount,

    #[error("Worker count must be positive")]
    WorkerCount,

    #[error("Quick-compare positions must be positive")]
    QuickPositions,

    #[error("{name} must be within [0, 1], got {value}")]
    Ratio { name: &'static str, value: f64 },
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Operation cancelled")]
    Cancelled,
}
