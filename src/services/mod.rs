pub mod cache;
pub mod detector;
pub mod scanner;

pub use cache::{CacheStats, DirStore, MemoryStore, SignatureCache, SignatureStore};
pub use detector::{DetectionReport, Detector, SkippedVideo};
pub use scanner::VideoScanner;
