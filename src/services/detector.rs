use crate::config::DetectorConfig;
use crate::core::compare::Comparator;
use crate::core::duplicate::{cluster, DuplicateGroup, IndexedVideo};
use crate::core::frame::FrameSource;
use crate::core::signature::{SignatureExtractor, VideoFile};
use crate::error::{CacheError, DetectError};
use crate::services::cache::{CacheStats, SignatureCache, SignatureStore};
use indicatif::ProgressBar;
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A video that produced no signature, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedVideo {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    pub groups: Vec<DuplicateGroup>,
    pub skipped: Vec<SkippedVideo>,
    /// Number of videos that were fingerprinted (from cache or freshly).
    pub indexed: usize,
    pub cancelled: bool,
    pub cache: CacheStats,
    pub fingerprint_time: Duration,
    pub cluster_time: Duration,
}

impl DetectionReport {
    pub fn duplicate_count(&self) -> usize {
        self.groups.iter().map(|g| g.duplicates().len()).sum()
    }
}

/// Runs the full pipeline: parallel fingerprinting through the cache, then
/// sequential clustering.
pub struct Detector {
    config: DetectorConfig,
    cache: SignatureCache,
    comparator: Comparator,
    cancellation_token: Arc<AtomicBool>,
    progress: ProgressBar,
}

impl Detector {
    pub fn new(
        config: DetectorConfig,
        source: Arc<dyn FrameSource>,
        store: Arc<dyn SignatureStore>,
    ) -> Result<Self, DetectError> {
        config.validate()?;

        let extractor = SignatureExtractor::new(
            source,
            config.strategy,
            config.sample_count,
            config.min_file_size,
        );
        Ok(Self {
            comparator: Comparator::from_config(&config),
            cache: SignatureCache::new(store, extractor),
            config,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            progress: ProgressBar::hidden(),
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    /// Drop cache entries older than the configured retention window.
    pub fn prune_cache(&self) -> Result<usize, CacheError> {
        let removed = self.cache.prune(self.config.cache_retention)?;
        info!(
            "Pruned {} cache entries older than {:?}",
            removed, self.config.cache_retention
        );
        Ok(removed)
    }

    pub fn clear_cache(&self) -> Result<usize, CacheError> {
        self.cache.clear()
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::Relaxed)
    }

    /// Fingerprint every video and group the duplicates.
    ///
    /// Per-video decode failures never abort the run; they are returned in
    /// [`DetectionReport::skipped`]. Cancellation is cooperative: pending
    /// videos are skipped and clustering stops between founders, so the
    /// groups in a cancelled report are complete but possibly few.
    pub fn detect(&self, videos: Vec<VideoFile>) -> Result<DetectionReport, DetectError> {
        if self.is_cancelled() {
            return Err(DetectError::Cancelled);
        }

        let videos = dedup_paths(videos);
        let mut report = DetectionReport::default();

        let start = Instant::now();
        let (indexed, skipped) = self.fingerprint_all(videos)?;
        report.fingerprint_time = start.elapsed();
        report.indexed = indexed.len();
        report.skipped = skipped;
        info!(
            "Fingerprinted {} videos ({} skipped) in {:.2?}",
            report.indexed,
            report.skipped.len(),
            report.fingerprint_time
        );

        if self.is_cancelled() {
            report.cancelled = true;
            report.cache = self.cache.stats();
            return Ok(report);
        }

        let start = Instant::now();
        let clustering = cluster(
            &indexed,
            self.config.threshold,
            &self.comparator,
            &self.cancellation_token,
        );
        report.cluster_time = start.elapsed();
        report.groups = clustering.groups;
        report.cancelled = clustering.cancelled;
        report.cache = self.cache.stats();
        info!(
            "Found {} duplicate groups in {:.2?}",
            report.groups.len(),
            report.cluster_time
        );

        Ok(report)
    }

    fn fingerprint_all(
        &self,
        videos: Vec<VideoFile>,
    ) -> Result<(Vec<IndexedVideo>, Vec<SkippedVideo>), DetectError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_count)
            .build()?;

        self.progress.set_length(videos.len() as u64);

        // one task per video; `collect` keeps input order regardless of completion order
        let results: Vec<Option<Result<IndexedVideo, SkippedVideo>>> = pool.install(|| {
            videos
                .into_par_iter()
                .map(|file| {
                    if self.is_cancelled() {
                        return None;
                    }
                    let result = match self.cache.get_or_compute(&file.path) {
                        Ok(signature) => Ok(IndexedVideo { file, signature }),
                        Err(e) => {
                            warn!("Skipping {}: {}", file.path.display(), e);
                            Err(SkippedVideo {
                                path: file.path,
                                reason: e.to_string(),
                            })
                        }
                    };
                    self.progress.inc(1);
                    Some(result)
                })
                .collect()
        });

        self.progress.finish_and_clear();

        let mut indexed = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for result in results.into_iter().flatten() {
            match result {
                Ok(video) => indexed.push(video),
                Err(skip) => skipped.push(skip),
            }
        }
        Ok((indexed, skipped))
    }
}

/// Keep the first occurrence of every path so no two workers share a cache key.
fn dedup_paths(videos: Vec<VideoFile>) -> Vec<VideoFile> {
    let mut seen = HashSet::new();
    videos
        .into_iter()
        .filter(|v| seen.insert(v.path.clone()))
        .collect()
}
