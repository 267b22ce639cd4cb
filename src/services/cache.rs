//! Read-through / write-through signature cache.
//!
//! Records are addressed by a hash of the video path and invalidated by the
//! file's modification time. Any unreadable, corrupt or outdated record is a
//! miss, never an error.

use crate::core::fingerprint::{Fingerprint, HashStrategy};
use crate::core::frame::VideoMetadata;
use crate::core::hash::CacheKey;
use crate::core::signature::{modified_ns, SignatureExtractor, VideoSignature};
use crate::error::{CacheError, DecodeError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Bumped whenever the fingerprint scheme or record layout changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub version: u32,
    pub strategy: HashStrategy,
    pub sample_count: usize,
    pub modified_ns: u64,
    pub metadata: Option<VideoMetadata>,
    pub fingerprints: Vec<Fingerprint>,
}

impl CacheRecord {
    /// A record that parses but could not have been written by an extractor
    /// with this strategy and sample count.
    pub fn is_valid(&self, strategy: HashStrategy, sample_count: usize) -> bool {
        !self.fingerprints.is_empty()
            && self.fingerprints.len() <= sample_count
            && self
                .fingerprints
                .iter()
                .all(|f| f.len() == strategy.bits() && f.is_well_formed())
    }
}

/// Persistence behind the cache. Implementations must tolerate concurrent
/// calls for distinct keys.
pub trait SignatureStore: Send + Sync {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    fn save(&self, key: &CacheKey, payload: &[u8]) -> Result<(), CacheError>;

    /// Delete entries last written more than `older_than` ago; returns how many were removed.
    fn prune(&self, older_than: Duration) -> Result<usize, CacheError>;

    fn clear(&self) -> Result<usize, CacheError>;

    fn len(&self) -> Result<usize, CacheError>;
}

/// One JSON file per key inside a directory.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl DirStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{}", key, RECORD_EXTENSION))
    }

    fn records(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_record = path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
                && path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(CacheKey::from_hex)
                    .is_some();
            if is_record {
                records.push(path);
            }
        }
        Ok(records)
    }
}

impl SignatureStore for DirStore {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        match fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &CacheKey, payload: &[u8]) -> Result<(), CacheError> {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(format!("{}.{}-{}.tmp", key, std::process::id(), n));
        fs::write(&tmp, payload)?;
        // rename is atomic, so readers never observe a half-written record
        if let Err(e) = fs::rename(&tmp, self.record_path(key)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn prune(&self, older_than: Duration) -> Result<usize, CacheError> {
        let now = SystemTime::now();
        let mut removed = 0;
        for path in self.records()? {
            let expired = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(|written| now.duration_since(written).unwrap_or_default() > older_than)
                .unwrap_or(false);
            if expired {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove cache entry {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.records()? {
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.records()?.len())
    }
}

/// Ephemeral store for tests and `--no-cache` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<CacheKey, (Vec<u8>, SystemTime)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with an explicit write time.
    #[cfg(test)]
    fn insert_at(&self, key: CacheKey, payload: Vec<u8>, written: SystemTime) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (payload, written));
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<CacheKey, (Vec<u8>, SystemTime)>>, CacheError>
    {
        self.entries.lock().map_err(|_| CacheError::Corrupt {
            message: "memory store lock poisoned".to_string(),
        })
    }
}

impl SignatureStore for MemoryStore {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.lock()?.get(key).map(|(payload, _)| payload.clone()))
    }

    fn save(&self, key: &CacheKey, payload: &[u8]) -> Result<(), CacheError> {
        self.lock()?
            .insert(key.clone(), (payload.to_vec(), SystemTime::now()));
        Ok(())
    }

    fn prune(&self, older_than: Duration) -> Result<usize, CacheError> {
        let now = SystemTime::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, (_, written)| now.duration_since(*written).unwrap_or_default() <= older_than);
        Ok(before - entries.len())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = self.lock()?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.lock()?.len())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub store_errors: usize,
}

/// Explicit cache handle owned by the caller and passed to the detector.
pub struct SignatureCache {
    store: Arc<dyn SignatureStore>,
    extractor: SignatureExtractor,
    write_lock: Mutex<()>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    store_errors: AtomicUsize,
}

impl SignatureCache {
    pub fn new(store: Arc<dyn SignatureStore>, extractor: SignatureExtractor) -> Self {
        Self {
            store,
            extractor,
            write_lock: Mutex::new(()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            store_errors: AtomicUsize::new(0),
        }
    }

    pub fn get_or_compute(&self, path: &Path) -> Result<VideoSignature, DecodeError> {
        let current = modified_ns(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                DecodeError::Missing {
                    path: path.to_path_buf(),
                }
            } else {
                DecodeError::Io(e)
            }
        })?;
        let key = CacheKey::for_path(path);

        if let Some(signature) = self.lookup(&key, path, current) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("cache hit for {}", path.display());
            return Ok(signature);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("cache miss for {}", path.display());

        let signature = self.extractor.extract(path)?;
        self.persist(&key, &signature);
        Ok(signature)
    }

    fn lookup(&self, key: &CacheKey, path: &Path, current_ns: u64) -> Option<VideoSignature> {
        let bytes = match self.store.load(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Cache read failed for {}: {}", path.display(), e);
                return None;
            }
        };

        let record: CacheRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring corrupt cache record for {}: {}", path.display(), e);
                return None;
            }
        };

        let strategy = self.extractor.strategy();
        let sample_count = self.extractor.sample_count();
        if record.strategy == strategy && !record.is_valid(strategy, sample_count) {
            warn!("Ignoring malformed cache record for {}", path.display());
            return None;
        }

        let fresh = record.version == CACHE_FORMAT_VERSION
            && record.strategy == strategy
            && record.sample_count == sample_count
            && record.modified_ns == current_ns;
        if !fresh {
            debug!("stale cache record for {}", path.display());
            return None;
        }

        Some(VideoSignature {
            path: path.to_path_buf(),
            modified_ns: record.modified_ns,
            strategy: record.strategy,
            metadata: record.metadata,
            fingerprints: record.fingerprints,
        })
    }

    fn persist(&self, key: &CacheKey, signature: &VideoSignature) {
        let record = CacheRecord {
            version: CACHE_FORMAT_VERSION,
            strategy: signature.strategy,
            sample_count: self.extractor.sample_count(),
            modified_ns: signature.modified_ns,
            metadata: signature.metadata.clone(),
            fingerprints: signature.fingerprints.clone(),
        };

        let result = serde_json::to_vec(&record)
            .map_err(CacheError::from)
            .and_then(|payload| {
                let _guard = self.write_lock.lock().map_err(|_| CacheError::Corrupt {
                    message: "cache write lock poisoned".to_string(),
                })?;
                self.store.save(key, &payload)
            });

        if let Err(e) = result {
            self.store_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Cache write failed for {}: {}",
                signature.path.display(),
                e
            );
        }
    }

    /// Housekeeping: drop entries older than `retention`. Not used on the hot path.
    pub fn prune(&self, retention: Duration) -> Result<usize, CacheError> {
        let removed = self.store.prune(retention)?;
        debug!("pruned {} cache entries", removed);
        Ok(removed)
    }

    pub fn clear(&self) -> Result<usize, CacheError> {
        self.store.clear()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::FrameSource;
    use image::{GrayImage, Luma};
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingSource {
        probes: AtomicUsize,
    }

    impl FrameSource for CountingSource {
        fn probe(&self, _path: &Path) -> Result<VideoMetadata, DecodeError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(VideoMetadata {
                width: 640,
                height: 480,
                fps: 30.0,
                frame_count: 120,
            })
        }

        fn frames(
            &self,
            _path: &Path,
            _metadata: &VideoMetadata,
            indices: &[u64],
            size: u32,
        ) -> Result<Vec<GrayImage>, DecodeError> {
            Ok(indices
                .iter()
                .map(|&i| GrayImage::from_fn(size, size, move |x, _| Luma([((x as u64 * 7 + i) % 256) as u8])))
                .collect())
        }
    }

    fn setup(dir: &TempDir) -> (Arc<CountingSource>, SignatureCache, PathBuf) {
        let source = Arc::new(CountingSource::default());
        let extractor = SignatureExtractor::new(source.clone(), HashStrategy::Average, 5, 1_000);
        let store = DirStore::open(dir.path().join("cache")).unwrap();
        let cache = SignatureCache::new(Arc::new(store), extractor);
        let video = dir.path().join("clip.mp4");
        fs::write(&video, vec![7u8; 4_096]).unwrap();
        (source, cache, video)
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        OpenOptions::new()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_second_lookup_is_a_hit() {
        let dir = TempDir::new().unwrap();
        let (source, cache, video) = setup(&dir);

        let first = cache.get_or_compute(&video).unwrap();
        let second = cache.get_or_compute(&video).unwrap();

        assert_eq!(first, second);
        assert_eq!(source.probes.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                store_errors: 0
            }
        );
    }

    #[test]
    fn test_touching_file_forces_recompute() {
        let dir = TempDir::new().unwrap();
        let (source, cache, video) = setup(&dir);

        cache.get_or_compute(&video).unwrap();
        set_mtime(&video, SystemTime::now() + Duration::from_secs(60));
        cache.get_or_compute(&video).unwrap();

        assert_eq!(source.probes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_corrupt_record_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let (source, cache, video) = setup(&dir);

        cache.get_or_compute(&video).unwrap();
        let record = dir
            .path()
            .join("cache")
            .join(format!("{}.json", CacheKey::for_path(&video)));
        fs::write(&record, b"{not json").unwrap();

        let signature = cache.get_or_compute(&video).unwrap();
        assert_eq!(signature.len(), 5);
        assert_eq!(source.probes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_outdated_version_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let (source, cache, video) = setup(&dir);
        let sig = cache.get_or_compute(&video).unwrap();

        let stale = CacheRecord {
            version: CACHE_FORMAT_VERSION + 1,
            strategy: sig.strategy,
            sample_count: 5,
            modified_ns: sig.modified_ns,
            metadata: sig.metadata.clone(),
            fingerprints: sig.fingerprints.clone(),
        };
        let key = CacheKey::for_path(&video);
        cache
            .store
            .save(&key, &serde_json::to_vec(&stale).unwrap())
            .unwrap();

        cache.get_or_compute(&video).unwrap();
        assert_eq!(source.probes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_malformed_fingerprints_force_recompute() {
        let dir = TempDir::new().unwrap();
        let (source, cache, video) = setup(&dir);
        let sig = cache.get_or_compute(&video).unwrap();
        let key = CacheKey::for_path(&video);

        let stray: Fingerprint =
            serde_json::from_str(r#"{"words":[18446744073709551615,18446744073709551615],"len":64}"#)
                .unwrap();
        let wide = sig.fingerprints[0].concat(&sig.fingerprints[0]);
        let bad_sets = [
            vec![stray; 5],
            vec![wide; 5],
            [sig.fingerprints.clone(), sig.fingerprints.clone()].concat(),
        ];

        for (i, fingerprints) in bad_sets.into_iter().enumerate() {
            let record = CacheRecord {
                version: CACHE_FORMAT_VERSION,
                strategy: sig.strategy,
                sample_count: 5,
                modified_ns: sig.modified_ns,
                metadata: sig.metadata.clone(),
                fingerprints,
            };
            cache
                .store
                .save(&key, &serde_json::to_vec(&record).unwrap())
                .unwrap();

            let fresh = cache.get_or_compute(&video).unwrap();
            assert_eq!(fresh.fingerprints, sig.fingerprints);
            assert!(fresh
                .fingerprints
                .iter()
                .all(|f| (0.0..=1.0).contains(&f.similarity(&sig.fingerprints[0]))));
            assert_eq!(source.probes.load(Ordering::SeqCst), i + 2);
        }
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_missing_video_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let (_, cache, _) = setup(&dir);
        assert!(matches!(
            cache.get_or_compute(&dir.path().join("absent.mp4")),
            Err(DecodeError::Missing { .. })
        ));
    }

    #[test]
    fn test_dir_store_prune_removes_old_entries() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::open(dir.path()).unwrap();
        let old = CacheKey::for_path(Path::new("old.mp4"));
        let new = CacheKey::for_path(Path::new("new.mp4"));
        store.save(&old, b"{}").unwrap();
        store.save(&new, b"{}").unwrap();
        set_mtime(
            &store.record_path(&old),
            SystemTime::now() - Duration::from_secs(8 * 24 * 3600),
        );

        let removed = store.prune(Duration::from_secs(7 * 24 * 3600)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.load(&old).unwrap(), None);
        assert!(store.load(&new).unwrap().is_some());
    }

    #[test]
    fn test_dir_store_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();
        store
            .save(&CacheKey::for_path(Path::new("a.mp4")), b"{}")
            .unwrap();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.clear().unwrap(), 1);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_memory_store_prune() {
        let store = MemoryStore::new();
        let week = Duration::from_secs(7 * 24 * 3600);
        store.insert_at(
            CacheKey::for_path(Path::new("old.mp4")),
            vec![1],
            SystemTime::now() - week - Duration::from_secs(60),
        );
        store
            .save(&CacheKey::for_path(Path::new("new.mp4")), &[2])
            .unwrap();

        assert_eq!(store.prune(week).unwrap(), 1);
        assert_eq!(store.len().unwrap(), 1);
    }
}
