use crate::core::signature::VideoFile;
use crate::error::ScanError;
use log::debug;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

pub const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "mov", "m4v", "mkv", "webm", "avi", "mpg", "mpeg"];

/// Recursively discovers video files under a set of roots.
pub struct VideoScanner {
    extensions: HashSet<String>,
}

impl Default for VideoScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoScanner {
    pub fn new() -> Self {
        Self::with_extensions(VIDEO_EXTENSIONS)
    }

    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn is_video(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| self.extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }

    /// Walk `roots` and return every video found, sorted by path so runs over
    /// the same tree visit videos in the same order.
    pub fn discover(
        &self,
        roots: &[PathBuf],
        cancelled: &AtomicBool,
    ) -> Result<Vec<VideoFile>, ScanError> {
        for root in roots {
            if !root.exists() {
                return Err(ScanError::InvalidPath { path: root.clone() });
            }
        }

        let mut paths = Vec::new();
        for root in roots {
            for entry in WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if cancelled.load(Ordering::Relaxed) {
                    return Err(ScanError::Cancelled);
                }
                let path = entry.path();
                if entry.file_type().is_file() && self.is_video(path) {
                    paths.push(path.to_path_buf());
                }
            }
        }

        paths.sort();
        paths.dedup();
        debug!("discovered {} videos", paths.len());

        Ok(paths.into_iter().map(VideoFile::from_path).collect())
    }
}
