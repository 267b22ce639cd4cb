//! Frame sampling: probe a container, pick evenly spaced frame indices and
//! decode them as small grayscale squares.

use crate::error::DecodeError;
use image::imageops::{self, FilterType};
use image::GrayImage;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Container-level facts about a video, also used as a cheap non-similarity gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
}

impl VideoMetadata {
    pub fn validate(&self, path: &Path) -> Result<(), DecodeError> {
        if self.width == 0 || self.height == 0 || !(self.fps > 0.0) || self.frame_count == 0 {
            return Err(DecodeError::InvalidMetadata {
                path: path.to_path_buf(),
                message: format!(
                    "{}x{}@{:.2}fps-{}frames",
                    self.width, self.height, self.fps, self.frame_count
                ),
            });
        }
        Ok(())
    }

    pub fn same_resolution(&self, other: &VideoMetadata) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Decode layer. Implementations must be deterministic: the same file and
/// indices always yield the same pixels.
pub trait FrameSource: Send + Sync {
    fn probe(&self, path: &Path) -> Result<VideoMetadata, DecodeError>;

    /// Decode the frames at `indices` as `size`x`size` luma images. May return
    /// fewer frames than requested if the stream ends early.
    fn frames(
        &self,
        path: &Path,
        metadata: &VideoMetadata,
        indices: &[u64],
        size: u32,
    ) -> Result<Vec<GrayImage>, DecodeError>;
}

/// `floor(i * total / count)` for each sample, or every frame when the video is shorter than `count`.
pub fn sample_indices(total_frames: u64, sample_count: usize) -> Vec<u64> {
    let count = sample_count as u64;
    if total_frames < count {
        return (0..total_frames).collect();
    }
    (0..count).map(|i| i * total_frames / count).collect()
}

#[derive(Debug, Clone)]
pub struct SampledVideo {
    pub metadata: VideoMetadata,
    pub frames: Vec<GrayImage>,
}

pub struct FrameSampler {
    source: Arc<dyn FrameSource>,
    sample_count: usize,
    frame_size: u32,
    min_file_size: u64,
}

impl FrameSampler {
    pub fn new(
        source: Arc<dyn FrameSource>,
        sample_count: usize,
        frame_size: u32,
        min_file_size: u64,
    ) -> Self {
        Self {
            source,
            sample_count,
            frame_size,
            min_file_size,
        }
    }

    pub fn sample(&self, path: &Path) -> Result<SampledVideo, DecodeError> {
        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DecodeError::Missing {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if size < self.min_file_size {
            return Err(DecodeError::TooSmall {
                path: path.to_path_buf(),
                size,
                min: self.min_file_size,
            });
        }

        let metadata = self.source.probe(path)?;
        metadata.validate(path)?;

        let indices = sample_indices(metadata.frame_count, self.sample_count);
        let mut frames = self
            .source
            .frames(path, &metadata, &indices, self.frame_size)?;
        frames.truncate(self.sample_count);

        let side = self.frame_size;
        let frames: Vec<GrayImage> = frames
            .into_iter()
            .map(|frame| {
                if frame.dimensions() == (side, side) {
                    frame
                } else {
                    imageops::resize(&frame, side, side, FilterType::Triangle)
                }
            })
            .collect();

        if frames.is_empty() {
            return Err(DecodeError::NoFrames {
                path: path.to_path_buf(),
            });
        }

        debug!(
            "sampled {}/{} frames from {}",
            frames.len(),
            indices.len(),
            path.display()
        );
        Ok(SampledVideo { metadata, frames })
    }
}

/// Decodes through the `ffprobe` and `ffmpeg` executables.
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
}

impl FfmpegSource {
    pub fn new() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_binaries(ffprobe: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    fn run_probe(&self, path: &Path, entries: &str, count_packets: bool) -> Result<ProbeStream, DecodeError> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(["-v", "error", "-select_streams", "v:0"]);
        if count_packets {
            cmd.arg("-count_packets");
        }
        cmd.args(["-show_entries", entries, "-of", "json"]).arg(path.as_os_str());

        let probe_err = |message: String| DecodeError::Probe {
            path: path.to_path_buf(),
            message,
        };

        let out = cmd.output().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                probe_err(format!("{} not found", self.ffprobe.display()))
            } else {
                probe_err(e.to_string())
            }
        })?;
        if !out.status.success() {
            return Err(probe_err(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }

        let parsed: ProbeOutput =
            serde_json::from_slice(&out.stdout).map_err(|e| probe_err(e.to_string()))?;
        parsed
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| probe_err("no video stream".to_string()))
    }

    fn select_filter(indices: &[u64], size: u32) -> String {
        let terms: Vec<String> = indices.iter().map(|i| format!("eq(n\\,{})", i)).collect();
        format!(
            "select='{}',scale={}:{}:flags=bilinear,format=gray",
            terms.join("+"),
            size,
            size
        )
    }
}

impl Default for FfmpegSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for FfmpegSource {
    fn probe(&self, path: &Path) -> Result<VideoMetadata, DecodeError> {
        let stream = self.run_probe(
            path,
            "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames",
            false,
        )?;

        let fps = stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
            .unwrap_or(0.0);

        let mut frame_count = stream.nb_frames.as_deref().and_then(parse_count);
        if frame_count.is_none() {
            // Some containers (mkv, webm) do not store a frame count
            let counted = self.run_probe(path, "stream=nb_read_packets", true)?;
            frame_count = counted.nb_read_packets.as_deref().and_then(parse_count);
        }

        Ok(VideoMetadata {
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
            fps,
            frame_count: frame_count.unwrap_or(0),
        })
    }

    fn frames(
        &self,
        path: &Path,
        _metadata: &VideoMetadata,
        indices: &[u64],
        size: u32,
    ) -> Result<Vec<GrayImage>, DecodeError> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let decode_err = |message: String| DecodeError::Decode {
            path: path.to_path_buf(),
            message,
        };

        let out = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path.as_os_str())
            .args(["-vf", &Self::select_filter(indices, size)])
            .args(["-fps_mode", "passthrough", "-f", "rawvideo", "-pix_fmt", "gray", "-"])
            .output()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    decode_err(format!("{} not found", self.ffmpeg.display()))
                } else {
                    decode_err(e.to_string())
                }
            })?;

        let frame_len = (size * size) as usize;
        let frames: Vec<GrayImage> = out
            .stdout
            .chunks_exact(frame_len)
            .filter_map(|chunk| GrayImage::from_raw(size, size, chunk.to_vec()))
            .collect();

        if frames.is_empty() && !out.status.success() {
            return Err(decode_err(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        Ok(frames)
    }
}

/// Parses `30000/1001` or `25`.
fn parse_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate > 0.0).then_some(rate)
}

fn parse_count(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|n| *n > 0)
}
