//! Per-frame perceptual hashes.
//!
//! Every function here is a pure function of the input frame: the same luma
//! buffer always produces the same bits.

use image::imageops::{self, FilterType};
use image::GrayImage;
use rustdct::DctPlanner;
use serde::{Deserialize, Serialize};

/// Side of the block both hashes reduce a frame to.
const HASH_SIDE: u32 = 8;
/// Frames are brought to this size before the frequency transform.
const DCT_SIDE: usize = 64;

/// Which hash a signature's fingerprints are built from. Signatures built
/// with different strategies are never compared.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum HashStrategy {
    /// 64-bit mean-luminance hash, coarse 32x32 frames.
    Average,
    /// 64-bit low-frequency DCT hash, 64x64 frames.
    Frequency,
    /// Average bits followed by frequency bits, 128 bits per frame.
    Combined,
}

impl HashStrategy {
    pub fn bits(self) -> u16 {
        match self {
            HashStrategy::Average | HashStrategy::Frequency => 64,
            HashStrategy::Combined => 128,
        }
    }

    pub fn frame_size(self) -> u32 {
        match self {
            HashStrategy::Average => 32,
            HashStrategy::Frequency | HashStrategy::Combined => 64,
        }
    }

    /// Higher-fidelity strategies also refuse matches across resolutions.
    pub fn checks_resolution(self) -> bool {
        !matches!(self, HashStrategy::Average)
    }
}

/// Fixed-length bit vector of up to 128 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    words: [u64; 2],
    len: u16,
}

impl Fingerprint {
    pub const MAX_BITS: u16 = 128;

    pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        let mut words = [0u64; 2];
        let mut len = 0u16;
        for bit in bits.into_iter().take(Self::MAX_BITS as usize) {
            if bit {
                words[(len / 64) as usize] |= 1u64 << (len % 64);
            }
            len += 1;
        }
        Self { words, len }
    }

    /// Builds a 64-bit fingerprint from a raw word.
    pub fn from_u64(word: u64) -> Self {
        Self {
            words: [word, 0],
            len: 64,
        }
    }

    pub fn len(&self) -> u16 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// False for values no hash function produces: a length past
    /// `MAX_BITS` or bits set at or beyond `len`. Only deserialized data can be malformed.
    pub fn is_well_formed(&self) -> bool {
        if self.len > Self::MAX_BITS {
            return false;
        }
        (0..2).all(|w| {
            let start = w as u16 * 64;
            let used = self.len.saturating_sub(start).min(64);
            let mask = if used == 64 { u64::MAX } else { (1u64 << used) - 1 };
            self.words[w] & !mask == 0
        })
    }

    pub fn bit(&self, index: u16) -> bool {
        index < self.len && self.words[(index / 64) as usize] & (1u64 << (index % 64)) != 0
    }

    /// Copy with one bit inverted.
    pub fn toggled(mut self, index: u16) -> Self {
        if index < self.len {
            self.words[(index / 64) as usize] ^= 1u64 << (index % 64);
        }
        self
    }

    /// Appends `other`'s bits after this fingerprint's bits.
    pub fn concat(&self, other: &Fingerprint) -> Self {
        Self::from_bits(
            (0..self.len)
                .map(|i| self.bit(i))
                .chain((0..other.len).map(|i| other.bit(i))),
        )
    }

    /// Number of differing bits. Both fingerprints must have the same length.
    pub fn hamming_distance(&self, other: &Fingerprint) -> u32 {
        debug_assert_eq!(self.len, other.len);
        (self.words[0] ^ other.words[0]).count_ones() + (self.words[1] ^ other.words[1]).count_ones()
    }

    /// `1 - hamming / bit_length`, always in [0, 1].
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        if self.len == 0 || self.len != other.len {
            return 0.0;
        }
        1.0 - self.hamming_distance(other) as f64 / self.len as f64
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.words[0].to_le_bytes());
        out[8..].copy_from_slice(&self.words[1].to_le_bytes());
        out
    }
}

/// Mean hash: shrink to 8x8, one bit per pixel set when it is brighter than the mean.
pub fn average_hash(frame: &GrayImage) -> Fingerprint {
    let small = imageops::resize(frame, HASH_SIDE, HASH_SIDE, FilterType::Triangle);
    let pixels = small.as_raw();
    let sum: u32 = pixels.iter().map(|&p| p as u32).sum();
    let count = pixels.len() as u32;

    // p > sum / count, kept in integers
    Fingerprint::from_bits(pixels.iter().map(|&p| p as u32 * count > sum))
}

/// DCT hash: 2D DCT-II of a 64x64 frame, keep the top-left 8x8 block, one bit
/// per coefficient set when it exceeds the mean of the block without DC.
pub fn frequency_hash(frame: &GrayImage) -> Fingerprint {
    let side = DCT_SIDE as u32;
    let resized;
    let frame = if frame.dimensions() == (side, side) {
        frame
    } else {
        resized = imageops::resize(frame, side, side, FilterType::Triangle);
        &resized
    };

    let mut data: Vec<f64> = frame.as_raw().iter().map(|&p| p as f64).collect();
    dct_2d(&mut data, DCT_SIDE);

    let block = HASH_SIDE as usize;
    let low: Vec<f64> = (0..block)
        .flat_map(|row| data[row * DCT_SIDE..row * DCT_SIDE + block].to_vec())
        .collect();

    let mean = low[1..].iter().sum::<f64>() / (low.len() - 1) as f64;
    Fingerprint::from_bits(low.iter().map(|&c| c > mean))
}

pub fn fingerprint_frame(frame: &GrayImage, strategy: HashStrategy) -> Fingerprint {
    match strategy {
        HashStrategy::Average => average_hash(frame),
        HashStrategy::Frequency => frequency_hash(frame),
        HashStrategy::Combined => average_hash(frame).concat(&frequency_hash(frame)),
    }
}

/// In-place separable DCT-II over a square row-major buffer.
fn dct_2d(data: &mut [f64], side: usize) {
    let mut planner = DctPlanner::new();
    let dct = planner.plan_dct2(side);

    for row in data.chunks_exact_mut(side) {
        dct.process_dct2(row);
    }

    let mut column = vec![0.0; side];
    for x in 0..side {
        for y in 0..side {
            column[y] = data[y * side + x];
        }
        dct.process_dct2(&mut column);
        for y in 0..side {
            data[y * side + x] = column[y];
        }
    }
}
