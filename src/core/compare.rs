//! Two-stage signature comparison: a cheap pre-filter on a few aligned
//! positions, then the mean per-frame similarity over the aligned prefix.

use crate::config::DetectorConfig;
use crate::core::fingerprint::Fingerprint;
use crate::core::signature::VideoSignature;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    TooFewFingerprints,
    StrategyMismatch,
    ResolutionMismatch,
}

/// Outcome of comparing two signatures. Only `Scored` carries a non-zero score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    Scored(f64),
    /// Failed the quick pre-filter; `quick` is the fraction of probed positions that matched.
    Rejected { quick: f64 },
    Skipped(SkipReason),
}

impl Comparison {
    pub fn score(&self) -> f64 {
        match self {
            Comparison::Scored(score) => *score,
            Comparison::Rejected { .. } | Comparison::Skipped(_) => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Comparator {
    min_fingerprints: usize,
    quick_positions: usize,
    quick_frame_threshold: f64,
    quick_gate: f64,
}

impl Comparator {
    pub fn new(
        min_fingerprints: usize,
        quick_positions: usize,
        quick_frame_threshold: f64,
        quick_gate: f64,
    ) -> Self {
        Self {
            min_fingerprints,
            quick_positions: quick_positions.max(1),
            quick_frame_threshold,
            quick_gate,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.min_fingerprints,
            config.quick_positions,
            config.quick_frame_threshold,
            config.quick_gate,
        )
    }

    pub fn min_fingerprints(&self) -> usize {
        self.min_fingerprints.max(1)
    }

    /// Similarity in [0, 1]; zero when skipped or rejected by the pre-filter.
    pub fn similarity(&self, a: &VideoSignature, b: &VideoSignature) -> f64 {
        self.compare(a, b).score()
    }

    pub fn compare(&self, a: &VideoSignature, b: &VideoSignature) -> Comparison {
        if let Some(reason) = self.skip_reason(a, b) {
            return Comparison::Skipped(reason);
        }

        let quick = self.quick_similarity(&a.fingerprints, &b.fingerprints);
        if quick < self.quick_gate {
            return Comparison::Rejected { quick };
        }

        Comparison::Scored(full_similarity(&a.fingerprints, &b.fingerprints))
    }

    fn skip_reason(&self, a: &VideoSignature, b: &VideoSignature) -> Option<SkipReason> {
        if a.len().min(b.len()) < self.min_fingerprints() {
            return Some(SkipReason::TooFewFingerprints);
        }
        if a.strategy != b.strategy {
            return Some(SkipReason::StrategyMismatch);
        }
        if a.strategy.checks_resolution() {
            if let (Some(ma), Some(mb)) = (&a.metadata, &b.metadata) {
                if !ma.same_resolution(mb) {
                    return Some(SkipReason::ResolutionMismatch);
                }
            }
        }
        None
    }

    /// Fraction of at most `quick_positions` evenly stepped aligned positions
    /// whose per-frame similarity exceeds the coarse threshold.
    pub fn quick_similarity(&self, a: &[Fingerprint], b: &[Fingerprint]) -> f64 {
        let min_len = a.len().min(b.len());
        if min_len == 0 {
            return 0.0;
        }

        let probes = self.quick_positions.min(min_len);
        let step = (min_len / probes).max(1);

        let matches = (0..min_len)
            .step_by(step)
            .take(probes)
            .filter(|&i| a[i].similarity(&b[i]) > self.quick_frame_threshold)
            .count();

        matches as f64 / probes as f64
    }
}

impl Default for Comparator {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

/// Mean of `1 - hamming / bits` over the aligned prefix; the longer sequence is truncated.
pub fn full_similarity(a: &[Fingerprint], b: &[Fingerprint]) -> f64 {
    let pairs = a.iter().zip(b.iter());

    let mut total_bits = 0u64;
    let mut differing = 0u64;
    for (fa, fb) in pairs {
        if fa.len() != fb.len() || fa.is_empty() {
            return 0.0;
        }
        total_bits += fa.len() as u64;
        differing += fa.hamming_distance(fb) as u64;
    }

    if total_bits == 0 {
        return 0.0;
    }
    // equal bit lengths make this the arithmetic mean of per-frame similarities
    1.0 - differing as f64 / total_bits as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::HashStrategy;
    use crate::core::frame::VideoMetadata;
    use std::path::PathBuf;

    fn signature(words: &[u64], strategy: HashStrategy) -> VideoSignature {
        VideoSignature {
            path: PathBuf::from("v.mp4"),
            modified_ns: 0,
            strategy,
            metadata: Some(VideoMetadata {
                width: 720,
                height: 1280,
                fps: 30.0,
                frame_count: 900,
            }),
            fingerprints: words.iter().map(|&w| Fingerprint::from_u64(w)).collect(),
        }
    }

    fn average(words: &[u64]) -> VideoSignature {
        signature(words, HashStrategy::Average)
    }

    const WORDS: [u64; 5] = [
        0x0123_4567_89ab_cdef,
        0xf0f0_f0f0_0f0f_0f0f,
        0xdead_beef_cafe_babe,
        0x1111_2222_3333_4444,
        0xffff_0000_ffff_0000,
    ];

    #[test]
    fn test_self_similarity_is_one() {
        let cmp = Comparator::default();
        let sig = average(&WORDS);
        assert_eq!(cmp.similarity(&sig, &sig), 1.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let cmp = Comparator::default();
        let a = average(&WORDS);
        let flipped: Vec<u64> = WORDS.iter().map(|w| w ^ 0b111).collect();
        let b = average(&flipped[..4]);
        let c = average(&[!WORDS[0], !WORDS[1], !WORDS[2]]);

        for (x, y) in [(&a, &b), (&a, &c), (&b, &c)] {
            assert_eq!(cmp.compare(x, y), cmp.compare(y, x));
        }
    }

    #[test]
    fn test_one_bit_per_frame_gives_exact_score() {
        let cmp = Comparator::default();
        let a = average(&WORDS);
        let b = average(&WORDS.map(|w| w ^ (1 << 17)));
        assert_eq!(cmp.similarity(&a, &b), 1.0 - 1.0 / 64.0);

        let wide = |sig: &VideoSignature, flip: bool| VideoSignature {
            strategy: HashStrategy::Combined,
            fingerprints: sig
                .fingerprints
                .iter()
                .map(|f| {
                    let doubled = f.concat(f);
                    if flip { doubled.toggled(99) } else { doubled }
                })
                .collect(),
            ..sig.clone()
        };
        assert_eq!(
            cmp.similarity(&wide(&a, false), &wide(&a, true)),
            1.0 - 1.0 / 128.0
        );
    }

    #[test]
    fn test_short_signatures_score_zero() {
        let cmp = Comparator::default();
        let short = average(&WORDS[..2]);
        let long = average(&WORDS);
        assert_eq!(
            cmp.compare(&short, &long),
            Comparison::Skipped(SkipReason::TooFewFingerprints)
        );
        assert_eq!(cmp.similarity(&short, &short), 0.0);
    }

    #[test]
    fn test_longer_signature_is_truncated() {
        let cmp = Comparator::default();
        let a = average(&WORDS[..3]);
        let b = average(&[WORDS[0], WORDS[1], WORDS[2], !WORDS[3], !WORDS[4]]);
        assert_eq!(cmp.similarity(&a, &b), 1.0);
    }

    #[test]
    fn test_resolution_gate_applies_to_high_fidelity_only() {
        let cmp = Comparator::default();
        let mut a = signature(&WORDS, HashStrategy::Frequency);
        let mut b = a.clone();
        b.metadata.as_mut().unwrap().width = 1080;
        assert_eq!(
            cmp.compare(&a, &b),
            Comparison::Skipped(SkipReason::ResolutionMismatch)
        );

        a.strategy = HashStrategy::Average;
        b.strategy = HashStrategy::Average;
        assert_eq!(cmp.similarity(&a, &b), 1.0);
    }

    #[test]
    fn test_mixed_strategies_are_never_compared() {
        let cmp = Comparator::default();
        let a = signature(&WORDS, HashStrategy::Average);
        let b = signature(&WORDS, HashStrategy::Frequency);
        assert_eq!(
            cmp.compare(&a, &b),
            Comparison::Skipped(SkipReason::StrategyMismatch)
        );
    }

    #[test]
    fn test_quick_filter_rejects_dissimilar_pairs() {
        let cmp = Comparator::default();
        let a = average(&WORDS);
        // three of five positions inverted: quick match fraction 0.4 < 0.7
        let b = average(&[WORDS[0], !WORDS[1], !WORDS[2], !WORDS[3], WORDS[4]]);
        assert_eq!(cmp.compare(&a, &b), Comparison::Rejected { quick: 0.4 });
        assert_eq!(cmp.similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_quick_similarity_probes_at_most_configured_positions() {
        let cmp = Comparator::new(3, 5, 0.85, 0.7);
        let a: Vec<Fingerprint> = (0..20).map(Fingerprint::from_u64).collect();
        // positions 0, 4, 8, 12, 16 are probed; break every other one
        let b: Vec<Fingerprint> = a
            .iter()
            .enumerate()
            .map(|(i, f)| if i % 4 == 0 && i % 8 != 0 { Fingerprint::from_u64(!(i as u64)) } else { *f })
            .collect();
        assert_eq!(cmp.quick_similarity(&a, &b), 0.6);
    }
}
