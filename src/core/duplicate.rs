// Duplicate grouping over a fingerprinted video set.
//
// Groups are built by founder-only single linkage: each unvisited video opens
// a group and admits every later unvisited video whose similarity to *it*
// reaches the threshold. Later members are never used to admit others.

use crate::core::compare::Comparator;
use crate::core::hash::ContentHash;
use crate::core::signature::{VideoFile, VideoSignature};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// A video together with the signature the comparator works on.
#[derive(Debug, Clone)]
pub struct IndexedVideo {
    pub file: VideoFile,
    pub signature: VideoSignature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub path: PathBuf,
    pub created: DateTime<Utc>,
    /// Similarity to the group representative; 1.0 for the representative itself.
    pub similarity: f64,
    pub is_representative: bool,
}

/// Members ordered by ascending creation time; the first is the representative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: usize,
    pub members: Vec<GroupMember>,
}

impl DuplicateGroup {
    pub fn representative(&self) -> &GroupMember {
        &self.members[0]
    }

    pub fn duplicates(&self) -> &[GroupMember] {
        &self.members[1..]
    }

    pub fn rows(&self) -> Vec<ReportRow> {
        self.members
            .iter()
            .map(|m| ReportRow {
                group_id: self.id,
                path: m.path.clone(),
                is_representative: m.is_representative,
                similarity: m.similarity,
            })
            .collect()
    }
}

/// Flat output row handed to report writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub group_id: usize,
    pub path: PathBuf,
    pub is_representative: bool,
    pub similarity: f64,
}

pub fn report_rows(groups: &[DuplicateGroup]) -> Vec<ReportRow> {
    groups.iter().flat_map(DuplicateGroup::rows).collect()
}

#[derive(Debug, Clone, Default)]
pub struct Clustering {
    pub groups: Vec<DuplicateGroup>,
    /// Set when the sweep stopped early; `groups` then holds only completed groups.
    pub cancelled: bool,
}

/// Partition `videos` into duplicate groups, visiting them in input order.
pub fn cluster(
    videos: &[IndexedVideo],
    threshold: f64,
    comparator: &Comparator,
    cancelled: &AtomicBool,
) -> Clustering {
    let detector = GroupDetector::new(videos, comparator);
    let mut visited = vec![false; videos.len()];
    let mut result = Clustering::default();

    for founder in 0..videos.len() {
        if cancelled.load(Ordering::Relaxed) {
            result.cancelled = true;
            break;
        }
        if visited[founder] {
            continue;
        }
        visited[founder] = true;

        let mut admitted = vec![(founder, 1.0)];
        for candidate in founder + 1..videos.len() {
            if visited[candidate] {
                continue;
            }
            let score = detector.score(founder, candidate);
            if score >= threshold {
                visited[candidate] = true;
                admitted.push((candidate, score));
            }
        }

        if admitted.len() > 1 {
            let id = result.groups.len() + 1;
            let group = detector.finalize(id, founder, admitted);
            debug!(
                "group {}: {} members, representative {}",
                id,
                group.members.len(),
                group.representative().path.display()
            );
            result.groups.push(group);
        }
    }

    result
}

struct GroupDetector<'a> {
    videos: &'a [IndexedVideo],
    comparator: &'a Comparator,
    /// Content hashes of usable signatures, for the exact-match fast path.
    hashes: Vec<Option<ContentHash>>,
}

impl<'a> GroupDetector<'a> {
    fn new(videos: &'a [IndexedVideo], comparator: &'a Comparator) -> Self {
        let hashes = videos
            .iter()
            .map(|v| {
                (v.signature.len() >= comparator.min_fingerprints())
                    .then(|| v.signature.content_hash())
            })
            .collect();
        Self {
            videos,
            comparator,
            hashes,
        }
    }

    fn score(&self, a: usize, b: usize) -> f64 {
        match (&self.hashes[a], &self.hashes[b]) {
            (Some(ha), Some(hb)) if ha == hb => {
                debug!(
                    "exact match {} = {} ({})",
                    self.videos[a].file.path.display(),
                    self.videos[b].file.path.display(),
                    ha.to_hex()
                );
                1.0
            }
            _ => self
                .comparator
                .similarity(&self.videos[a].signature, &self.videos[b].signature),
        }
    }

    fn finalize(&self, id: usize, founder: usize, mut admitted: Vec<(usize, f64)>) -> DuplicateGroup {
        // stable: ties on creation time keep discovery order
        admitted.sort_by_key(|&(idx, _)| self.videos[idx].file.created);
        let representative = admitted[0].0;

        let members = admitted
            .iter()
            .map(|&(idx, founder_score)| {
                let similarity = if idx == representative {
                    1.0
                } else if representative == founder {
                    founder_score
                } else {
                    self.score(representative, idx)
                };
                GroupMember {
                    path: self.videos[idx].file.path.clone(),
                    created: DateTime::<Utc>::from(self.videos[idx].file.created),
                    similarity,
                    is_representative: idx == representative,
                }
            })
            .collect();

        DuplicateGroup { id, members }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::{Fingerprint, HashStrategy};
    use std::time::{Duration, UNIX_EPOCH};

    const BASE: [u64; 5] = [
        0x0123_4567_89ab_cdef,
        0xf0f0_f0f0_0f0f_0f0f,
        0xdead_beef_cafe_babe,
        0x1111_2222_3333_4444,
        0xffff_0000_ffff_0000,
    ];

    fn video(name: &str, created_secs: u64, mask: u64) -> IndexedVideo {
        IndexedVideo {
            file: VideoFile::new(name, UNIX_EPOCH + Duration::from_secs(created_secs)),
            signature: VideoSignature {
                path: PathBuf::from(name),
                modified_ns: 0,
                strategy: HashStrategy::Average,
                metadata: None,
                fingerprints: BASE.iter().map(|w| Fingerprint::from_u64(w ^ mask)).collect(),
            },
        }
    }

    fn run(videos: &[IndexedVideo], threshold: f64) -> Clustering {
        cluster(videos, threshold, &Comparator::default(), &AtomicBool::new(false))
    }

    fn paths(group: &DuplicateGroup) -> Vec<&str> {
        group
            .members
            .iter()
            .map(|m| m.path.to_str().unwrap())
            .collect()
    }

    #[test]
    fn test_singletons_are_discarded() {
        let videos = vec![video("a", 1, 0), video("b", 2, u64::MAX)];
        assert!(run(&videos, 0.9).groups.is_empty());
    }

    #[test]
    fn test_founder_only_linkage() {
        // A-B and B-C are 4 bits apart, A-C is 8 bits apart (0.875 < 0.9)
        let videos = vec![
            video("a", 1, 0),
            video("b", 2, 0b1111),
            video("c", 3, 0b1111_1111),
        ];
        let result = run(&videos, 0.9);

        assert_eq!(result.groups.len(), 1);
        assert_eq!(paths(&result.groups[0]), vec!["a", "b"]);
    }

    #[test]
    fn test_representative_is_earliest_regardless_of_order() {
        let make = || {
            vec![
                video("t1", 100, 0),
                video("t2", 200, 0b1),
                video("t3", 300, 0b10),
            ]
        };
        let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 1, 0], [1, 2, 0]];
        for order in orders {
            let base = make();
            let videos: Vec<IndexedVideo> = order.iter().map(|&i| base[i].clone()).collect();
            let result = run(&videos, 0.9);

            assert_eq!(result.groups.len(), 1);
            let group = &result.groups[0];
            assert_eq!(group.representative().path, PathBuf::from("t1"));
            assert!(group.representative().is_representative);
            assert_eq!(group.representative().similarity, 1.0);
            assert_eq!(paths(group), vec!["t1", "t2", "t3"]);
        }
    }

    #[test]
    fn test_similarity_is_reported_against_representative() {
        // founder "late" is newer than "early"; scores must be re-based on "early"
        let videos = vec![
            video("late", 500, 0),
            video("early", 100, 0b1),
            video("mid", 300, 0b11),
        ];
        let result = run(&videos, 0.9);
        let group = &result.groups[0];

        assert_eq!(paths(group), vec!["early", "mid", "late"]);
        assert_eq!(group.members[1].similarity, 1.0 - 1.0 / 64.0);
        assert_eq!(group.members[2].similarity, 1.0 - 1.0 / 64.0);
    }

    #[test]
    fn test_creation_time_ties_keep_discovery_order() {
        let videos = vec![video("x", 10, 0), video("y", 10, 0), video("z", 10, 0)];
        let result = run(&videos, 0.9);
        assert_eq!(paths(&result.groups[0]), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_clustering_is_idempotent() {
        let videos = vec![
            video("a", 5, 0),
            video("b", 3, 0b1),
            video("c", 9, u64::MAX),
            video("d", 1, u64::MAX ^ 0b1),
            video("e", 7, 0x00ff_00ff_00ff_00ff),
        ];
        let first = run(&videos, 0.9);
        let second = run(&videos, 0.9);
        assert_eq!(first.groups, second.groups);
        assert_eq!(first.groups.len(), 2);
    }

    #[test]
    fn test_exact_matches_bypass_quick_filter_consistently() {
        let mut short = video("short-a", 1, 0);
        short.signature.fingerprints.truncate(2);
        let twin = short.clone();
        // identical but unusable signatures must not be grouped by the fast path
        assert!(run(&[short, twin], 0.5).groups.is_empty());
    }

    #[test]
    fn test_report_rows_flatten_groups() {
        let videos = vec![video("a", 2, 0), video("b", 1, 0)];
        let result = run(&videos, 0.9);
        let rows = report_rows(&result.groups);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group_id, 1);
        assert_eq!(rows[0].path, PathBuf::from("b"));
        assert!(rows[0].is_representative);
        assert_eq!(rows[0].similarity, 1.0);
        assert!(!rows[1].is_representative);
    }

    #[test]
    fn test_cancellation_stops_before_next_founder() {
        let videos = vec![video("a", 1, 0), video("b", 2, 0)];
        let cancelled = AtomicBool::new(true);
        let result = cluster(&videos, 0.9, &Comparator::default(), &cancelled);
        assert!(result.cancelled);
        assert!(result.groups.is_empty());
    }
}
