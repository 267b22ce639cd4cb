pub mod compare;
pub mod duplicate;
pub mod fingerprint;
pub mod frame;
pub mod hash;
pub mod signature;

pub use compare::{Comparator, Comparison, SkipReason};
pub use duplicate::{cluster, Clustering, DuplicateGroup, GroupMember, IndexedVideo, ReportRow};
pub use fingerprint::{Fingerprint, HashStrategy};
pub use frame::{FfmpegSource, FrameSampler, FrameSource, VideoMetadata};
pub use hash::{CacheKey, ContentHash};
pub use signature::{SignatureExtractor, VideoFile, VideoSignature};
