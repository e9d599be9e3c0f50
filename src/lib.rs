//! Real-time bucketed feed synchronizer
//!
//! Keeps a client-side mirror of a server-maintained token lifecycle feed:
//! one HTTP snapshot at activation plus an unbounded push stream of
//! incremental frames, merged into three disjoint ordered buckets (incoming,
//! near-threshold, finalized) behind an immutable, watch-published read
//! model. Disconnects are survived with a fixed-delay reconnect; duplicates
//! and gaps from upstream are tolerated by keyed deduplication and
//! authoritative bucket snapshots.

pub mod config;
pub mod core;
pub mod identity;
pub mod merge;
pub mod snapshot;
pub mod stream;
pub mod synchronizer;
pub mod transport;

// Re-export commonly used types
pub use crate::config::FeedConfig;
pub use crate::core::{FeedBuckets, FeedError, FeedResult, FeedState, FeedStatus, TokenRecord};
pub use crate::identity::resolve_key;
pub use crate::merge::{append_dedup, patch_existing, replace_wholesale};
pub use crate::snapshot::FeedSnapshot;
pub use crate::stream::session::SyncSettings;
pub use crate::synchronizer::FeedSynchronizer;
pub use crate::transport::{FeedTransport, FrameByteStream, HttpTransport};
