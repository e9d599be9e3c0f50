//! Core domain types and error definitions
//!
//! Foundational value types and the error taxonomy shared by every layer of
//! the synchronizer. Nothing in here performs I/O.

pub mod error;
pub mod types;

pub use error::{FeedError, FeedResult};
pub use types::{FeedBuckets, FeedState, FeedStatus, TokenRecord};
