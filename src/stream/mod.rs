//! Push-stream ingestion: frame parsing and session lifecycle

pub mod frames;
pub mod session;

pub use frames::{FeedFrame, RawFrame};
