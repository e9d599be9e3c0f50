//! Centralized error types for the feed synchronizer

use thiserror::Error;

/// Main synchronizer error type
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Snapshot request failed with status {status}")]
    SnapshotStatus { status: u16 },

    #[error("Stream request failed with status {status}")]
    StreamStatus { status: u16 },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for synchronizer operations
pub type FeedResult<T> = Result<T, FeedError>;

/// Helper to convert reqwest errors
impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Transport(err.to_string())
    }
}

/// Helper to convert JSON errors
impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::MalformedFrame(err.to_string())
    }
}
