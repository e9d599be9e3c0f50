//! Frame parsing and classification
//!
//! Each push-stream frame is a JSON object tagged by a `type` field. Payloads
//! are carried loosely (`serde_json::Value`) and converted leniently: a
//! payload that is not a proper array classifies as an empty batch rather
//! than poisoning the frame.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::error::FeedResult;
use crate::core::types::TokenRecord;

/// A frame exactly as delivered by the transport.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub kind: String,

    /// Flat token batch (`new_tokens`, `token_updates`, bucket snapshots).
    #[serde(default)]
    pub tokens: Option<Value>,

    /// Nested buckets payload (`initial_state`).
    #[serde(default)]
    pub data: Option<FullStatePayload>,

    /// Upstream freshness timestamp, unix millis.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// The `data` payload of an `initial_state` frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FullStatePayload {
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(rename = "nearCompletion", default)]
    pub near_completion: Option<Value>,
    #[serde(default)]
    pub completed: Option<Value>,
}

/// A frame classified by its effect on the feed state.
#[derive(Debug, Clone)]
pub enum FeedFrame {
    /// Authoritative replacement of all three buckets.
    FullState {
        incoming: Vec<TokenRecord>,
        near_threshold: Vec<TokenRecord>,
        finalized: Vec<TokenRecord>,
        timestamp: Option<i64>,
    },
    /// New entities for the incoming bucket (append-dedup).
    IncomingAdditions(Vec<TokenRecord>),
    /// Refreshes for known incoming entities (patch-existing).
    IncomingPatches(Vec<TokenRecord>),
    /// Authoritative replacement of the near-threshold bucket.
    NearThresholdSnapshot(Vec<TokenRecord>),
    /// Authoritative replacement of the finalized bucket.
    FinalizedSnapshot(Vec<TokenRecord>),
    /// Unrecognized tag; dropped without error.
    Ignored(String),
}

impl RawFrame {
    /// Parse one newline-delimited frame.
    pub fn parse(line: &str) -> FeedResult<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Classify the frame by its tag.
    pub fn classify(self) -> FeedFrame {
        match self.kind.as_str() {
            "initial_state" => {
                let payload = self.data.unwrap_or_default();
                FeedFrame::FullState {
                    incoming: records_from(payload.new),
                    near_threshold: records_from(payload.near_completion),
                    finalized: records_from(payload.completed),
                    timestamp: self.timestamp,
                }
            }
            "new_tokens" => FeedFrame::IncomingAdditions(records_from(self.tokens)),
            "token_updates" => FeedFrame::IncomingPatches(records_from(self.tokens)),
            "near_completion_snapshot" => {
                FeedFrame::NearThresholdSnapshot(records_from(self.tokens))
            }
            "completed_snapshot" => FeedFrame::FinalizedSnapshot(records_from(self.tokens)),
            _ => FeedFrame::Ignored(self.kind),
        }
    }
}

/// Lenient batch conversion: non-arrays become empty batches, non-object
/// elements are skipped.
fn records_from(payload: Option<Value>) -> Vec<TokenRecord> {
    let Some(Value::Array(items)) = payload else {
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<TokenRecord>(item) {
            Ok(record) => Some(record),
            Err(err) => {
                debug!("Skipping malformed record in frame payload: {}", err);
                None
            }
        })
        .collect()
}
