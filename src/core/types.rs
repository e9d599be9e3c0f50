//! Value types for the feed read model
//!
//! Records arrive from upstream as loosely shaped JSON objects. We keep the
//! identifying fields typed and let everything else flow through an open
//! extension map, so the synchronizer never rejects a record for carrying
//! fields it does not know about.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One token's observed state at a point in time.
///
/// Identity is derived, not declared: see [`crate::identity::resolve_key`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Primary address-like identifier (the token mint).
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub mint: Option<String>,

    /// Secondary identifier (e.g. a pool or pair address).
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub address: Option<String>,

    /// Free-form id assigned by the upstream source.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    /// Transaction-signature-like identifier.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub signature: Option<String>,

    /// All remaining fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Identifying fields arrive with loose typing; accept strings and numbers,
/// treat anything else as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// The three disjoint ordered buckets of the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedBuckets {
    /// Newest-first, append-only with dedup, bounded to a capacity.
    #[serde(rename = "new")]
    pub incoming: Vec<TokenRecord>,

    /// Unbounded, wholesale-replaced on each authoritative snapshot.
    #[serde(rename = "nearCompletion")]
    pub near_threshold: Vec<TokenRecord>,

    /// Unbounded, wholesale-replaced on each authoritative snapshot.
    #[serde(rename = "completed")]
    pub finalized: Vec<TokenRecord>,
}

/// Aggregated connection/freshness/error state exposed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedStatus {
    #[serde(rename = "isLoading")]
    pub is_loading: bool,

    #[serde(rename = "isConnected")]
    pub is_connected: bool,

    pub error: Option<String>,

    /// Unix millis of the last ingested data motion. Heartbeats and empty
    /// payloads do not bump this.
    #[serde(rename = "lastUpdatedAt")]
    pub last_updated_at: Option<i64>,
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self {
            is_loading: true,
            is_connected: false,
            error: None,
            last_updated_at: None,
        }
    }
}

/// The complete read model: buckets plus status.
///
/// Only ever replaced as a whole through the merge engine, never mutated
/// field-by-field from multiple call sites. Consumers receive clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedState {
    pub buckets: FeedBuckets,
    pub status: FeedStatus,
}

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
