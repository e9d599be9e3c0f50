//! TokenKey resolution
//!
//! Derives a stable identity string for a record by probing its candidate
//! identifying fields in priority order. Two records are the same entity iff
//! their resolved keys are equal; this is the sole identity criterion used by
//! the merge engine.

use crate::core::types::TokenRecord;

/// Resolve the identity key for a record.
///
/// Probes `mint`, then `address`, then `id`, then `signature`, skipping empty
/// strings. If none is present, falls back to the canonical JSON
/// serialization of the whole record (`serde_json` maps are key-sorted, so
/// identical payloads serialize identically). Always returns a non-empty
/// string.
pub fn resolve_key(record: &TokenRecord) -> String {
    let candidates = [
        record.mint.as_deref(),
        record.address.as_deref(),
        record.id.as_deref(),
        record.signature.as_deref(),
    ];

    for candidate in candidates.into_iter().flatten() {
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }

    serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
}
