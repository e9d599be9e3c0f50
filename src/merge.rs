//! Bucket merge engine
//!
//! Pure combine operations, one per event semantic. All bucket contents in
//! the read model are produced here and nowhere else, keeping each ingested
//! batch atomic with respect to consumers.

use std::collections::{HashMap, HashSet};

use crate::core::types::TokenRecord;
use crate::identity::resolve_key;

/// Prepend a batch onto a bucket, deduplicating by resolved key and capping
/// the result length.
///
/// Walks `batch` then `current`, keeping the first occurrence of each key in
/// encounter order and stopping at `capacity`: new items land at the front,
/// existing items shift down, overflow falls off the tail. An empty batch
/// returns `current` unchanged.
pub fn append_dedup(
    batch: &[TokenRecord],
    current: &[TokenRecord],
    capacity: usize,
) -> Vec<TokenRecord> {
    if batch.is_empty() {
        return current.to_vec();
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(batch.len() + current.len());
    let mut merged = Vec::with_capacity(capacity.min(batch.len() + current.len()));

    for record in batch.iter().chain(current.iter()) {
        if merged.len() >= capacity {
            break;
        }
        if seen.insert(resolve_key(record)) {
            merged.push(record.clone());
        }
    }

    merged
}

/// Refresh records of `current` whose keys appear in `batch`.
///
/// Never adds entities, never reorders, never changes the bucket length or
/// key set. Batch entries with unknown keys are ignored; when the batch holds
/// several records for one key, the last one wins. Either side being empty is
/// a no-op.
pub fn patch_existing(batch: &[TokenRecord], current: &[TokenRecord]) -> Vec<TokenRecord> {
    if batch.is_empty() || current.is_empty() {
        return current.to_vec();
    }

    let mut patches: HashMap<String, &TokenRecord> = HashMap::with_capacity(batch.len());
    for record in batch {
        patches.insert(resolve_key(record), record);
    }

    current
        .iter()
        .map(|record| match patches.get(&resolve_key(record)) {
            Some(patched) => (*patched).clone(),
            None => record.clone(),
        })
        .collect()
}

/// Replace a bucket wholesale with an authoritative snapshot batch.
///
/// The previous bucket contents are irrelevant by definition. Payloads that
/// were not a proper sequence have already been classified as an empty batch
/// upstream of this call.
pub fn replace_wholesale(batch: Vec<TokenRecord>) -> Vec<TokenRecord> {
    batch
}
