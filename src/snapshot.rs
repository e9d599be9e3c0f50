//! One-shot snapshot loading
//!
//! Runs exactly once per activation, concurrently with the push session. The
//! result is posted into the session event queue, so whichever of the two
//! sources lands second wins the initial population (last-write-wins).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::types::TokenRecord;
use crate::stream::session::FeedEvent;
use crate::transport::FeedTransport;

/// Body of the snapshot endpoint: all fields optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub new: Vec<TokenRecord>,
    pub near_completion: Vec<TokenRecord>,
    pub completed: Vec<TokenRecord>,
    pub last_new_update: Option<i64>,
    pub last_status_update: Option<i64>,
}

/// Spawn the one-shot loader task.
///
/// There is no cancellation primitive on the fetch itself; if the
/// synchronizer deactivates while the request is in flight, the event send
/// fails and the result is discarded instead of applied.
pub(crate) fn spawn_loader(
    transport: Arc<dyn FeedTransport>,
    events: mpsc::UnboundedSender<FeedEvent>,
) {
    tokio::spawn(async move {
        let result = transport.fetch_snapshot().await;
        if events.send(FeedEvent::SnapshotLoaded(result)).is_err() {
            debug!("Snapshot result discarded after deactivation");
        }
    });
}
