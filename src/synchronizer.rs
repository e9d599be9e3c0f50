//! Consumer-facing handle for the feed synchronizer
//!
//! One synchronizer instance per active consumer context: starting it
//! allocates the state and launches the loader and the push session,
//! deactivating (or dropping the handle) cancels the retry timer and closes
//! the session. Consumers only ever see immutable `FeedState` snapshots.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::core::types::FeedState;
use crate::stream::session::{Command, SessionDriver, SyncSettings};
use crate::transport::FeedTransport;

pub struct FeedSynchronizer {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<FeedState>,
}

impl FeedSynchronizer {
    /// Activate: populate the initial state via the snapshot loader while the
    /// push session opens concurrently, then keep both reconciled.
    pub fn start(transport: Arc<dyn FeedTransport>, settings: SyncSettings) -> Self {
        info!(
            incoming_capacity = settings.incoming_capacity,
            reconnect_delay_ms = settings.reconnect_delay.as_millis() as u64,
            "Starting feed synchronizer"
        );
        let (commands, state) = SessionDriver::spawn(transport, settings);
        Self { commands, state }
    }

    /// Current read model: `{buckets: {new, nearCompletion, completed},
    /// status: {isLoading, isConnected, error, lastUpdatedAt}}`.
    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    /// Subscribe to state snapshots; a new value is published on every
    /// ingested batch and every connection transition.
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    /// Explicitly tear down the current session and open a new one.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    /// Deactivate: cancels any pending retry and closes the session. The
    /// command jumps ahead of queued frames, so no further state mutation
    /// happens after it is processed. Late snapshot results are discarded.
    pub fn deactivate(&self) {
        let _ = self.commands.send(Command::Deactivate);
    }
}

impl Drop for FeedSynchronizer {
    fn drop(&mut self) {
        // An abandoned handle must not leak a session or a timer.
        let _ = self.commands.send(Command::Deactivate);
    }
}
