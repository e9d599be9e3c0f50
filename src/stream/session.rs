//! Push-session lifecycle and the single-writer event loop
//!
//! One driver task owns the `FeedState` exclusively. Reader and snapshot
//! tasks never touch it; they post events into an unbounded queue and the
//! driver applies them in arrival order through the pure merge operations,
//! publishing a fresh immutable snapshot after each change.
//!
//! Session phases: Idle -> Connecting -> Open -> PendingRetry -> Connecting.
//! Every connect tears down the previous reader and bumps a session sequence
//! number; events tagged with a stale sequence are dropped, so at most one
//! live session and at most one pending retry exist at any time.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::error::FeedResult;
use crate::core::types::{now_millis, FeedState};
use crate::merge::{append_dedup, patch_existing, replace_wholesale};
use crate::snapshot::{self, FeedSnapshot};
use crate::stream::frames::{FeedFrame, RawFrame};
use crate::transport::FeedTransport;

/// Runtime tuning for the synchronizer.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Capacity bound of the incoming bucket; overflow evicts the tail.
    pub incoming_capacity: usize,
    /// Fixed delay before a reconnect attempt after a session drop.
    pub reconnect_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            incoming_capacity: 50,
            reconnect_delay: Duration::from_millis(5000),
        }
    }
}

/// Messages posted into the driver by reader and loader tasks.
pub(crate) enum FeedEvent {
    SnapshotLoaded(FeedResult<FeedSnapshot>),
    SessionOpened { session: u64 },
    FrameReceived { session: u64, line: String },
    SessionClosed { session: u64, reason: Option<String> },
}

/// Consumer-issued commands. Drained ahead of events (biased select), so a
/// deactivation takes effect before the next queued frame.
pub(crate) enum Command {
    Reconnect,
    Deactivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Idle,
    Connecting,
    Open,
    PendingRetry,
}

enum Tick {
    Command(Option<Command>),
    Event(Option<FeedEvent>),
    RetryFired,
}

pub(crate) struct SessionDriver {
    transport: Arc<dyn FeedTransport>,
    settings: SyncSettings,
    state: FeedState,
    publisher: watch::Sender<FeedState>,
    events_tx: mpsc::UnboundedSender<FeedEvent>,
    events: mpsc::UnboundedReceiver<FeedEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    phase: SessionPhase,
    session_seq: u64,
    reader: Option<JoinHandle<()>>,
    retry_at: Option<Instant>,
}

impl SessionDriver {
    /// Spawn the driver and return the consumer-facing channel ends.
    pub(crate) fn spawn(
        transport: Arc<dyn FeedTransport>,
        settings: SyncSettings,
    ) -> (mpsc::UnboundedSender<Command>, watch::Receiver<FeedState>) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (publisher, state_rx) = watch::channel(FeedState::default());

        let driver = Self {
            transport,
            settings,
            state: FeedState::default(),
            publisher,
            events_tx,
            events,
            commands,
            phase: SessionPhase::Idle,
            session_seq: 0,
            reader: None,
            retry_at: None,
        };
        tokio::spawn(driver.run());

        (commands_tx, state_rx)
    }

    async fn run(mut self) {
        snapshot::spawn_loader(self.transport.clone(), self.events_tx.clone());
        self.begin_connect();

        loop {
            let retry_at = self.retry_at;
            let tick = tokio::select! {
                biased;
                cmd = self.commands.recv() => Tick::Command(cmd),
                event = self.events.recv() => Tick::Event(event),
                _ = async move {
                    match retry_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => Tick::RetryFired,
            };

            match tick {
                Tick::Command(None) | Tick::Command(Some(Command::Deactivate)) => break,
                Tick::Command(Some(Command::Reconnect)) => {
                    info!(phase = ?self.phase, "Explicit reconnect requested");
                    self.begin_connect();
                }
                Tick::RetryFired => {
                    info!("Retry timer fired, reconnecting to push stream");
                    self.begin_connect();
                }
                Tick::Event(Some(event)) => self.handle_event(event),
                // Unreachable while we hold an events_tx clone.
                Tick::Event(None) => break,
            }
        }

        self.teardown();
    }

    /// Tear down any previous session and open a new one.
    fn begin_connect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.retry_at = None;
        self.session_seq += 1;
        self.phase = SessionPhase::Connecting;

        let session = self.session_seq;
        debug!(session, "Opening push session");
        self.reader = Some(tokio::spawn(run_reader(
            self.transport.clone(),
            self.events_tx.clone(),
            session,
        )));
    }

    fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.retry_at = None;
        self.phase = SessionPhase::Idle;
        info!("Feed synchronizer deactivated");
    }

    fn handle_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::SnapshotLoaded(result) => self.apply_snapshot(result),
            FeedEvent::SessionOpened { session } if session == self.session_seq => {
                info!("Push session established");
                self.phase = SessionPhase::Open;
                self.update(|state| {
                    state.status.is_connected = true;
                    state.status.error = None;
                });
            }
            FeedEvent::FrameReceived { session, line } if session == self.session_seq => {
                self.handle_frame(&line);
            }
            FeedEvent::SessionClosed { session, reason } if session == self.session_seq => {
                match &reason {
                    Some(reason) => warn!("Push session closed: {}", reason),
                    None => warn!("Push session ended by upstream"),
                }
                self.reader = None;
                self.phase = SessionPhase::PendingRetry;
                // Connectivity loss is not a data error: status.error stays.
                self.update(|state| state.status.is_connected = false);
                // Replaces any previously scheduled retry.
                self.retry_at = Some(Instant::now() + self.settings.reconnect_delay);
            }
            _ => debug!("Dropping event from a superseded session"),
        }
    }

    fn apply_snapshot(&mut self, result: FeedResult<FeedSnapshot>) {
        let capacity = self.settings.incoming_capacity;
        match result {
            Ok(snapshot) => {
                info!(
                    new = snapshot.new.len(),
                    near_completion = snapshot.near_completion.len(),
                    completed = snapshot.completed.len(),
                    "Initial snapshot loaded"
                );
                let updated_at = snapshot
                    .last_new_update
                    .or(snapshot.last_status_update)
                    .unwrap_or_else(now_millis);
                self.update(|state| {
                    state.buckets.incoming = replace_wholesale(snapshot.new);
                    state.buckets.incoming.truncate(capacity);
                    state.buckets.near_threshold = replace_wholesale(snapshot.near_completion);
                    state.buckets.finalized = replace_wholesale(snapshot.completed);
                    state.status.is_loading = false;
                    state.status.error = None;
                    state.status.last_updated_at = Some(updated_at);
                });
            }
            Err(err) => {
                warn!("Snapshot load failed: {}", err);
                self.update(|state| {
                    state.status.is_loading = false;
                    state.status.error = Some(err.to_string());
                });
            }
        }
    }

    fn handle_frame(&mut self, line: &str) {
        let frame = match RawFrame::parse(line) {
            Ok(frame) => frame,
            Err(err) => {
                // Noise, not a connectivity problem: drop and stay open.
                warn!("Dropping malformed frame: {}", err);
                return;
            }
        };

        let capacity = self.settings.incoming_capacity;
        match frame.classify() {
            FeedFrame::FullState {
                incoming,
                near_threshold,
                finalized,
                timestamp,
            } => {
                self.update(|state| {
                    state.buckets.incoming = replace_wholesale(incoming);
                    state.buckets.incoming.truncate(capacity);
                    state.buckets.near_threshold = replace_wholesale(near_threshold);
                    state.buckets.finalized = replace_wholesale(finalized);
                    state.status.is_loading = false;
                    state.status.last_updated_at = Some(timestamp.unwrap_or_else(now_millis));
                });
            }
            FeedFrame::IncomingAdditions(batch) => {
                // Empty heartbeat payloads must not churn state or freshness.
                if batch.is_empty() {
                    return;
                }
                self.update(|state| {
                    state.buckets.incoming = append_dedup(&batch, &state.buckets.incoming, capacity);
                    state.status.last_updated_at = Some(now_millis());
                });
            }
            FeedFrame::IncomingPatches(batch) => {
                if batch.is_empty() {
                    return;
                }
                self.update(|state| {
                    state.buckets.incoming = patch_existing(&batch, &state.buckets.incoming);
                    state.status.last_updated_at = Some(now_millis());
                });
            }
            FeedFrame::NearThresholdSnapshot(batch) => {
                self.update(|state| {
                    state.buckets.near_threshold = replace_wholesale(batch);
                    state.status.last_updated_at = Some(now_millis());
                });
            }
            FeedFrame::FinalizedSnapshot(batch) => {
                self.update(|state| {
                    state.buckets.finalized = replace_wholesale(batch);
                    state.status.last_updated_at = Some(now_millis());
                });
            }
            FeedFrame::Ignored(kind) => {
                debug!("Ignoring frame with unrecognized type: {}", kind);
            }
        }
    }

    /// Replace the owned state and publish the new snapshot to subscribers.
    fn update(&mut self, apply: impl FnOnce(&mut FeedState)) {
        let mut next = self.state.clone();
        apply(&mut next);
        self.state = next;
        self.publisher.send_replace(self.state.clone());
    }
}

/// Reader task: opens the transport stream, splits it into newline-delimited
/// frames and posts them to the driver. Exits as soon as a send fails, which
/// happens once the driver is gone.
async fn run_reader(
    transport: Arc<dyn FeedTransport>,
    events: mpsc::UnboundedSender<FeedEvent>,
    session: u64,
) {
    let mut stream = match transport.open_stream().await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = events.send(FeedEvent::SessionClosed {
                session,
                reason: Some(err.to_string()),
            });
            return;
        }
    };

    if events.send(FeedEvent::SessionOpened { session }).is_err() {
        return;
    }

    let mut buffer = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    if !dispatch_line(&events, session, line.trim()) {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = events.send(FeedEvent::SessionClosed {
                    session,
                    reason: Some(err.to_string()),
                });
                return;
            }
        }
    }

    // Clean end of stream: a final unterminated frame still counts.
    let tail = buffer.trim().to_string();
    if !tail.is_empty() && !dispatch_line(&events, session, &tail) {
        return;
    }
    let _ = events.send(FeedEvent::SessionClosed {
        session,
        reason: None,
    });
}

/// Forward one frame line, tolerating SSE `data:` framing and keep-alives.
/// Returns false once the driver side is gone.
fn dispatch_line(events: &mpsc::UnboundedSender<FeedEvent>, session: u64, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let payload = line
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(line);
    if payload.is_empty() || payload == "[DONE]" {
        return true;
    }
    events
        .send(FeedEvent::FrameReceived {
            session,
            line: payload.to_string(),
        })
        .is_ok()
}
