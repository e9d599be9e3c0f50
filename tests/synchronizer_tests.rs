//! End-to-end synchronizer tests against a scripted transport
//!
//! Each test drives the synchronizer with canned snapshot results and stream
//! scripts instead of live endpoints. Channel-backed streams stay open until
//! the test drops the sender.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use token_feed_sync::{
    resolve_key, FeedError, FeedResult, FeedSnapshot, FeedState, FeedSynchronizer, FeedTransport,
    FrameByteStream, SyncSettings, TokenRecord,
};

enum StreamScript {
    /// Transport-level connect failure.
    Fail(String),
    /// Frames delivered immediately, then clean end-of-stream.
    Frames(Vec<String>),
    /// Stream fed by the test through a channel; stays open until dropped.
    Channel(mpsc::UnboundedReceiver<FeedResult<Bytes>>),
}

#[derive(Default)]
struct ScriptedTransport {
    snapshots: Mutex<VecDeque<FeedResult<FeedSnapshot>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    stream_attempts: AtomicUsize,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_snapshot(&self, result: FeedResult<FeedSnapshot>) {
        self.snapshots.lock().unwrap().push_back(result);
    }

    fn push_stream(&self, script: StreamScript) {
        self.streams.lock().unwrap().push_back(script);
    }

    fn attempts(&self) -> usize {
        self.stream_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn fetch_snapshot(&self) -> FeedResult<FeedSnapshot> {
        match self.snapshots.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Err(FeedError::Transport("no snapshot scripted".to_string())),
        }
    }

    async fn open_stream(&self) -> FeedResult<FrameByteStream> {
        self.stream_attempts.fetch_add(1, Ordering::SeqCst);
        match self.streams.lock().unwrap().pop_front() {
            Some(StreamScript::Fail(reason)) => Err(FeedError::Transport(reason)),
            Some(StreamScript::Frames(lines)) => {
                let chunks: Vec<FeedResult<Bytes>> = lines
                    .into_iter()
                    .map(|line| Ok(Bytes::from(format!("{line}\n"))))
                    .collect();
                Ok(Box::pin(futures::stream::iter(chunks)))
            }
            Some(StreamScript::Channel(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            None => Err(FeedError::Transport("no stream scripted".to_string())),
        }
    }
}

fn token(key: &str) -> TokenRecord {
    serde_json::from_value(json!({ "mint": key })).unwrap()
}

fn keys(bucket: &[TokenRecord]) -> Vec<String> {
    bucket.iter().map(resolve_key).collect()
}

fn frame(value: serde_json::Value) -> FeedResult<Bytes> {
    Ok(Bytes::from(format!("{value}\n")))
}

/// Open channel-backed stream plus the sender feeding it.
fn open_channel_stream(transport: &ScriptedTransport) -> mpsc::UnboundedSender<FeedResult<Bytes>> {
    let (tx, rx) = mpsc::unbounded_channel();
    transport.push_stream(StreamScript::Channel(rx));
    tx
}

async fn wait_for<F>(updates: &mut watch::Receiver<FeedState>, predicate: F) -> FeedState
where
    F: Fn(&FeedState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if predicate(&updates.borrow()) {
                break;
            }
            updates.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("timed out waiting for feed state");
    updates.borrow().clone()
}

/// Let spawned tasks drain their queues without advancing the paused clock.
async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_snapshot_populates_initial_state() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot {
        new: vec![token("t1"), token("t2")],
        ..Default::default()
    }));
    let _stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();

    let state = wait_for(&mut updates, |s| !s.status.is_loading).await;
    assert_eq!(keys(&state.buckets.incoming), vec!["t1", "t2"]);
    assert!(state.buckets.near_threshold.is_empty());
    assert!(state.buckets.finalized.is_empty());
    assert_eq!(state.status.error, None);
}

#[tokio::test]
async fn test_snapshot_failure_surfaces_error_without_touching_buckets() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Err(FeedError::SnapshotStatus { status: 503 }));
    let _stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();

    let state = wait_for(&mut updates, |s| !s.status.is_loading).await;
    let error = state.status.error.expect("error should be surfaced");
    assert!(error.contains("503"), "unexpected error: {error}");
    assert!(state.buckets.incoming.is_empty());
}

#[tokio::test]
async fn test_duplicate_additions_are_deduplicated() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot {
        new: vec![token("t1"), token("t2")],
        ..Default::default()
    }));
    let stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();
    wait_for(&mut updates, |s| s.buckets.incoming.len() == 2).await;

    let addition = json!({ "type": "new_tokens", "tokens": [{ "mint": "t3" }] });
    stream.send(frame(addition.clone())).unwrap();
    wait_for(&mut updates, |s| s.buckets.incoming.len() == 3).await;

    // Re-deliver the same frame; the duplicate key must not grow the bucket.
    stream.send(frame(addition)).unwrap();
    stream
        .send(frame(json!({ "type": "new_tokens", "tokens": [{ "mint": "t4" }] })))
        .unwrap();

    let state = wait_for(&mut updates, |s| s.buckets.incoming.len() == 4).await;
    assert_eq!(keys(&state.buckets.incoming), vec!["t4", "t3", "t1", "t2"]);
}

#[tokio::test]
async fn test_updates_patch_known_entities_in_place() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot {
        new: vec![token("t1"), token("t2")],
        ..Default::default()
    }));
    let stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();
    wait_for(&mut updates, |s| s.buckets.incoming.len() == 2).await;

    stream
        .send(frame(json!({
            "type": "token_updates",
            "tokens": [{ "mint": "t1", "price": 5 }, { "mint": "unknown", "price": 1 }]
        })))
        .unwrap();

    let state = wait_for(&mut updates, |s| {
        s.buckets
            .incoming
            .first()
            .map(|r| r.extra.get("price") == Some(&json!(5)))
            .unwrap_or(false)
    })
    .await;

    // Same length and key set; only the matching entity was refreshed.
    assert_eq!(keys(&state.buckets.incoming), vec!["t1", "t2"]);
    assert_eq!(state.buckets.incoming[1].extra.get("price"), None);
}

#[tokio::test]
async fn test_full_state_frame_replaces_all_buckets() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Err(FeedError::Transport("offline".to_string())));
    let stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();

    stream
        .send(frame(json!({
            "type": "initial_state",
            "data": {
                "new": [{ "mint": "n1" }],
                "nearCompletion": [{ "mint": "nc1" }],
                "completed": [{ "mint": "c1" }, { "mint": "c2" }]
            },
            "timestamp": 1_700_000_000_000i64
        })))
        .unwrap();

    let state = wait_for(&mut updates, |s| !s.buckets.finalized.is_empty()).await;
    assert_eq!(keys(&state.buckets.incoming), vec!["n1"]);
    assert_eq!(keys(&state.buckets.near_threshold), vec!["nc1"]);
    assert_eq!(keys(&state.buckets.finalized), vec!["c1", "c2"]);
    assert!(!state.status.is_loading);
    assert_eq!(state.status.last_updated_at, Some(1_700_000_000_000));
}

#[tokio::test]
async fn test_bucket_snapshots_replace_wholesale() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot {
        near_completion: vec![token("old1"), token("old2")],
        ..Default::default()
    }));
    let stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();
    wait_for(&mut updates, |s| s.buckets.near_threshold.len() == 2).await;

    stream
        .send(frame(json!({
            "type": "near_completion_snapshot",
            "tokens": [{ "mint": "fresh" }]
        })))
        .unwrap();
    stream
        .send(frame(json!({
            "type": "completed_snapshot",
            "tokens": [{ "mint": "done" }]
        })))
        .unwrap();

    let state = wait_for(&mut updates, |s| !s.buckets.finalized.is_empty()).await;
    assert_eq!(keys(&state.buckets.near_threshold), vec!["fresh"]);
    assert_eq!(keys(&state.buckets.finalized), vec!["done"]);
}

#[tokio::test]
async fn test_malformed_and_unknown_frames_are_dropped_quietly() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot::default()));
    let stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();
    wait_for(&mut updates, |s| s.status.is_connected).await;

    stream.send(Ok(Bytes::from("not json at all\n"))).unwrap();
    stream
        .send(frame(json!({ "type": "mystery_tag", "tokens": [{ "mint": "x" }] })))
        .unwrap();
    stream
        .send(frame(json!({ "type": "new_tokens", "tokens": [{ "mint": "t1" }] })))
        .unwrap();

    // The session survived the noise and kept processing.
    let state = wait_for(&mut updates, |s| s.buckets.incoming.len() == 1).await;
    assert!(state.status.is_connected);
    assert_eq!(state.status.error, None);
    assert_eq!(keys(&state.buckets.incoming), vec!["t1"]);
}

#[tokio::test]
async fn test_empty_payloads_do_not_bump_freshness() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot {
        new: vec![token("t1")],
        last_new_update: Some(123),
        ..Default::default()
    }));
    let stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();
    wait_for(&mut updates, |s| !s.status.is_loading).await;
    assert_eq!(sync.state().status.last_updated_at, Some(123));

    // Heartbeat-style empty payloads: no data motion, no freshness bump.
    stream
        .send(frame(json!({ "type": "new_tokens", "tokens": [] })))
        .unwrap();
    stream
        .send(frame(json!({ "type": "token_updates", "tokens": [] })))
        .unwrap();
    settle().await;
    assert_eq!(sync.state().status.last_updated_at, Some(123));
    assert_eq!(keys(&sync.state().buckets.incoming), vec!["t1"]);

    stream
        .send(frame(json!({ "type": "new_tokens", "tokens": [{ "mint": "t2" }] })))
        .unwrap();
    let state = wait_for(&mut updates, |s| s.buckets.incoming.len() == 2).await;
    assert_ne!(state.status.last_updated_at, Some(123));
}

#[tokio::test]
async fn test_capacity_overflow_evicts_oldest_entries() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot {
        new: (0..50).map(|i| token(&format!("old{i}"))).collect(),
        ..Default::default()
    }));
    let stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();
    wait_for(&mut updates, |s| s.buckets.incoming.len() == 50).await;

    let fresh: Vec<_> = (0..10).map(|i| json!({ "mint": format!("new{i}") })).collect();
    stream
        .send(frame(json!({ "type": "new_tokens", "tokens": fresh })))
        .unwrap();

    let state = wait_for(&mut updates, |s| {
        s.buckets
            .incoming
            .first()
            .map(|r| resolve_key(r) == "new0")
            .unwrap_or(false)
    })
    .await;

    let bucket_keys = keys(&state.buckets.incoming);
    assert_eq!(bucket_keys.len(), 50);
    assert_eq!(&bucket_keys[..3], ["new0", "new1", "new2"]);
    // The 10 oldest previous entries fell off the tail.
    assert_eq!(bucket_keys.last().map(String::as_str), Some("old39"));
    assert!(!bucket_keys.iter().any(|k| k == "old40"));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_schedules_exactly_one_retry() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot::default()));
    // Session 1 opens, then ends immediately.
    transport.push_stream(StreamScript::Frames(vec![]));
    // Retry 1 fails at the transport level.
    transport.push_stream(StreamScript::Fail("connection refused".to_string()));
    // Retry 2 succeeds and stays open.
    let _stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());

    settle().await;
    assert_eq!(transport.attempts(), 1);
    assert!(!sync.state().status.is_connected);

    // Nothing reconnects before the fixed 5000 ms delay elapses.
    tokio::time::sleep(Duration::from_millis(4900)).await;
    settle().await;
    assert_eq!(transport.attempts(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(transport.attempts(), 2);
    assert!(!sync.state().status.is_connected);

    // The failed retry scheduled exactly one more attempt.
    tokio::time::sleep(Duration::from_millis(5100)).await;
    settle().await;
    assert_eq!(transport.attempts(), 3);
    assert!(sync.state().status.is_connected);

    // Stable session: no retry storm afterwards.
    tokio::time::sleep(Duration::from_secs(60)).await;
    settle().await;
    assert_eq!(transport.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_reconnect_tears_down_current_session() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot::default()));
    let stream_a = open_channel_stream(&transport);
    let stream_b = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();
    settle().await;
    assert_eq!(transport.attempts(), 1);

    sync.reconnect();
    settle().await;
    assert_eq!(transport.attempts(), 2);

    // Frames from the superseded session must not be applied.
    let _ = stream_a.send(frame(json!({
        "type": "new_tokens", "tokens": [{ "mint": "stale" }]
    })));
    stream_b
        .send(frame(json!({
            "type": "new_tokens", "tokens": [{ "mint": "live" }]
        })))
        .unwrap();

    let state = wait_for(&mut updates, |s| !s.buckets.incoming.is_empty()).await;
    assert_eq!(keys(&state.buckets.incoming), vec!["live"]);
}

#[tokio::test(start_paused = true)]
async fn test_deactivation_stops_frames_and_timers() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot {
        new: vec![token("t1")],
        ..Default::default()
    }));
    let stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    settle().await;
    assert_eq!(keys(&sync.state().buckets.incoming), vec!["t1"]);
    assert_eq!(transport.attempts(), 1);

    let before = sync.state();
    sync.deactivate();
    settle().await;

    // A post-deactivation frame must not mutate state.
    let _ = stream.send(frame(json!({
        "type": "new_tokens", "tokens": [{ "mint": "t2" }]
    })));
    settle().await;

    // Nor may any orphan retry timer fire and reconnect.
    tokio::time::sleep(Duration::from_secs(60)).await;
    settle().await;

    assert_eq!(sync.state(), before);
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn test_dropping_the_handle_deactivates() {
    let transport = ScriptedTransport::new();
    transport.push_snapshot(Ok(FeedSnapshot::default()));
    let _stream = open_channel_stream(&transport);

    let sync = FeedSynchronizer::start(transport.clone(), SyncSettings::default());
    let mut updates = sync.subscribe();
    wait_for(&mut updates, |s| s.status.is_connected).await;

    drop(sync);
    // The driver exits and drops its publisher; subscribers observe closure.
    tokio::time::timeout(Duration::from_secs(5), async {
        while updates.changed().await.is_ok() {}
    })
    .await
    .expect("driver did not shut down after handle drop");
}
