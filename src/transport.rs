//! Transport port and its HTTP adapter
//!
//! The synchronizer talks to upstream through this seam only, so tests can
//! substitute a scripted transport for the real endpoints.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;
use std::time::Duration;

use crate::core::error::{FeedError, FeedResult};
use crate::snapshot::FeedSnapshot;

/// Raw byte stream of the push session, chunked as delivered by the wire.
pub type FrameByteStream = Pin<Box<dyn Stream<Item = FeedResult<Bytes>> + Send>>;

/// Upstream transport port: one-shot snapshot fetch plus push-session open.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Fetch the full authoritative state of all buckets.
    async fn fetch_snapshot(&self) -> FeedResult<FeedSnapshot>;

    /// Open a push session. Returning `Ok` is the session-established signal;
    /// the stream then yields raw bytes until error or end-of-stream.
    async fn open_stream(&self) -> FeedResult<FrameByteStream>;
}

/// HTTP transport against the real snapshot and stream endpoints.
pub struct HttpTransport {
    client: reqwest::Client,
    snapshot_url: String,
    stream_url: String,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(snapshot_url: String, stream_url: String, request_timeout: Duration) -> Self {
        Self {
            // No client-wide timeout: it would also cap the long-lived
            // streaming response. The snapshot request is bounded per-call.
            client: reqwest::Client::new(),
            snapshot_url,
            stream_url,
            request_timeout,
        }
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn fetch_snapshot(&self) -> FeedResult<FeedSnapshot> {
        let response = self
            .client
            .get(&self.snapshot_url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::SnapshotStatus {
                status: response.status().as_u16(),
            });
        }

        Ok(response.json().await?)
    }

    async fn open_stream(&self) -> FeedResult<FrameByteStream> {
        let response = self
            .client
            .get(&self.stream_url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::StreamStatus {
                status: response.status().as_u16(),
            });
        }

        Ok(Box::pin(response.bytes_stream().map_err(FeedError::from)))
    }
}
