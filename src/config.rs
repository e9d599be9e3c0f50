//! Configuration management for the feed synchronizer

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::stream::session::SyncSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub endpoints: EndpointsConfig,
    pub feed: FeedSettings,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EndpointsConfig {
    #[validate(url)]
    pub snapshot_url: String,
    #[validate(url)]
    pub stream_url: String,
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FeedSettings {
    /// Capacity bound of the incoming bucket.
    #[validate(range(min = 1, max = 10000))]
    pub incoming_capacity: usize,
    /// Fixed reconnect delay after a session drop.
    #[validate(range(min = 100, max = 300_000))]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub structured_logging: bool,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            snapshot_url: "http://localhost:8080/api/feed/snapshot".to_string(),
            stream_url: "http://localhost:8080/api/feed/stream".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            incoming_capacity: 50,
            reconnect_delay_ms: 5000,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            structured_logging: false,
        }
    }
}

impl FeedSettings {
    /// Runtime tuning handed to the session driver.
    pub fn tuning(&self) -> SyncSettings {
        SyncSettings {
            incoming_capacity: self.incoming_capacity,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

impl EndpointsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl FeedConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    /// Validate all sections
    pub fn check(&self) -> Result<()> {
        self.endpoints.validate()?;
        self.feed.validate()?;
        if self.endpoints.snapshot_url.is_empty() {
            return Err(anyhow::anyhow!("Snapshot endpoint cannot be empty"));
        }
        if self.endpoints.stream_url.is_empty() {
            return Err(anyhow::anyhow!("Stream endpoint cannot be empty"));
        }
        Ok(())
    }
}
