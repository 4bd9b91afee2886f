//! Runtime configuration
//!
//! Polling intervals of the sync engines and decode limits. Defaults match
//! the cadence each engine needs: contacts are checked often, mailboxes
//! and file systems less so. Intervals serialize as milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedwireError, FeedwireResult};

/// Contact and first-contact feed polling
pub const DEFAULT_CONTACT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Inbox live-subscription polling
pub const DEFAULT_INBOX_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// File system pull/push loops
pub const DEFAULT_FILE_SYSTEM_POLL_INTERVAL: Duration = Duration::from_secs(120);

/// Largest feed payload or chapter accepted when decoding: 10 MB
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Capacity of the broadcast channels agents publish events on
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedwireConfig {
    #[serde(with = "duration_ms")]
    pub contact_poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub inbox_poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub file_system_poll_interval: Duration,
    /// `None` disables the limit (the declared body size still applies)
    pub max_payload_size: Option<usize>,
    pub event_channel_capacity: usize,
}

impl Default for FeedwireConfig {
    fn default() -> Self {
        Self {
            contact_poll_interval: DEFAULT_CONTACT_POLL_INTERVAL,
            inbox_poll_interval: DEFAULT_INBOX_POLL_INTERVAL,
            file_system_poll_interval: DEFAULT_FILE_SYSTEM_POLL_INTERVAL,
            max_payload_size: Some(DEFAULT_MAX_PAYLOAD_SIZE),
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl FeedwireConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> FeedwireResult<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FeedwireResult<()> {
        let intervals = [
            ("contactPollInterval", self.contact_poll_interval),
            ("inboxPollInterval", self.inbox_poll_interval),
            ("fileSystemPollInterval", self.file_system_poll_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(FeedwireError::Serialization(format!("{} must be > 0", name)));
        }
        if self.event_channel_capacity == 0 {
            return Err(FeedwireError::Serialization(
                "eventChannelCapacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Same intervals for every engine; handy in tests.
    pub fn with_poll_interval(interval: Duration) -> Self {
        Self {
            contact_poll_interval: interval,
            inbox_poll_interval: interval,
            file_system_poll_interval: interval,
            ..Self::default()
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
