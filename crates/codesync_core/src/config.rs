//! Session configuration.
//!
//! Every tunable has a default, so a config file only needs to name the room:
//!
//! ```toml
//! room_id = "interview-42"
//! coalesce_window_ms = 100
//! payload_format = "envelope"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The config file is not valid TOML for [`SyncConfig`].
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Outbound `code-change` payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Structured envelopes carrying a single edit.
    #[default]
    Envelope,
    /// The whole buffer as a string, for peers that only understand full text.
    FullText,
}

/// Configuration for one collaborative editing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Room shared by all peers editing the same document.
    pub room_id: String,
    /// Identifier of this peer, unique within the room.
    pub sender_id: String,
    /// Edits to the same region within this window are merged before sending.
    /// Zero sends every edit immediately.
    pub coalesce_window_ms: u64,
    /// How long a sent edit may stay unacknowledged before it is resent.
    pub ack_timeout_ms: u64,
    /// Resend attempts before an unacknowledged edit is abandoned.
    pub max_resends: u32,
    /// Consecutive dropped envelopes/edits that trigger a full resync.
    pub resync_threshold: u32,
    /// Outbound payload shape.
    pub payload_format: PayloadFormat,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            room_id: String::new(),
            sender_id: uuid::Uuid::new_v4().to_string(),
            coalesce_window_ms: 150,
            ack_timeout_ms: 5_000,
            max_resends: 3,
            resync_threshold: 3,
            payload_format: PayloadFormat::Envelope,
        }
    }
}

impl SyncConfig {
    /// Create a config for `room_id` with a random sender id and default tunables.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ..Self::default()
        }
    }

    /// Set the sender id.
    pub fn with_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    /// Set the coalescing window.
    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window_ms = window.as_millis() as u64;
        self
    }

    /// Set the acknowledgement timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the resend limit.
    pub fn with_max_resends(mut self, max_resends: u32) -> Self {
        self.max_resends = max_resends;
        self
    }

    /// Set the resync threshold.
    pub fn with_resync_threshold(mut self, threshold: u32) -> Self {
        self.resync_threshold = threshold;
        self
    }

    /// Set the outbound payload format.
    pub fn with_payload_format(mut self, format: PayloadFormat) -> Self {
        self.payload_format = format;
        self
    }

    /// Coalescing window as a [`Duration`].
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    /// Acknowledgement timeout as a [`Duration`].
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Check that the values can drive a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.room_id.is_empty() {
            return Err(ConfigError::Invalid {
                field: "room_id",
                reason: "must not be empty".to_string(),
            });
        }
        if self.sender_id.is_empty() {
            return Err(ConfigError::Invalid {
                field: "sender_id",
                reason: "must not be empty".to_string(),
            });
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "ack_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.resync_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "resync_threshold",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
