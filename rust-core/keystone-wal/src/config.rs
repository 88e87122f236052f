// SPDX-License-Identifier: PMPL-1.0-or-later
//! WAL configuration.
//!
//! Defaults follow the datanode storage options:
//! - segment size: 1 GiB
//! - purge interval: 10 minutes
//! - purge threshold: 50 GiB
//! - read batch size: 128
//! - sync write: off

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{WalError, WalResult};
use crate::writer::SyncMode;

/// Default maximum segment size in bytes (1 GiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

/// Default age after which a sealed segment becomes purgeable (10 minutes).
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 10 * 60;

/// Default cumulative sealed-segment size that triggers purge (50 GiB).
pub const DEFAULT_PURGE_THRESHOLD: u64 = 50 * 1024 * 1024 * 1024;

/// Default number of entries per replay fetch.
pub const DEFAULT_READ_BATCH_SIZE: usize = 128;

/// What replay does when it meets a corrupt entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CorruptionPolicy {
    /// Stop recovery and surface the error.
    #[default]
    Abort,
    /// Cut the log at the last good entry and continue with that prefix.
    Truncate,
}

/// Configuration for the segmented write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Maximum size of a segment before the store rotates to a new one.
    pub segment_size: u64,
    /// Age (seconds since sealing) after which a sealed segment may be purged.
    pub purge_interval_secs: u64,
    /// Cumulative sealed-segment size above which the oldest segments are purged.
    pub purge_threshold: u64,
    /// Entries per underlying fetch during replay.
    pub read_batch_size: usize,
    /// Flush every write to stable storage before acknowledging it.
    pub sync_write: bool,
    /// With `sync_write` off, flush at most once per this many milliseconds.
    /// `None` leaves flushing to the OS.
    pub sync_period_ms: Option<u64>,
    /// Replay behaviour on checksum failure.
    pub corruption_policy: CorruptionPolicy,
}

impl WalConfig {
    /// The purge age threshold as a `Duration`.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    /// The durability mode implied by `sync_write` and `sync_period_ms`.
    pub fn sync_mode(&self) -> SyncMode {
        match (self.sync_write, self.sync_period_ms) {
            (true, _) => SyncMode::Fsync,
            (false, Some(ms)) => SyncMode::Periodic(Duration::from_millis(ms)),
            (false, None) => SyncMode::Async,
        }
    }

    /// Reject values the store cannot operate with.
    pub fn validate(&self) -> WalResult<()> {
        if self.segment_size == 0 {
            return Err(WalError::InvalidConfig(
                "segment_size must be greater than zero".to_string(),
            ));
        }
        if self.read_batch_size == 0 {
            return Err(WalError::InvalidConfig(
                "read_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            purge_interval_secs: DEFAULT_PURGE_INTERVAL_SECS,
            purge_threshold: DEFAULT_PURGE_THRESHOLD,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
            sync_write: false,
            sync_period_ms: None,
            corruption_policy: CorruptionPolicy::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WalConfig::default();
        assert_eq!(config.segment_size, 1 << 30);
        assert_eq!(config.purge_interval(), Duration::from_secs(600));
        assert_eq!(config.purge_threshold, 50 * (1 << 30));
        assert_eq!(config.read_batch_size, 128);
        assert!(!config.sync_write);
        assert!(matches!(config.sync_mode(), SyncMode::Async));
        config.validate().unwrap();
    }

    #[test]
    fn test_sync_mode_selection() {
        let config = WalConfig {
            sync_write: true,
            sync_period_ms: Some(50),
            ..Default::default()
        };
        assert!(matches!(config.sync_mode(), SyncMode::Fsync));

        let config = WalConfig {
            sync_period_ms: Some(50),
            ..Default::default()
        };
        assert!(matches!(
            config.sync_mode(),
            SyncMode::Periodic(d) if d == Duration::from_millis(50)
        ));
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = WalConfig {
            segment_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(WalError::InvalidConfig(_))));

        let config = WalConfig {
            read_batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WalConfig =
            serde_json::from_str(r#"{"sync_write": true, "corruption_policy": "truncate"}"#)
                .unwrap();
        assert!(config.sync_write);
        assert_eq!(config.corruption_policy, CorruptionPolicy::Truncate);
        assert_eq!(config.read_batch_size, DEFAULT_READ_BATCH_SIZE);
    }
}
