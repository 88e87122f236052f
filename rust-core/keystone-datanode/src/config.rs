// SPDX-License-Identifier: PMPL-1.0-or-later
//! Datanode configuration.
//!
//! Loaded from a JSON file (every field optional) and then overridden from
//! `KEYSTONE_*` environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `KEYSTONE_DATA_DIR` | `data_dir` |
//! | `KEYSTONE_SYNC_WRITE` | `wal.sync_write` |
//! | `KEYSTONE_WAL_SEGMENT_SIZE` | `wal.segment_size` |
//! | `KEYSTONE_MAX_RETRY_TIMES` | `procedure.max_retry_times` |
//! | `KEYSTONE_RETRY_DELAY_MS` | `procedure.retry_delay_ms` |
//! | `KEYSTONE_LOG_FORMAT` | `log_format` |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use keystone_procedure::ProcedureConfig;
use keystone_wal::WalConfig;
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};

/// Default interval between purge checks.
pub const DEFAULT_PURGE_CHECK_INTERVAL_SECS: u64 = 60;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Everything a datanode needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory; the WAL lives in `<data_dir>/wal`.
    pub data_dir: PathBuf,
    /// Write-ahead log options.
    pub wal: WalConfig,
    /// Procedure manager options.
    pub procedure: ProcedureConfig,
    /// Seconds between purge checks.
    pub purge_check_interval_secs: u64,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./keystone-data"),
            wal: WalConfig::default(),
            procedure: ProcedureConfig::default(),
            purge_check_interval_secs: DEFAULT_PURGE_CHECK_INTERVAL_SECS,
            log_format: LogFormat::default(),
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let config_error = |reason: String| NodeError::ConfigFile {
            path: path.to_path_buf(),
            reason,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| config_error(e.to_string()))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> NodeResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> NodeResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(dir) = var("KEYSTONE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = var("KEYSTONE_SYNC_WRITE") {
            self.wal.sync_write = parse_bool("KEYSTONE_SYNC_WRITE", &value)?;
        }
        if let Some(value) = var("KEYSTONE_WAL_SEGMENT_SIZE") {
            self.wal.segment_size = parse("KEYSTONE_WAL_SEGMENT_SIZE", &value)?;
        }
        if let Some(value) = var("KEYSTONE_MAX_RETRY_TIMES") {
            self.procedure.max_retry_times = parse("KEYSTONE_MAX_RETRY_TIMES", &value)?;
        }
        if let Some(value) = var("KEYSTONE_RETRY_DELAY_MS") {
            self.procedure.retry_delay_ms = parse("KEYSTONE_RETRY_DELAY_MS", &value)?;
        }
        if let Some(value) = var("KEYSTONE_LOG_FORMAT") {
            self.log_format = parse("KEYSTONE_LOG_FORMAT", &value)?;
        }
        Ok(())
    }

    /// Directory holding the WAL segments.
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// Interval between purge checks, at least one second.
    pub fn purge_check_interval(&self) -> Duration {
        Duration::from_secs(self.purge_check_interval_secs.max(1))
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> NodeResult<T> {
    value.trim().parse().map_err(|_| NodeError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> NodeResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(NodeError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.purge_check_interval_secs, 60);
        assert_eq!(config.wal_dir(), PathBuf::from("./keystone-data/wal"));
        assert_eq!(config.procedure.max_retry_times, 3);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_from_file_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(
            &path,
            r#"{
                "data_dir": "/var/lib/keystone",
                "wal": { "segment_size": 4096, "sync_write": true },
                "procedure": { "retry_delay_ms": 250 },
                "log_format": "json"
            }"#,
        )
        .unwrap();

        let config = NodeConfig::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/keystone"));
        assert_eq!(config.wal.segment_size, 4096);
        assert!(config.wal.sync_write);
        assert_eq!(config.wal.read_batch_size, 128);
        assert_eq!(config.procedure.retry_delay_ms, 250);
        assert_eq!(config.procedure.max_retry_times, 3);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_from_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            NodeConfig::from_file(dir.path().join("missing.json")),
            Err(NodeError::ConfigFile { .. })
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            NodeConfig::from_file(&path),
            Err(NodeError::ConfigFile { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = NodeConfig::default();
        config
            .apply_overrides(lookup(&[
                ("KEYSTONE_DATA_DIR", "/data"),
                ("KEYSTONE_SYNC_WRITE", "true"),
                ("KEYSTONE_WAL_SEGMENT_SIZE", "1048576"),
                ("KEYSTONE_MAX_RETRY_TIMES", "5"),
                ("KEYSTONE_RETRY_DELAY_MS", " 100 "),
                ("KEYSTONE_LOG_FORMAT", "JSON"),
            ]))
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert!(config.wal.sync_write);
        assert_eq!(config.wal.segment_size, 1_048_576);
        assert_eq!(config.procedure.max_retry_times, 5);
        assert_eq!(config.procedure.retry_delay_ms, 100);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_override_ignored() {
        let mut config = NodeConfig::default();
        config
            .apply_overrides(lookup(&[("KEYSTONE_DATA_DIR", "  ")]))
            .unwrap();
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = NodeConfig::default();
        let result = config.apply_overrides(lookup(&[("KEYSTONE_MAX_RETRY_TIMES", "many")]));
        assert!(matches!(
            result,
            Err(NodeError::InvalidEnv { name, .. }) if name == "KEYSTONE_MAX_RETRY_TIMES"
        ));

        let result = config.apply_overrides(lookup(&[("KEYSTONE_SYNC_WRITE", "maybe")]));
        assert!(matches!(result, Err(NodeError::InvalidEnv { .. })));
    }
}
