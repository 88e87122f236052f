// SPDX-License-Identifier: PMPL-1.0-or-later
//! Procedure manager configuration.
//!
//! Defaults follow the datanode procedure options:
//! - max retry times: 3
//! - retry delay: 500 ms
//! - max running procedures: 128

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::RetryPolicy;

/// Default number of procedures executing at once.
pub const DEFAULT_MAX_RUNNING_PROCEDURES: usize = 128;

/// Default number of finished procedure statuses kept for queries.
pub const DEFAULT_MAX_FINISHED_PROCEDURES: usize = 1024;

/// Configuration for the procedure manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureConfig {
    /// Retries allowed over the whole life of a procedure. The count is not
    /// reset when a later step succeeds.
    pub max_retry_times: u32,
    /// Fixed delay between attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Upper bound on concurrently executing procedures.
    pub max_running_procedures: usize,
    /// How many terminal statuses `procedure_state` remembers.
    pub max_finished_procedures: usize,
}

impl ProcedureConfig {
    /// The retry policy these options describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retry_times: self.max_retry_times,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl Default for ProcedureConfig {
    fn default() -> Self {
        Self {
            max_retry_times: RetryPolicy::DEFAULT_MAX_RETRY_TIMES,
            retry_delay_ms: RetryPolicy::DEFAULT_RETRY_DELAY.as_millis() as u64,
            max_running_procedures: DEFAULT_MAX_RUNNING_PROCEDURES,
            max_finished_procedures: DEFAULT_MAX_FINISHED_PROCEDURES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcedureConfig::default();
        assert_eq!(config.max_retry_times, 3);
        assert_eq!(config.retry_delay_ms, 500);
        assert_eq!(config.max_running_procedures, 128);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_partial_json() {
        let config: ProcedureConfig = serde_json::from_str(r#"{"max_retry_times": 1}"#).unwrap();
        assert_eq!(config.max_retry_times, 1);
        assert_eq!(config.retry_delay_ms, 500);
    }
}
