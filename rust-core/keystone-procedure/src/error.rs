// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Error types for the procedure framework.

use thiserror::Error;

use keystone_wal::WalError;

use crate::id::ProcedureId;

/// Errors surfaced by the procedure store, manager and watchers.
#[derive(Debug, Error)]
pub enum ProcedureError {
    /// The write-ahead log rejected a read or write.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// A record or procedure dump could not be encoded or decoded.
    #[error("procedure codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A step failed with an error that is not retried.
    #[error("procedure step failed: {0}")]
    StepFailed(String),

    /// A step kept failing until the retry budget ran out.
    #[error("procedure failed after {attempts} retries: {cause}")]
    RetryExhausted {
        /// Retries made before giving up.
        attempts: u32,
        /// Message of the last step error.
        cause: String,
    },

    /// The procedure was cancelled.
    #[error("procedure cancelled")]
    Cancelled,

    /// A state transition could not be made durable.
    #[error("failed to persist procedure state: {0}")]
    PersistFailed(String),

    /// The persisted procedure could not be rebuilt.
    #[error("failed to load procedure: {0}")]
    LoadFailed(String),

    /// A live procedure already uses this id.
    #[error("procedure {0} already exists")]
    ProcedureExists(ProcedureId),

    /// No procedure with this id is known.
    #[error("procedure {0} not found")]
    ProcedureNotFound(ProcedureId),

    /// No loader is registered for the type name.
    #[error("no loader registered for procedure type {0}")]
    LoaderNotFound(String),

    /// A loader is already registered for the type name.
    #[error("loader for procedure type {0} already registered")]
    LoaderExists(String),

    /// The manager has been stopped and accepts no more work.
    #[error("procedure manager stopped")]
    ManagerStopped,
}

/// Convenience type alias for procedure results.
pub type ProcedureResult<T> = Result<T, ProcedureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_exhausted_display() {
        let error = ProcedureError::RetryExhausted {
            attempts: 3,
            cause: "region busy".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "procedure failed after 3 retries: region busy"
        );
    }

    #[test]
    fn test_wal_error_converts() {
        let wal = WalError::SegmentNotFound(4);
        let error: ProcedureError = wal.into();
        assert!(matches!(error, ProcedureError::Wal(WalError::SegmentNotFound(4))));
    }
}
