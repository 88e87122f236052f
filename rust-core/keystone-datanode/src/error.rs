// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Datanode errors.

use std::path::PathBuf;

use keystone_procedure::ProcedureError;
use keystone_wal::WalError;
use thiserror::Error;

/// Errors raised while assembling or running a datanode.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("Procedure error: {0}")]
    Procedure(#[from] ProcedureError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },

    #[error("Invalid value {value:?} for {name}")]
    InvalidEnv { name: String, value: String },

    #[error("Failed to initialise logging: {0}")]
    Logging(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Result alias for datanode operations.
pub type NodeResult<T> = Result<T, NodeError>;
