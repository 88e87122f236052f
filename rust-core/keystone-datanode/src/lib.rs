// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone datanode
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Wires the write-ahead log and the procedure framework into a node:
// configuration from file and environment, logging, the node lifecycle and
// the background task that purges WAL segments no unfinished procedure
// still needs.

pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod purge;

pub use config::{LogFormat, NodeConfig, DEFAULT_PURGE_CHECK_INTERVAL_SECS};
pub use error::{NodeError, NodeResult};
pub use logging::init_logging;
pub use node::Datanode;
pub use purge::{purge_once, spawn_purge_task};
