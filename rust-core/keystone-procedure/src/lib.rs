// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone procedure framework
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Multi-step operations that survive crashes. Every state change of a
// procedure is appended to the Keystone WAL before it is acted on, so after a
// restart the manager replays the log and resumes each unfinished procedure
// from its last recorded state.
//
// # Lifecycle
//
// ```text
// Pending -> Running -> Completed
//               |  ^
//               v  |
//            Retrying        (any non-terminal state) -> Failed
// ```
//
// A step that fails with a retryable error moves the procedure to
// `Retrying`; the retry scheduler re-admits it after the configured delay
// until the retry budget is spent, at which point it fails with the last
// step error as its cause.
//
// ## Usage
//
// ```no_run
// use std::sync::Arc;
// use keystone_procedure::{ProcedureConfig, ProcedureManager, ProcedureStore};
// use keystone_wal::{WalConfig, WalWriter};
//
// # async fn run(procedure: keystone_procedure::BoxedProcedure) -> keystone_procedure::ProcedureResult<()> {
// let wal = Arc::new(WalWriter::open("/tmp/keystone-wal", WalConfig::default())?);
// let manager = ProcedureManager::new(Arc::new(ProcedureStore::new(wal)), ProcedureConfig::default());
// manager.start()?;
// manager.recover()?;
//
// let mut watcher = manager.submit(procedure)?;
// let output = watcher.wait().await?;
// println!("finished with {output:?}");
// manager.stop().await;
// # Ok(())
// # }
// ```

pub mod config;
pub mod error;
pub mod id;
pub mod manager;
pub mod procedure;
pub mod record;
pub mod recovery;
pub mod replay;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod watcher;

pub use config::ProcedureConfig;
pub use error::{ProcedureError, ProcedureResult};
pub use id::ProcedureId;
pub use manager::ProcedureManager;
pub use procedure::{
    BoxedProcedure, Context, LoaderRegistry, Procedure, ProcedureLoader, Status, StepError,
};
pub use record::{LogRecord, ProcedureRecord};
pub use recovery::{RecoveryReport, SkippedProcedure};
pub use replay::{replay, LiveRecord, ReplayState};
pub use scheduler::RetryScheduler;
pub use state::{ProcedureFailure, ProcedureState, RetryPolicy};
pub use store::ProcedureStore;
pub use watcher::{ProcedureStatus, ProcedureWatcher};
