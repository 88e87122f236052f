// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! The `Procedure` trait and loader registry.
//!
//! A procedure is a multi-step operation. Each call to
//! [`Procedure::execute`] runs one step and reports whether more steps
//! follow. Between steps the manager may persist the procedure's
//! [`dump`](Procedure::dump), and after a crash a registered loader rebuilds
//! the procedure from the last persisted dump. Steps may therefore run again
//! after a restart and must be idempotent.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{ProcedureError, ProcedureResult};
use crate::id::ProcedureId;

/// Outcome of a successful step.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// More steps follow. With `persist` set, the dump is made durable
    /// before the next step runs.
    Executing { persist: bool },
    /// The procedure is finished.
    Done { output: Option<Value> },
}

impl Status {
    /// More steps follow; persist progress first.
    pub fn executing() -> Self {
        Self::Executing { persist: true }
    }

    /// Finished without output.
    pub fn done() -> Self {
        Self::Done { output: None }
    }

    /// Finished with `output`.
    pub fn done_with_output(output: Value) -> Self {
        Self::Done {
            output: Some(output),
        }
    }
}

/// A failed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepError {
    /// Cause recorded on the procedure.
    pub message: String,
    /// Whether the retry policy applies.
    pub retryable: bool,
}

impl StepError {
    /// A transient failure; the step is tried again after the retry delay.
    pub fn retry_later(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A permanent failure; the procedure fails at once.
    pub fn external(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StepError {}

/// Information handed to each step.
#[derive(Debug, Clone)]
pub struct Context {
    /// Id of the running procedure.
    pub procedure_id: ProcedureId,
    /// Retries made so far (0 on the first attempt).
    pub attempt: u32,
    /// Steps persisted so far.
    pub step: u32,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    pub(crate) fn new(
        procedure_id: ProcedureId,
        attempt: u32,
        step: u32,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            procedure_id,
            attempt,
            step,
            cancelled,
        }
    }

    /// Whether cancellation was requested. Long steps may poll this and
    /// return early; the manager only acts on it between steps.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A crash-recoverable, multi-step operation.
#[async_trait]
pub trait Procedure: Send {
    /// Type tag used to pick the loader on recovery.
    fn type_name(&self) -> &str;

    /// Run the next step.
    async fn execute(&mut self, ctx: &Context) -> Result<Status, StepError>;

    /// Serializable state from which a loader can rebuild this procedure.
    fn dump(&self) -> ProcedureResult<Value>;
}

/// Boxed procedure.
pub type BoxedProcedure = Box<dyn Procedure>;

/// Rebuilds a procedure from its persisted dump.
pub type ProcedureLoader = Box<dyn Fn(&Value) -> ProcedureResult<BoxedProcedure> + Send + Sync>;

/// Loaders keyed by procedure type name.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: RwLock<HashMap<String, Arc<ProcedureLoader>>>,
}

impl LoaderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `loader` for `type_name`. A second registration for the same
    /// name is rejected.
    pub fn register(
        &self,
        type_name: impl Into<String>,
        loader: ProcedureLoader,
    ) -> ProcedureResult<()> {
        let type_name = type_name.into();
        let mut loaders = self.loaders.write();
        if loaders.contains_key(&type_name) {
            return Err(ProcedureError::LoaderExists(type_name));
        }
        loaders.insert(type_name, Arc::new(loader));
        Ok(())
    }

    /// Rebuild a procedure of `type_name` from `data`.
    pub fn load(&self, type_name: &str, data: &Value) -> ProcedureResult<BoxedProcedure> {
        let loader = self
            .loaders
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| ProcedureError::LoaderNotFound(type_name.to_string()))?;
        loader(data)
    }

    /// Whether a loader is registered for `type_name`.
    pub fn contains(&self, type_name: &str) -> bool {
        self.loaders.read().contains_key(type_name)
    }
}
