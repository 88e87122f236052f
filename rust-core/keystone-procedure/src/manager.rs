// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Procedure executor.
//!
//! The [`ProcedureManager`] drives submitted and recovered procedures through
//! their state machines:
//!
//! - A **ready queue** of procedure ids feeds a dispatcher task, which runs
//!   each procedure on a tokio task once a worker permit is free. The number
//!   of permits bounds how many procedures execute at once.
//! - Each procedure sits in a **slot** guarded by its own async mutex. A
//!   worker holds that mutex for as long as it drives the procedure, so a
//!   procedure id never runs twice at the same time while distinct ids run
//!   independently.
//! - A failing step consults the [`RetryPolicy`]. Retries are recorded as
//!   `Retrying`, the worker is released, and the [`RetryScheduler`] puts the
//!   id back on the ready queue after the fixed delay.
//! - Every state change is made durable through the [`ProcedureStore`]
//!   before it is published to watchers.
//! - Cancellation is cooperative and observed between steps.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ProcedureConfig;
use crate::error::{ProcedureError, ProcedureResult};
use crate::id::ProcedureId;
use crate::procedure::{BoxedProcedure, Context, LoaderRegistry, ProcedureLoader, Status};
use crate::record::ProcedureRecord;
use crate::recovery::{RecoveryReport, SkippedProcedure};
use crate::scheduler::RetryScheduler;
use crate::state::{ProcedureFailure, ProcedureState, RetryPolicy};
use crate::store::ProcedureStore;
use crate::watcher::{ProcedureStatus, ProcedureWatcher};

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

struct SlotBody {
    procedure: BoxedProcedure,
    record: ProcedureRecord,
}

/// One managed procedure.
struct ProcedureSlot {
    id: ProcedureId,
    cancelled: Arc<AtomicBool>,
    /// Set once the manager has let go of the procedure.
    retired: AtomicBool,
    status: watch::Sender<ProcedureStatus>,
    body: tokio::sync::Mutex<SlotBody>,
}

impl ProcedureSlot {
    fn new(record: ProcedureRecord, procedure: BoxedProcedure) -> Self {
        let (status, _) = watch::channel(ProcedureStatus::from(&record));
        Self {
            id: record.id,
            cancelled: Arc::new(AtomicBool::new(false)),
            retired: AtomicBool::new(false),
            status,
            body: tokio::sync::Mutex::new(SlotBody { procedure, record }),
        }
    }

    fn watcher(&self) -> ProcedureWatcher {
        ProcedureWatcher::new(self.id, self.status.subscribe())
    }

    fn publish(&self, status: ProcedureStatus) {
        self.status.send_replace(status);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

/// Terminal statuses kept for queries, oldest evicted first.
struct FinishedStatuses {
    order: VecDeque<ProcedureId>,
    statuses: HashMap<ProcedureId, ProcedureStatus>,
    capacity: usize,
}

impl FinishedStatuses {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            statuses: HashMap::new(),
            capacity,
        }
    }

    fn insert(&mut self, id: ProcedureId, status: ProcedureStatus) {
        if self.capacity == 0 {
            return;
        }
        if self.statuses.insert(id, status).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.statuses.remove(&evicted);
            }
        }
    }

    fn get(&self, id: &ProcedureId) -> Option<&ProcedureStatus> {
        self.statuses.get(id)
    }
}

// ---------------------------------------------------------------------------
// ProcedureManager
// ---------------------------------------------------------------------------

struct ManagerInner {
    store: Arc<ProcedureStore>,
    config: ProcedureConfig,
    retry_policy: RetryPolicy,
    loaders: LoaderRegistry,
    procedures: RwLock<HashMap<ProcedureId, Arc<ProcedureSlot>>>,
    finished: Mutex<FinishedStatuses>,
    permits: Arc<Semaphore>,
    ready_tx: mpsc::UnboundedSender<ProcedureId>,
    ready_rx: Mutex<Option<mpsc::UnboundedReceiver<ProcedureId>>>,
    scheduler: Mutex<Option<RetryScheduler>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

/// Runs procedures to completion, durably and with retries.
///
/// Cheap to clone; all clones drive the same set of procedures. Call
/// [`start`](Self::start) to begin executing and [`stop`](Self::stop) to
/// shut the background tasks down.
#[derive(Clone)]
pub struct ProcedureManager {
    inner: Arc<ManagerInner>,
}

impl ProcedureManager {
    /// Create a manager persisting through `store`.
    pub fn new(store: Arc<ProcedureStore>, config: ProcedureConfig) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let workers = config.max_running_procedures.max(1);

        Self {
            inner: Arc::new(ManagerInner {
                store,
                retry_policy: config.retry_policy(),
                finished: Mutex::new(FinishedStatuses::new(config.max_finished_procedures)),
                config,
                loaders: LoaderRegistry::new(),
                procedures: RwLock::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(workers)),
                ready_tx,
                ready_rx: Mutex::new(Some(ready_rx)),
                scheduler: Mutex::new(None),
                shutdown,
                tasks: Mutex::new(Vec::new()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Register the loader that rebuilds procedures of `type_name` during
    /// recovery.
    pub fn register_loader(
        &self,
        type_name: impl Into<String>,
        loader: ProcedureLoader,
    ) -> ProcedureResult<()> {
        self.inner.loaders.register(type_name, loader)
    }

    /// Spawn the dispatcher and retry scheduler. Procedures submitted
    /// earlier start running now. Calling it again has no effect.
    pub fn start(&self) -> ProcedureResult<()> {
        if self.inner.is_stopped() {
            return Err(ProcedureError::ManagerStopped);
        }
        let Some(ready_rx) = self.inner.ready_rx.lock().take() else {
            return Ok(());
        };

        let (scheduler, scheduler_task) =
            RetryScheduler::spawn(self.inner.ready_tx.clone(), self.inner.shutdown.subscribe());
        *self.inner.scheduler.lock() = Some(scheduler);

        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&self.inner),
            ready_rx,
            self.inner.shutdown.subscribe(),
        ));
        self.inner.tasks.lock().extend([scheduler_task, dispatcher]);

        info!(
            max_running_procedures = self.inner.config.max_running_procedures,
            max_retry_times = self.inner.retry_policy.max_retry_times,
            retry_delay_ms = self.inner.config.retry_delay_ms,
            "Procedure manager started"
        );
        Ok(())
    }

    /// Replay the log and resume every unfinished procedure from its last
    /// recorded state.
    pub fn recover(&self) -> ProcedureResult<RecoveryReport> {
        let mut records: Vec<ProcedureRecord> = self.inner.store.load_all()?.into_values().collect();
        records.sort_by_key(|record| record.updated_at);

        let mut report = RecoveryReport::default();
        for record in records {
            let id = record.id;
            if self.inner.procedures.read().contains_key(&id) {
                continue;
            }

            match self.inner.loaders.load(&record.type_name, &record.data) {
                Ok(procedure) => {
                    let retrying = record.state == ProcedureState::Retrying;
                    debug!(
                        procedure_id = %id,
                        type_name = %record.type_name,
                        state = %record.state,
                        step = record.step,
                        "Resuming procedure"
                    );
                    let slot = Arc::new(ProcedureSlot::new(record, procedure));
                    self.inner.procedures.write().insert(id, slot);
                    if retrying {
                        self.inner.schedule_retry(id);
                    } else {
                        self.inner.enqueue(id);
                    }
                    report.resumed.push(id);
                }
                Err(ProcedureError::LoaderNotFound(type_name)) => {
                    warn!(
                        procedure_id = %id,
                        type_name = %type_name,
                        "No loader for procedure, leaving it unresolved"
                    );
                    report.skipped.push(SkippedProcedure { id, type_name });
                }
                Err(load_error) => {
                    let mut failed = record.with_state(ProcedureState::Failed);
                    failed.failure = Some(ProcedureFailure::Load {
                        message: load_error.to_string(),
                    });
                    self.inner.store.record_transition(&failed)?;
                    error!(
                        procedure_id = %id,
                        error = %load_error,
                        "Failed to rebuild procedure"
                    );
                    self.inner
                        .finished
                        .lock()
                        .insert(id, ProcedureStatus::from(&failed));
                    report.failed.push(id);
                }
            }
        }

        info!(
            resumed = report.resumed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Procedure recovery finished"
        );
        Ok(report)
    }

    /// Submit a procedure under a fresh id.
    pub fn submit(&self, procedure: BoxedProcedure) -> ProcedureResult<ProcedureWatcher> {
        self.submit_with_id(ProcedureId::new(), procedure)
    }

    /// Submit a procedure under `id`. `Pending` is durable when this
    /// returns. Fails with `ProcedureExists` if `id` is still live.
    pub fn submit_with_id(
        &self,
        id: ProcedureId,
        procedure: BoxedProcedure,
    ) -> ProcedureResult<ProcedureWatcher> {
        if self.inner.is_stopped() {
            return Err(ProcedureError::ManagerStopped);
        }

        let record = ProcedureRecord::pending(id, procedure.type_name(), procedure.dump()?);
        let type_name = record.type_name.clone();
        let slot = Arc::new(ProcedureSlot::new(record.clone(), procedure));

        {
            let mut procedures = self.inner.procedures.write();
            if procedures.contains_key(&id) || self.inner.store.is_live(id) {
                return Err(ProcedureError::ProcedureExists(id));
            }
            procedures.insert(id, Arc::clone(&slot));
        }

        if let Err(e) = self.inner.store.record_transition(&record) {
            self.inner.procedures.write().remove(&id);
            return Err(e);
        }

        info!(procedure_id = %id, type_name = %type_name, "Submitted procedure");
        let watcher = slot.watcher();
        self.inner.enqueue(id);
        Ok(watcher)
    }

    /// Request cancellation. Takes effect at the next step boundary; the
    /// procedure then fails with cause `cancelled`.
    pub fn cancel(&self, id: ProcedureId) -> ProcedureResult<()> {
        let slot = self
            .inner
            .slot(id)
            .ok_or(ProcedureError::ProcedureNotFound(id))?;
        slot.cancelled.store(true, Ordering::Release);
        info!(procedure_id = %id, "Cancellation requested");

        // Wake it if it is waiting for a retry or has not started.
        self.inner.enqueue(id);
        Ok(())
    }

    /// Watch a managed or recently finished procedure.
    pub fn watch(&self, id: ProcedureId) -> Option<ProcedureWatcher> {
        if let Some(slot) = self.inner.slot(id) {
            return Some(slot.watcher());
        }
        self.inner
            .finished
            .lock()
            .get(&id)
            .cloned()
            .map(|status| ProcedureWatcher::settled(id, status))
    }

    /// Current status of a managed or recently finished procedure.
    pub fn procedure_status(&self, id: ProcedureId) -> Option<ProcedureStatus> {
        if let Some(slot) = self.inner.slot(id) {
            return Some(slot.status.borrow().clone());
        }
        self.inner.finished.lock().get(&id).cloned()
    }

    /// Current state of a managed or recently finished procedure.
    pub fn procedure_state(&self, id: ProcedureId) -> Option<ProcedureState> {
        self.procedure_status(id).map(|status| status.state)
    }

    /// Number of procedures the manager is driving.
    pub fn active_count(&self) -> usize {
        self.inner.procedures.read().len()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<ProcedureStore> {
        &self.inner.store
    }

    /// The retry policy in force.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry_policy
    }

    /// Stop admitting work and wait for in-flight steps to finish.
    /// Unfinished procedures keep their durable state and resume on the
    /// next start.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Procedure manager task ended abnormally");
            }
        }

        let workers = u32::try_from(self.inner.config.max_running_procedures.max(1))
            .unwrap_or(u32::MAX);
        match self.inner.permits.acquire_many(workers).await {
            Ok(permits) => drop(permits),
            Err(_) => debug!("Worker pool already closed"),
        }
        self.inner.permits.close();
        *self.inner.scheduler.lock() = None;

        let abandoned = {
            let mut procedures = self.inner.procedures.write();
            let count = procedures.len();
            procedures.clear();
            count
        };
        info!(unfinished = abandoned, "Procedure manager stopped");
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

async fn dispatch(
    inner: Arc<ManagerInner>,
    mut ready: mpsc::UnboundedReceiver<ProcedureId>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let id = tokio::select! {
            id = ready.recv() => match id {
                Some(id) => id,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let Some(slot) = inner.slot(id) else {
            debug!(procedure_id = %id, "Ready procedure no longer managed");
            continue;
        };

        let permit = tokio::select! {
            permit = Arc::clone(&inner.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        let worker = Arc::clone(&inner);
        tokio::spawn(async move {
            worker.execute(slot).await;
            drop(permit);
        });
    }
    debug!("Procedure dispatcher stopped");
}

impl ManagerInner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn slot(&self, id: ProcedureId) -> Option<Arc<ProcedureSlot>> {
        self.procedures.read().get(&id).cloned()
    }

    fn enqueue(&self, id: ProcedureId) {
        if self.ready_tx.send(id).is_err() {
            debug!(procedure_id = %id, "Ready queue closed");
        }
    }

    fn schedule_retry(&self, id: ProcedureId) {
        let scheduled = self
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(|scheduler| scheduler.schedule(id, self.retry_policy.retry_delay));
        if !scheduled && !self.is_stopped() {
            // Not started yet: the dispatcher picks it up on start.
            self.enqueue(id);
        }
    }

    /// Drive one procedure until it finishes, needs a retry, or the manager
    /// stops.
    async fn execute(&self, slot: Arc<ProcedureSlot>) {
        let mut body = slot.body.lock().await;
        if slot.is_retired() || body.record.state.is_terminal() || self.is_stopped() {
            return;
        }

        if slot.is_cancelled() {
            self.fail(&slot, &mut body, ProcedureFailure::Cancelled);
            return;
        }

        if body.record.state != ProcedureState::Running {
            let mut running = body.record.with_state(ProcedureState::Running);
            running.failure = None;
            if !self.commit(&slot, &mut body, running, true) {
                return;
            }
        }

        loop {
            if self.is_stopped() {
                debug!(procedure_id = %slot.id, "Manager stopping, leaving procedure for recovery");
                return;
            }
            if slot.is_cancelled() {
                self.fail(&slot, &mut body, ProcedureFailure::Cancelled);
                return;
            }

            let ctx = Context::new(
                slot.id,
                body.record.retry_count,
                body.record.step,
                Arc::clone(&slot.cancelled),
            );
            let outcome = body.procedure.execute(&ctx).await;

            match outcome {
                Ok(Status::Executing { persist }) => {
                    if !persist {
                        continue;
                    }
                    let data = match body.procedure.dump() {
                        Ok(data) => data,
                        Err(e) => {
                            let failure = ProcedureFailure::Step {
                                message: format!("failed to dump procedure: {e}"),
                            };
                            self.fail(&slot, &mut body, failure);
                            return;
                        }
                    };
                    let mut progressed = body.record.with_state(ProcedureState::Running);
                    progressed.data = data;
                    progressed.step += 1;
                    if !self.commit(&slot, &mut body, progressed, false) {
                        return;
                    }
                }
                Ok(Status::Done { output }) => {
                    let mut completed = body.record.with_state(ProcedureState::Completed);
                    completed.output = output;
                    completed.failure = None;
                    if self.commit(&slot, &mut body, completed, true) {
                        info!(
                            procedure_id = %slot.id,
                            retry_count = body.record.retry_count,
                            "Procedure completed"
                        );
                        self.retire(&slot, &body.record);
                    }
                    return;
                }
                Err(step_error) => {
                    let retries = body.record.retry_count;
                    if step_error.retryable && self.retry_policy.should_retry(retries) {
                        let mut retrying = body.record.with_state(ProcedureState::Retrying);
                        retrying.retry_count = retries + 1;
                        retrying.failure = Some(ProcedureFailure::Step {
                            message: step_error.message.clone(),
                        });
                        if !self.commit(&slot, &mut body, retrying, true) {
                            return;
                        }
                        warn!(
                            procedure_id = %slot.id,
                            retry_count = retries + 1,
                            max_retry_times = self.retry_policy.max_retry_times,
                            delay_ms = self.retry_policy.retry_delay.as_millis() as u64,
                            error = %step_error,
                            "Procedure step failed, retrying"
                        );
                        self.schedule_retry(slot.id);
                    } else {
                        let failure = if step_error.retryable {
                            ProcedureFailure::RetryExhausted {
                                attempts: retries,
                                message: step_error.message,
                            }
                        } else {
                            ProcedureFailure::Step {
                                message: step_error.message,
                            }
                        };
                        self.fail(&slot, &mut body, failure);
                    }
                    return;
                }
            }
        }
    }

    /// Persist `record` and adopt it. On a WAL error the procedure is
    /// reported failed to watchers and dropped from memory; its last durable
    /// state is resumed on the next start.
    fn commit(
        &self,
        slot: &ProcedureSlot,
        body: &mut SlotBody,
        record: ProcedureRecord,
        transition: bool,
    ) -> bool {
        debug_assert!(
            if transition {
                body.record.state.can_transition_to(record.state)
            } else {
                body.record.state == record.state
            },
            "illegal procedure transition {} -> {}",
            body.record.state,
            record.state
        );

        let persisted = if transition {
            self.store.record_transition(&record)
        } else {
            self.store.record_progress(&record)
        };

        match persisted {
            Ok(sequence) => {
                debug!(
                    procedure_id = %slot.id,
                    state = %record.state,
                    step = record.step,
                    sequence,
                    "Procedure state committed"
                );
                body.record = record;
                slot.publish(ProcedureStatus::from(&body.record));
                true
            }
            Err(e) => {
                error!(
                    procedure_id = %slot.id,
                    state = %record.state,
                    error = %e,
                    "Failed to persist procedure state"
                );
                let mut status = ProcedureStatus::from(&body.record);
                status.state = ProcedureState::Failed;
                status.failure = Some(ProcedureFailure::Persist {
                    message: e.to_string(),
                });
                slot.retired.store(true, Ordering::Release);
                self.procedures.write().remove(&slot.id);
                self.finished.lock().insert(slot.id, status.clone());
                slot.publish(status);
                false
            }
        }
    }

    fn fail(&self, slot: &ProcedureSlot, body: &mut SlotBody, failure: ProcedureFailure) {
        let mut failed = body.record.with_state(ProcedureState::Failed);
        failed.failure = Some(failure);
        if self.commit(slot, body, failed, true) {
            warn!(
                procedure_id = %slot.id,
                retry_count = body.record.retry_count,
                cause = body.record.failure.as_ref().map(|f| f.cause()).unwrap_or_default(),
                "Procedure failed"
            );
            self.retire(slot, &body.record);
        }
    }

    fn retire(&self, slot: &ProcedureSlot, record: &ProcedureRecord) {
        slot.retired.store(true, Ordering::Release);
        self.procedures.write().remove(&slot.id);
        self.finished
            .lock()
            .insert(slot.id, ProcedureStatus::from(record));
    }
}
