// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Observing procedure progress.

use serde_json::Value;
use tokio::sync::watch;

use crate::error::{ProcedureError, ProcedureResult};
use crate::id::ProcedureId;
use crate::record::ProcedureRecord;
use crate::state::{ProcedureFailure, ProcedureState};

/// What a watcher sees of a procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureStatus {
    /// Current state.
    pub state: ProcedureState,
    /// Retries made so far.
    pub retry_count: u32,
    /// Output once `Completed`.
    pub output: Option<Value>,
    /// Cause once `Failed`, or of the last failed attempt while `Retrying`.
    pub failure: Option<ProcedureFailure>,
}

impl From<&ProcedureRecord> for ProcedureStatus {
    fn from(record: &ProcedureRecord) -> Self {
        Self {
            state: record.state,
            retry_count: record.retry_count,
            output: record.output.clone(),
            failure: record.failure.clone(),
        }
    }
}

impl ProcedureStatus {
    /// The final result, or `None` while the procedure is still going.
    pub fn outcome(&self) -> Option<ProcedureResult<Option<Value>>> {
        match self.state {
            ProcedureState::Completed => Some(Ok(self.output.clone())),
            ProcedureState::Failed => Some(Err(match &self.failure {
                Some(failure) => failure.clone().into(),
                None => ProcedureError::StepFailed("unknown cause".to_string()),
            })),
            _ => None,
        }
    }
}

/// Receives status updates for one procedure.
#[derive(Debug, Clone)]
pub struct ProcedureWatcher {
    id: ProcedureId,
    receiver: watch::Receiver<ProcedureStatus>,
}

impl ProcedureWatcher {
    pub(crate) fn new(id: ProcedureId, receiver: watch::Receiver<ProcedureStatus>) -> Self {
        Self { id, receiver }
    }

    /// A watcher that only ever reports `status`.
    pub(crate) fn settled(id: ProcedureId, status: ProcedureStatus) -> Self {
        let (_sender, receiver) = watch::channel(status);
        Self { id, receiver }
    }

    /// The watched procedure.
    pub fn id(&self) -> ProcedureId {
        self.id
    }

    /// Latest status.
    pub fn status(&self) -> ProcedureStatus {
        self.receiver.borrow().clone()
    }

    /// Latest state.
    pub fn state(&self) -> ProcedureState {
        self.receiver.borrow().state
    }

    /// Wait for the next status change.
    pub async fn changed(&mut self) -> ProcedureResult<ProcedureStatus> {
        self.receiver
            .changed()
            .await
            .map_err(|_| ProcedureError::ManagerStopped)?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the procedure finishes. Resolves to its output on
    /// `Completed` and to the recorded cause on `Failed`.
    pub async fn wait(&mut self) -> ProcedureResult<Option<Value>> {
        loop {
            if let Some(outcome) = self.receiver.borrow_and_update().outcome() {
                return outcome;
            }
            if self.receiver.changed().await.is_err() {
                return self
                    .receiver
                    .borrow()
                    .outcome()
                    .unwrap_or(Err(ProcedureError::ManagerStopped));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(state: ProcedureState) -> ProcedureStatus {
        ProcedureStatus {
            state,
            retry_count: 0,
            output: None,
            failure: None,
        }
    }

    #[tokio::test]
    async fn test_wait_resolves_on_completion() {
        let id = ProcedureId::new();
        let (sender, receiver) = watch::channel(status(ProcedureState::Pending));
        let mut watcher = ProcedureWatcher::new(id, receiver);

        let waiter = tokio::spawn(async move { watcher.wait().await });
        sender.send_replace(status(ProcedureState::Running));
        sender.send_replace(ProcedureStatus {
            output: Some(json!("ok")),
            ..status(ProcedureState::Completed)
        });

        assert_eq!(waiter.await.unwrap().unwrap(), Some(json!("ok")));
    }

    #[tokio::test]
    async fn test_wait_reports_failure_cause() {
        let mut watcher = ProcedureWatcher::settled(
            ProcedureId::new(),
            ProcedureStatus {
                retry_count: 1,
                failure: Some(ProcedureFailure::RetryExhausted {
                    attempts: 1,
                    message: "injected".into(),
                }),
                ..status(ProcedureState::Failed)
            },
        );
        match watcher.wait().await {
            Err(ProcedureError::RetryExhausted { attempts, cause }) => {
                assert_eq!(attempts, 1);
                assert_eq!(cause, "injected");
            }
            other => panic!("Expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_errors_when_sender_dropped() {
        let (sender, receiver) = watch::channel(status(ProcedureState::Running));
        let mut watcher = ProcedureWatcher::new(ProcedureId::new(), receiver);
        drop(sender);
        assert!(matches!(
            watcher.wait().await,
            Err(ProcedureError::ManagerStopped)
        ));
    }
}
