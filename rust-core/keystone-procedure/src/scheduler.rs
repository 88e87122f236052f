// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Timer-driven re-admission of retrying procedures.
//!
//! A retrying procedure does not sleep on a worker. The executor hands its
//! id and a ready-at instant to the [`RetryScheduler`], whose single task
//! keeps a min-heap of deadlines and pushes each id back onto the ready
//! queue when its deadline passes.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::id::ProcedureId;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Pending {
    ready_at: Instant,
    // Keeps FIFO order for equal deadlines.
    order: u64,
    id: ProcedureId,
}

/// Handle for scheduling delayed re-admissions.
#[derive(Clone)]
pub struct RetryScheduler {
    requests: mpsc::UnboundedSender<(ProcedureId, Instant)>,
}

impl RetryScheduler {
    /// Spawn the scheduler task. Due ids are sent to `ready`. The task ends
    /// when `shutdown` flips to `true`, when every handle is dropped, or when
    /// `ready` is closed.
    pub fn spawn(
        ready: mpsc::UnboundedSender<ProcedureId>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(receiver, ready, shutdown));
        (Self { requests }, handle)
    }

    /// Re-admit `id` after `delay`. Returns `false` if the scheduler is gone.
    pub fn schedule(&self, id: ProcedureId, delay: Duration) -> bool {
        self.requests.send((id, Instant::now() + delay)).is_ok()
    }
}

async fn run(
    mut requests: mpsc::UnboundedReceiver<(ProcedureId, Instant)>,
    ready: mpsc::UnboundedSender<ProcedureId>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut heap: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();
    let mut order = 0u64;

    loop {
        let next_deadline = heap.peek().map(|Reverse(p)| p.ready_at);

        tokio::select! {
            request = requests.recv() => match request {
                Some((id, ready_at)) => {
                    order += 1;
                    heap.push(Reverse(Pending { ready_at, order, id }));
                }
                None => break,
            },
            _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                let now = Instant::now();
                while heap.peek().is_some_and(|Reverse(p)| p.ready_at <= now) {
                    let Some(Reverse(due)) = heap.pop() else { break };
                    debug!(procedure_id = %due.id, "Retry delay elapsed");
                    if ready.send(due.id).is_err() {
                        return;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!(pending = heap.len(), "Retry scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_released_in_deadline_order() {
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (scheduler, _handle) = RetryScheduler::spawn(ready_tx, shutdown_rx);

        let slow = ProcedureId::new();
        let fast = ProcedureId::new();
        assert!(scheduler.schedule(slow, Duration::from_millis(80)));
        assert!(scheduler.schedule(fast, Duration::from_millis(10)));

        assert_eq!(ready_rx.recv().await, Some(fast));
        assert_eq!(ready_rx.recv().await, Some(slow));
    }

    #[tokio::test]
    async fn test_delay_is_honoured() {
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (scheduler, _handle) = RetryScheduler::spawn(ready_tx, shutdown_rx);

        let start = Instant::now();
        let id = ProcedureId::new();
        scheduler.schedule(id, Duration::from_millis(50));
        assert_eq!(ready_rx.recv().await, Some(id));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let (ready_tx, _ready_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (scheduler, handle) = RetryScheduler::spawn(ready_tx, shutdown_rx);

        scheduler.schedule(ProcedureId::new(), Duration::from_secs(3600));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(!scheduler.schedule(ProcedureId::new(), Duration::ZERO));
    }
}
