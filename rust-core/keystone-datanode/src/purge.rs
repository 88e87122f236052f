// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Background WAL purge.
//!
//! Every tick the task asks the [`SegmentPurger`] to delete sealed segments
//! that are old enough or push the log over its size threshold, guarded by
//! the procedure store's low-water-mark. Segment deletion is blocking file
//! I/O and runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use keystone_procedure::ProcedureStore;
use keystone_wal::SegmentPurger;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};

/// Run one purge pass off the async runtime. Returns the number of segments
/// removed.
pub async fn purge_once(purger: SegmentPurger, store: Arc<ProcedureStore>) -> NodeResult<usize> {
    tokio::task::spawn_blocking(move || purger.purge(store.as_ref()))
        .await
        .map_err(|e| NodeError::Task(format!("purge join: {e}")))?
        .map_err(NodeError::from)
}

/// Spawn the periodic purge loop. It stops when `shutdown` flips to `true`.
pub fn spawn_purge_task(
    purger: SegmentPurger,
    store: Arc<ProcedureStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(period_secs = period.as_secs(), "WAL purge task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match purge_once(purger.clone(), Arc::clone(&store)).await {
                        Ok(0) => debug!("No WAL segments to purge"),
                        Ok(removed) => info!(removed, "Purged WAL segments"),
                        Err(e) => warn!(error = %e, "WAL purge failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("WAL purge task stopped");
    })
}
