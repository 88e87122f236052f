// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone Write-Ahead Log - Segment purge
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sealed segments are deleted when they are older than the purge interval or
// when the sealed segments together exceed the purge threshold, whichever
// triggers first. A segment is never deleted while it still holds an entry
// at or above the low-water-mark published by a `RetentionGuard`, and only
// an oldest-first run of segments is ever removed so the remaining log has
// no holes.

use std::fs;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::catalog::SharedCatalog;
use crate::config::WalConfig;
use crate::error::{WalError, WalResult};
use crate::segment::SegmentInfo;

/// Publishes the oldest sequence number that must survive purge.
///
/// `None` means nothing in the log is needed any more.
pub trait RetentionGuard: Send + Sync {
    /// The lowest sequence still referenced by unfinished work.
    fn low_water_mark(&self) -> Option<u64>;
}

impl<F> RetentionGuard for F
where
    F: Fn() -> Option<u64> + Send + Sync,
{
    fn low_water_mark(&self) -> Option<u64> {
        self()
    }
}

/// Thresholds that make sealed segments purge-eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgePolicy {
    /// Sealed segments older than this are purged.
    pub interval: Duration,
    /// Sealed segments are purged oldest-first while their total exceeds this.
    pub threshold: u64,
}

impl From<&WalConfig> for PurgePolicy {
    fn from(config: &WalConfig) -> Self {
        Self {
            interval: config.purge_interval(),
            threshold: config.purge_threshold,
        }
    }
}

/// Choose which sealed segments to delete.
///
/// `sealed` must be ascending by id; `active_start` is the start sequence of
/// the active segment (the exclusive upper bound of the last sealed one).
/// Pure: depends only on its arguments.
pub fn select_purgeable(
    sealed: &[SegmentInfo],
    active_start: u64,
    now: DateTime<Utc>,
    policy: PurgePolicy,
    low_water_mark: Option<u64>,
) -> Vec<SegmentInfo> {
    let mut remaining: u64 = sealed.iter().map(|s| s.file_size).sum();
    let mut selected = Vec::new();

    for (index, segment) in sealed.iter().enumerate() {
        let end_exclusive = sealed
            .get(index + 1)
            .map(|next| next.start_sequence)
            .unwrap_or(active_start);

        // Every entry in the segment is below end_exclusive.
        let released = low_water_mark.map_or(true, |mark| end_exclusive <= mark);
        if !released {
            break;
        }

        let expired = segment
            .age(now)
            .to_std()
            .is_ok_and(|age| age > policy.interval);
        let over_threshold = remaining > policy.threshold;
        if !(expired || over_threshold) {
            break;
        }

        remaining -= segment.file_size;
        selected.push(segment.clone());
    }

    selected
}

/// Deletes sealed segments according to a [`PurgePolicy`].
///
/// A purger only touches segment metadata under the catalog lock; file
/// removal happens after the lock is released, so appends are never held up
/// by disk deletes. Cheap to clone and safe to run from a background thread.
#[derive(Clone)]
pub struct SegmentPurger {
    catalog: SharedCatalog,
    policy: PurgePolicy,
}

impl SegmentPurger {
    /// Create a purger over the given catalog.
    pub fn new(catalog: SharedCatalog, policy: PurgePolicy) -> Self {
        Self { catalog, policy }
    }

    /// The configured policy.
    pub fn policy(&self) -> PurgePolicy {
        self.policy
    }

    /// Purge eligible sealed segments. Returns the number of segments
    /// deleted. Running it again immediately deletes nothing.
    pub fn purge(&self, guard: &dyn RetentionGuard) -> WalResult<usize> {
        self.purge_at(guard, Utc::now())
    }

    /// Like [`purge`](Self::purge) with an explicit clock.
    pub fn purge_at(&self, guard: &dyn RetentionGuard, now: DateTime<Utc>) -> WalResult<usize> {
        // Anything appended after this read is at or above `log_end`, whether
        // or not the guard has seen it yet. The guard may take its own locks
        // before the writer's, so it is never called under the catalog lock.
        let log_end = self.catalog.read().last_sequence() + 1;
        let low_water_mark = Some(
            guard
                .low_water_mark()
                .map_or(log_end, |mark| mark.min(log_end)),
        );

        let victims = {
            let mut catalog = self.catalog.write();
            let selected = select_purgeable(
                catalog.sealed(),
                catalog.active().start_sequence,
                now,
                self.policy,
                low_water_mark,
            );
            let ids: Vec<u64> = selected.iter().map(|s| s.id).collect();
            catalog.remove_sealed(&ids)
        };

        if victims.is_empty() {
            debug!(?low_water_mark, "No WAL segments eligible for purge");
            return Ok(0);
        }

        let mut removed = 0;
        let mut first_error: Option<WalError> = None;
        for segment in &victims {
            match fs::remove_file(&segment.path) {
                Ok(()) => {
                    removed += 1;
                    debug!(
                        segment_id = segment.id,
                        start_sequence = segment.start_sequence,
                        bytes = segment.file_size,
                        "Purged WAL segment"
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        segment_id = segment.id,
                        path = %segment.path.display(),
                        error = %e,
                        "Failed to delete purged WAL segment"
                    );
                    first_error.get_or_insert(WalError::Io(e));
                }
            }
        }

        info!(removed, ?low_water_mark, "WAL purge finished");

        match first_error {
            Some(error) => Err(error),
            None => Ok(removed),
        }
    }
}
