// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for procedure replay and retry accounting

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keystone_procedure::{
    replay, Context, LogRecord, Procedure, ProcedureConfig, ProcedureError, ProcedureId,
    ProcedureManager, ProcedureRecord, ProcedureResult, ProcedureState, ProcedureStore, Status,
    StepError,
};
use keystone_wal::{WalConfig, WalWriter};
use proptest::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// One logged change: which procedure, and the state it moved to.
fn arb_changes() -> impl Strategy<Value = Vec<(usize, u8)>> {
    prop::collection::vec((0usize..4, 0u8..5), 1..60)
}

fn state_of(code: u8) -> ProcedureState {
    match code {
        0 => ProcedureState::Pending,
        1 => ProcedureState::Running,
        2 => ProcedureState::Retrying,
        3 => ProcedureState::Completed,
        _ => ProcedureState::Failed,
    }
}

fn build_log(ids: &[ProcedureId], changes: &[(usize, u8)]) -> Vec<(u64, LogRecord)> {
    changes
        .iter()
        .enumerate()
        .map(|(index, (which, code))| {
            let mut record = ProcedureRecord::pending(ids[*which], "prop", json!(index));
            record.state = state_of(*code);
            (index as u64 + 1, LogRecord::Transition { record })
        })
        .collect()
}

/// Fails `failures` times with a retryable error, then completes.
struct FailN {
    failures: u32,
}

#[async_trait]
impl Procedure for FailN {
    fn type_name(&self) -> &str {
        "fail_n"
    }

    async fn execute(&mut self, _ctx: &Context) -> Result<Status, StepError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(StepError::retry_later("flaky"));
        }
        Ok(Status::done())
    }

    fn dump(&self) -> ProcedureResult<Value> {
        Ok(json!({ "failures": self.failures }))
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_replay_keeps_latest_live_record(changes in arb_changes()) {
        let ids: Vec<ProcedureId> = (0..4).map(|_| ProcedureId::new()).collect();
        let log = build_log(&ids, &changes);

        let mut expected: HashMap<ProcedureId, (u64, ProcedureState)> = HashMap::new();
        for (sequence, entry) in &log {
            if let LogRecord::Transition { record } = entry {
                if record.state.is_terminal() {
                    expected.remove(&record.id);
                } else {
                    expected.insert(record.id, (*sequence, record.state));
                }
            }
        }

        let state = replay(log);
        prop_assert_eq!(state.live().len(), expected.len());
        for (id, (sequence, proc_state)) in &expected {
            let live = &state.live()[id];
            prop_assert_eq!(live.sequence, *sequence);
            prop_assert_eq!(live.record.state, *proc_state);
        }
        prop_assert_eq!(
            state.low_water_mark(),
            expected.values().map(|(sequence, _)| *sequence).min()
        );
    }

    #[test]
    fn test_checkpoint_preserves_live_set(
        changes in arb_changes(),
        cut in 0usize..60
    ) {
        let ids: Vec<ProcedureId> = (0..4).map(|_| ProcedureId::new()).collect();
        let log = build_log(&ids, &changes);
        let cut = cut.min(log.len());

        let before = replay(log[..cut].iter().cloned());
        let snapshot: Vec<ProcedureRecord> =
            before.live().values().map(|live| live.record.clone()).collect();

        let mut with_checkpoint = log[..cut].to_vec();
        with_checkpoint.push((cut as u64 + 1, LogRecord::Checkpoint { records: snapshot }));
        for (sequence, entry) in &log[cut..] {
            with_checkpoint.push((sequence + 1, entry.clone()));
        }

        let plain = replay(log).into_records();
        let checkpointed = replay(with_checkpoint).into_records();
        prop_assert_eq!(plain, checkpointed);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn test_retry_accounting(failures in 0u32..5, max_retry_times in 0u32..4) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let dir = TempDir::new().unwrap();
            let wal = WalWriter::open(dir.path(), WalConfig::default()).unwrap();
            let store = Arc::new(ProcedureStore::new(Arc::new(wal)));
            let manager = ProcedureManager::new(
                store.clone(),
                ProcedureConfig { max_retry_times, retry_delay_ms: 1, ..Default::default() },
            );
            manager.start().unwrap();

            let mut watcher = manager.submit(Box::new(FailN { failures })).unwrap();
            let outcome = watcher.wait().await;
            let status = watcher.status();

            if failures <= max_retry_times {
                assert!(outcome.is_ok());
                assert_eq!(status.state, ProcedureState::Completed);
                assert_eq!(status.retry_count, failures);
            } else {
                assert!(matches!(
                    outcome,
                    Err(ProcedureError::RetryExhausted { attempts, .. }) if attempts == max_retry_times
                ));
                assert_eq!(status.state, ProcedureState::Failed);
                assert_eq!(status.retry_count, max_retry_times);
            }

            let running = store
                .wal()
                .reader()
                .replay_all()
                .map(|entry| LogRecord::decode(&entry.unwrap().payload).unwrap())
                .filter(|entry| matches!(
                    entry,
                    LogRecord::Transition { record } if record.state == ProcedureState::Running
                ))
                .count();
            assert_eq!(running as u32, status.retry_count + 1);
            assert_eq!(store.live_count(), 0);

            manager.stop().await;
        });
    }
}
