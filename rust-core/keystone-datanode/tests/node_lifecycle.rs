// SPDX-License-Identifier: PMPL-1.0-or-later
//! Datanode lifecycle tests: open, recover, run, purge, shut down.

use std::time::Duration;

use async_trait::async_trait;
use keystone_datanode::{Datanode, NodeConfig};
use keystone_procedure::{
    BoxedProcedure, Context, Procedure, ProcedureConfig, ProcedureId, ProcedureResult, Status,
    StepError,
};
use keystone_wal::WalConfig;
use serde_json::{json, Value};
use tempfile::TempDir;

struct Echo {
    message: String,
}

#[async_trait]
impl Procedure for Echo {
    fn type_name(&self) -> &str {
        "echo"
    }

    async fn execute(&mut self, _ctx: &Context) -> Result<Status, StepError> {
        Ok(Status::done_with_output(json!(self.message)))
    }

    fn dump(&self) -> ProcedureResult<Value> {
        Ok(json!({ "message": self.message }))
    }
}

fn echo_loader(data: &Value) -> ProcedureResult<BoxedProcedure> {
    Ok(Box::new(Echo {
        message: data["message"].as_str().unwrap_or_default().to_string(),
    }) as BoxedProcedure)
}

fn config(dir: &TempDir) -> NodeConfig {
    NodeConfig {
        data_dir: dir.path().to_path_buf(),
        procedure: ProcedureConfig {
            retry_delay_ms: 10,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_run_procedure_and_restart() {
    let dir = TempDir::new().unwrap();

    let node = Datanode::open(config(&dir)).unwrap();
    node.manager()
        .register_loader("echo", Box::new(echo_loader))
        .unwrap();
    let report = node.start().await.unwrap();
    assert!(report.is_empty());
    assert!(dir.path().join("wal").is_dir());

    let mut watcher = node
        .manager()
        .submit(Box::new(Echo {
            message: "hello".into(),
        }))
        .unwrap();
    assert_eq!(watcher.wait().await.unwrap(), Some(json!("hello")));
    node.shutdown().await.unwrap();
    let written = node.wal_stats().next_sequence;
    drop(node);

    let node = Datanode::open(config(&dir)).unwrap();
    node.manager()
        .register_loader("echo", Box::new(echo_loader))
        .unwrap();
    assert!(node.start().await.unwrap().is_empty());
    assert_eq!(node.wal_stats().next_sequence, written);
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unfinished_procedure_resumed_on_start() {
    let dir = TempDir::new().unwrap();
    let id = ProcedureId::new();
    {
        // Submitted while the node was never started.
        let node = Datanode::open(config(&dir)).unwrap();
        node.manager()
            .submit_with_id(
                id,
                Box::new(Echo {
                    message: "late".into(),
                }),
            )
            .unwrap();
    }

    let node = Datanode::open(config(&dir)).unwrap();
    node.manager()
        .register_loader("echo", Box::new(echo_loader))
        .unwrap();
    let report = node.start().await.unwrap();
    assert_eq!(report.resumed, vec![id]);

    let mut watcher = node.manager().watch(id).unwrap();
    assert_eq!(watcher.wait().await.unwrap(), Some(json!("late")));
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_background_purge_keeps_live_segments() {
    let dir = TempDir::new().unwrap();
    let mut node_config = config(&dir);
    node_config.wal = WalConfig {
        segment_size: 256,
        purge_interval_secs: 0,
        ..Default::default()
    };
    node_config.purge_check_interval_secs = 1;

    // An unfinished procedure pins the segment holding its latest record.
    let pinned = ProcedureId::new();
    {
        let node = Datanode::open(node_config.clone()).unwrap();
        node.manager()
            .submit_with_id(
                pinned,
                Box::new(Echo {
                    message: "pinned".into(),
                }),
            )
            .unwrap();
    }

    // No loader for "echo": the procedure stays live and unresolved.
    let node = Datanode::open(node_config).unwrap();
    let report = node.start().await.unwrap();
    assert_eq!(report.skipped.len(), 1);

    for _ in 0..8 {
        node.store().checkpoint().unwrap();
    }
    node.wal().rotate().unwrap();
    let before = node.wal_stats().segment_count;
    assert!(before > 2);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let after = node.wal_stats().segment_count;
    assert!(after < before, "expected purge, {after} >= {before}");
    assert!(node.store().is_live(pinned));
    node.shutdown().await.unwrap();
}
