// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Datanode lifecycle.
//!
//! A [`Datanode`] owns one WAL, the procedure store over it, the procedure
//! manager and the background purge task:
//!
//! 1. [`open`](Datanode::open) creates `<data_dir>/wal` and opens the log.
//! 2. Callers register procedure loaders through [`manager`](Datanode::manager).
//! 3. [`start`](Datanode::start) replays the log, resumes unfinished
//!    procedures and starts purging.
//! 4. [`shutdown`](Datanode::shutdown) stops the purge task, drains the
//!    manager and flushes the log.

use std::sync::Arc;

use keystone_procedure::{ProcedureManager, ProcedureStore, RecoveryReport};
use keystone_wal::{WalStats, WalWriter};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::error::NodeResult;
use crate::purge::spawn_purge_task;

/// A running Keystone node.
pub struct Datanode {
    config: NodeConfig,
    wal: Arc<WalWriter>,
    store: Arc<ProcedureStore>,
    manager: ProcedureManager,
    shutdown: watch::Sender<bool>,
    purge_task: Mutex<Option<JoinHandle<()>>>,
}

impl Datanode {
    /// Open the node's WAL and build the procedure machinery. Nothing runs
    /// until [`start`](Self::start).
    pub fn open(config: NodeConfig) -> NodeResult<Self> {
        let wal_dir = config.wal_dir();
        std::fs::create_dir_all(&wal_dir)?;

        let wal = Arc::new(WalWriter::open(&wal_dir, config.wal.clone())?);
        let store = Arc::new(ProcedureStore::new(Arc::clone(&wal)));
        let manager = ProcedureManager::new(Arc::clone(&store), config.procedure.clone());
        let (shutdown, _) = watch::channel(false);

        info!(
            data_dir = %config.data_dir.display(),
            next_sequence = wal.next_sequence(),
            "Datanode opened"
        );

        Ok(Self {
            config,
            wal,
            store,
            manager,
            shutdown,
            purge_task: Mutex::new(None),
        })
    }

    /// Resume unfinished procedures and start the purge task. Register
    /// loaders before calling this.
    pub async fn start(&self) -> NodeResult<RecoveryReport> {
        self.manager.start()?;
        let report = self.manager.recover()?;

        let task = spawn_purge_task(
            self.wal.purger(),
            Arc::clone(&self.store),
            self.config.purge_check_interval(),
            self.shutdown.subscribe(),
        );
        if let Some(previous) = self.purge_task.lock().replace(task) {
            previous.abort();
        }

        info!(
            resumed = report.resumed.len(),
            skipped = report.skipped.len(),
            purge_check_interval_secs = self.config.purge_check_interval().as_secs(),
            "Datanode started"
        );
        Ok(report)
    }

    /// Stop background work and flush the log.
    pub async fn shutdown(&self) -> NodeResult<()> {
        self.shutdown.send_replace(true);
        let task = self.purge_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Purge task ended abnormally");
            }
        }

        self.manager.stop().await;
        self.wal.flush()?;
        info!(next_sequence = self.wal.next_sequence(), "Datanode stopped");
        Ok(())
    }

    /// The procedure manager.
    pub fn manager(&self) -> &ProcedureManager {
        &self.manager
    }

    /// The procedure store.
    pub fn store(&self) -> &Arc<ProcedureStore> {
        &self.store
    }

    /// The write-ahead log.
    pub fn wal(&self) -> &Arc<WalWriter> {
        &self.wal
    }

    /// Log statistics.
    pub fn wal_stats(&self) -> WalStats {
        self.wal.stats()
    }

    /// The configuration the node was opened with.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
