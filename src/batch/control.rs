//! Control surface for front ends
//!
//! A [`Batch`] owns the rows, the progress counters and at most one active
//! dispatch. Front ends drive it with `load`, `start`, `stop`,
//! `clear_all_results` and `prune`, and read `rows()` / `progress()` back.
//! Starting while a dispatch is active is rejected with
//! [`MultiCmdError::Busy`]; so is any operation that removes or clears rows.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::batch::loader::{self, LoadedTable};
use crate::batch::{
    DispatchReport, ParameterRow, Progress, ProgressTracker, PruneReport, RowId, RowState, RowStore,
};
use crate::config::{BatchConfig, PrunePolicy};
use crate::engine::{DispatchEngine, DispatchHandle};
use crate::{MultiCmdError, Result};

/// A loaded batch and the dispatch running over it
pub struct Batch {
    config: BatchConfig,
    store: Arc<RowStore>,
    progress: Arc<ProgressTracker>,
    engine: DispatchEngine,
    active: Mutex<Option<DispatchHandle>>,
}

impl Batch {
    pub fn new(config: BatchConfig) -> Self {
        let store = Arc::new(RowStore::new());
        let progress = Arc::new(ProgressTracker::new());
        let engine = DispatchEngine::new(store.clone(), progress.clone(), config.shell.clone());
        Self {
            config,
            store,
            progress,
            engine,
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Replace the rows. Rejected while a dispatch is active.
    pub fn load(&self, headers: Vec<String>, rows: Vec<ParameterRow>) -> Result<()> {
        self.ensure_idle()?;
        let count = rows.len();
        self.store.load(headers, rows);
        self.progress.set_total(count);
        self.progress.reset_display();
        info!(rows = count, "Batch loaded");
        Ok(())
    }

    pub fn load_table(&self, table: LoadedTable) -> Result<()> {
        self.load(table.headers, table.rows)
    }

    /// Load tab-separated rows from a reader
    pub fn load_reader<R: Read>(&self, reader: R) -> Result<()> {
        self.load_table(loader::parse_reader(reader)?)
    }

    /// Load tab-separated rows from a file
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.load_table(loader::parse_file(path)?)
    }

    /// Start a dispatch pass with the configured concurrency
    pub fn start(&self, template: &str) -> Result<DispatchReport> {
        self.start_with(template, self.config.concurrency)
    }

    /// Start a dispatch pass over every pending row.
    ///
    /// Returns once all pending rows are queued. When rendering fails for a
    /// row, the rows queued before it keep running and the template error is
    /// returned; the dispatch stays active until they finish.
    #[instrument(skip(self, template))]
    pub fn start_with(&self, template: &str, concurrency: usize) -> Result<DispatchReport> {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(DispatchHandle::is_active) {
            warn!("Start requested while a dispatch is active");
            return Err(MultiCmdError::Busy);
        }

        let handle = self.engine.start(template, concurrency)?;
        let report = handle.report().clone();
        *active = Some(handle);

        match report.template_error.clone() {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }

    /// Abort the active dispatch and zero the progress display.
    ///
    /// Returns whether a dispatch was running. Results recorded before the
    /// stop are kept.
    pub fn stop(&self) -> bool {
        let stopped = match self.active.lock().as_ref() {
            Some(handle) if handle.is_active() => {
                handle.stop();
                true
            }
            _ => false,
        };
        self.progress.reset_display();
        stopped
    }

    /// Wait until the active dispatch, if any, has finished
    pub async fn wait(&self) {
        let finished = self.active.lock().as_ref().map(DispatchHandle::finished_token);
        if let Some(finished) = finished {
            finished.cancelled().await;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(DispatchHandle::is_active)
    }

    /// Report of the most recent dispatch pass
    pub fn last_report(&self) -> Option<DispatchReport> {
        self.active.lock().as_ref().map(|handle| handle.report().clone())
    }

    /// Most jobs seen running at once during the most recent pass
    pub fn peak_running(&self) -> usize {
        self.active
            .lock()
            .as_ref()
            .map_or(0, |handle| handle.counters().peak())
    }

    /// Jobs running right now
    pub fn running(&self) -> usize {
        self.active
            .lock()
            .as_ref()
            .map_or(0, |handle| handle.counters().running())
    }

    /// Set every row back to pending so the next start runs them all
    pub fn clear_all_results(&self) -> Result<()> {
        self.ensure_idle()?;
        self.store.clear_all();
        info!(rows = self.store.len(), "Results cleared");
        Ok(())
    }

    /// Drop rows selected by the configured [`PrunePolicy`] and clear the
    /// result of every remaining row
    pub fn prune(&self) -> Result<PruneReport> {
        self.ensure_idle()?;
        let policy = self.config.prune_policy;
        let removed = self.store.retain_and_clear(|row| match policy {
            PrunePolicy::Succeeded => row.result != Some(0),
            PrunePolicy::Unset => row.result.is_some(),
        });

        let remaining = self.store.len();
        self.progress.set_total(remaining);
        self.progress.reset_display();
        info!(?policy, removed, remaining, "Batch pruned");

        Ok(PruneReport {
            removed,
            reset: remaining,
        })
    }

    pub fn rows(&self) -> Vec<ParameterRow> {
        self.store.list()
    }

    pub fn headers(&self) -> Vec<String> {
        self.store.headers()
    }

    pub fn row_state(&self, id: RowId) -> Option<RowState> {
        self.store.state(id)
    }

    /// Rows handed to the active dispatch that have no result yet
    pub fn scheduled_rows(&self) -> Vec<RowId> {
        self.store.scheduled()
    }

    pub fn progress(&self) -> Progress {
        self.progress.snapshot()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn store(&self) -> &Arc<RowStore> {
        &self.store
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_active() {
            Err(MultiCmdError::Busy)
        } else {
            Ok(())
        }
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}
