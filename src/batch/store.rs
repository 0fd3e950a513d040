//! Row storage shared between the control surface and the dispatch collector

use std::collections::{BTreeMap, BTreeSet};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::batch::types::{ExitStatus, ParameterRow, RowId, RowState};

#[derive(Debug, Default)]
struct StoreInner {
    headers: Vec<String>,
    rows: BTreeMap<RowId, ParameterRow>,
    /// Rows handed to a worker pool and not yet completed
    scheduled: BTreeSet<RowId>,
}

/// Ordered set of parameter rows and their results.
///
/// Rows are kept in ascending id order, which is also load order. All
/// methods take `&self` and lock internally, so a store can be shared behind
/// an `Arc` between the control surface and the collector task.
#[derive(Debug, Default)]
pub struct RowStore {
    inner: RwLock<StoreInner>,
}

impl RowStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all rows and headers
    pub fn load(&self, headers: Vec<String>, rows: Vec<ParameterRow>) {
        let mut inner = self.inner.write();
        inner.headers = headers;
        inner.rows = rows.into_iter().map(|row| (row.id, row)).collect();
        inner.scheduled.clear();
        debug!(rows = inner.rows.len(), "Row store loaded");
    }

    pub fn headers(&self) -> Vec<String> {
        self.inner.read().headers.clone()
    }

    /// Snapshot of every row in ascending id order
    pub fn list(&self) -> Vec<ParameterRow> {
        self.inner.read().rows.values().cloned().collect()
    }

    /// Rows without a result, in ascending id order
    pub fn pending(&self) -> Vec<ParameterRow> {
        self.inner
            .read()
            .rows
            .values()
            .filter(|row| row.is_pending())
            .cloned()
            .collect()
    }

    pub fn get(&self, id: RowId) -> Option<ParameterRow> {
        self.inner.read().rows.get(&id).cloned()
    }

    /// Current state of a row, including whether it is queued for a worker
    pub fn state(&self, id: RowId) -> Option<RowState> {
        let inner = self.inner.read();
        let row = inner.rows.get(&id)?;
        if row.is_pending() && inner.scheduled.contains(&id) {
            Some(RowState::Scheduled)
        } else {
            Some(row.state())
        }
    }

    /// Ids of rows currently handed to a worker pool
    pub fn scheduled(&self) -> Vec<RowId> {
        self.inner.read().scheduled.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().rows.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.inner
            .read()
            .rows
            .values()
            .filter(|row| !row.is_pending())
            .count()
    }

    /// Record the exit status of a row.
    ///
    /// Only an unset result is written; returns `false` when the row already
    /// had one or does not exist.
    pub fn set_result(&self, id: RowId, status: ExitStatus) -> bool {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        match inner.rows.get_mut(&id) {
            Some(row) if row.result.is_none() => {
                row.result = Some(status);
                inner.scheduled.remove(&id);
                true
            }
            Some(row) => {
                debug!(row = id, existing = ?row.result, status, "Result already recorded");
                false
            }
            None => {
                warn!(row = id, "set_result on unknown row");
                false
            }
        }
    }

    pub fn clear_result(&self, id: RowId) {
        let mut inner = self.inner.write();
        match inner.rows.get_mut(&id) {
            Some(row) => row.result = None,
            None => warn!(row = id, "clear_result on unknown row"),
        }
    }

    /// Map every result back to unset
    pub fn clear_all(&self) {
        let mut inner = self.inner.write();
        for row in inner.rows.values_mut() {
            row.result = None;
        }
    }

    /// Remove a row. Unknown ids are ignored with a warning.
    pub fn remove(&self, id: RowId) -> bool {
        let mut inner = self.inner.write();
        inner.scheduled.remove(&id);
        let removed = inner.rows.remove(&id).is_some();
        drop(inner);
        if !removed {
            warn!(row = id, "remove on unknown row");
        }
        removed
    }

    /// Mark pending rows as handed to the worker pool
    pub(crate) fn mark_scheduled(&self, ids: impl IntoIterator<Item = RowId>) {
        let mut inner = self.inner.write();
        for id in ids {
            if inner.rows.get(&id).is_some_and(ParameterRow::is_pending) {
                inner.scheduled.insert(id);
            }
        }
    }

    /// Return every scheduled row to pending. Returns how many were scheduled.
    pub(crate) fn unschedule_all(&self) -> usize {
        let mut inner = self.inner.write();
        let count = inner.scheduled.len();
        inner.scheduled.clear();
        count
    }

    /// Keep only rows matching `keep`, clearing the result of every kept row.
    /// Returns the number of removed rows.
    pub(crate) fn retain_and_clear<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&ParameterRow) -> bool,
    {
        let mut inner = self.inner.write();
        let before = inner.rows.len();
        inner.rows.retain(|_, row| keep(row));
        for row in inner.rows.values_mut() {
            row.result = None;
        }
        before - inner.rows.len()
    }
}
