use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::template::TemplateError;

/// Stable row identifier, assigned from the input line number
pub type RowId = u64;

/// Exit status recorded for a row
pub type ExitStatus = i32;

/// One unit of work: the fields of one input line and the exit status of its command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRow {
    pub id: RowId,
    pub values: Vec<String>,
    pub result: Option<ExitStatus>,
}

impl ParameterRow {
    /// Create a row that has not run yet
    pub fn new(id: RowId, values: Vec<String>) -> Self {
        Self {
            id,
            values,
            result: None,
        }
    }

    /// Number of fields available to placeholders
    pub fn arity(&self) -> usize {
        self.values.len()
    }

    /// State implied by the result alone. A row queued for a worker still
    /// reads as pending here; [`RowStore::state`](crate::batch::RowStore::state)
    /// also reports [`RowState::Scheduled`].
    pub fn state(&self) -> RowState {
        match self.result {
            Some(status) => RowState::Completed(status),
            None => RowState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

/// State of a row relative to the dispatch engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowState {
    /// No exit status yet; will be scheduled by the next start
    Pending,
    /// Queued for or running on a worker of the active dispatch
    Scheduled,
    /// Command finished with the given exit status, zero or not
    Completed(ExitStatus),
}

/// A rendered command bound to the row it was rendered from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub row: RowId,
    pub command: String,
}

/// Outcome of a job, sent from a worker to the collector
#[derive(Debug, Clone)]
pub struct Completion {
    pub row: RowId,
    pub status: ExitStatus,
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

/// What a single `start` call did
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub run_id: Uuid,
    /// Jobs handed to the worker pool
    pub submitted: usize,
    /// Rows skipped because they already had a result
    pub skipped: usize,
    /// Pending rows never scheduled because rendering failed first
    pub unscheduled: usize,
    pub concurrency: usize,
    pub template_error: Option<TemplateError>,
    pub started_at: DateTime<Utc>,
}

/// Result of a prune pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    pub reset: usize,
}
