//! Completed-versus-total counters for progress display

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

/// Point-in-time progress values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.done >= self.total
    }

    /// Completion ratio in `[0.0, 1.0]`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.done as f64 / self.total as f64).min(1.0)
        }
    }
}

/// Progress counters with a watch channel for observers.
///
/// `done` counts steps since the last start or stop; one step per finished
/// job and one per row skipped because it already had a result.
pub struct ProgressTracker {
    done: AtomicUsize,
    total: AtomicUsize,
    sender: watch::Sender<Progress>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Progress::default());
        Self {
            done: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            sender,
        }
    }

    pub fn step(&self) {
        self.done.fetch_add(1, Ordering::SeqCst);
        self.publish();
    }

    /// Zero the displayed count; row results are not touched
    pub fn reset_display(&self) {
        self.done.store(0, Ordering::SeqCst);
        self.publish();
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.publish();
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            done: self.done.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }

    /// Receive a new value every time the counters change
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.sender.subscribe()
    }

    fn publish(&self) {
        self.sender.send_replace(self.snapshot());
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("progress", &self.snapshot())
            .finish()
    }
}
