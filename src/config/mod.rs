//! Batch configuration and persisted command history

use serde::{Deserialize, Serialize};

use crate::{MultiCmdError, Result};

pub mod history;

pub use history::CommandHistory;

/// Smallest accepted worker count
pub const MIN_CONCURRENCY: usize = 1;

/// Largest accepted worker count
pub const MAX_CONCURRENCY: usize = 100;

/// Reject a worker count outside `[MIN_CONCURRENCY, MAX_CONCURRENCY]`
pub fn validate_concurrency(concurrency: usize) -> Result<usize> {
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
        Ok(concurrency)
    } else {
        Err(MultiCmdError::InvalidConcurrency(concurrency))
    }
}

/// Clamp a worker count into the accepted range, for front ends that
/// prefer clamping over rejecting
pub fn clamp_concurrency(concurrency: usize) -> usize {
    concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

/// Which rows `prune` removes.
///
/// Every row that is not removed has its result cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrunePolicy {
    /// Remove rows whose exit status is exactly `0`
    #[default]
    Succeeded,
    /// Remove rows that never produced an exit status
    Unset,
}

/// Shell used to interpret rendered commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    pub program: String,
    /// Arguments placed before the command string
    pub args: Vec<String>,
}

impl ShellConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Default for ShellConfig {
    #[cfg(windows)]
    fn default() -> Self {
        Self::new("cmd", vec!["/C".to_string()])
    }

    #[cfg(not(windows))]
    fn default() -> Self {
        Self::new("sh", vec!["-c".to_string()])
    }
}

/// Batch execution configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub shell: ShellConfig,
    pub prune_policy: PrunePolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: clamp_concurrency(num_cpus::get()),
            shell: ShellConfig::default(),
            prune_policy: PrunePolicy::default(),
        }
    }
}

impl BatchConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_shell(mut self, shell: ShellConfig) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_prune_policy(mut self, policy: PrunePolicy) -> Self {
        self.prune_policy = policy;
        self
    }
}
