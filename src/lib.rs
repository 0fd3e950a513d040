//! # multicmd
//!
//! Run a parameterized shell command once per row of tabular input, with a
//! bounded number of commands running at the same time.
//!
//! ## Overview
//!
//! A batch is a list of parameter rows loaded from a tab-separated file. A
//! command template such as `convert {0} -resize {1} out/{0}` is rendered
//! against every row that has not produced an exit status yet, and the
//! resulting commands are executed by a fixed-size worker pool. Each row
//! records the exit status of its command, so a stopped batch can be resumed
//! later and only the unfinished rows run again.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use multicmd::batch::Batch;
//! use multicmd::config::BatchConfig;
//!
//! # async fn example() -> multicmd::Result<()> {
//! let batch = Batch::new(BatchConfig::default().with_concurrency(4));
//! batch.load_file("jobs.tsv")?;
//!
//! let report = batch.start("echo {0} {1}")?;
//! println!("queued {} commands", report.submitted);
//!
//! batch.wait().await;
//! for row in batch.rows() {
//!     println!("{} -> {:?}", row.id, row.result);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`batch`]: rows, results, progress and the control surface
//! - [`template`]: command template parsing and rendering
//! - [`engine`]: the worker pool that runs commands
//! - [`config`]: batch configuration and persisted command history

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for multicmd operations
pub type Result<T> = std::result::Result<T, MultiCmdError>;

/// Main error type for multicmd operations
#[derive(Error, Debug)]
pub enum MultiCmdError {
    /// The command template could not be rendered
    #[error("Template error: {0}")]
    Template(#[from] template::TemplateError),

    /// A dispatch is already running against this batch
    #[error("A dispatch is already active")]
    Busy,

    /// Concurrency outside of the accepted range
    #[error(
        "Invalid concurrency {0}: must be between {} and {}",
        config::MIN_CONCURRENCY,
        config::MAX_CONCURRENCY
    )]
    InvalidConcurrency(usize),

    /// Input rows could not be loaded
    #[error("Load error: {0}")]
    Load(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No async runtime to host the worker pool
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Join error from async tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Parameter rows, results, progress and the control surface
pub mod batch;

/// Command template parsing and rendering
pub mod template;

/// Worker pool and process execution
pub mod engine;

/// Configuration and command history
pub mod config;
