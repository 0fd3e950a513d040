//! Command execution engine
//!
//! This module provides the worker pool that runs rendered commands.

pub mod executor;
pub mod process;

pub use executor::{DispatchEngine, DispatchHandle, PoolCounters};
pub use process::{run_command, status_code, ProcessOutcome, LAUNCH_FAILURE_STATUS};
