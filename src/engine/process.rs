//! Child process execution for a single job.
//!
//! The rendered command is handed to the configured shell with every standard
//! stream connected to the null device. Only the exit status is observed.

use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::batch::ExitStatus;
use crate::config::ShellConfig;

/// Status recorded when the process could not be spawned or waited on
pub const LAUNCH_FAILURE_STATUS: ExitStatus = -1;

/// How a job's process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process ended on its own; nonzero statuses included
    Exited(ExitStatus),
    /// The run was stopped and the process killed
    Cancelled,
}

/// Convert a platform exit status to the recorded integer.
///
/// On Unix a process killed by a signal reports `-signal`.
pub fn status_code(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    LAUNCH_FAILURE_STATUS
}

/// Run `command` through `shell` until it exits or `cancel` fires.
///
/// A launch failure is not distinguished from a failing command: both yield
/// [`ProcessOutcome::Exited`] with a nonzero status.
pub async fn run_command(
    shell: &ShellConfig,
    command: &str,
    cancel: &CancellationToken,
) -> ProcessOutcome {
    if cancel.is_cancelled() {
        return ProcessOutcome::Cancelled;
    }

    let mut cmd = Command::new(&shell.program);
    // `kill_on_drop(true)` kills the child if the worker task is aborted.
    cmd.args(&shell.args)
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(shell = %shell.program, error = %e, "Failed to spawn command");
            return ProcessOutcome::Exited(LAUNCH_FAILURE_STATUS);
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Child already gone when killed");
            }
            ProcessOutcome::Cancelled
        }
        status = child.wait() => match status {
            Ok(status) => ProcessOutcome::Exited(status_code(status)),
            Err(e) => {
                warn!(error = %e, "Failed to wait for command");
                ProcessOutcome::Exited(LAUNCH_FAILURE_STATUS)
            }
        },
    }
}
