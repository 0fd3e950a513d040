//! Dispatch engine
//!
//! Runs one dispatch pass over the row store:
//! - rows that already have a result are skipped and counted as progress
//! - pending rows are rendered in ascending id order; the first render
//!   failure stops scheduling, jobs queued before it still run
//! - a fixed pool of `concurrency` workers drains the job queue, so no more
//!   than `concurrency` commands run at once
//! - workers report completions over a channel to a single collector, the
//!   only writer of results and progress
//! - stopping cancels a token checked before every job, kills running
//!   children and discards completions that arrive afterwards

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::batch::{Completion, DispatchReport, Job, ProgressTracker, RowStore};
use crate::config::{validate_concurrency, ShellConfig};
use crate::engine::process::{run_command, ProcessOutcome};
use crate::template::{CommandTemplate, TemplateError};
use crate::{MultiCmdError, Result};

/// Live counters of one dispatch pass
#[derive(Debug, Default)]
pub struct PoolCounters {
    running: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl PoolCounters {
    fn enter(self: &Arc<Self>) -> RunningGuard {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        RunningGuard(self.clone())
    }

    /// Jobs whose process is running right now
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Most jobs ever observed running at the same time
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Completions written back to the row store
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

struct RunningGuard(Arc<PoolCounters>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything a worker needs, shared across the pool
struct WorkerShared {
    queue: Mutex<VecDeque<Job>>,
    shell: ShellConfig,
    cancel: CancellationToken,
    counters: Arc<PoolCounters>,
}

/// Handle to a dispatch pass running in the background
pub struct DispatchHandle {
    report: DispatchReport,
    cancel: CancellationToken,
    finished: CancellationToken,
    gate: Arc<Mutex<()>>,
    store: Arc<RowStore>,
    counters: Arc<PoolCounters>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchHandle {
    pub fn report(&self) -> &DispatchReport {
        &self.report
    }

    pub fn run_id(&self) -> Uuid {
        self.report.run_id
    }

    /// True until every submitted job has been collected or `stop` returned
    pub fn is_active(&self) -> bool {
        !self.finished.is_cancelled()
    }

    pub fn counters(&self) -> &PoolCounters {
        &self.counters
    }

    /// Token that fires once the pass is over
    pub fn finished_token(&self) -> CancellationToken {
        self.finished.clone()
    }

    /// Abort the pass: no further jobs start, running children are killed,
    /// late completions are discarded. Recorded results stay as they are.
    ///
    /// The pass counts as finished as soon as this returns.
    pub fn stop(&self) {
        let _gate = self.gate.lock();
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        for worker in &self.workers {
            worker.abort();
        }
        let abandoned = self.store.unschedule_all();
        self.finished.cancel();
        info!(run_id = %self.report.run_id, abandoned, "Dispatch stopped");
    }

    /// Wait until the pass is over
    pub async fn wait(&self) {
        self.finished.cancelled().await;
    }
}

impl Drop for DispatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("report", &self.report)
            .field("active", &self.is_active())
            .field("counters", &self.counters)
            .finish()
    }
}

/// Jobs produced by walking the store once
struct DispatchPlan {
    jobs: Vec<Job>,
    skipped: usize,
    unscheduled: usize,
    template_error: Option<TemplateError>,
}

/// Schedules pending rows onto a bounded worker pool
#[derive(Clone)]
pub struct DispatchEngine {
    store: Arc<RowStore>,
    progress: Arc<ProgressTracker>,
    shell: ShellConfig,
}

impl DispatchEngine {
    pub fn new(store: Arc<RowStore>, progress: Arc<ProgressTracker>, shell: ShellConfig) -> Self {
        Self {
            store,
            progress,
            shell,
        }
    }

    /// Queue every pending row and return without waiting for execution.
    ///
    /// Must be called from inside a Tokio runtime. Template parse errors and
    /// an out-of-range `concurrency` are returned before anything is
    /// scheduled; an arity failure is reported in the returned handle's
    /// [`DispatchReport::template_error`].
    #[instrument(skip(self, template), fields(template = %template))]
    pub fn start(&self, template: &str, concurrency: usize) -> Result<DispatchHandle> {
        let concurrency = validate_concurrency(concurrency)?;
        let template = CommandTemplate::parse(template)?;
        let runtime = Handle::try_current()
            .map_err(|e| MultiCmdError::Runtime(format!("dispatch needs a Tokio runtime: {e}")))?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.progress.reset_display();

        let plan = self.plan(&template);
        self.store.mark_scheduled(plan.jobs.iter().map(|job| job.row));
        let report = DispatchReport {
            run_id,
            submitted: plan.jobs.len(),
            skipped: plan.skipped,
            unscheduled: plan.unscheduled,
            concurrency,
            template_error: plan.template_error,
            started_at,
        };

        info!(
            run_id = %run_id,
            submitted = report.submitted,
            skipped = report.skipped,
            unscheduled = report.unscheduled,
            required_arity = template.required_arity(),
            concurrency,
            "Starting dispatch"
        );

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let gate = Arc::new(Mutex::new(()));
        let counters = Arc::new(PoolCounters::default());
        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(plan.jobs.into()),
            shell: self.shell.clone(),
            cancel: cancel.clone(),
            counters: counters.clone(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let workers = (0..concurrency)
            .map(|worker| {
                runtime.spawn(
                    worker_loop(shared.clone(), tx.clone())
                        .instrument(info_span!("worker", worker, run_id = %run_id)),
                )
            })
            .collect();
        drop(tx);

        let collector = Collector {
            store: self.store.clone(),
            progress: self.progress.clone(),
            gate: gate.clone(),
            cancel: cancel.clone(),
            counters: counters.clone(),
            run_id,
        };
        let done = finished.clone().drop_guard();
        runtime.spawn(async move {
            let _done = done;
            collector.run(rx).await;
        });

        Ok(DispatchHandle {
            report,
            cancel,
            finished,
            gate,
            store: self.store.clone(),
            counters,
            workers,
        })
    }

    fn plan(&self, template: &CommandTemplate) -> DispatchPlan {
        let mut plan = DispatchPlan {
            jobs: Vec::new(),
            skipped: 0,
            unscheduled: 0,
            template_error: None,
        };

        for row in self.store.list() {
            if !row.is_pending() {
                self.progress.step();
                plan.skipped += 1;
                continue;
            }
            if plan.template_error.is_some() {
                plan.unscheduled += 1;
                continue;
            }
            match template.render(&row) {
                Ok(command) => plan.jobs.push(Job {
                    row: row.id,
                    command,
                }),
                Err(e) => {
                    warn!(row = row.id, error = %e, "Bad command line, no further rows scheduled");
                    plan.template_error = Some(e);
                    plan.unscheduled += 1;
                }
            }
        }

        plan
    }
}

async fn worker_loop(shared: Arc<WorkerShared>, tx: mpsc::UnboundedSender<Completion>) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }
        let next = shared.queue.lock().pop_front();
        let Some(job) = next else {
            break;
        };

        let start = Instant::now();
        debug!(row = job.row, command = %job.command, "Job started");
        let outcome = {
            let _running = shared.counters.enter();
            run_command(&shared.shell, &job.command, &shared.cancel).await
        };

        match outcome {
            ProcessOutcome::Exited(status) => {
                let completion = Completion {
                    row: job.row,
                    status,
                    duration: start.elapsed(),
                    finished_at: Utc::now(),
                };
                if tx.send(completion).is_err() {
                    break;
                }
            }
            ProcessOutcome::Cancelled => {
                debug!(row = job.row, "Job abandoned");
                break;
            }
        }
    }
}

/// Single consumer of completions; the only writer of results during a pass
struct Collector {
    store: Arc<RowStore>,
    progress: Arc<ProgressTracker>,
    gate: Arc<Mutex<()>>,
    cancel: CancellationToken,
    counters: Arc<PoolCounters>,
    run_id: Uuid,
}

impl Collector {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Completion>) {
        loop {
            let completion = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Some(completion) => completion,
                    None => break,
                },
            };
            self.apply(completion);
        }

        info!(
            run_id = %self.run_id,
            completed = self.counters.completed(),
            peak_running = self.counters.peak(),
            cancelled = self.cancel.is_cancelled(),
            "Dispatch finished"
        );
    }

    fn apply(&self, completion: Completion) {
        let _gate = self.gate.lock();
        if self.cancel.is_cancelled() {
            debug!(row = completion.row, "Discarding completion from stopped run");
            return;
        }

        if !self.store.set_result(completion.row, completion.status) {
            debug!(row = completion.row, "Completion did not change the row");
        }
        self.progress.step();
        self.counters.completed.fetch_add(1, Ordering::SeqCst);

        if completion.status == 0 {
            info!(
                row = completion.row,
                duration_ms = completion.duration.as_millis() as u64,
                "Job finished"
            );
        } else {
            warn!(
                row = completion.row,
                status = completion.status,
                duration_ms = completion.duration.as_millis() as u64,
                "Job finished with nonzero status"
            );
        }
    }
}
