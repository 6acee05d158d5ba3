//! Batch Runner
//!
//! Runs a list of independent tasks concurrently under an admission gate:
//! - One activation per task, at most `concurrency_limit` past the gate
//! - Live worker accounting with start/finish events per task
//! - Task failures and panics contained at the activation boundary
//! - Optional per-task timeout, whole-batch deadline, and cancellation
//! - Returns only after every activation has finished

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::counter::LiveWorkerCounter;
use super::events::{EventSink, TracingSink};
use super::scheduler;
use super::types::{BatchReport, ExecutionStrategy, Task, TaskEvent, TaskResult, TaskStatus};
use crate::config::BatchConfig;
use crate::gate::{AdmissionGate, GatePermit};
use crate::metrics::{self, Timer};
use crate::{BatchError, Result};

/// Runs batches of tasks with bounded concurrency
///
/// A runner is bound to its configuration and can be reused for any number
/// of batches. Each call gets its own admission gate, and its own live
/// worker counter unless one was injected with [`BatchRunner::with_counter`].
pub struct BatchRunner {
    config: BatchConfig,
    sink: Arc<dyn EventSink>,
    counter: Option<LiveWorkerCounter>,
    cancellation: Option<CancellationToken>,
}

impl BatchRunner {
    /// Create a runner admitting at most `concurrency_limit` tasks at once
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the limit is zero.
    pub fn new(concurrency_limit: usize) -> Result<Self> {
        Self::from_config(BatchConfig::with_limit(concurrency_limit))
    }

    /// Create a runner from a full configuration
    pub fn from_config(config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sink: Arc::new(TracingSink),
            counter: None,
            cancellation: None,
        })
    }

    /// Set timeout for individual tasks
    ///
    /// Async tasks are dropped when it elapses. Blocking tasks run to the end
    /// and keep their gate token, then are reported as timed out.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_timeout = Some(timeout);
        self
    }

    /// Set a deadline for the whole batch
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = Some(deadline);
        self
    }

    /// Choose how activations are launched
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Send start/finish events to `sink` instead of the log
    pub fn with_event_sink<S>(mut self, sink: S) -> Self
    where
        S: EventSink + 'static,
    {
        self.sink = Arc::new(sink);
        self
    }

    /// Share a live worker counter across runs and runners
    pub fn with_counter(mut self, counter: LiveWorkerCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Skip tasks not yet admitted once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Maximum number of tasks executing at once
    pub fn concurrency_limit(&self) -> usize {
        self.config.concurrency_limit
    }

    /// Active configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run every task and wait for all of them, discarding task failures
    ///
    /// Failed, panicked and timed-out tasks are logged but never reported
    /// back; use [`BatchRunner::run_collect`] to inspect them.
    pub async fn run(&self, tasks: Vec<Task>) -> Result<()> {
        let report = self.run_collect(tasks).await?;
        let unsuccessful = report.failures().count();
        if unsuccessful > 0 {
            debug!(
                batch_id = %report.batch_id,
                unsuccessful = unsuccessful,
                "Discarding task failures"
            );
        }
        Ok(())
    }

    /// Run every task, wait for all of them, and return one result per index
    #[instrument(
        skip(self, tasks),
        fields(task_count = tasks.len(), concurrency_limit = self.config.concurrency_limit)
    )]
    pub async fn run_collect(&self, tasks: Vec<Task>) -> Result<BatchReport> {
        self.config.validate()?;

        let batch_id = Uuid::new_v4();
        let total = tasks.len();

        if tasks.is_empty() {
            debug!(batch_id = %batch_id, "No tasks to execute in batch");
            return Ok(BatchReport::empty(batch_id));
        }

        let limit = self.config.concurrency_limit;
        info!(
            batch_id = %batch_id,
            total_tasks = total,
            concurrency_limit = limit,
            strategy = ?self.config.strategy,
            task_timeout = ?self.config.task_timeout,
            deadline = ?self.config.deadline,
            "Starting batch execution"
        );

        let timer = Timer::start();
        let cancel = match &self.cancellation {
            Some(token) => token.child_token(),
            None => CancellationToken::new(),
        };
        let ctx = Arc::new(ActivationContext {
            batch_id,
            total,
            gate: AdmissionGate::new(limit)?,
            counter: self.counter.clone().unwrap_or_default(),
            sink: Arc::clone(&self.sink),
            task_timeout: self.config.task_timeout,
            cancel,
            deadline_elapsed: AtomicBool::new(false),
            peak_active: AtomicUsize::new(0),
        });

        let deadline_timer = self.config.deadline.map(|deadline| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                ctx.deadline_elapsed.store(true, Ordering::SeqCst);
                warn!(
                    batch_id = %ctx.batch_id,
                    deadline = ?deadline,
                    "Batch deadline elapsed, skipping tasks not yet admitted"
                );
                ctx.cancel.cancel();
            })
        });

        let results = match self.config.strategy {
            ExecutionStrategy::SpawnPerTask => spawn_per_task(&ctx, tasks).await,
            ExecutionStrategy::WorkerPool => scheduler::run_worker_pool(&ctx, tasks, limit).await,
        };

        if let Some(handle) = deadline_timer {
            handle.abort();
        }

        let duration = timer.end("batch");
        metrics::record_batch(duration);

        let report = BatchReport {
            batch_id,
            results,
            duration,
            peak_active_workers: ctx.peak_active.load(Ordering::SeqCst),
        };

        info!(
            batch_id = %batch_id,
            total_tasks = total,
            completed = report.completed(),
            failed = report.count(TaskStatus::Failed),
            panicked = report.count(TaskStatus::Panicked),
            timed_out = report.count(TaskStatus::TimedOut),
            cancelled = report.count(TaskStatus::Cancelled),
            peak_active_workers = report.peak_active_workers,
            batch_duration = ?duration,
            "Batch execution completed"
        );

        Ok(report)
    }

    /// Run a batch from synchronous code on a private runtime
    ///
    /// # Errors
    ///
    /// Returns a runtime error when called from inside a tokio runtime, where
    /// blocking the thread would stall other tasks.
    pub fn run_blocking(&self, tasks: Vec<Task>) -> Result<BatchReport> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BatchError::Runtime(
                "run_blocking called from within an async runtime; await run_collect instead"
                    .to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run_collect(tasks))
    }
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("config", &self.config)
            .field("counter", &self.counter)
            .field("cancellation", &self.cancellation)
            .finish_non_exhaustive()
    }
}

/// Run `tasks` with at most `concurrency_limit` executing at once
///
/// Task failures are swallowed. The limit is checked before any task is
/// launched.
pub async fn run_batch(tasks: Vec<Task>, concurrency_limit: usize) -> Result<()> {
    BatchRunner::new(concurrency_limit)?.run(tasks).await
}

/// State shared by every activation of one batch run
pub(crate) struct ActivationContext {
    batch_id: Uuid,
    total: usize,
    gate: AdmissionGate,
    counter: LiveWorkerCounter,
    sink: Arc<dyn EventSink>,
    task_timeout: Option<Duration>,
    cancel: CancellationToken,
    deadline_elapsed: AtomicBool,
    peak_active: AtomicUsize,
}

impl ActivationContext {
    fn skip(&self, index: usize) -> TaskResult {
        let reason = if self.deadline_elapsed.load(Ordering::SeqCst) {
            "batch deadline elapsed before admission"
        } else {
            "batch cancelled before admission"
        };
        debug!(task = index, reason = reason, "Skipping task");
        metrics::record_task_skipped();
        self.sink.on_skip(index, self.total);
        TaskResult::cancelled(index, reason)
    }
}

async fn spawn_per_task(ctx: &Arc<ActivationContext>, tasks: Vec<Task>) -> Vec<TaskResult> {
    let handles: Vec<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| tokio::spawn(run_activation(Arc::clone(ctx), index, task)))
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => {
                error!(task = index, error = %e, "Activation join error");
                results.push(TaskResult {
                    index,
                    status: TaskStatus::Panicked,
                    error: Some(format!("activation join error: {}", e)),
                    duration: Duration::ZERO,
                });
            }
        }
    }
    results
}

/// Wait at the gate, execute one task, and account for it
pub(crate) async fn run_activation(
    ctx: Arc<ActivationContext>,
    index: usize,
    task: Task,
) -> TaskResult {
    let span = info_span!("activation", batch_id = %ctx.batch_id, task = index);

    async move {
        if ctx.cancel.is_cancelled() {
            return ctx.skip(index);
        }

        let permit = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return ctx.skip(index),
            permit = ctx.gate.acquire() => permit,
        };

        let mut slot = WorkerSlot::enter(&ctx, index, permit);
        let (status, error) = execute_task(task, ctx.task_timeout).await;
        let duration = slot.finish(status);
        drop(slot);

        if let Some(ref message) = error {
            warn!(status = %status, error = %message, "Task did not complete");
        }

        TaskResult {
            index,
            status,
            error,
            duration,
        }
    }
    .instrument(span)
    .await
}

async fn execute_task(task: Task, timeout: Option<Duration>) -> (TaskStatus, Option<String>) {
    let blocking = task.is_blocking();
    let body = AssertUnwindSafe(task.into_boxed()).catch_unwind();

    let outcome = match timeout {
        // A blocking closure cannot be stopped, so it holds its slot until it
        // returns and the overrun is reported afterwards.
        Some(limit) if blocking => {
            let started = Instant::now();
            let outcome = body.await;
            if started.elapsed() > limit {
                return timed_out(limit);
            }
            outcome
        }
        Some(limit) => match tokio::time::timeout(limit, body).await {
            Ok(outcome) => outcome,
            Err(_) => return timed_out(limit),
        },
        None => body.await,
    };

    match outcome {
        Ok(Ok(())) => (TaskStatus::Completed, None),
        Ok(Err(e)) => (TaskStatus::Failed, Some(format!("{:#}", e))),
        Err(payload) => (TaskStatus::Panicked, Some(panic_message(payload.as_ref()))),
    }
}

fn timed_out(limit: Duration) -> (TaskStatus, Option<String>) {
    (
        TaskStatus::TimedOut,
        Some(format!("task timed out after {:?}", limit)),
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", message)
    } else {
        "task panicked".to_string()
    }
}

/// One admitted task's hold on the gate and the live counter
///
/// Dropping the slot decrements the counter, returns the gate token, and
/// emits the finish event, in that order. Runs even if the activation is
/// dropped mid-task, in which case the task is reported as cancelled.
struct WorkerSlot<'a> {
    ctx: &'a ActivationContext,
    index: usize,
    permit: Option<GatePermit>,
    status: TaskStatus,
    timer: Timer,
}

impl<'a> WorkerSlot<'a> {
    fn enter(ctx: &'a ActivationContext, index: usize, permit: GatePermit) -> Self {
        let active = ctx.counter.increment();
        ctx.peak_active.fetch_max(active, Ordering::SeqCst);
        metrics::record_task_start();

        let slot = Self {
            ctx,
            index,
            permit: Some(permit),
            status: TaskStatus::Cancelled,
            timer: Timer::start(),
        };
        ctx.sink.on_start(&TaskEvent {
            index,
            total: ctx.total,
            active_workers: active,
        });
        slot
    }

    fn finish(&mut self, status: TaskStatus) -> Duration {
        self.status = status;
        self.timer.elapsed()
    }
}

impl Drop for WorkerSlot<'_> {
    fn drop(&mut self) {
        let active = self.ctx.counter.decrement();
        if let Some(permit) = self.permit.take() {
            permit.release();
        }
        metrics::record_task_end(self.status, self.timer.elapsed());
        self.ctx.sink.on_finish(
            &TaskEvent {
                index: self.index,
                total: self.ctx.total,
                active_workers: active,
            },
            self.status,
        );
    }
}
