//! Task, event, and report types shared by both execution strategies

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BatchError;

type TaskBody = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Opaque unit of work submitted to a batch
///
/// A task has no identity beyond its position in the submitted list. The
/// runner invokes it at most once and never retries it.
pub struct Task {
    body: TaskBody,
    blocking: bool,
}

impl Task {
    /// Create a task from an async closure
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            body: Box::new(move || f().boxed()),
            blocking: false,
        }
    }

    /// Create a task from a synchronous closure, run on the blocking pool
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::blocking_fallible(move || {
            f();
            Ok(())
        })
    }

    /// Create a task from a synchronous closure that can fail
    ///
    /// A running closure cannot be interrupted, so a per-task timeout is
    /// only checked once it returns and the task keeps its gate token until
    /// then.
    pub fn blocking_fallible<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let task = Self::new(move || async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(result) => result,
                // Re-raise so the activation reports the panic itself.
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(anyhow::anyhow!("blocking task was cancelled: {}", e)),
            }
        });
        Self {
            blocking: true,
            ..task
        }
    }

    /// A task that does nothing
    pub fn noop() -> Self {
        Self::new(|| async { Ok(()) })
    }

    /// Whether the task runs on the blocking pool
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub(crate) fn into_boxed(self) -> BoxFuture<'static, anyhow::Result<()>> {
        // Defer the call so a panic in the closure itself surfaces on first poll.
        let body = self.body;
        async move { body().await }.boxed()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("blocking", &self.blocking)
            .finish_non_exhaustive()
    }
}

/// How a batch launches its activations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One spawned activation per task, all waiting at the gate
    #[default]
    SpawnPerTask,
    /// A fixed pool of `limit` workers pulling tasks from a shared queue
    WorkerPool,
}

impl FromStr for ExecutionStrategy {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spawn" | "spawn_per_task" => Ok(Self::SpawnPerTask),
            "pool" | "worker_pool" => Ok(Self::WorkerPool),
            other => Err(BatchError::Configuration(format!(
                "unknown execution strategy '{}', expected 'spawn' or 'pool'",
                other
            ))),
        }
    }
}

/// Final status of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Task returned `Ok`
    Completed,
    /// Task returned an error
    Failed,
    /// Task panicked
    Panicked,
    /// Task exceeded the per-task timeout
    TimedOut,
    /// Task was never admitted (cancellation or batch deadline)
    Cancelled,
}

impl TaskStatus {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Panicked => "panicked",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the task finished successfully
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start or finish notification for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Position of the task in the submitted list
    pub index: usize,
    /// Number of tasks in the batch
    pub total: usize,
    /// Live worker count right after this task's increment or decrement
    pub active_workers: usize,
}

/// Outcome of one task in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Position of the task in the submitted list
    pub index: usize,
    /// Final status
    pub status: TaskStatus,
    /// Error message for anything other than `Completed`
    pub error: Option<String>,
    /// Time spent executing, zero for tasks never admitted
    pub duration: Duration,
}

impl TaskResult {
    pub(crate) fn cancelled(index: usize, reason: &str) -> Self {
        Self {
            index,
            status: TaskStatus::Cancelled,
            error: Some(reason.to_string()),
            duration: Duration::ZERO,
        }
    }
}

/// Per-index outcomes of one batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Identifier attached to every log line of the run
    pub batch_id: Uuid,
    /// One result per submitted task, ordered by index
    pub results: Vec<TaskResult>,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Highest live worker count observed by this run
    pub peak_active_workers: usize,
}

impl BatchReport {
    pub(crate) fn empty(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            results: Vec::new(),
            duration: Duration::ZERO,
            peak_active_workers: 0,
        }
    }

    /// Number of tasks in the batch
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Number of tasks with the given status
    pub fn count(&self, status: TaskStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Number of tasks that completed successfully
    pub fn completed(&self) -> usize {
        self.count(TaskStatus::Completed)
    }

    /// Results for every task that did not complete
    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| !r.status.is_success())
    }

    /// Whether every task completed
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Render the report as JSON
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
