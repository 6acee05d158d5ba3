//! Observability hooks for batch execution
//!
//! The runner reports every admitted task twice: once when it starts and
//! once when it finishes, each time with the live worker count at that
//! instant. Tasks skipped before admission are reported through
//! [`EventSink::on_skip`] instead.

use std::sync::Arc;
use tracing::{debug, info};

use super::types::{TaskEvent, TaskStatus};

/// Receiver of task lifecycle events
///
/// Called from the activation's own task, so implementations must be cheap
/// and must not block.
pub trait EventSink: Send + Sync {
    /// A task acquired its gate token and is about to execute
    fn on_start(&self, event: &TaskEvent);

    /// A task finished and released its gate token
    fn on_finish(&self, event: &TaskEvent, status: TaskStatus);

    /// A task was skipped before it reached the gate
    fn on_skip(&self, _index: usize, _total: usize) {}
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn on_start(&self, event: &TaskEvent) {
        (**self).on_start(event)
    }

    fn on_finish(&self, event: &TaskEvent, status: TaskStatus) {
        (**self).on_finish(event, status)
    }

    fn on_skip(&self, index: usize, total: usize) {
        (**self).on_skip(index, total)
    }
}

/// Emits START/DONE lines through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_start(&self, event: &TaskEvent) {
        info!(
            task = event.index,
            total = event.total,
            active_workers = event.active_workers,
            "START: task {}/{}",
            event.index,
            event.total
        );
    }

    fn on_finish(&self, event: &TaskEvent, status: TaskStatus) {
        info!(
            task = event.index,
            total = event.total,
            active_workers = event.active_workers,
            status = %status,
            "DONE: task {}/{}",
            event.index,
            event.total
        );
    }

    fn on_skip(&self, index: usize, total: usize) {
        debug!(task = index, total = total, "SKIP: task {}/{}", index, total);
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_start(&self, _event: &TaskEvent) {}

    fn on_finish(&self, _event: &TaskEvent, _status: TaskStatus) {}
}

type StartCallback = Box<dyn Fn(&TaskEvent) + Send + Sync>;
type FinishCallback = Box<dyn Fn(&TaskEvent, TaskStatus) + Send + Sync>;

/// Sink built from a pair of closures
pub struct CallbackSink {
    on_start: StartCallback,
    on_finish: FinishCallback,
}

impl CallbackSink {
    /// Create a sink calling `on_start` and `on_finish`
    pub fn new<S, F>(on_start: S, on_finish: F) -> Self
    where
        S: Fn(&TaskEvent) + Send + Sync + 'static,
        F: Fn(&TaskEvent, TaskStatus) + Send + Sync + 'static,
    {
        Self {
            on_start: Box::new(on_start),
            on_finish: Box::new(on_finish),
        }
    }
}

impl std::fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink").finish_non_exhaustive()
    }
}

impl EventSink for CallbackSink {
    fn on_start(&self, event: &TaskEvent) {
        (self.on_start)(event)
    }

    fn on_finish(&self, event: &TaskEvent, status: TaskStatus) {
        (self.on_finish)(event, status)
    }
}
