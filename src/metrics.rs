//! Metrics collection for batch execution
//!
//! Provides Prometheus-compatible metrics for monitoring admission,
//! task outcomes, and batch durations.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::time::{Duration, Instant};
use tracing::info;

use crate::batch::TaskStatus;
use crate::{BatchError, Result};

lazy_static! {
    /// Gauge for tasks currently past the admission gate
    static ref ACTIVE_WORKERS: IntGauge = register_int_gauge!(
        "batchgate_active_workers",
        "Number of tasks currently executing across all batches"
    ).expect("batchgate_active_workers can be registered");

    /// Counter for finished tasks by status
    static ref TASKS: IntCounterVec = register_int_counter_vec!(
        "batchgate_tasks_total",
        "Total number of tasks by final status",
        &["status"]
    ).expect("batchgate_tasks_total can be registered");

    /// Histogram for task execution duration
    static ref TASK_DURATION: Histogram = register_histogram!(
        "batchgate_task_duration_seconds",
        "Task execution duration in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).expect("batchgate_task_duration_seconds can be registered");

    /// Counter for completed batch runs
    static ref BATCHES: IntCounter = register_int_counter!(
        "batchgate_batches_total",
        "Total number of batch runs"
    ).expect("batchgate_batches_total can be registered");

    /// Histogram for batch duration
    static ref BATCH_DURATION: Histogram = register_histogram!(
        "batchgate_batch_duration_seconds",
        "Batch run duration in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).expect("batchgate_batch_duration_seconds can be registered");
}

/// Record a task passing the admission gate
pub fn record_task_start() {
    ACTIVE_WORKERS.inc();
}

/// Record a task leaving the admission gate
pub fn record_task_end(status: TaskStatus, duration: Duration) {
    ACTIVE_WORKERS.dec();
    TASKS.with_label_values(&[status.as_str()]).inc();
    TASK_DURATION.observe(duration.as_secs_f64());
}

/// Record a task skipped before admission
pub fn record_task_skipped() {
    TASKS
        .with_label_values(&[TaskStatus::Cancelled.as_str()])
        .inc();
}

/// Record a finished batch run
pub fn record_batch(duration: Duration) {
    BATCHES.inc();
    BATCH_DURATION.observe(duration.as_secs_f64());
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| BatchError::Metrics(format!("Failed to encode metrics: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| BatchError::Metrics(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Timer for measuring operation duration
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer
    #[inline]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed time in seconds
    #[inline]
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Log the elapsed time under `operation` and return it
    pub fn end(&self, operation: &str) -> Duration {
        let elapsed = self.elapsed();
        info!(
            operation = operation,
            elapsed_ms = elapsed.as_millis() as u64,
            "Operation took {:?}",
            elapsed
        );
        elapsed
    }
}
