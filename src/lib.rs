//! # batchgate
//!
//! Bounded-concurrency batch execution for Tokio applications.
//!
//! ## Overview
//!
//! Hand a list of independent tasks and a concurrency limit to a
//! [`BatchRunner`]. Every task gets its own activation, but at most `limit`
//! of them are past the [`AdmissionGate`] at any instant. The call returns
//! once every task has finished, successfully or not.
//!
//! ## Quick Start
//!
//! ```rust
//! use batchgate::{BatchRunner, Task};
//! use std::time::Duration;
//!
//! # async fn example() -> batchgate::Result<()> {
//! let tasks = (0..100)
//!     .map(|_| {
//!         Task::new(|| async {
//!             tokio::time::sleep(Duration::from_millis(10)).await;
//!             Ok(())
//!         })
//!     })
//!     .collect();
//!
//! let report = BatchRunner::new(10)?.run_collect(tasks).await?;
//! assert_eq!(report.completed(), 100);
//! assert!(report.peak_active_workers <= 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Features
//!
//! - **Admission control**: a semaphore-backed token pool caps simultaneous execution
//! - **Live worker accounting**: start/finish events carry the active worker count
//! - **Failure containment**: errors and panics never abort sibling tasks
//! - **Silent or collecting**: [`BatchRunner::run`] swallows failures, [`BatchRunner::run_collect`] reports them per index
//! - **Cancellation and deadlines**: skip tasks that have not been admitted yet
//! - **Two strategies**: spawn per task, or a fixed worker pool over a shared queue
//!
//! ## Modules
//!
//! - [`gate`]: the admission gate
//! - [`batch`]: tasks, events, the live worker counter, and the runner
//! - [`config`]: runner configuration and environment loading
//! - [`metrics`]: Prometheus instruments
//! - [`telemetry`]: tracing subscriber setup

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for batchgate operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Main error type for batchgate operations
///
/// Task failures are not errors at this level; they are reported per task
/// in a [`BatchReport`].
#[derive(Error, Debug)]
pub enum BatchError {
    /// Invalid limit, timeout, or other setting; raised before any task runs
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The async runtime could not be used as requested
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Metrics could not be exported
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Tracing could not be initialized
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// I/O error, e.g. while building a runtime
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Admission gate limiting simultaneous task execution
pub mod gate;

/// Batch execution: tasks, events, counters, and the runner
pub mod batch;

/// Runner configuration
pub mod config;

/// Prometheus metrics
pub mod metrics;

/// Tracing subscriber setup
pub mod telemetry;

pub use batch::{
    run_batch, BatchReport, BatchRunner, CallbackSink, EventSink, ExecutionStrategy,
    LiveWorkerCounter, NoopSink, Task, TaskEvent, TaskResult, TaskStatus, TracingSink,
};
pub use config::BatchConfig;
pub use gate::{AdmissionGate, GatePermit};
