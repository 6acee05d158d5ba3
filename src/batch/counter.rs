//! Live worker accounting

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Count of tasks currently past the admission gate
///
/// Telemetry only; the gate alone enforces the bound. Clones share the same
/// count, so a counter injected into several runners reports activity across
/// all of their batches.
#[derive(Debug, Clone, Default)]
pub struct LiveWorkerCounter {
    active: Arc<AtomicUsize>,
}

impl LiveWorkerCounter {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task starting, returning the new count
    pub fn increment(&self) -> usize {
        self.active.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a task finishing, returning the new count
    pub fn decrement(&self) -> usize {
        // Only called after a matching increment.
        self.active.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Current count
    pub fn get(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
