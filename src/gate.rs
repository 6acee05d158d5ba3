//! Admission gate for bounded task execution
//!
//! A counting token pool backed by a tokio [`Semaphore`]. An activation must
//! hold a [`GatePermit`] while its task executes; dropping the permit returns
//! the token and wakes the longest-waiting acquirer.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{BatchError, Result};

/// Capacity-limited token pool capping simultaneous task execution
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    /// Create a gate holding exactly `capacity` tokens
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BatchError::Configuration(
                "admission gate capacity must be at least 1".to_string(),
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(BatchError::Configuration(format!(
                "admission gate capacity {} exceeds the maximum of {}",
                capacity,
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Wait until a token is free and take it
    ///
    /// Waiters are served in FIFO order, so no acquirer waits forever while
    /// tokens are being released elsewhere.
    pub async fn acquire(&self) -> GatePermit {
        // The semaphore is private to the gate and never closed.
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("admission gate semaphore is never closed");
        GatePermit { _permit: permit }
    }

    /// Take a token only if one is free right now
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    /// Number of tokens currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Total number of tokens the gate was created with
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tokens currently held by activations
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

/// Token taken from an [`AdmissionGate`], returned on drop
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Return the token to the gate
    pub fn release(self) {}
}
