//! # Bounded Connection Admission
//!
//! Purpose: Cap how many backend operations may be in flight at once,
//! independently of the connection pool's own limits. Every operation must
//! hold an admission permit before it may lease a connection, which keeps
//! this gate the outermost bound on concurrency and leaves the pool with
//! nothing to queue on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// Wait duration past which an acquisition is reported as slow.
pub(crate) const SLOW_ADMISSION_WAIT: Duration = Duration::from_millis(100);

/// Counting gate bounding in-flight backend operations.
#[derive(Clone)]
pub(crate) struct AdmissionGate {
    slots: Arc<Semaphore>,
    max_active: usize,
}

/// Permit for one in-flight operation; the slot frees on drop.
pub(crate) struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub(crate) fn new(max_active: usize) -> Self {
        AdmissionGate {
            slots: Arc::new(Semaphore::new(max_active)),
            max_active,
        }
    }

    /// Waits until a slot is free.
    ///
    /// Dropping the returned future while waiting consumes nothing. A wait
    /// longer than [`SLOW_ADMISSION_WAIT`] is logged as a backend
    /// saturation signal; it is a latency symptom, not an error.
    pub(crate) async fn acquire(&self) -> AdmissionPermit {
        let start = Instant::now();
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed");
        let waited = start.elapsed();
        if waited > SLOW_ADMISSION_WAIT {
            let active = self.max_active - self.slots.available_permits();
            warn!(
                wait_ms = waited.as_millis() as u64,
                active, "slow admission wait"
            );
        }
        AdmissionPermit { _permit: permit }
    }
}
