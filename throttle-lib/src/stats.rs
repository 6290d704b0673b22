use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Aggregate counters shared by all workers of a run.
///
/// All updates are lock-free; cloning yields a handle to the same counters.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of a [`Tally`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TallySnapshot {
    /// Operations currently running
    pub in_flight: usize,
    /// Highest number of simultaneously running operations seen so far
    pub max_in_flight: usize,
    /// Operations which completed successfully
    pub succeeded: u64,
    /// Operations which failed
    pub failed: u64,
}

/// Marks one operation as in flight until dropped
#[derive(Debug)]
#[must_use = "the operation is only counted while the guard is alive"]
pub struct InFlight {
    tally: Tally,
}

impl Tally {
    /// Create a tally with all counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an operation as in flight and update the observed maximum
    pub fn enter(&self) -> InFlight {
        let now = self.inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlight {
            tally: self.clone(),
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.inner.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of an operation
    pub fn record<T, E>(&self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
    }

    /// Read all counters
    #[must_use]
    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            in_flight: self.inner.in_flight.load(Ordering::Acquire),
            max_in_flight: self.inner.max_in_flight.load(Ordering::Acquire),
            succeeded: self.inner.succeeded.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }
}

impl TallySnapshot {
    /// Number of operations that finished, successfully or not
    #[must_use]
    pub const fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Returns `true` if no operation failed
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.tally.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
