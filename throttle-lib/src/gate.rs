//! Admission control capping the number of concurrently running operations.
//!
//! A [`Gate`] wraps a [`tokio::sync::Semaphore`] with a fixed number of
//! permits. Every unit of work holds a [`Permit`] while it runs; the permit
//! goes back to the gate when it is dropped, no matter how the work ended.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{CancelSignal, ErrorKind, Result};

/// Caps concurrent admissions to a fixed capacity.
///
/// Cloning a `Gate` is cheap and yields a handle to the same set of permits.
#[derive(Debug, Clone)]
pub struct Gate {
    /// Source of truth for admission decisions
    semaphore: Arc<Semaphore>,
    /// Number of permits the gate was created with
    capacity: usize,
}

/// The right to run one unit of work under a [`Gate`].
///
/// Dropping the permit releases it back to the gate.
#[derive(Debug)]
#[must_use = "dropping a permit immediately releases it"]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl Gate {
    /// Create a gate admitting at most `capacity` concurrent operations
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfiguration`] if `capacity` is zero or
    /// exceeds [`Semaphore::MAX_PERMITS`].
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > Semaphore::MAX_PERMITS {
            return Err(ErrorKind::InvalidConfiguration("capacity"));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Wait for a permit.
    ///
    /// Dropping the returned future before it completes does not consume a
    /// permit.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Canceled`] if `signal` fires before a permit is
    ///   available. No permit is consumed.
    /// - [`ErrorKind::Closed`] if the gate was closed.
    pub async fn acquire(&self, signal: &CancelSignal) -> Result<Permit> {
        let permit = signal
            .guard(Arc::clone(&self.semaphore).acquire_owned())
            .await?
            .map_err(|_| ErrorKind::Closed)?;
        Ok(Permit { _permit: permit })
    }

    /// Give a permit back to the gate. Equivalent to dropping it.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Run `operation` once a permit is available.
    ///
    /// The permit is held for the whole execution of `operation` and released
    /// on every exit path: success, failure, or the returned future being
    /// dropped half-way. `operation` receives a clone of `signal` so that it
    /// can abort its own work cooperatively.
    ///
    /// # Errors
    ///
    /// Errors from `operation` are returned unchanged. Failures to obtain a
    /// permit ([`ErrorKind::Canceled`], [`ErrorKind::Closed`]) are converted
    /// into `E`; `operation` is not invoked in that case.
    pub async fn run<F, Fut, T, E>(
        &self,
        operation: F,
        signal: &CancelSignal,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<ErrorKind>,
    {
        let _permit = self.acquire(signal).await?;
        operation(signal.clone()).await
    }

    /// Maximum number of concurrent admissions
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits currently held.
    ///
    /// This is a snapshot for reporting only. By the time the caller looks
    /// at it the value may already be stale.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Close the gate.
    ///
    /// Pending and future acquisitions fail with [`ErrorKind::Closed`].
    /// Permits that are already held stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Returns `true` if [`Gate::close`] was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
