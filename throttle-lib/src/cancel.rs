//! Cooperative cancellation passed explicitly to every suspension point.
//!
//! A [`CancelSignal`] is a cheap, cloneable handle. Firing any clone fires
//! all of them. Child signals fire when their parent fires, but firing a
//! child leaves the parent untouched. This mirrors how a run-wide deadline
//! cascades into the individual units of work.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{ErrorKind, Result};

/// Shared cancellation flag with "fire" and "observe" semantics.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    /// Create a signal which has not fired yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal which fires automatically once `deadline` has elapsed.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_deadline(deadline: Duration) -> Self {
        let signal = Self::new();
        signal.fire_after(deadline);
        signal
    }

    /// Fire the signal once `delay` has elapsed, unless it fired before.
    ///
    /// Must be called from within a tokio runtime.
    pub fn fire_after(&self, delay: Duration) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => token.cancel(),
            }
        });
    }

    /// Fire the signal. Idempotent.
    pub fn fire(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the signal (or one of its parents) has fired
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal has fired
    pub async fn fired(&self) {
        self.token.cancelled().await;
    }

    /// Create a signal that fires together with this one but can also be
    /// fired on its own
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Drive `fut` to completion unless the signal fires first.
    ///
    /// A signal that already fired wins over a future that is ready
    /// immediately, so no work is started after cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Canceled`] if the signal fires before `fut`
    /// completes. `fut` is dropped in that case.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(ErrorKind::Canceled),
            out = fut => Ok(out),
        }
    }
}

impl From<CancellationToken> for CancelSignal {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}
