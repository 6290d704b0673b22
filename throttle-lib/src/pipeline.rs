//! Bounded producer/consumer queue with backpressure.
//!
//! Producers call [`Pipeline::submit`], which suspends while the queue holds
//! `capacity` items. A fixed pool of consumers, either spawned through
//! [`Pipeline::spawn_consumers`] or driven manually with
//! [`Pipeline::receive`], takes items off the queue. Each item is handed to
//! exactly one consumer.
//!
//! # Implementation Details
//!
//! The queue is a [`tokio::sync::mpsc`] channel. Its single receiver is
//! shared between consumers behind an async mutex, so a consumer only holds
//! the mutex while waiting for the next item, never while processing it.
//!
//! Closing drops the pipeline's own sender and fires an internal token. Blocked
//! submitters observe the token, give up with [`ErrorKind::Closed`] and drop
//! their sender clones. Once the last sender is gone and the buffer is empty,
//! the channel reports end of stream to every consumer.
//!
//! Cancellation aborts immediately: queued items which have not been received
//! yet are left behind, items already received are not rolled back.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{CancelSignal, ErrorKind, Result};

/// Bounded work queue feeding a fixed pool of consumers
#[derive(Debug)]
pub struct Pipeline<T> {
    /// `None` once the pipeline was closed
    sender: Arc<parking_lot::Mutex<Option<mpsc::Sender<T>>>>,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    /// Fired by [`Pipeline::close`] to abort blocked submissions
    closed: CancellationToken,
    /// Items sitting in the queue
    pending: Arc<AtomicUsize>,
    capacity: usize,
    consumers: usize,
}

/// How a consumer worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Index of the worker within its pool
    pub worker: usize,
    /// Number of items the worker received and processed
    pub processed: usize,
    /// `true` if the worker stopped because the signal fired,
    /// `false` if it observed the end of the stream
    pub canceled: bool,
}

/// Handle to a pool of consumer workers
#[derive(Debug)]
pub struct Consumers {
    workers: JoinSet<ConsumerReport>,
}

impl<T> Pipeline<T> {
    /// Create a pipeline buffering at most `capacity` items for a pool of
    /// `consumers` workers
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfiguration`] if `capacity` or
    /// `consumers` is zero, or if `capacity` exceeds
    /// [`tokio::sync::Semaphore::MAX_PERMITS`].
    pub fn new(capacity: usize, consumers: usize) -> Result<Self> {
        if capacity == 0 || capacity > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ErrorKind::InvalidConfiguration("capacity"));
        }
        if consumers == 0 {
            return Err(ErrorKind::InvalidConfiguration("consumers"));
        }

        let (sender, receiver) = mpsc::channel(capacity);
        Ok(Self {
            sender: Arc::new(parking_lot::Mutex::new(Some(sender))),
            receiver: Arc::new(Mutex::new(receiver)),
            closed: CancellationToken::new(),
            pending: Arc::new(AtomicUsize::new(0)),
            capacity,
            consumers,
        })
    }

    /// Enqueue `item`, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Closed`] if the pipeline is closed before the item was
    ///   enqueued.
    /// - [`ErrorKind::Canceled`] if `signal` fires first. The item is dropped
    ///   and no queue slot stays reserved.
    pub async fn submit(&self, item: T, signal: &CancelSignal) -> Result<()> {
        let sender = self.sender.lock().clone().ok_or(ErrorKind::Closed)?;

        let permit = tokio::select! {
            biased;
            () = signal.fired() => return Err(ErrorKind::Canceled),
            () = self.closed.cancelled() => return Err(ErrorKind::Closed),
            permit = sender.reserve() => permit.map_err(|_| ErrorKind::Closed)?,
        };
        // Counted before the item becomes visible to consumers
        self.pending.fetch_add(1, Ordering::AcqRel);
        permit.send(item);
        Ok(())
    }

    /// Take the next item off the queue.
    ///
    /// Returns `Ok(None)` once the pipeline is closed and drained
    /// (end of stream).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Canceled`] if `signal` fires while waiting. No
    /// item is taken off the queue in that case.
    pub async fn receive(&self, signal: &CancelSignal) -> Result<Option<T>> {
        let item = signal
            .guard(async { self.receiver.lock().await.recv().await })
            .await?;
        if item.is_some() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(item)
    }

    /// Stop accepting submissions.
    ///
    /// Items already in the queue are still delivered. Submissions that are
    /// blocked on a full queue fail with [`ErrorKind::Closed`]. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
        self.sender.lock().take();
    }

    /// Returns `true` if [`Pipeline::close`] was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of items waiting in the queue
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns `true` if no item is waiting in the queue
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the consumer pool
    #[must_use]
    pub const fn consumers(&self) -> usize {
        self.consumers
    }
}

impl<T> Pipeline<T>
where
    T: Send + 'static,
{
    /// Spawn the consumer pool, each worker calling `handler` for every item
    /// it receives.
    ///
    /// Workers exit when they observe the end of the stream or when `signal`
    /// fires. `handler` gets a clone of `signal` to abort its own work.
    pub fn spawn_consumers<F, Fut>(&self, handler: F, signal: &CancelSignal) -> Consumers
    where
        F: Fn(T, CancelSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut workers = JoinSet::new();
        for worker in 0..self.consumers {
            let pipeline = self.clone();
            let handler = Arc::clone(&handler);
            let signal = signal.clone();
            workers.spawn(async move {
                let mut processed = 0;
                loop {
                    match pipeline.receive(&signal).await {
                        Ok(Some(item)) => {
                            handler(item, signal.clone()).await;
                            processed += 1;
                        }
                        Ok(None) => {
                            return ConsumerReport {
                                worker,
                                processed,
                                canceled: false,
                            };
                        }
                        Err(_) => {
                            return ConsumerReport {
                                worker,
                                processed,
                                canceled: true,
                            };
                        }
                    }
                }
            });
        }
        Consumers { workers }
    }
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
            receiver: Arc::clone(&self.receiver),
            closed: self.closed.clone(),
            pending: Arc::clone(&self.pending),
            capacity: self.capacity,
            consumers: self.consumers,
        }
    }
}

impl Consumers {
    /// Wait for every worker to exit, ordered by worker index.
    ///
    /// # Panics
    ///
    /// Resumes the panic of a worker whose handler panicked.
    pub async fn join(mut self) -> Vec<ConsumerReport> {
        let mut reports = Vec::with_capacity(self.workers.len());
        while let Some(result) = self.workers.join_next().await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => {}
            }
        }
        reports.sort_by_key(|report| report.worker);
        reports
    }

    /// Number of workers which have not exited yet
    #[must_use]
    pub fn running(&self) -> usize {
        self.workers.len()
    }
}
