//! Per-key mutual exclusion with lazily created, reference counted locks.
//!
//! # Lifecycle
//!
//! The table maps each key to a [`tokio::sync::Mutex`] and a reference count.
//! An entry is created by the first acquirer of a key and removed by the last
//! party giving it back, so the table only ever holds keys that are locked or
//! waited for.
//!
//! Every acquirer bumps the count *before* it starts waiting on the mutex.
//! The matching decrement is owned by a [`Reservation`], which is created
//! right after the increment and runs on drop. That covers a successful
//! acquisition being released, a wait interrupted by a [`CancelSignal`], and
//! the acquiring future itself being dropped.
//!
//! Both the increment and the decrement-and-maybe-remove happen under the
//! `DashMap` shard lock for the key. A new acquirer can therefore never pick
//! up an entry that is concurrently being removed.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{CancelSignal, Result};

#[derive(Debug, Default)]
struct LockEntry {
    mutex: Arc<Mutex<()>>,
    /// Holders plus waiters
    refs: usize,
}

type LockTable<K> = DashMap<K, LockEntry>;

/// A table of async locks, one per key.
///
/// Acquisitions on different keys never block each other. Cloning yields a
/// handle to the same table.
pub struct KeyedLocks<K>
where
    K: Eq + Hash,
{
    entries: Arc<LockTable<K>>,
}

/// Exclusive access to one key of a [`KeyedLocks`] table.
///
/// The key is unlocked when the guard is dropped.
#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyedGuard<K>
where
    K: Eq + Hash,
{
    // Field order matters: the mutex is unlocked before the reservation is
    // given back, otherwise a new acquirer could create a fresh entry while
    // this guard still holds the old mutex.
    _guard: OwnedMutexGuard<()>,
    reservation: Reservation<K>,
}

/// One unit of the reference count of a table entry.
struct Reservation<K>
where
    K: Eq + Hash,
{
    entries: Arc<LockTable<K>>,
    key: K,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Lock `key`, waiting for the current holder to release it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::Canceled`] if `signal` fires before the
    /// lock is obtained. The reference count taken for the wait is given back
    /// in that case, and also when the returned future is dropped early.
    pub async fn acquire(&self, key: K, signal: &CancelSignal) -> Result<KeyedGuard<K>> {
        let mutex = {
            let mut entry = self.entries.entry(key.clone()).or_default();
            entry.refs += 1;
            Arc::clone(&entry.mutex)
        };
        let reservation = Reservation {
            entries: Arc::clone(&self.entries),
            key,
        };

        let guard = signal.guard(mutex.lock_owned()).await?;
        Ok(KeyedGuard {
            _guard: guard,
            reservation,
        })
    }

    /// Number of keys which are currently locked or waited for
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no key is locked or waited for
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if the table holds an entry for `key`
    #[must_use]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Number of holders and waiters for `key`, `None` if there are none
    #[must_use]
    pub fn refcount<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|entry| entry.refs)
    }
}

impl<K> KeyedGuard<K>
where
    K: Eq + Hash,
{
    /// The key this guard holds
    pub fn key(&self) -> &K {
        &self.reservation.key
    }

    /// Unlock the key. Equivalent to dropping the guard.
    pub fn release(self) {
        drop(self);
    }
}

impl<K> Drop for Reservation<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.entries.remove_if_mut(&self.key, |_, entry| {
            entry.refs -= 1;
            entry.refs == 0
        });
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for KeyedLocks<K>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K> fmt::Debug for KeyedLocks<K>
where
    K: Eq + Hash + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<K> fmt::Debug for KeyedGuard<K>
where
    K: Eq + Hash + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedGuard")
            .field("key", &self.reservation.key)
            .finish_non_exhaustive()
    }
}
