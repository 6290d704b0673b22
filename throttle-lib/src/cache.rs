use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

/// Immutable mapping served by a [`SnapshotCache`]
pub type Snapshot<K, V> = Arc<HashMap<K, V>>;

/// Read-mostly cache whose contents are replaced wholesale.
///
/// Readers take a shared lock for the duration of a single lookup. A refresh
/// takes the exclusive lock only to swap the reference to the new snapshot,
/// so readers observe either the complete old mapping or the complete new
/// one, never a mix of both.
///
/// The new snapshot has to be built by the caller before calling
/// [`SnapshotCache::refresh`]; no lock is held while it is assembled.
#[derive(Debug)]
pub struct SnapshotCache<K, V> {
    current: RwLock<Snapshot<K, V>>,
}

impl<K, V> SnapshotCache<K, V>
where
    K: Eq + Hash,
{
    /// Create a cache holding an empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::with_snapshot(HashMap::new())
    }

    /// Create a cache holding `snapshot`
    #[must_use]
    pub fn with_snapshot(snapshot: impl Into<Snapshot<K, V>>) -> Self {
        Self {
            current: RwLock::new(snapshot.into()),
        }
    }

    /// Look up `id` in the current snapshot
    #[must_use]
    pub fn get<Q>(&self, id: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.current.read().get(id).cloned()
    }

    /// Returns `true` if the current snapshot contains `id`
    #[must_use]
    pub fn contains<Q>(&self, id: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.current.read().contains_key(id)
    }

    /// The current snapshot.
    ///
    /// Use this to perform several lookups against one consistent mapping.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<K, V> {
        Arc::clone(&self.current.read())
    }

    /// Replace the current snapshot and return the previous one.
    ///
    /// The previous snapshot is handed back after the lock was released, so
    /// dropping a large mapping never blocks readers.
    pub fn refresh(&self, snapshot: impl Into<Snapshot<K, V>>) -> Snapshot<K, V> {
        let snapshot = snapshot.into();
        std::mem::replace(&mut *self.current.write(), snapshot)
    }

    /// Number of entries in the current snapshot
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    /// Returns `true` if the current snapshot is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }
}

impl<K, V> Default for SnapshotCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for SnapshotCache<K, V>
where
    K: Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::with_snapshot(iter.into_iter().collect::<HashMap<_, _>>())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;

    use super::SnapshotCache;

    #[test]
    fn test_empty_cache() {
        let cache: SnapshotCache<u32, String> = SnapshotCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn test_refresh_replaces_everything() {
        let cache: SnapshotCache<u32, &str> = [(1, "a"), (3, "x")].into_iter().collect();
        assert_eq!(cache.get(&1), Some("a"));

        let old = cache.refresh(HashMap::from([(1, "b"), (2, "c")]));
        assert_eq!(old.get(&3), Some(&"x"));

        assert_eq!(cache.get(&1), Some("b"));
        assert_eq!(cache.get(&2), Some("c"));
        // Keys missing from the new snapshot are gone, not merged
        assert_eq!(cache.get(&3), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_snapshot_is_stable_across_refresh() {
        let cache = SnapshotCache::with_snapshot(HashMap::from([("k".to_string(), 1)]));
        let before = cache.snapshot();
        cache.refresh(HashMap::from([("k".to_string(), 2)]));

        assert_eq!(before.get("k"), Some(&1));
        assert_eq!(cache.get("k"), Some(2));
        assert!(cache.contains("k"));
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_snapshot() {
        let cache = Arc::new(SnapshotCache::with_snapshot(HashMap::from([(1, "a")])));
        let swapped = Arc::new(AtomicBool::new(false));

        std::thread::scope(|s| {
            for _ in 0..4 {
                let cache = Arc::clone(&cache);
                let swapped = Arc::clone(&swapped);
                s.spawn(move || {
                    for _ in 0..10_000 {
                        // Read the flag first: if the swap was not complete
                        // before this point, "c" must not be visible yet
                        let done_before = swapped.load(Ordering::SeqCst);
                        let one = cache.get(&1);
                        assert!(matches!(one, Some("a" | "b")), "got {one:?}");

                        let snapshot = cache.snapshot();
                        match snapshot.get(&1) {
                            Some(&"a") => assert_eq!(snapshot.get(&2), None),
                            Some(&"b") => assert_eq!(snapshot.get(&2), Some(&"c")),
                            other => panic!("torn snapshot: {other:?}"),
                        }

                        if done_before {
                            assert_eq!(cache.get(&2), Some("c"));
                        }
                    }
                });
            }

            s.spawn(|| {
                let fresh = HashMap::from([(1, "b"), (2, "c")]);
                cache.refresh(fresh);
                swapped.store(true, Ordering::SeqCst);
            });
        });

        assert_eq!(cache.get(&2), Some("c"));
    }
}
