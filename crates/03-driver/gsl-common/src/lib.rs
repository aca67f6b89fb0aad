//! Shared helpers for process-wide refcounted pools.
//!
//! The subgraph pool and the global-persist-calibration pool both follow the
//! same shape: a map keyed by id, each entry refcounted, allocated on the
//! 0->1 transition and freed on the 1->0 transition, all mutated under one
//! mutex. This crate centralises that shape so each pool focuses on its own
//! record type and ACDB/shared-memory side effects.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

/// Outcome of [`RefCountPool::add`].
pub enum AddOutcome<'a, V> {
    /// The entry did not exist; refcount is now 1 and the caller should
    /// populate `value`.
    Created(&'a mut V),
    /// The entry already existed; refcount was incremented.
    Existing(&'a mut V),
}

/// Outcome of [`RefCountPool::remove`].
pub enum RemoveOutcome<V> {
    /// Refcount dropped to zero; the entry was removed and is returned so
    /// the caller can release whatever it owns.
    Freed(V),
    /// Refcount decremented but the entry is still referenced.
    StillReferenced,
    /// No entry with that id existed.
    NotFound,
}

struct Entry<V> {
    refcount: u32,
    value: V,
}

/// A process-wide map from id to refcounted record, guarded by a single
/// mutex per the mutex hierarchy (subgraph-pool lock / global-persist-cal
/// pool lock).
pub struct RefCountPool<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> Default for RefCountPool<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RefCountPool<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Increments the refcount for `id`, creating a fresh entry via
    /// `make` on the 0->1 transition. Returns whether the entry was just
    /// created so the caller can decide whether to populate it.
    pub fn add(&self, id: K, make: impl FnOnce() -> V) -> (bool, u32) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.refcount += 1;
                (false, entry.refcount)
            }
            None => {
                entries.insert(
                    id,
                    Entry {
                        refcount: 1,
                        value: make(),
                    },
                );
                (true, 1)
            }
        }
    }

    /// Decrements the refcount for `id`. Removes and returns the value on
    /// the 1->0 transition.
    pub fn remove(&self, id: &K) -> RemoveOutcome<V> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(id) else {
            return RemoveOutcome::NotFound;
        };
        entry.refcount -= 1;
        if entry.refcount == 0 {
            let Entry { value, .. } = entries.remove(id).unwrap();
            RemoveOutcome::Freed(value)
        } else {
            RemoveOutcome::StillReferenced
        }
    }

    /// Runs `f` against the value for `id` without changing its refcount.
    pub fn with<R>(&self, id: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut entries = self.entries.lock();
        entries.get_mut(id).map(|entry| f(&mut entry.value))
    }

    pub fn refcount(&self, id: &K) -> Option<u32> {
        self.entries.lock().get(id).map(|e| e.refcount)
    }

    pub fn contains(&self, id: &K) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_creates_on_zero_to_one() {
        let pool: RefCountPool<u32, String> = RefCountPool::new();
        let (created, count) = pool.add(1, || "hello".to_string());
        assert!(created);
        assert_eq!(count, 1);

        let (created, count) = pool.add(1, || "world".to_string());
        assert!(!created);
        assert_eq!(count, 2);
        assert_eq!(pool.with(&1, |v| v.clone()), Some("hello".to_string()));
    }

    #[test]
    fn remove_frees_on_one_to_zero() {
        let pool: RefCountPool<u32, i32> = RefCountPool::new();
        pool.add(1, || 42);
        pool.add(1, || 0);

        assert!(matches!(pool.remove(&1), RemoveOutcome::StillReferenced));
        assert!(matches!(pool.remove(&1), RemoveOutcome::Freed(42)));
        assert!(matches!(pool.remove(&1), RemoveOutcome::NotFound));
    }
}
