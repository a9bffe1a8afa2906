//! Sharded, thread-safe key space.
//!
//! Keys are spread over a fixed, power-of-two number of shards, each a
//! `HashMap` behind its own `RwLock`:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Keyspace<V>                          │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!        shard = fnv1a(key) & (shard_count - 1)
//! ```
//!
//! Readers of one shard never block each other, and keys in different
//! shards never contend. There is no cross-shard atomicity: a command that
//! touches several keys sees each one under its own lock.
//!
//! Closures passed to [`Keyspace::read`] and [`Keyspace::update`] run with
//! the shard lock held, which is how read-modify-write on a single value
//! (for example adding to a sorted set) stays atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 64;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Outcome of [`Keyspace::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Overwritten,
}

type Shard<V> = RwLock<HashMap<String, V>>;

/// A hash map partitioned into independently locked shards.
pub struct Keyspace<V> {
    shards: Box<[Shard<V>]>,
    mask: u64,
    live: AtomicUsize,
}

impl<V> std::fmt::Debug for Keyspace<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyspace")
            .field("shards", &self.shards.len())
            .field("live", &self.count())
            .finish()
    }
}

impl<V> Default for Keyspace<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Keyspace<V> {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates a key space with at least `shards` shards, rounded up to the
    /// next power of two.
    pub fn with_shards(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards = (0..count).map(|_| RwLock::new(HashMap::new())).collect();

        Self {
            shards,
            mask: count as u64 - 1,
            live: AtomicUsize::new(0),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard owning `key`.
    #[inline]
    pub fn shard_index(&self, key: &str) -> usize {
        (fnv1a(key.as_bytes()) & self.mask) as usize
    }

    #[inline]
    fn read_shard(&self, key: &str) -> RwLockReadGuard<'_, HashMap<String, V>> {
        self.shards[self.shard_index(key)]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn write_shard(&self, key: &str) -> RwLockWriteGuard<'_, HashMap<String, V>> {
        self.shards[self.shard_index(key)]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        self.read_shard(key).get(key).cloned()
    }

    /// Runs `f` against the value under a shared lock.
    pub fn read<R>(&self, key: &str, f: impl FnOnce(Option<&V>) -> R) -> R {
        let shard = self.read_shard(key);
        f(shard.get(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read_shard(key).contains_key(key)
    }

    /// Stores `value`, replacing any previous value wholesale.
    pub fn put(&self, key: impl Into<String>, value: V) -> PutOutcome {
        let key = key.into();
        let mut shard = self.write_shard(&key);

        match shard.insert(key, value) {
            Some(_) => PutOutcome::Overwritten,
            None => {
                self.live.fetch_add(1, Ordering::Relaxed);
                PutOutcome::Created
            }
        }
    }

    /// Removes `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.remove(key).is_some()
    }

    /// Removes `key` and returns its value.
    pub fn remove(&self, key: &str) -> Option<V> {
        let removed = self.write_shard(key).remove(key);
        if removed.is_some() {
            self.live.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Removes `key` only if `predicate` holds for its current value, all
    /// under one exclusive lock.
    pub fn remove_if(&self, key: &str, predicate: impl FnOnce(&V) -> bool) -> bool {
        let mut shard = self.write_shard(key);
        match shard.get(key) {
            Some(value) if predicate(value) => {
                shard.remove(key);
                self.live.fetch_sub(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Read-modify-write under the shard's exclusive lock.
    ///
    /// `f` receives the current slot. Leaving `Some` stores the value,
    /// leaving `None` deletes the key; the live count follows either way.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut Option<V>) -> R) -> R {
        let mut shard = self.write_shard(key);
        let mut slot = Slot::take(&mut *shard, key, &self.live);
        f(&mut slot.value)
    }

    /// Number of live keys. Lock-free.
    pub fn count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Removes every key, one shard at a time.
    pub fn clear(&self) {
        self.clear_each(|_| {});
    }

    /// Removes every key, one shard at a time, calling `f` with each
    /// shard's index while that shard is still write-locked.
    pub fn clear_each(&self, mut f: impl FnMut(usize)) {
        for (index, shard) in self.shards.iter().enumerate() {
            let mut map = shard.write().unwrap_or_else(PoisonError::into_inner);
            let removed = map.len();
            map.clear();
            self.live.fetch_sub(removed, Ordering::Relaxed);
            f(index);
        }
    }

    /// Removes every key in the shard at `index`. Out of range is a no-op.
    pub fn clear_shard(&self, index: usize) {
        if let Some(shard) = self.shards.get(index) {
            let mut map = shard.write().unwrap_or_else(PoisonError::into_inner);
            let removed = map.len();
            map.clear();
            self.live.fetch_sub(removed, Ordering::Relaxed);
        }
    }
}

/// A value lifted out of its shard for [`Keyspace::update`]. Dropping it
/// puts whatever the slot then holds back under the same lock and settles
/// the live count, including when the update unwinds.
struct Slot<'a, V> {
    shard: &'a mut HashMap<String, V>,
    key: &'a str,
    owned_key: Option<String>,
    existed: bool,
    value: Option<V>,
    live: &'a AtomicUsize,
}

impl<'a, V> Slot<'a, V> {
    fn take(shard: &'a mut HashMap<String, V>, key: &'a str, live: &'a AtomicUsize) -> Self {
        let (owned_key, value) = match shard.remove_entry(key) {
            Some((k, v)) => (Some(k), Some(v)),
            None => (None, None),
        };
        Self {
            shard,
            key,
            existed: value.is_some(),
            owned_key,
            value,
            live,
        }
    }
}

impl<V> Drop for Slot<'_, V> {
    fn drop(&mut self) {
        match self.value.take() {
            Some(value) => {
                let key = self.owned_key.take().unwrap_or_else(|| self.key.to_owned());
                self.shard.insert(key, value);
                if !self.existed {
                    self.live.fetch_add(1, Ordering::Relaxed);
                }
            }
            None if self.existed => {
                self.live.fetch_sub(1, Ordering::Relaxed);
            }
            None => {}
        }
    }
}

/// 64-bit FNV-1a. Deterministic across runs, unlike `DefaultHasher`.
#[inline]
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_shard_count_is_power_of_two() {
        assert_eq!(Keyspace::<u32>::with_shards(0).shard_count(), 1);
        assert_eq!(Keyspace::<u32>::with_shards(5).shard_count(), 8);
        assert_eq!(Keyspace::<u32>::with_shards(64).shard_count(), 64);
        assert_eq!(Keyspace::<u32>::new().shard_count(), DEFAULT_SHARDS);
    }

    #[test]
    fn test_shard_index_is_stable() {
        let keys = Keyspace::<u32>::with_shards(16);
        let first = keys.shard_index("user:1");
        for _ in 0..10 {
            assert_eq!(keys.shard_index("user:1"), first);
        }
        assert!(first < 16);
    }

    #[test]
    fn test_put_get_delete() {
        let keys = Keyspace::new();

        assert_eq!(keys.put("a", 1), PutOutcome::Created);
        assert_eq!(keys.put("a", 2), PutOutcome::Overwritten);
        assert_eq!(keys.get("a"), Some(2));
        assert_eq!(keys.count(), 1);

        assert!(keys.delete("a"));
        assert!(!keys.delete("a"));
        assert_eq!(keys.get("a"), None);
        assert_eq!(keys.count(), 0);
    }

    #[test]
    fn test_count_tracks_put_delete_sequences() {
        let keys = Keyspace::with_shards(4);
        let mut model = std::collections::HashSet::new();

        for i in 0..500u32 {
            let key = format!("k{}", i % 37);
            if i % 3 == 0 {
                keys.delete(&key);
                model.remove(&key);
            } else {
                keys.put(key.clone(), i);
                model.insert(key);
            }
            assert_eq!(keys.count(), model.len());
        }
    }

    #[test]
    fn test_update_creates_modifies_and_deletes() {
        let keys = Keyspace::new();

        let created = keys.update("n", |slot| {
            assert!(slot.is_none());
            *slot = Some(1);
            "created"
        });
        assert_eq!(created, "created");
        assert_eq!(keys.count(), 1);

        keys.update("n", |slot| {
            if let Some(n) = slot.as_mut() {
                *n += 10;
            }
        });
        assert_eq!(keys.get("n"), Some(11));
        assert_eq!(keys.count(), 1);

        keys.update("n", |slot| *slot = None);
        assert_eq!(keys.get("n"), None);
        assert_eq!(keys.count(), 0);

        keys.update("missing", |slot| assert!(slot.is_none()));
        assert_eq!(keys.count(), 0);
    }

    #[test]
    fn test_remove_if() {
        let keys = Keyspace::new();
        keys.put("a", 5);

        assert!(!keys.remove_if("a", |v| *v > 10));
        assert_eq!(keys.count(), 1);
        assert!(keys.remove_if("a", |v| *v == 5));
        assert_eq!(keys.count(), 0);
        assert!(!keys.remove_if("a", |_| true));
    }

    #[test]
    fn test_clear() {
        let keys = Keyspace::with_shards(8);
        for i in 0..100 {
            keys.put(format!("k{}", i), i);
        }
        keys.clear();
        assert_eq!(keys.count(), 0);
        assert!(keys.is_empty());
        assert_eq!(keys.get("k1"), None);
    }

    #[test]
    fn test_concurrent_writers() {
        let keys = Arc::new(Keyspace::new());
        let mut handles = vec![];

        for t in 0..8 {
            let keys = Arc::clone(&keys);
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    keys.put(format!("t{}:k{}", t, i), i);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(keys.count(), 8 * 250);
    }

    #[test]
    fn test_count_holds_while_updating() {
        let keys = Keyspace::new();
        keys.put("a", 1);
        keys.update("a", |slot| {
            assert_eq!(keys.count(), 1);
            *slot = Some(2);
        });
        assert_eq!(keys.count(), 1);
        assert_eq!(keys.get("a"), Some(2));
    }

    #[test]
    fn test_clear_shard_and_clear_each() {
        let keys = Keyspace::with_shards(4);
        for i in 0..64 {
            keys.put(format!("k{}", i), i);
        }

        let target = keys.shard_index("k0");
        keys.clear_shard(target);
        assert_eq!(keys.get("k0"), None);
        let left = keys.count();
        assert!(left > 0 && left < 64);
        keys.clear_shard(99);
        assert_eq!(keys.count(), left);

        let mut seen = Vec::new();
        keys.clear_each(|i| seen.push(i));
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_poisoned_shard_stays_usable() {
        let keys = Arc::new(Keyspace::with_shards(1));
        keys.put("a", 1);

        let clone = Arc::clone(&keys);
        let _ = thread::spawn(move || {
            clone.update("a", |_| panic!("boom"));
        })
        .join();

        assert_eq!(keys.get("a"), Some(1));
        assert_eq!(keys.count(), 1);
        keys.put("b", 2);
        assert_eq!(keys.get("b"), Some(2));
        assert_eq!(keys.count(), 2);
    }
}
