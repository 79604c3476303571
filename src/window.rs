//! Keyed store with time-based expiry.
//!
//! [`WindowBuffer`] keeps one record per key together with a min-heap of
//! `(first_seen, generation)` entries. Records are evicted lazily: nothing
//! expires until [`WindowBuffer::flush`] is called with a reference timestamp.
//!
//! Each inserted record gets a fresh generation number stored both in the map
//! and in its heap entry. Updates of an existing key happen in place and keep
//! the generation, so the original heap entry stays valid and the record still
//! expires relative to its first appearance. Deleting and re-inserting a key
//! produces a new generation, making the old heap entry stale; stale entries
//! are dropped silently when they reach the top of the heap.

use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap},
    hash::Hash,
    time::Duration,
};

use crate::types::Timestamp;

/// Record that can be kept in a [`WindowBuffer`].
pub trait Windowed {
    /// Timestamp the record's window is anchored at.
    fn first_seen(&self) -> Timestamp;
}

#[derive(Debug)]
struct Slot<V> {
    generation: u64,
    value: V,
}

#[derive(Debug)]
struct HeapEntry<K> {
    first_seen: Timestamp,
    generation: u64,
    key: K,
}

impl<K> PartialEq for HeapEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.first_seen == other.first_seen && self.generation == other.generation
    }
}

impl<K> Eq for HeapEntry<K> {}

impl<K> PartialOrd for HeapEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for HeapEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Generations are unique, so ties on timestamp resolve in insertion order
        (self.first_seen, self.generation).cmp(&(other.first_seen, other.generation))
    }
}

/// Map of records expiring `window` after their `first_seen` timestamp.
#[derive(Debug)]
pub struct WindowBuffer<K, V> {
    window_secs: u64,
    entries: HashMap<K, Slot<V>>,
    heap: BinaryHeap<Reverse<HeapEntry<K>>>,
    next_generation: u64,
}

impl<K, V> WindowBuffer<K, V>
where
    K: Hash + Eq + Clone,
    V: Windowed,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window_secs: window.as_secs(),
            entries: HashMap::new(),
            heap: BinaryHeap::new(),
            next_generation: 0,
        }
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Inserts or updates the record for `key`.
    ///
    /// A new key gets a heap entry anchored at `value.first_seen()`. An existing
    /// key is overwritten in place, keeping its original heap entry and
    /// therefore its original expiry.
    pub fn set(&mut self, key: K, value: V) {
        if let Some(slot) = self.entries.get_mut(&key) {
            slot.value = value;
            return;
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(Reverse(HeapEntry {
            first_seen: value.first_seen(),
            generation,
            key: key.clone(),
        }));
        self.entries.insert(key, Slot { generation, value });
    }

    /// Removes the record for `key`, leaving its heap entry to be discarded
    /// lazily.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|slot| slot.value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Mutable access to the live record. Mutation does not move the record's
    /// expiry.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(|slot| &mut slot.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of heap entries, including stale ones not yet discarded.
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    /// Checks if a window anchored at `first_seen` has elapsed at `now`.
    pub fn is_expired(&self, first_seen: Timestamp, now: Timestamp) -> bool {
        now.saturating_sub(first_seen) >= self.window_secs && now >= first_seen
    }

    /// Evicts and returns all records whose window elapsed at `now`.
    ///
    /// Stale heap entries met on the way (deleted or re-inserted keys) are
    /// discarded. `None` is a no-op.
    pub fn flush(&mut self, now: Option<Timestamp>) -> HashMap<K, V> {
        let mut flushed = HashMap::new();
        let Some(now) = now else {
            return flushed;
        };

        while let Some(Reverse(top)) = self.heap.peek() {
            if !self.is_expired(top.first_seen, now) {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };

            let is_live = self
                .entries
                .get(&entry.key)
                .is_some_and(|slot| slot.generation == entry.generation);
            if !is_live {
                continue;
            }
            if let Some(slot) = self.entries.remove(&entry.key) {
                flushed.insert(entry.key, slot.value);
            }
        }

        flushed
    }

    /// Iterates over live records in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, slot)| (k, &slot.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Rec {
        first_seen: Timestamp,
        volume: u64,
    }

    impl Windowed for Rec {
        fn first_seen(&self) -> Timestamp {
            self.first_seen
        }
    }

    fn rec(first_seen: Timestamp) -> Rec {
        Rec {
            first_seen,
            volume: 0,
        }
    }

    fn buffer() -> WindowBuffer<&'static str, Rec> {
        WindowBuffer::new(Duration::from_secs(900))
    }

    #[test]
    fn test_flush_after_window_elapsed() {
        let mut buf = buffer();
        buf.set("t1", rec(1000));

        assert!(buf.flush(Some(1850)).is_empty());
        assert!(buf.contains(&"t1"));

        let flushed = buf.flush(Some(1900));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed.get("t1"), Some(&rec(1000)));
        assert!(buf.is_empty());
        assert_eq!(buf.heap_len(), 0);
    }

    #[test]
    fn test_flush_without_timestamp_is_noop() {
        let mut buf = buffer();
        buf.set("t1", rec(0));
        assert!(buf.flush(None).is_empty());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_flush_before_first_seen_keeps_record() {
        let mut buf = buffer();
        buf.set("t1", rec(5000));
        assert!(buf.flush(Some(100)).is_empty());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_deleted_key_is_not_flushed() {
        let mut buf = buffer();
        buf.set("t1", rec(1000));
        buf.set("t2", rec(1100));
        assert_eq!(buf.delete(&"t1"), Some(rec(1000)));

        let flushed = buf.flush(Some(5000));
        assert_eq!(flushed.len(), 1);
        assert!(flushed.contains_key("t2"));
        assert_eq!(buf.heap_len(), 0);

        assert!(buf.flush(Some(10_000)).is_empty());
    }

    #[test]
    fn test_readded_key_expires_from_new_timestamp() {
        let mut buf = buffer();
        buf.set("t1", rec(1000));
        buf.delete(&"t1");
        buf.set("t1", rec(1500));

        // Stale entry from 1000 is discarded, live one is not due yet
        assert!(buf.flush(Some(1950)).is_empty());
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.heap_len(), 1);

        let flushed = buf.flush(Some(2400));
        assert_eq!(flushed.get("t1"), Some(&rec(1500)));
    }

    #[test]
    fn test_update_in_place_keeps_original_expiry() {
        let mut buf = buffer();
        buf.set("t1", rec(1000));
        buf.set(
            "t1",
            Rec {
                first_seen: 1000,
                volume: 10,
            },
        );
        buf.get_mut(&"t1").unwrap().volume += 5;
        assert_eq!(buf.heap_len(), 1);

        let flushed = buf.flush(Some(1900));
        assert_eq!(flushed.get("t1").map(|r| r.volume), Some(15));
    }

    #[test]
    fn test_flush_never_emits_unexpired_records() {
        let mut buf = WindowBuffer::new(Duration::from_secs(900));
        for (i, ts) in [10u64, 400, 905, 950, 1300, 2000].into_iter().enumerate() {
            buf.set(i, rec(ts));
        }
        buf.delete(&2);
        buf.set(2, rec(1800));

        for now in [0u64, 909, 1000, 1849, 1850, 2200, 2700, 3000] {
            for (_, r) in buf.flush(Some(now)) {
                assert!(now - r.first_seen >= 900, "flushed {r:?} at {now}");
            }
        }
        assert!(buf.is_empty());
    }
}
