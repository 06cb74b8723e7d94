//! Sorted concurrent map from key to a softly held value.
//!
//! An entry starts out held (strong). [`SoftIndex::release_idle`] demotes idle
//! entries to weak handles; a demoted entry survives only while something else
//! in the graph still points at it. Reading a demoted entry that is still
//! alive promotes it back; reading one that is gone drops the stale slot.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

enum Slot<V> {
    Held(Arc<V>),
    Released(Weak<V>),
}

impl<V> Slot<V> {
    fn live(&self) -> Option<Arc<V>> {
        match self {
            Slot::Held(v) => Some(Arc::clone(v)),
            Slot::Released(w) => w.upgrade(),
        }
    }
}

pub struct SoftIndex<K, V> {
    map: RwLock<BTreeMap<K, Slot<V>>>,
}

impl<K: Ord + Clone, V> Default for SoftIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V> SoftIndex<K, V> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        {
            let map = self.map.read();
            match map.get(key)? {
                Slot::Held(v) => return Some(Arc::clone(v)),
                Slot::Released(_) => {}
            }
        }
        let mut map = self.map.write();
        let live = map.get(key)?.live();
        match live {
            Some(v) => {
                map.insert(key.clone(), Slot::Held(Arc::clone(&v)));
                Some(v)
            }
            None => {
                map.remove(key);
                None
            }
        }
    }

    /// Return the published value for `key`, building one if absent.
    ///
    /// The builder runs outside the lock. When two callers race, the first
    /// insert wins and the loser's candidate is dropped.
    pub fn get_or_create(&self, key: &K, builder: impl FnOnce(&K) -> V) -> Arc<V> {
        if let Some(v) = self.get(key) {
            return v;
        }
        let candidate = Arc::new(builder(key));
        let mut map = self.map.write();
        if let Some(existing) = map.get(key).and_then(Slot::live) {
            map.insert(key.clone(), Slot::Held(Arc::clone(&existing)));
            return existing;
        }
        map.insert(key.clone(), Slot::Held(Arc::clone(&candidate)));
        candidate
    }

    pub fn put(&self, key: K, value: Arc<V>) {
        self.map.write().insert(key, Slot::Held(value));
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.map.write().remove(key).and_then(|s| s.live())
    }

    /// Remove `key` only if it still maps to `value`.
    pub fn remove_if_same(&self, key: &K, value: &Arc<V>) -> bool {
        let mut map = self.map.write();
        let same = map
            .get(key)
            .and_then(Slot::live)
            .is_some_and(|v| Arc::ptr_eq(&v, value));
        if same {
            map.remove(key);
        }
        same
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Values in `[from, to]` accepted by `predicate`.
    pub fn range_filter(
        &self,
        from: &K,
        to: &K,
        predicate: impl Fn(&K, &Arc<V>) -> bool,
    ) -> Vec<Arc<V>> {
        if from > to {
            return Vec::new();
        }
        let map = self.map.read();
        map.range(RangeInclusive::new(from.clone(), to.clone()))
            .filter_map(|(k, slot)| slot.live().map(|v| (k, v)))
            .filter(|(k, v)| predicate(k, v))
            .map(|(_, v)| v)
            .collect()
    }

    /// Mapped values in `[from, to]`; `None` results are skipped.
    pub fn range_map<R>(
        &self,
        from: &K,
        to: &K,
        mapper: impl Fn(&K, &Arc<V>) -> Option<R>,
    ) -> Vec<R> {
        if from > to {
            return Vec::new();
        }
        let map = self.map.read();
        map.range(RangeInclusive::new(from.clone(), to.clone()))
            .filter_map(|(k, slot)| slot.live().and_then(|v| mapper(k, &v)))
            .collect()
    }

    /// Every live value accepted by `predicate`.
    pub fn filter(&self, predicate: impl Fn(&K, &Arc<V>) -> bool) -> Vec<Arc<V>> {
        let map = self.map.read();
        map.iter()
            .filter_map(|(k, slot)| slot.live().map(|v| (k, v)))
            .filter(|(k, v)| predicate(k, v))
            .map(|(_, v)| v)
            .collect()
    }

    /// Owned snapshot of the live entries.
    pub fn snapshot(&self) -> Vec<(K, Arc<V>)> {
        let map = self.map.read();
        map.iter()
            .filter_map(|(k, slot)| slot.live().map(|v| (k.clone(), v)))
            .collect()
    }

    /// Grace sweep: demote idle held entries and drop entries whose value is
    /// gone. Returns the number of slots dropped.
    ///
    /// `is_idle` runs without the map lock held, so it may take entity locks.
    pub fn release_idle(&self, is_idle: impl Fn(&V) -> bool) -> usize {
        let held: Vec<(K, Arc<V>)> = {
            let map = self.map.read();
            map.iter()
                .filter_map(|(k, slot)| match slot {
                    Slot::Held(v) => Some((k.clone(), Arc::clone(v))),
                    Slot::Released(_) => None,
                })
                .collect()
        };
        let idle: Vec<(K, Arc<V>)> = held.into_iter().filter(|(_, v)| is_idle(v)).collect();
        {
            let mut map = self.map.write();
            for (key, value) in &idle {
                if let Some(slot) = map.get_mut(key) {
                    if matches!(slot, Slot::Held(v) if Arc::ptr_eq(v, value)) {
                        *slot = Slot::Released(Arc::downgrade(value));
                    }
                }
            }
        }
        drop(idle);
        let mut map = self.map.write();
        let before = map.len();
        map.retain(|_, slot| match slot {
            Slot::Held(_) => true,
            Slot::Released(w) => w.strong_count() > 0,
        });
        before - map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn concurrent_creators_converge_on_one_instance() {
        let index: Arc<SoftIndex<String, String>> = Arc::new(SoftIndex::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let index = Arc::clone(&index);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    index.get_or_create(&"k".to_string(), |_| format!("candidate-{i}"))
                })
            })
            .collect();
        let values: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for v in &values {
            assert!(Arc::ptr_eq(v, &values[0]));
        }
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn range_scans_respect_bounds() {
        let index: SoftIndex<u32, u32> = SoftIndex::new();
        for k in 0..10 {
            index.put(k, Arc::new(k * 10));
        }
        let picked = index.range_filter(&3, &6, |_, v| **v % 20 == 0);
        assert_eq!(picked.iter().map(|v| **v).collect::<Vec<_>>(), vec![40, 60]);
        let mapped = index.range_map(&8, &20, |k, v| Some(*k + **v));
        assert_eq!(mapped, vec![88, 99]);
        assert!(index.range_filter(&6, &3, |_, _| true).is_empty());
    }

    #[test]
    fn released_entries_survive_while_referenced() {
        let index: SoftIndex<u32, String> = SoftIndex::new();
        let kept = index.get_or_create(&1, |_| "kept".into());
        index.get_or_create(&2, |_| "dropped".into());
        assert_eq!(index.release_idle(|_| true), 1);
        assert_eq!(index.len(), 1);
        let again = index.get(&1).unwrap();
        assert!(Arc::ptr_eq(&kept, &again));
        assert!(index.get(&2).is_none());
    }

    #[test]
    fn stale_slot_is_dropped_on_get() {
        let index: SoftIndex<u32, String> = SoftIndex::new();
        let value = index.get_or_create(&1, |_| "v".into());
        index.release_idle(|_| false);
        assert_eq!(index.len(), 1);
        // Demote while still referenced, then drop the last reference.
        index.release_idle(|_| true);
        drop(value);
        assert!(index.get(&1).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn remove_if_same_ignores_replaced_values() {
        let index: SoftIndex<u32, u32> = SoftIndex::new();
        let first = index.get_or_create(&1, |_| 1);
        index.put(1, Arc::new(2));
        assert!(!index.remove_if_same(&1, &first));
        let second = index.get(&1).unwrap();
        assert!(index.remove_if_same(&1, &second));
        assert!(index.get(&1).is_none());
    }
}
