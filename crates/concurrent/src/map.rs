//! Segmented multi-valued map with per-key change notification.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use herald_core::{ListenerId, PutEvent, RemoveEvent, SendEvent};
use rustc_hash::FxHasher;

use crate::segment::Segment;

/// Number of concurrency-control segments. Fixed for the life of a map;
/// the spreader masks into this range, so it must stay a power of two.
const SEGMENT_COUNT: usize = 32;

const SEGMENT_MASK: u32 = SEGMENT_COUNT as u32 - 1;

/// A concurrent multi-valued map that notifies per-key listeners.
///
/// Every entry is an ordered sequence of values: `put` merges into the
/// existing sequence, `put_single`/`replace_single` replace it with one
/// element. Returned collections are always snapshots — mutating them
/// never affects the map, and later map mutation never affects them.
///
/// Keys are routed to one of 32 segments by a hash-spreading function;
/// per-key operations contend only within their segment, while whole-map
/// operations (`len`, `keys`, `clear`, `put_all`, ...) acquire all 32
/// segment locks in ascending index order and release them together on
/// every exit path.
///
/// Put/Remove/Send listeners are registered per key and invoked
/// synchronously while the segment lock is held; a callback that touches
/// the same segment deadlocks (documented contract). A panicking callback
/// releases the lock on unwind but leaves the rest of that delivery round
/// unnotified.
pub struct ListenableMap<K, V> {
    name: Option<String>,
    segments: [Segment<K, V>; SEGMENT_COUNT],
}

/// Spread the key hash so consecutive or equally spaced hash codes do not
/// bunch into the same segment, then mask into `[0, 32)`.
fn spread(h: u32) -> u32 {
    h.wrapping_shl(7)
        .wrapping_sub(h)
        .wrapping_add(h >> 9)
        .wrapping_add(h >> 17)
}

fn segment_index<K: Hash>(key: &K) -> usize {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    let h = hasher.finish();
    let folded = (h ^ (h >> 32)) as u32;
    (spread(folded) & SEGMENT_MASK) as usize
}

impl<K: Eq + Hash + Clone, V: Clone + PartialEq> Default for ListenableMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V: Clone + PartialEq> ListenableMap<K, V> {
    /// Create an empty, unnamed map.
    pub fn new() -> Self {
        ListenableMap {
            name: None,
            segments: std::array::from_fn(|_| Segment::new(None)),
        }
    }

    /// Create an empty map whose events carry `name`.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        ListenableMap {
            segments: std::array::from_fn(|_| Segment::new(Some(name.clone()))),
            name: Some(name),
        }
    }

    /// The map's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn segment(&self, key: &K) -> &Segment<K, V> {
        &self.segments[segment_index(key)]
    }

    /// Number of keys. Locks every segment (shared) in ascending order;
    /// saturates instead of wrapping on overflow.
    pub fn len(&self) -> usize {
        let guards: Vec<_> = self.segments.iter().map(|s| s.state.read()).collect();
        guards
            .iter()
            .fold(0usize, |total, state| total.saturating_add(state.len()))
    }

    /// Whether the map has no entries. Locks every segment (shared).
    pub fn is_empty(&self) -> bool {
        let guards: Vec<_> = self.segments.iter().map(|s| s.state.read()).collect();
        guards.iter().all(|state| state.is_empty())
    }

    /// Whether `key` has an entry (possibly an empty one).
    pub fn contains_key(&self, key: &K) -> bool {
        self.segment(key).state.read().contains_key(key)
    }

    /// Linear scan for an element equal to `value`, one segment at a time.
    pub fn contains_value(&self, value: &V) -> bool {
        self.segments
            .iter()
            .any(|segment| segment.state.read().contains_value(value))
    }

    /// Snapshot of the entry for `key`.
    pub fn get(&self, key: &K) -> Option<Vec<V>> {
        self.segment(key).state.read().get(key)
    }

    /// First element of the entry for `key`.
    pub fn get_single(&self, key: &K) -> Option<V> {
        self.segment(key).state.read().get_single(key)
    }

    /// Merge `values` into the entry for `key`, creating it if absent.
    /// Fires Put listeners with the values put; returns the previous
    /// snapshot.
    pub fn put(&self, key: K, values: Vec<V>) -> Option<Vec<V>> {
        self.segment(&key).state.write().put(key, values)
    }

    /// Replace the whole entry for `key` with a single value. Fires Put
    /// listeners; returns the previous snapshot.
    pub fn put_single(&self, key: K, value: V) -> Option<Vec<V>> {
        self.segment(&key).state.write().put_single(key, value)
    }

    /// Remove the entry for `key`. Fires Remove listeners with the removed
    /// snapshot, which is also returned.
    pub fn remove(&self, key: &K) -> Option<Vec<V>> {
        self.segment(key).state.write().remove(key)
    }

    /// Remove the first occurrence of `value` from the entry for `key`.
    /// Fires Remove listeners only when an element actually left. An entry
    /// emptied this way stays present.
    pub fn remove_value(&self, key: &K, value: &V) -> bool {
        self.segment(key).state.write().remove_value(key, value)
    }

    /// Merge every entry of `entries` in one consistent step: all 32
    /// segment locks are held (exclusive, ascending) for the duration.
    pub fn put_all(&self, entries: impl IntoIterator<Item = (K, Vec<V>)>) {
        let mut guards: Vec<_> = self.segments.iter().map(|s| s.state.write()).collect();
        for (key, values) in entries {
            let index = segment_index(&key);
            guards[index].put(key, values);
        }
    }

    /// Drop every entry and every listener registration without firing
    /// any notification. Locks every segment (exclusive, ascending).
    pub fn clear(&self) {
        let mut guards: Vec<_> = self.segments.iter().map(|s| s.state.write()).collect();
        for state in guards.iter_mut() {
            state.clear();
        }
    }

    /// Snapshot of all keys. Locks every segment (shared, ascending).
    pub fn keys(&self) -> Vec<K> {
        let guards: Vec<_> = self.segments.iter().map(|s| s.state.read()).collect();
        guards
            .iter()
            .flat_map(|state| state.keys().cloned())
            .collect()
    }

    /// Snapshot of all entry value lists. Locks every segment (shared).
    pub fn values(&self) -> Vec<Vec<V>> {
        let guards: Vec<_> = self.segments.iter().map(|s| s.state.read()).collect();
        guards
            .iter()
            .flat_map(|state| state.iter().map(|(_, values)| values.clone()))
            .collect()
    }

    /// Snapshot of all entries. Locks every segment (shared).
    pub fn entries(&self) -> Vec<(K, Vec<V>)> {
        let guards: Vec<_> = self.segments.iter().map(|s| s.state.read()).collect();
        guards
            .iter()
            .flat_map(|state| state.iter().map(|(key, values)| (key.clone(), values.clone())))
            .collect()
    }

    /// Insert `values` only when `key` has no entry. Returns the current
    /// snapshot when it does; fires Put listeners when it inserts.
    pub fn put_if_absent(&self, key: K, values: Vec<V>) -> Option<Vec<V>> {
        self.segment(&key).state.write().put_if_absent(key, values)
    }

    /// Single-value form of [`put_if_absent`](ListenableMap::put_if_absent).
    pub fn put_if_absent_single(&self, key: K, value: V) -> Option<Vec<V>> {
        self.segment(&key)
            .state
            .write()
            .put_if_absent(key, vec![value])
    }

    /// Insert `values` when `key` is absent or its entry is empty.
    pub fn put_if_absent_or_empty(&self, key: K, values: Vec<V>) -> Option<Vec<V>> {
        self.segment(&key)
            .state
            .write()
            .put_if_absent_or_empty(key, values)
    }

    /// Single-value form of
    /// [`put_if_absent_or_empty`](ListenableMap::put_if_absent_or_empty).
    pub fn put_if_absent_or_empty_single(&self, key: K, value: V) -> Option<Vec<V>> {
        self.segment(&key)
            .state
            .write()
            .put_if_absent_or_empty(key, vec![value])
    }

    /// Swap the entry for `key` when it currently equals `expected`. On
    /// success fires Remove with the old values, then Put with the new.
    pub fn replace_if_equal(&self, key: &K, expected: &[V], new_values: Vec<V>) -> bool {
        self.segment(key)
            .state
            .write()
            .replace_if_equal(key, expected, new_values)
    }

    /// Swap a present entry unconditionally; absent keys are untouched.
    /// Fires Remove with the old values, then Put with the new; returns
    /// the previous snapshot.
    pub fn replace(&self, key: &K, new_values: Vec<V>) -> Option<Vec<V>> {
        self.segment(key).state.write().replace(key, new_values)
    }

    /// Single-value form of [`replace`](ListenableMap::replace).
    pub fn replace_single(&self, key: &K, value: V) -> Option<Vec<V>> {
        self.segment(key).state.write().replace(key, vec![value])
    }

    /// Fire Send listeners for `key` with the current snapshot; returns
    /// how many were notified. Never mutates; holds the shared lock.
    pub fn send(&self, key: &K) -> usize {
        self.segment(key).state.read().send(key)
    }

    /// Register a Put listener for `key`; its counter starts at 0.
    pub fn add_put_listener(
        &self,
        key: K,
        callback: impl Fn(PutEvent<K, V>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.segment(&key)
            .state
            .write()
            .add_put_listener(key, Arc::new(callback), false)
    }

    /// Register a Put listener and, if `key` is present, immediately
    /// deliver the current snapshot to it — the presence check is atomic
    /// with the registration.
    pub fn add_put_listener_notify(
        &self,
        key: K,
        callback: impl Fn(PutEvent<K, V>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.segment(&key)
            .state
            .write()
            .add_put_listener(key, Arc::new(callback), true)
    }

    /// Register a Remove listener for `key`; its counter starts at 0.
    pub fn add_remove_listener(
        &self,
        key: K,
        callback: impl Fn(RemoveEvent<K, V>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.segment(&key)
            .state
            .write()
            .add_remove_listener(key, Arc::new(callback))
    }

    /// Register a Send listener for `key`; its counter starts at 0.
    pub fn add_send_listener(
        &self,
        key: K,
        callback: impl Fn(SendEvent<K, V>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.segment(&key)
            .state
            .write()
            .add_send_listener(key, Arc::new(callback), false)
    }

    /// Register a Send listener and, if `key` is present, immediately
    /// deliver the current snapshot to it (atomic with registration).
    pub fn add_send_listener_notify(
        &self,
        key: K,
        callback: impl Fn(SendEvent<K, V>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.segment(&key)
            .state
            .write()
            .add_send_listener(key, Arc::new(callback), true)
    }

    /// Deregister a Put listener. Returns whether it was registered.
    pub fn remove_put_listener(&self, key: &K, id: ListenerId) -> bool {
        self.segment(key).state.write().remove_put_listener(key, id)
    }

    /// Deregister a Remove listener. Returns whether it was registered.
    pub fn remove_remove_listener(&self, key: &K, id: ListenerId) -> bool {
        self.segment(key)
            .state
            .write()
            .remove_remove_listener(key, id)
    }

    /// Deregister a Send listener. Returns whether it was registered.
    pub fn remove_send_listener(&self, key: &K, id: ListenerId) -> bool {
        self.segment(key)
            .state
            .write()
            .remove_send_listener(key, id)
    }

    /// Drop every listener registration across all segments; returns how
    /// many were removed. Locks every segment (exclusive, ascending).
    pub fn clear_listeners(&self) -> usize {
        let mut guards: Vec<_> = self.segments.iter().map(|s| s.state.write()).collect();
        let cleared = guards
            .iter_mut()
            .fold(0usize, |total, state| total + state.clear_listeners());
        tracing::debug!(cleared, map = ?self.name, "cleared listener registrations");
        cleared
    }
}

impl<K, V> std::fmt::Debug for ListenableMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenableMap")
            .field("name", &self.name)
            .field("segments", &SEGMENT_COUNT)
            .finish()
    }
}
