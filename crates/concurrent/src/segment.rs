//! One shard of a [`ListenableMap`](crate::ListenableMap).
//!
//! A segment owns a slice of the key space: the entry map plus the per-key
//! Put/Remove/Send listener registries, all guarded by one
//! shared/exclusive lock. Methods on [`SegmentState`] assume the caller
//! holds the segment's lock; [`Segment`] is the lock wrapper the map
//! acquires through, either singly (per-key operations) or as part of an
//! ascending full sweep (aggregate operations).

use std::hash::Hash;

use herald_core::{
    ListenerId, PutCallback, PutEvent, RemoveCallback, RemoveEvent, SendCallback, SendEvent,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::registry::KeyedListenerSet;

pub(crate) struct Segment<K, V> {
    pub(crate) state: RwLock<SegmentState<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone + PartialEq> Segment<K, V> {
    pub(crate) fn new(map_name: Option<String>) -> Self {
        Segment {
            state: RwLock::new(SegmentState {
                map_name,
                entries: FxHashMap::default(),
                put_listeners: KeyedListenerSet::new(),
                remove_listeners: KeyedListenerSet::new(),
                send_listeners: KeyedListenerSet::new(),
            }),
        }
    }
}

pub(crate) struct SegmentState<K, V> {
    map_name: Option<String>,
    entries: FxHashMap<K, Vec<V>>,
    put_listeners: KeyedListenerSet<K, PutCallback<K, V>>,
    remove_listeners: KeyedListenerSet<K, RemoveCallback<K, V>>,
    send_listeners: KeyedListenerSet<K, SendCallback<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone + PartialEq> SegmentState<K, V> {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn contains_value(&self, value: &V) -> bool {
        self.entries.values().any(|values| values.contains(value))
    }

    pub(crate) fn get(&self, key: &K) -> Option<Vec<V>> {
        self.entries.get(key).cloned()
    }

    pub(crate) fn get_single(&self, key: &K) -> Option<V> {
        self.entries.get(key).and_then(|values| values.first()).cloned()
    }

    /// Merge `values` into the entry, creating it if absent. Returns the
    /// previous snapshot and fires Put listeners with the values put.
    pub(crate) fn put(&mut self, key: K, values: Vec<V>) -> Option<Vec<V>> {
        let previous = match self.entries.get_mut(&key) {
            Some(current) => {
                let previous = current.clone();
                current.extend(values.iter().cloned());
                Some(previous)
            }
            None => {
                self.entries.insert(key.clone(), values.clone());
                None
            }
        };
        self.notify_put(&key, &values);
        previous
    }

    /// Replace the whole entry with a single value.
    pub(crate) fn put_single(&mut self, key: K, value: V) -> Option<Vec<V>> {
        let previous = self.entries.insert(key.clone(), vec![value.clone()]);
        self.notify_put(&key, &[value]);
        previous
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<Vec<V>> {
        let values = self.entries.remove(key)?;
        self.notify_remove(key, &values);
        Some(values)
    }

    /// Remove the first occurrence of `value` from the entry. Fires Remove
    /// listeners only when an element actually left; an emptied entry
    /// stays present.
    pub(crate) fn remove_value(&mut self, key: &K, value: &V) -> bool {
        let removed = match self.entries.get_mut(key) {
            Some(values) => match values.iter().position(|v| v == value) {
                Some(index) => {
                    values.remove(index);
                    true
                }
                None => false,
            },
            None => false,
        };
        if removed {
            self.notify_remove(key, std::slice::from_ref(value));
        }
        removed
    }

    pub(crate) fn put_if_absent(&mut self, key: K, values: Vec<V>) -> Option<Vec<V>> {
        if let Some(current) = self.entries.get(&key) {
            return Some(current.clone());
        }
        self.entries.insert(key.clone(), values.clone());
        self.notify_put(&key, &values);
        None
    }

    /// Like `put_if_absent`, but a present-but-empty entry also accepts
    /// the values (an entry emptied by `remove_value` stays present).
    pub(crate) fn put_if_absent_or_empty(&mut self, key: K, values: Vec<V>) -> Option<Vec<V>> {
        match self.entries.get_mut(&key) {
            Some(current) if !current.is_empty() => return Some(current.clone()),
            Some(current) => current.extend(values.iter().cloned()),
            None => {
                self.entries.insert(key.clone(), values.clone());
            }
        }
        self.notify_put(&key, &values);
        None
    }

    /// Swap the entry when it currently equals `expected`. Fires Remove
    /// with the old values, then Put with the new ones.
    pub(crate) fn replace_if_equal(&mut self, key: &K, expected: &[V], new_values: Vec<V>) -> bool {
        match self.entries.get(key) {
            Some(current) if current.as_slice() == expected => {}
            _ => return false,
        }
        self.notify_remove(key, expected);
        self.entries.insert(key.clone(), new_values.clone());
        self.notify_put(key, &new_values);
        true
    }

    /// Swap a present entry unconditionally. Fires Remove with the old
    /// values, then Put with the new ones; absent keys are untouched.
    pub(crate) fn replace(&mut self, key: &K, new_values: Vec<V>) -> Option<Vec<V>> {
        if !self.entries.contains_key(key) {
            return None;
        }
        let previous = self.entries.insert(key.clone(), new_values.clone());
        if let Some(previous) = &previous {
            self.notify_remove(key, previous);
        }
        self.notify_put(key, &new_values);
        previous
    }

    /// Fire Send listeners for `key` with the current snapshot. Returns
    /// the number of listeners notified. Read-only: callable under the
    /// shared lock (counters are atomic).
    pub(crate) fn send(&self, key: &K) -> usize {
        let Some(listeners) = self.send_listeners.get(key) else {
            return 0;
        };
        let values = self.entries.get(key).cloned();
        for slot in listeners.iter() {
            let event = SendEvent {
                map_name: self.map_name.clone(),
                key: key.clone(),
                values: values.clone(),
                invocation_count: slot.next_invocation(),
            };
            (slot.callback)(event);
        }
        listeners.len()
    }

    /// Register a Put listener. With `notify_if_present`, the presence
    /// check and the delivery of the current snapshot to the new listener
    /// happen atomically with the registration — a concurrent writer can
    /// neither be missed nor double-delivered.
    pub(crate) fn add_put_listener(
        &mut self,
        key: K,
        callback: PutCallback<K, V>,
        notify_if_present: bool,
    ) -> ListenerId {
        let id = self.put_listeners.add(key.clone(), callback);
        if notify_if_present {
            if let Some(values) = self.entries.get(&key) {
                if let Some(slot) = self.put_listeners.slot(&key, id) {
                    let event = PutEvent {
                        map_name: self.map_name.clone(),
                        key: key.clone(),
                        put_values: values.clone(),
                        invocation_count: slot.next_invocation(),
                    };
                    (slot.callback)(event);
                }
            }
        }
        id
    }

    pub(crate) fn add_remove_listener(
        &mut self,
        key: K,
        callback: RemoveCallback<K, V>,
    ) -> ListenerId {
        self.remove_listeners.add(key, callback)
    }

    /// Register a Send listener, optionally delivering the current
    /// snapshot to it when the key is present (atomic with registration).
    pub(crate) fn add_send_listener(
        &mut self,
        key: K,
        callback: SendCallback<K, V>,
        notify_if_present: bool,
    ) -> ListenerId {
        let id = self.send_listeners.add(key.clone(), callback);
        if notify_if_present {
            if let Some(values) = self.entries.get(&key) {
                if let Some(slot) = self.send_listeners.slot(&key, id) {
                    let event = SendEvent {
                        map_name: self.map_name.clone(),
                        key: key.clone(),
                        values: Some(values.clone()),
                        invocation_count: slot.next_invocation(),
                    };
                    (slot.callback)(event);
                }
            }
        }
        id
    }

    pub(crate) fn remove_put_listener(&mut self, key: &K, id: ListenerId) -> bool {
        self.put_listeners.remove(key, id)
    }

    pub(crate) fn remove_remove_listener(&mut self, key: &K, id: ListenerId) -> bool {
        self.remove_listeners.remove(key, id)
    }

    pub(crate) fn remove_send_listener(&mut self, key: &K, id: ListenerId) -> bool {
        self.send_listeners.remove(key, id)
    }

    /// Drop entries and listener registries without notifying anyone.
    pub(crate) fn clear(&mut self) {
        self.entries = FxHashMap::default();
        self.put_listeners = KeyedListenerSet::new();
        self.remove_listeners = KeyedListenerSet::new();
        self.send_listeners = KeyedListenerSet::new();
    }

    /// Drop all listener registrations, returning how many were removed.
    pub(crate) fn clear_listeners(&mut self) -> usize {
        self.put_listeners.clear() + self.remove_listeners.clear() + self.send_listeners.clear()
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &Vec<V>)> {
        self.entries.iter()
    }

    fn notify_put(&self, key: &K, put_values: &[V]) {
        let Some(listeners) = self.put_listeners.get(key) else {
            return;
        };
        for slot in listeners.iter() {
            let event = PutEvent {
                map_name: self.map_name.clone(),
                key: key.clone(),
                put_values: put_values.to_vec(),
                invocation_count: slot.next_invocation(),
            };
            (slot.callback)(event);
        }
    }

    fn notify_remove(&self, key: &K, removed_values: &[V]) {
        let Some(listeners) = self.remove_listeners.get(key) else {
            return;
        };
        for slot in listeners.iter() {
            let event = RemoveEvent {
                map_name: self.map_name.clone(),
                key: key.clone(),
                removed_values: removed_values.to_vec(),
                invocation_count: slot.next_invocation(),
            };
            (slot.callback)(event);
        }
    }
}
