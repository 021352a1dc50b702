//! Transactional multi-valued map with per-key change notification.

use std::hash::Hash;
use std::sync::Arc;

use herald_core::{
    ListenerId, PutCallback, PutEvent, RemoveCallback, RemoveEvent, SendCallback, SendEvent,
};
use rustc_hash::FxHashMap;

use crate::registry::TxKeyedListenerSet;
use crate::txn::Transaction;
use crate::var::StmVar;

#[derive(Clone)]
struct MapState<K, V> {
    entries: FxHashMap<K, Vec<V>>,
    put_listeners: TxKeyedListenerSet<K, PutCallback<K, V>>,
    remove_listeners: TxKeyedListenerSet<K, RemoveCallback<K, V>>,
    send_listeners: TxKeyedListenerSet<K, SendCallback<K, V>>,
}

/// A multi-valued map whose operations all run inside transactions.
///
/// The observable surface matches the lock-based
/// `ListenableMap`: entries are ordered value sequences, `put` merges,
/// `put_single`/`replace_single` collapse the entry to one element, and
/// Put/Remove/Send listeners are registered per key. The difference is
/// the execution model: every operation takes a [`Transaction`], sees
/// that transaction's shadow state, and queues its notifications with
/// [`Transaction::defer`] instead of firing them. Queued deliveries run
/// in mutation order after the transaction commits; an aborted
/// transaction delivers nothing and leaves no trace, including listener
/// registrations and invocation-counter bumps made inside it.
///
/// The whole map (entries plus registries) is one unit of conflict
/// detection: two transactions that both touch the map, even on
/// different keys, conflict and one reruns.
pub struct TransactionalMap<K, V> {
    name: Option<String>,
    state: StmVar<MapState<K, V>>,
}

impl<K, V> TransactionalMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    /// Create an empty, unnamed map.
    pub fn new() -> Self {
        TransactionalMap {
            name: None,
            state: StmVar::new(MapState {
                entries: FxHashMap::default(),
                put_listeners: TxKeyedListenerSet::new(),
                remove_listeners: TxKeyedListenerSet::new(),
                send_listeners: TxKeyedListenerSet::new(),
            }),
        }
    }

    /// Create an empty map whose events carry `name`.
    pub fn named(name: impl Into<String>) -> Self {
        let mut map = Self::new();
        map.name = Some(name.into());
        map
    }

    /// The map's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of keys as seen by `tx`.
    pub fn len(&self, tx: &mut Transaction) -> usize {
        self.state.read(tx).entries.len()
    }

    /// Whether the map has no entries as seen by `tx`.
    pub fn is_empty(&self, tx: &mut Transaction) -> bool {
        self.state.read(tx).entries.is_empty()
    }

    /// Whether `key` has an entry (possibly an empty one).
    pub fn contains_key(&self, tx: &mut Transaction, key: &K) -> bool {
        self.state.read(tx).entries.contains_key(key)
    }

    /// Linear scan for an element equal to `value`.
    pub fn contains_value(&self, tx: &mut Transaction, value: &V) -> bool {
        self.state
            .read(tx)
            .entries
            .values()
            .any(|values| values.contains(value))
    }

    /// Snapshot of the entry for `key`.
    pub fn get(&self, tx: &mut Transaction, key: &K) -> Option<Vec<V>> {
        self.state.read(tx).entries.get(key).cloned()
    }

    /// First element of the entry for `key`.
    pub fn get_single(&self, tx: &mut Transaction, key: &K) -> Option<V> {
        self.state
            .read(tx)
            .entries
            .get(key)
            .and_then(|values| values.first())
            .cloned()
    }

    /// Merge `values` into the entry for `key`, creating it if absent.
    /// Queues Put deliveries with the values put; returns the previous
    /// snapshot.
    pub fn put(&self, tx: &mut Transaction, key: K, values: Vec<V>) -> Option<Vec<V>> {
        let mut state = self.state.read(tx);
        let previous = match state.entries.get_mut(&key) {
            Some(current) => {
                let previous = current.clone();
                current.extend(values.iter().cloned());
                Some(previous)
            }
            None => {
                state.entries.insert(key.clone(), values.clone());
                None
            }
        };
        self.queue_put(tx, &mut state, &key, &values);
        self.state.write(tx, state);
        previous
    }

    /// Replace the whole entry for `key` with a single value. Queues Put
    /// deliveries; returns the previous snapshot.
    pub fn put_single(&self, tx: &mut Transaction, key: K, value: V) -> Option<Vec<V>> {
        let mut state = self.state.read(tx);
        let previous = state.entries.insert(key.clone(), vec![value.clone()]);
        self.queue_put(tx, &mut state, &key, std::slice::from_ref(&value));
        self.state.write(tx, state);
        previous
    }

    /// Remove the entry for `key`. Queues Remove deliveries with the
    /// removed snapshot, which is also returned.
    pub fn remove(&self, tx: &mut Transaction, key: &K) -> Option<Vec<V>> {
        let mut state = self.state.read(tx);
        let values = state.entries.remove(key)?;
        self.queue_remove(tx, &mut state, key, &values);
        self.state.write(tx, state);
        Some(values)
    }

    /// Remove the first occurrence of `value` from the entry for `key`.
    /// Queues Remove deliveries only when an element actually left. An
    /// entry emptied this way stays present.
    pub fn remove_value(&self, tx: &mut Transaction, key: &K, value: &V) -> bool {
        let mut state = self.state.read(tx);
        let removed = match state.entries.get_mut(key) {
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
            self.queue_remove(tx, &mut state, key, std::slice::from_ref(value));
            self.state.write(tx, state);
        }
        removed
    }

    /// Merge every entry of `entries`. Inside one transaction this is
    /// atomic by construction.
    pub fn put_all(&self, tx: &mut Transaction, entries: impl IntoIterator<Item = (K, Vec<V>)>) {
        for (key, values) in entries {
            self.put(tx, key, values);
        }
    }

    /// Drop every entry and every listener registration without queueing
    /// any notification.
    pub fn clear(&self, tx: &mut Transaction) {
        let mut state = self.state.read(tx);
        state.entries = FxHashMap::default();
        state.put_listeners = TxKeyedListenerSet::new();
        state.remove_listeners = TxKeyedListenerSet::new();
        state.send_listeners = TxKeyedListenerSet::new();
        self.state.write(tx, state);
    }

    /// Snapshot of all keys.
    pub fn keys(&self, tx: &mut Transaction) -> Vec<K> {
        self.state.read(tx).entries.keys().cloned().collect()
    }

    /// Snapshot of all entry value lists.
    pub fn values(&self, tx: &mut Transaction) -> Vec<Vec<V>> {
        self.state.read(tx).entries.values().cloned().collect()
    }

    /// Snapshot of all entries.
    pub fn entries(&self, tx: &mut Transaction) -> Vec<(K, Vec<V>)> {
        self.state
            .read(tx)
            .entries
            .iter()
            .map(|(key, values)| (key.clone(), values.clone()))
            .collect()
    }

    /// Insert `values` only when `key` has no entry. Returns the current
    /// snapshot when it does; queues Put deliveries when it inserts.
    pub fn put_if_absent(&self, tx: &mut Transaction, key: K, values: Vec<V>) -> Option<Vec<V>> {
        let mut state = self.state.read(tx);
        if let Some(current) = state.entries.get(&key) {
            return Some(current.clone());
        }
        state.entries.insert(key.clone(), values.clone());
        self.queue_put(tx, &mut state, &key, &values);
        self.state.write(tx, state);
        None
    }

    /// Single-value form of
    /// [`put_if_absent`](TransactionalMap::put_if_absent).
    pub fn put_if_absent_single(&self, tx: &mut Transaction, key: K, value: V) -> Option<Vec<V>> {
        self.put_if_absent(tx, key, vec![value])
    }

    /// Insert `values` when `key` is absent or its entry is empty.
    pub fn put_if_absent_or_empty(
        &self,
        tx: &mut Transaction,
        key: K,
        values: Vec<V>,
    ) -> Option<Vec<V>> {
        let mut state = self.state.read(tx);
        match state.entries.get_mut(&key) {
            Some(current) if !current.is_empty() => return Some(current.clone()),
            Some(current) => current.extend(values.iter().cloned()),
            None => {
                state.entries.insert(key.clone(), values.clone());
            }
        }
        self.queue_put(tx, &mut state, &key, &values);
        self.state.write(tx, state);
        None
    }

    /// Single-value form of
    /// [`put_if_absent_or_empty`](TransactionalMap::put_if_absent_or_empty).
    pub fn put_if_absent_or_empty_single(
        &self,
        tx: &mut Transaction,
        key: K,
        value: V,
    ) -> Option<Vec<V>> {
        self.put_if_absent_or_empty(tx, key, vec![value])
    }

    /// Swap the entry for `key` when it currently equals `expected`. On
    /// success queues Remove with the old values, then Put with the new.
    pub fn replace_if_equal(
        &self,
        tx: &mut Transaction,
        key: &K,
        expected: &[V],
        new_values: Vec<V>,
    ) -> bool {
        let mut state = self.state.read(tx);
        match state.entries.get(key) {
            Some(current) if current.as_slice() == expected => {}
            _ => return false,
        }
        self.queue_remove(tx, &mut state, key, expected);
        state.entries.insert(key.clone(), new_values.clone());
        self.queue_put(tx, &mut state, key, &new_values);
        self.state.write(tx, state);
        true
    }

    /// Swap a present entry unconditionally; absent keys are untouched.
    /// Queues Remove with the old values, then Put with the new; returns
    /// the previous snapshot.
    pub fn replace(&self, tx: &mut Transaction, key: &K, new_values: Vec<V>) -> Option<Vec<V>> {
        let mut state = self.state.read(tx);
        if !state.entries.contains_key(key) {
            return None;
        }
        let previous = state.entries.insert(key.clone(), new_values.clone());
        if let Some(previous) = &previous {
            self.queue_remove(tx, &mut state, key, previous);
        }
        self.queue_put(tx, &mut state, key, &new_values);
        self.state.write(tx, state);
        previous
    }

    /// Single-value form of [`replace`](TransactionalMap::replace).
    pub fn replace_single(&self, tx: &mut Transaction, key: &K, value: V) -> Option<Vec<V>> {
        self.replace(tx, key, vec![value])
    }

    /// Queue Send deliveries for `key` with the current snapshot; returns
    /// how many listeners were queued. The entry is untouched; the
    /// counter bumps are transactional like any other mutation.
    pub fn send(&self, tx: &mut Transaction, key: &K) -> usize {
        let mut state = self.state.read(tx);
        let values = state.entries.get(key).cloned();
        let Some(listeners) = state.send_listeners.get_mut(key) else {
            return 0;
        };
        let mut queued = 0;
        for slot in listeners.iter_mut() {
            let event = SendEvent {
                map_name: self.name.clone(),
                key: key.clone(),
                values: values.clone(),
                invocation_count: slot.next_invocation(),
            };
            let callback = Arc::clone(&slot.callback);
            tx.defer(move || callback(event));
            queued += 1;
        }
        self.state.write(tx, state);
        queued
    }

    /// Register a Put listener for `key`; its counter starts at 0. The
    /// registration rolls back with the transaction.
    pub fn add_put_listener(
        &self,
        tx: &mut Transaction,
        key: K,
        callback: impl Fn(PutEvent<K, V>) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut state = self.state.read(tx);
        let id = state.put_listeners.add(key, Arc::new(callback));
        self.state.write(tx, state);
        id
    }

    /// Register a Put listener and, if `key` is present, queue the
    /// current snapshot for delivery to it after commit. Existing
    /// listeners are not notified.
    pub fn add_put_listener_notify(
        &self,
        tx: &mut Transaction,
        key: K,
        callback: impl Fn(PutEvent<K, V>) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut state = self.state.read(tx);
        let id = state.put_listeners.add(key.clone(), Arc::new(callback));
        if let Some(values) = state.entries.get(&key).cloned() {
            if let Some(slot) = state.put_listeners.slot_mut(&key, id) {
                let event = PutEvent {
                    map_name: self.name.clone(),
                    key: key.clone(),
                    put_values: values,
                    invocation_count: slot.next_invocation(),
                };
                let callback = Arc::clone(&slot.callback);
                tx.defer(move || callback(event));
            }
        }
        self.state.write(tx, state);
        id
    }

    /// Register a Remove listener for `key`; its counter starts at 0.
    pub fn add_remove_listener(
        &self,
        tx: &mut Transaction,
        key: K,
        callback: impl Fn(RemoveEvent<K, V>) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut state = self.state.read(tx);
        let id = state.remove_listeners.add(key, Arc::new(callback));
        self.state.write(tx, state);
        id
    }

    /// Register a Send listener for `key`; its counter starts at 0.
    pub fn add_send_listener(
        &self,
        tx: &mut Transaction,
        key: K,
        callback: impl Fn(SendEvent<K, V>) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut state = self.state.read(tx);
        let id = state.send_listeners.add(key, Arc::new(callback));
        self.state.write(tx, state);
        id
    }

    /// Register a Send listener and, if `key` is present, queue the
    /// current snapshot for delivery to it after commit.
    pub fn add_send_listener_notify(
        &self,
        tx: &mut Transaction,
        key: K,
        callback: impl Fn(SendEvent<K, V>) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut state = self.state.read(tx);
        let id = state.send_listeners.add(key.clone(), Arc::new(callback));
        if let Some(values) = state.entries.get(&key).cloned() {
            if let Some(slot) = state.send_listeners.slot_mut(&key, id) {
                let event = SendEvent {
                    map_name: self.name.clone(),
                    key: key.clone(),
                    values: Some(values),
                    invocation_count: slot.next_invocation(),
                };
                let callback = Arc::clone(&slot.callback);
                tx.defer(move || callback(event));
            }
        }
        self.state.write(tx, state);
        id
    }

    /// Deregister a Put listener. Returns whether it was registered.
    pub fn remove_put_listener(&self, tx: &mut Transaction, key: &K, id: ListenerId) -> bool {
        let mut state = self.state.read(tx);
        let found = state.put_listeners.remove(key, id);
        if found {
            self.state.write(tx, state);
        }
        found
    }

    /// Deregister a Remove listener. Returns whether it was registered.
    pub fn remove_remove_listener(&self, tx: &mut Transaction, key: &K, id: ListenerId) -> bool {
        let mut state = self.state.read(tx);
        let found = state.remove_listeners.remove(key, id);
        if found {
            self.state.write(tx, state);
        }
        found
    }

    /// Deregister a Send listener. Returns whether it was registered.
    pub fn remove_send_listener(&self, tx: &mut Transaction, key: &K, id: ListenerId) -> bool {
        let mut state = self.state.read(tx);
        let found = state.send_listeners.remove(key, id);
        if found {
            self.state.write(tx, state);
        }
        found
    }

    /// Drop every listener registration; returns how many were removed.
    pub fn clear_listeners(&self, tx: &mut Transaction) -> usize {
        let mut state = self.state.read(tx);
        let cleared = state.put_listeners.clear()
            + state.remove_listeners.clear()
            + state.send_listeners.clear();
        self.state.write(tx, state);
        tracing::debug!(cleared, map = ?self.name, "cleared listener registrations");
        cleared
    }

    /// Bump each Put slot's counter in shadow state and queue the
    /// delivery.
    fn queue_put(&self, tx: &mut Transaction, state: &mut MapState<K, V>, key: &K, values: &[V]) {
        let Some(listeners) = state.put_listeners.get_mut(key) else {
            return;
        };
        for slot in listeners.iter_mut() {
            let event = PutEvent {
                map_name: self.name.clone(),
                key: key.clone(),
                put_values: values.to_vec(),
                invocation_count: slot.next_invocation(),
            };
            let callback = Arc::clone(&slot.callback);
            tx.defer(move || callback(event));
        }
    }

    fn queue_remove(
        &self,
        tx: &mut Transaction,
        state: &mut MapState<K, V>,
        key: &K,
        values: &[V],
    ) {
        let Some(listeners) = state.remove_listeners.get_mut(key) else {
            return;
        };
        for slot in listeners.iter_mut() {
            let event = RemoveEvent {
                map_name: self.name.clone(),
                key: key.clone(),
                removed_values: values.to_vec(),
                invocation_count: slot.next_invocation(),
            };
            let callback = Arc::clone(&slot.callback);
            tx.defer(move || callback(event));
        }
    }
}

impl<K, V> Default for TransactionalMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for TransactionalMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalMap")
            .field("name", &self.name)
            .finish()
    }
}
