//! Listener registries stored inside transactional state.
//!
//! Unlike the lock-based registries, these live inside an `StmVar`, so
//! they are `Clone` and their invocation counters are plain integers: a
//! counter bump made in a transaction is part of the shadow state and
//! rolls back with it.

use std::hash::Hash;

use herald_core::ListenerId;
use rustc_hash::FxHashMap;

#[derive(Clone)]
pub(crate) struct TxListenerSlot<F> {
    pub(crate) callback: F,
    invocations: u64,
}

impl<F> TxListenerSlot<F> {
    fn new(callback: F) -> Self {
        TxListenerSlot {
            callback,
            invocations: 0,
        }
    }

    /// Advance the counter and return the value to embed in the event.
    pub(crate) fn next_invocation(&mut self) -> u64 {
        self.invocations += 1;
        self.invocations
    }
}

/// Flat registry used by transactional value cells.
#[derive(Clone)]
pub(crate) struct TxListenerSet<F> {
    slots: FxHashMap<ListenerId, TxListenerSlot<F>>,
}

impl<F: Clone> TxListenerSet<F> {
    pub(crate) fn new() -> Self {
        TxListenerSet {
            slots: FxHashMap::default(),
        }
    }

    pub(crate) fn add(&mut self, callback: F) -> ListenerId {
        let id = ListenerId::next();
        self.slots.insert(id, TxListenerSlot::new(callback));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        self.slots.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut TxListenerSlot<F>> {
        self.slots.values_mut()
    }

    pub(crate) fn slot_mut(&mut self, id: ListenerId) -> Option<&mut TxListenerSlot<F>> {
        self.slots.get_mut(&id)
    }
}

/// Per-key registry used by transactional maps. Removing the last
/// listener for a key drops that key's entry.
#[derive(Clone)]
pub(crate) struct TxKeyedListenerSet<K, F> {
    keys: FxHashMap<K, TxListenerSet<F>>,
}

impl<K: Eq + Hash + Clone, F: Clone> TxKeyedListenerSet<K, F> {
    pub(crate) fn new() -> Self {
        TxKeyedListenerSet {
            keys: FxHashMap::default(),
        }
    }

    pub(crate) fn add(&mut self, key: K, callback: F) -> ListenerId {
        self.keys
            .entry(key)
            .or_insert_with(TxListenerSet::new)
            .add(callback)
    }

    pub(crate) fn remove(&mut self, key: &K, id: ListenerId) -> bool {
        let Some(set) = self.keys.get_mut(key) else {
            return false;
        };
        let found = set.remove(id);
        if set.is_empty() {
            self.keys.remove(key);
        }
        found
    }

    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut TxListenerSet<F>> {
        self.keys.get_mut(key)
    }

    pub(crate) fn slot_mut(&mut self, key: &K, id: ListenerId) -> Option<&mut TxListenerSlot<F>> {
        self.keys.get_mut(key).and_then(|set| set.slot_mut(id))
    }

    /// Drop every registration, returning how many were removed.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.keys.values().map(TxListenerSet::len).sum();
        self.keys.clear();
        count
    }
}
