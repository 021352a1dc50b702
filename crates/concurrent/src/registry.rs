//! Listener registries for the lock-based containers.
//!
//! A registry maps [`ListenerId`] to a slot holding the callback and its
//! invocation counter. Counters are `AtomicU64` so `send` can deliver
//! while holding only a shared lock; every other registry mutation happens
//! under the owner's exclusive lock.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use herald_core::ListenerId;
use rustc_hash::FxHashMap;

/// One registration: the callback plus its monotonically increasing
/// invocation counter. The counter starts at 0; the first delivery
/// carries 1.
pub(crate) struct ListenerSlot<F> {
    pub(crate) callback: F,
    invocations: AtomicU64,
}

impl<F> ListenerSlot<F> {
    fn new(callback: F) -> Self {
        ListenerSlot {
            callback,
            invocations: AtomicU64::new(0),
        }
    }

    /// Advance the counter and return the value to embed in the event.
    pub(crate) fn next_invocation(&self) -> u64 {
        self.invocations.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Flat registry used by value cells (one scope per cell).
#[derive(Default)]
pub(crate) struct ListenerSet<F> {
    slots: FxHashMap<ListenerId, ListenerSlot<F>>,
}

impl<F> ListenerSet<F> {
    pub(crate) fn new() -> Self {
        ListenerSet {
            slots: FxHashMap::default(),
        }
    }

    pub(crate) fn add(&mut self, callback: F) -> ListenerId {
        let id = ListenerId::next();
        self.slots.insert(id, ListenerSlot::new(callback));
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

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ListenerSlot<F>> {
        self.slots.values()
    }

    pub(crate) fn slot(&self, id: ListenerId) -> Option<&ListenerSlot<F>> {
        self.slots.get(&id)
    }
}

/// Per-key registry used by map segments.
///
/// Removing the last listener for a key drops that key's entry entirely.
pub(crate) struct KeyedListenerSet<K, F> {
    keys: FxHashMap<K, ListenerSet<F>>,
}

impl<K: Eq + Hash, F> KeyedListenerSet<K, F> {
    pub(crate) fn new() -> Self {
        KeyedListenerSet {
            keys: FxHashMap::default(),
        }
    }

    pub(crate) fn add(&mut self, key: K, callback: F) -> ListenerId {
        self.keys
            .entry(key)
            .or_insert_with(ListenerSet::new)
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

    pub(crate) fn get(&self, key: &K) -> Option<&ListenerSet<F>> {
        self.keys.get(key)
    }

    pub(crate) fn slot(&self, key: &K, id: ListenerId) -> Option<&ListenerSlot<F>> {
        self.keys.get(key).and_then(|set| set.slot(id))
    }

    /// Drop every registration, returning how many were removed.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.keys.values().map(ListenerSet::len).sum();
        self.keys.clear();
        count
    }
}
