//! A transactional observable value cell.

use std::sync::Arc;

use herald_core::{ListenerId, SendValueCallback, SendValueEvent, SetCallback, SetEvent};

use crate::registry::TxListenerSet;
use crate::txn::Transaction;
use crate::var::StmVar;

#[derive(Clone)]
struct ValueState<V> {
    value: Option<V>,
    set_listeners: TxListenerSet<SetCallback<V>>,
    send_listeners: TxListenerSet<SendValueCallback<V>>,
}

/// A value cell whose reads, writes, and listener registrations all run
/// inside transactions.
///
/// The value, both listener registries, and every invocation counter
/// live in one transactional variable, so an abort reverts a mutation,
/// its counter bumps, and any registration made in the same transaction
/// together. Listener notifications are queued with
/// [`Transaction::defer`] and fire only after the transaction commits, in
/// the order the mutations happened.
pub struct TransactionalValue<V> {
    name: Option<String>,
    state: StmVar<ValueState<V>>,
}

impl<V: Clone + Send + 'static> Default for TransactionalValue<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + 'static> TransactionalValue<V> {
    /// Create an empty, unnamed cell.
    pub fn new() -> Self {
        TransactionalValue {
            name: None,
            state: StmVar::new(ValueState {
                value: None,
                set_listeners: TxListenerSet::new(),
                send_listeners: TxListenerSet::new(),
            }),
        }
    }

    /// Set the name carried in events produced by this cell.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the initial value. Only meaningful before the cell is shared.
    pub fn with_value(self, value: V) -> Self {
        self.state.update_committed(|state| state.value = Some(value));
        self
    }

    /// The cell's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl<V: Clone + PartialEq + Send + 'static> TransactionalValue<V> {
    /// Current value as seen by `tx`.
    pub fn get(&self, tx: &mut Transaction) -> Option<V> {
        self.state.read(tx).value
    }

    /// Conditionally replace the value.
    ///
    /// Same acceptance contract as the lock-based cell: absent matches
    /// absent, present values must compare equal. On success Set
    /// listeners are queued for post-commit delivery.
    pub fn compare_and_set(&self, tx: &mut Transaction, expected: Option<&V>, new_value: V) -> bool {
        let mut state = self.state.read(tx);
        if !accepts(state.value.as_ref(), expected) {
            return false;
        }
        let previous = state.value.replace(new_value);
        self.queue_set(tx, &mut state, &previous);
        self.state.write(tx, state);
        true
    }

    /// Replace the value with one computed from the current value;
    /// returns the new value.
    pub fn set_and_get(&self, tx: &mut Transaction, f: impl FnOnce(Option<&V>) -> V) -> V {
        let mut state = self.state.read(tx);
        let next = f(state.value.as_ref());
        let previous = state.value.replace(next.clone());
        self.queue_set(tx, &mut state, &previous);
        self.state.write(tx, state);
        next
    }

    /// Replace the value with one computed from the current value;
    /// returns the previous value.
    pub fn get_and_set(&self, tx: &mut Transaction, f: impl FnOnce(Option<&V>) -> V) -> Option<V> {
        let mut state = self.state.read(tx);
        let next = f(state.value.as_ref());
        let previous = state.value.replace(next);
        self.queue_set(tx, &mut state, &previous);
        self.state.write(tx, state);
        previous
    }

    /// Return the current value and queue Send listeners. The value is
    /// untouched; the counter bumps are transactional like any other
    /// mutation.
    pub fn send(&self, tx: &mut Transaction) -> Option<V> {
        let mut state = self.state.read(tx);
        let value = state.value.clone();
        for slot in state.send_listeners.iter_mut() {
            let event = SendValueEvent {
                name: self.name.clone(),
                value: value.clone(),
                invocation_count: slot.next_invocation(),
            };
            let callback = Arc::clone(&slot.callback);
            tx.defer(move || callback(event));
        }
        self.state.write(tx, state);
        value
    }

    /// Register a Set listener; its counter starts at 0. The
    /// registration itself rolls back if the transaction aborts.
    pub fn add_set_listener(
        &self,
        tx: &mut Transaction,
        callback: impl Fn(SetEvent<V>) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut state = self.state.read(tx);
        let id = state.set_listeners.add(Arc::new(callback));
        self.state.write(tx, state);
        id
    }

    /// Register a Send listener; its counter starts at 0.
    pub fn add_send_listener(
        &self,
        tx: &mut Transaction,
        callback: impl Fn(SendValueEvent<V>) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut state = self.state.read(tx);
        let id = state.send_listeners.add(Arc::new(callback));
        self.state.write(tx, state);
        id
    }

    /// Deregister a Set listener. Returns whether it was registered.
    pub fn remove_set_listener(&self, tx: &mut Transaction, id: ListenerId) -> bool {
        let mut state = self.state.read(tx);
        let found = state.set_listeners.remove(id);
        if found {
            self.state.write(tx, state);
        }
        found
    }

    /// Deregister a Send listener. Returns whether it was registered.
    pub fn remove_send_listener(&self, tx: &mut Transaction, id: ListenerId) -> bool {
        let mut state = self.state.read(tx);
        let found = state.send_listeners.remove(id);
        if found {
            self.state.write(tx, state);
        }
        found
    }

    /// Bump each Set slot's counter in shadow state and queue the
    /// delivery. Identity transitions queue nothing.
    fn queue_set(&self, tx: &mut Transaction, state: &mut ValueState<V>, previous: &Option<V>) {
        if previous == &state.value {
            return;
        }
        for slot in state.set_listeners.iter_mut() {
            let event = SetEvent {
                name: self.name.clone(),
                previous_value: previous.clone(),
                value: state.value.clone(),
                invocation_count: slot.next_invocation(),
            };
            let callback = Arc::clone(&slot.callback);
            tx.defer(move || callback(event));
        }
    }
}

/// Arithmetic conveniences for integer cells. An empty cell counts as 0.
impl TransactionalValue<i64> {
    /// Add one; returns the new value.
    pub fn increment_and_get(&self, tx: &mut Transaction) -> i64 {
        self.shift(tx, 1).1
    }

    /// Add one; returns the previous value.
    pub fn get_and_increment(&self, tx: &mut Transaction) -> i64 {
        self.shift(tx, 1).0
    }

    /// Subtract one; returns the new value.
    pub fn decrement_and_get(&self, tx: &mut Transaction) -> i64 {
        self.shift(tx, -1).1
    }

    /// Subtract one; returns the previous value.
    pub fn get_and_decrement(&self, tx: &mut Transaction) -> i64 {
        self.shift(tx, -1).0
    }

    /// Add `delta`; returns the new value.
    pub fn add_and_get(&self, tx: &mut Transaction, delta: i64) -> i64 {
        self.shift(tx, delta).1
    }

    /// Add `delta`; returns the previous value.
    pub fn get_and_add(&self, tx: &mut Transaction, delta: i64) -> i64 {
        self.shift(tx, delta).0
    }

    fn shift(&self, tx: &mut Transaction, delta: i64) -> (i64, i64) {
        let mut state = self.state.read(tx);
        let previous = state.value;
        // Two's-complement wrap at the i64 boundaries.
        let next = previous.unwrap_or(0).wrapping_add(delta);
        state.value = Some(next);
        self.queue_set(tx, &mut state, &previous);
        self.state.write(tx, state);
        (previous.unwrap_or(0), next)
    }
}

/// Conditional-set acceptance: absent matches absent, present values must
/// compare equal, and any absent/present mismatch is rejected.
fn accepts<V: PartialEq>(current: Option<&V>, expected: Option<&V>) -> bool {
    match (current, expected) {
        (None, None) => true,
        (Some(c), Some(e)) => c == e,
        _ => false,
    }
}
