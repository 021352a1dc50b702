//! A single observable value cell guarded by one shared/exclusive lock.

use herald_core::{SendValueCallback, SendValueEvent, SetCallback, SetEvent};
use herald_core::ListenerId;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::registry::ListenerSet;

struct ValueState<V> {
    value: Option<V>,
    set_listeners: ListenerSet<SetCallback<V>>,
    send_listeners: ListenerSet<SendValueCallback<V>>,
}

/// A mutable cell whose transitions are observable.
///
/// Readers proceed concurrently; at most one writer holds the cell at a
/// time. Every compound check-and-mutate operation executes under a single
/// write acquisition, so there is no window between the check and the
/// mutation.
///
/// Set listeners fire synchronously on the writing thread while the write
/// lock is held; Send listeners fire on the sending thread under the
/// shared lock. A listener that panics unwinds through the guard (the lock
/// is released) but listeners not yet reached in that round are skipped. A
/// callback must not call back into the same cell.
pub struct ListenableValue<V> {
    name: Option<String>,
    inner: RwLock<ValueState<V>>,
}

impl<V> Default for ListenableValue<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ListenableValue<V> {
    /// Create an empty, unnamed cell.
    pub fn new() -> Self {
        ListenableValue {
            name: None,
            inner: RwLock::new(ValueState {
                value: None,
                set_listeners: ListenerSet::new(),
                send_listeners: ListenerSet::new(),
            }),
        }
    }

    /// Set the name carried in events produced by this cell.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the initial value.
    pub fn with_value(self, value: V) -> Self {
        self.inner.write().value = Some(value);
        self
    }

    /// The cell's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl<V: Clone + PartialEq> ListenableValue<V> {
    /// Current value under the shared lock.
    pub fn get(&self) -> Option<V> {
        self.inner.read().value.clone()
    }

    /// Conditionally replace the value.
    ///
    /// Fails without mutating or notifying when the current value does not
    /// match `expected` (an absent current matched against a present
    /// expectation, or vice versa, also fails). On success Set listeners
    /// fire under the write lock.
    pub fn compare_and_set(&self, expected: Option<&V>, new_value: V) -> bool {
        let mut state = self.inner.write();
        if !accepts(state.value.as_ref(), expected) {
            return false;
        }
        let previous = state.value.replace(new_value);
        notify_set(&self.name, &state, &previous);
        true
    }

    /// Conditionally replace the value with one computed from the accepted
    /// current value. Same acceptance contract as [`compare_and_set`].
    ///
    /// [`compare_and_set`]: ListenableValue::compare_and_set
    pub fn compare_and_update(
        &self,
        expected: Option<&V>,
        f: impl FnOnce(Option<&V>) -> V,
    ) -> bool {
        let mut state = self.inner.write();
        if !accepts(state.value.as_ref(), expected) {
            return false;
        }
        let next = f(state.value.as_ref());
        let previous = state.value.replace(next);
        notify_set(&self.name, &state, &previous);
        true
    }

    /// Unconditionally transform the value; returns the new value.
    pub fn update(&self, f: impl FnOnce(Option<&V>) -> V) -> V {
        let mut state = self.inner.write();
        let next = f(state.value.as_ref());
        let previous = state.value.replace(next.clone());
        notify_set(&self.name, &state, &previous);
        next
    }

    /// Fallibly transform the value.
    ///
    /// On `Err` the prior value stays visible, no notification fires for
    /// the attempt, and the lock is released before the error propagates.
    pub fn try_update<E>(
        &self,
        f: impl FnOnce(Option<&V>) -> std::result::Result<V, E>,
    ) -> std::result::Result<V, E> {
        let mut state = self.inner.write();
        let next = f(state.value.as_ref())?;
        let previous = state.value.replace(next.clone());
        notify_set(&self.name, &state, &previous);
        Ok(next)
    }

    /// Return the current value and fire Send listeners. Never mutates.
    pub fn send(&self) -> Option<V> {
        let state = self.inner.read();
        for slot in state.send_listeners.iter() {
            let event = SendValueEvent {
                name: self.name.clone(),
                value: state.value.clone(),
                invocation_count: slot.next_invocation(),
            };
            (slot.callback)(event);
        }
        state.value.clone()
    }

    /// Register a Set listener; its counter starts at 0.
    pub fn add_set_listener(
        &self,
        callback: impl Fn(SetEvent<V>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.write().set_listeners.add(Arc::new(callback))
    }

    /// Register a Send listener; its counter starts at 0.
    pub fn add_send_listener(
        &self,
        callback: impl Fn(SendValueEvent<V>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.write().send_listeners.add(Arc::new(callback))
    }

    /// Deregister a Set listener. Returns whether it was registered.
    pub fn remove_set_listener(&self, id: ListenerId) -> bool {
        self.inner.write().set_listeners.remove(id)
    }

    /// Deregister a Send listener. Returns whether it was registered.
    pub fn remove_send_listener(&self, id: ListenerId) -> bool {
        self.inner.write().send_listeners.remove(id)
    }
}

/// Arithmetic conveniences for integer cells. An empty cell counts as 0.
impl ListenableValue<i64> {
    /// Add one; returns the new value.
    pub fn increment_and_get(&self) -> i64 {
        self.shift(1).1
    }

    /// Add one; returns the previous value.
    pub fn get_and_increment(&self) -> i64 {
        self.shift(1).0
    }

    /// Subtract one; returns the new value.
    pub fn decrement_and_get(&self) -> i64 {
        self.shift(-1).1
    }

    /// Subtract one; returns the previous value.
    pub fn get_and_decrement(&self) -> i64 {
        self.shift(-1).0
    }

    /// Add `delta`; returns the new value.
    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.shift(delta).1
    }

    /// Add `delta`; returns the previous value.
    pub fn get_and_add(&self, delta: i64) -> i64 {
        self.shift(delta).0
    }

    fn shift(&self, delta: i64) -> (i64, i64) {
        let mut state = self.inner.write();
        let previous = state.value;
        // Two's-complement wrap at the i64 boundaries.
        let next = previous.unwrap_or(0).wrapping_add(delta);
        state.value = Some(next);
        notify_set(&self.name, &state, &previous);
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

fn notify_set<V: Clone + PartialEq>(
    name: &Option<String>,
    state: &ValueState<V>,
    previous: &Option<V>,
) {
    // Identity transitions are not observable.
    if previous == &state.value {
        return;
    }
    for slot in state.set_listeners.iter() {
        let event = SetEvent {
            name: name.clone(),
            previous_value: previous.clone(),
            value: state.value.clone(),
            invocation_count: slot.next_invocation(),
        };
        (slot.callback)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorded<V: Clone + Send + 'static>() -> (Arc<Mutex<Vec<SetEvent<V>>>>, impl Fn(SetEvent<V>) + Send + Sync)
    {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |event| sink.lock().push(event))
    }

    #[test]
    fn get_reflects_compare_and_set() {
        let cell = ListenableValue::new().with_value(1);
        assert_eq!(cell.get(), Some(1));
        assert!(cell.compare_and_set(Some(&1), 2));
        assert_eq!(cell.get(), Some(2));
    }

    #[test]
    fn compare_and_set_rejects_mismatch() {
        let cell = ListenableValue::new().with_value(1);
        assert!(!cell.compare_and_set(Some(&7), 2));
        assert!(!cell.compare_and_set(None, 2));
        assert_eq!(cell.get(), Some(1));

        let empty: ListenableValue<i32> = ListenableValue::new();
        assert!(!empty.compare_and_set(Some(&1), 2));
        assert!(empty.compare_and_set(None, 5));
        assert_eq!(empty.get(), Some(5));
    }

    #[test]
    fn set_listener_sees_previous_and_new() {
        let cell = ListenableValue::new().with_name("n").with_value(1);
        let (events, callback) = recorded();
        cell.add_set_listener(callback);

        assert!(cell.compare_and_set(Some(&1), 2));
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name.as_deref(), Some("n"));
        assert_eq!(events[0].previous_value, Some(1));
        assert_eq!(events[0].value, Some(2));
        assert_eq!(events[0].invocation_count, 1);
    }

    #[test]
    fn identity_set_skips_notification() {
        let cell = ListenableValue::new().with_value(3);
        let (events, callback) = recorded();
        cell.add_set_listener(callback);

        assert!(cell.compare_and_set(Some(&3), 3));
        assert_eq!(cell.get(), Some(3));
        assert!(events.lock().is_empty());

        cell.update(|v| *v.unwrap());
        assert!(events.lock().is_empty());
    }

    #[test]
    fn update_returns_new_value() {
        let cell = ListenableValue::new().with_value(10);
        assert_eq!(cell.update(|v| v.unwrap() * 2), 20);
        assert_eq!(cell.get(), Some(20));
    }

    #[test]
    fn failed_try_update_leaves_prior_value() {
        let cell = ListenableValue::new().with_value(10);
        let (events, callback) = recorded();
        cell.add_set_listener(callback);

        let result: Result<i32, &str> = cell.try_update(|_| Err("nope"));
        assert_eq!(result, Err("nope"));
        assert_eq!(cell.get(), Some(10));
        assert!(events.lock().is_empty());

        // The lock was released; the cell still works.
        assert_eq!(cell.try_update::<&str>(|v| Ok(v.unwrap() + 1)), Ok(11));
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn send_notifies_without_mutating() {
        let cell = ListenableValue::new().with_value(42);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        cell.add_send_listener(move |event: SendValueEvent<i32>| sink.lock().push(event));

        assert_eq!(cell.send(), Some(42));
        assert_eq!(cell.send(), Some(42));
        assert_eq!(cell.get(), Some(42));

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].invocation_count, 1);
        assert_eq!(events[1].invocation_count, 2);
        assert_eq!(events[1].value, Some(42));
    }

    #[test]
    fn listeners_are_independent() {
        let cell = ListenableValue::new().with_value(0);
        let (first, cb1) = recorded();
        cell.add_set_listener(cb1);
        cell.update(|_| 1);

        let (second, cb2) = recorded();
        cell.add_set_listener(cb2);
        cell.update(|_| 2);

        assert_eq!(first.lock().last().unwrap().invocation_count, 2);
        assert_eq!(second.lock().last().unwrap().invocation_count, 1);
    }

    #[test]
    fn removed_listener_stops_firing() {
        let cell = ListenableValue::new().with_value(0);
        let (events, callback) = recorded();
        let id = cell.add_set_listener(callback);

        cell.update(|_| 1);
        assert!(cell.remove_set_listener(id));
        assert!(!cell.remove_set_listener(id));
        cell.update(|_| 2);
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn integer_helpers_treat_empty_as_zero() {
        let counter: ListenableValue<i64> = ListenableValue::new();
        assert_eq!(counter.increment_and_get(), 1);
        assert_eq!(counter.get_and_increment(), 1);
        assert_eq!(counter.get(), Some(2));
        assert_eq!(counter.add_and_get(10), 12);
        assert_eq!(counter.get_and_add(-2), 12);
        assert_eq!(counter.decrement_and_get(), 9);
        assert_eq!(counter.get_and_decrement(), 9);
        assert_eq!(counter.get(), Some(8));
    }

    #[test]
    fn integer_helpers_wrap_at_the_boundaries() {
        let counter: ListenableValue<i64> = ListenableValue::new().with_value(i64::MAX);
        assert_eq!(counter.increment_and_get(), i64::MIN);
        assert_eq!(counter.decrement_and_get(), i64::MAX);
        assert_eq!(counter.add_and_get(1), i64::MIN);
        assert_eq!(counter.get_and_add(-1), i64::MIN);
        assert_eq!(counter.get(), Some(i64::MAX));
    }

    #[test]
    fn integer_helpers_notify_with_both_values() {
        let counter: ListenableValue<i64> = ListenableValue::new().with_value(5);
        let (events, callback) = recorded();
        counter.add_set_listener(callback);

        counter.increment_and_get();
        let events = events.lock();
        assert_eq!(events[0].previous_value, Some(5));
        assert_eq!(events[0].value, Some(6));
    }
}
