//! Immutable event records delivered to listeners.
//!
//! Every record is a plain field-public struct cloned per delivery. The
//! `invocation_count` field carries the receiving listener's own sequence
//! number, so two listeners observing the same logical change see
//! independent counts.

/// Delivered to put listeners after values were merged into a map entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutEvent<K, V> {
    /// Name of the map that produced the event, if it has one.
    pub map_name: Option<String>,
    /// Key the values were put under.
    pub key: K,
    /// The values added by this put (not the merged entry).
    pub put_values: Vec<V>,
    /// The receiving listener's invocation count for this delivery.
    pub invocation_count: u64,
}

/// Delivered to remove listeners after values left a map entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveEvent<K, V> {
    /// Name of the map that produced the event, if it has one.
    pub map_name: Option<String>,
    /// Key the values were removed from.
    pub key: K,
    /// Snapshot of the removed values.
    pub removed_values: Vec<V>,
    /// The receiving listener's invocation count for this delivery.
    pub invocation_count: u64,
}

/// Delivered to send listeners on an explicit `send(key)`.
///
/// Carries the entry's current snapshot; `None` when the key is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEvent<K, V> {
    /// Name of the map that produced the event, if it has one.
    pub map_name: Option<String>,
    /// Key the send was issued for.
    pub key: K,
    /// Snapshot of the entry at send time, if present.
    pub values: Option<Vec<V>>,
    /// The receiving listener's invocation count for this delivery.
    pub invocation_count: u64,
}

/// Delivered to set listeners when a value cell transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEvent<V> {
    /// Name of the cell that produced the event, if it has one.
    pub name: Option<String>,
    /// The cell's value before the transition.
    pub previous_value: Option<V>,
    /// The cell's value after the transition.
    pub value: Option<V>,
    /// The receiving listener's invocation count for this delivery.
    pub invocation_count: u64,
}

/// Delivered to a value cell's send listeners on an explicit `send()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendValueEvent<V> {
    /// Name of the cell that produced the event, if it has one.
    pub name: Option<String>,
    /// The cell's value at send time.
    pub value: Option<V>,
    /// The receiving listener's invocation count for this delivery.
    pub invocation_count: u64,
}
