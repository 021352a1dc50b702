//! Listener identity and callback types.
//!
//! Registrations are identified by [`ListenerId`] tokens instead of
//! callback object identity: closures have no usable equality, so every
//! `add_*_listener` call allocates a fresh token and hands it back for
//! later deregistration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::event::{PutEvent, RemoveEvent, SendEvent, SendValueEvent, SetEvent};

/// Opaque handle identifying one listener registration.
///
/// Ids are unique per process, never reused, and valid only against the
/// container (and listener kind) they were registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    /// Allocate the next process-unique listener id.
    pub fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback invoked for put events.
pub type PutCallback<K, V> = Arc<dyn Fn(PutEvent<K, V>) + Send + Sync>;

/// Callback invoked for remove events.
pub type RemoveCallback<K, V> = Arc<dyn Fn(RemoveEvent<K, V>) + Send + Sync>;

/// Callback invoked for map send events.
pub type SendCallback<K, V> = Arc<dyn Fn(SendEvent<K, V>) + Send + Sync>;

/// Callback invoked for value-cell set events.
pub type SetCallback<V> = Arc<dyn Fn(SetEvent<V>) + Send + Sync>;

/// Callback invoked for value-cell send events.
pub type SendValueCallback<V> = Arc<dyn Fn(SendValueEvent<V>) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = ListenerId::next();
        let b = ListenerId::next();
        assert_ne!(a, b);
        assert!(a < b);
    }
}
