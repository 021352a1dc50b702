//! # Herald
//!
//! Concurrent, observable in-memory containers.
//!
//! Herald provides listenable container primitives in two execution
//! models:
//!
//! - **Lock-based** ([`ListenableMap`], [`ListenableValue`]) — a
//!   32-segment multi-valued map and a single value cell, both guarded
//!   by shared/exclusive locks. Listeners fire synchronously on the
//!   mutating thread while the lock is held.
//! - **Transactional** ([`TransactionalMap`], [`TransactionalValue`]) —
//!   the same observable surface run under optimistic transactions via
//!   [`atomically`]. Mutations are isolated until commit, conflicting
//!   transactions rerun transparently, and listener notifications are
//!   delivered only after a successful commit, in mutation order. An
//!   aborted transaction leaves no trace.
//!
//! ## Quick Start
//!
//! ```
//! use herald::prelude::*;
//!
//! // Lock-based: listeners fire immediately.
//! let map: ListenableMap<String, i32> = ListenableMap::named("inventory");
//! map.add_put_listener("widgets".to_string(), |event: PutEvent<String, i32>| {
//!     println!("put {:?}", event.put_values);
//! });
//! map.put_single("widgets".to_string(), 3);
//!
//! // Transactional: listeners fire after commit.
//! let cell = TransactionalValue::new().with_value(10);
//! let doubled = atomically(|tx| Ok(cell.set_and_get(tx, |v| v.unwrap() * 2)))?;
//! assert_eq!(doubled, 20);
//! # Ok::<(), herald::Error>(())
//! ```

#![warn(missing_docs)]

pub mod prelude;

// Error handling and event/listener vocabulary
pub use herald_core::{Error, ListenerId, Result};
pub use herald_core::{PutEvent, RemoveEvent, SendEvent, SendValueEvent, SetEvent};
pub use herald_core::{
    PutCallback, RemoveCallback, SendCallback, SendValueCallback, SetCallback,
};

// Lock-based containers
pub use herald_concurrent::{ListenableMap, ListenableValue};

// Transactional containers and runtime
pub use herald_stm::{atomically, Transaction, TransactionalMap, TransactionalValue};
