//! Convenient imports for Herald.
//!
//! Re-exports the containers, the transaction entry point, and the event
//! types so one import covers common use:
//!
//! ```
//! use herald::prelude::*;
//!
//! let cell = ListenableValue::new().with_value(1);
//! assert!(cell.compare_and_set(Some(&1), 2));
//! ```

// Containers
pub use herald_concurrent::{ListenableMap, ListenableValue};
pub use herald_stm::{TransactionalMap, TransactionalValue};

// Transactions
pub use herald_stm::{atomically, Transaction};

// Error handling
pub use herald_core::{Error, Result};

// Events and listener identity
pub use herald_core::{
    ListenerId, PutEvent, RemoveEvent, SendEvent, SendValueEvent, SetEvent,
};
