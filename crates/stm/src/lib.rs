//! Transactional observable containers over optimistic concurrency.
//!
//! [`TransactionalValue`] and [`TransactionalMap`] expose the same
//! listener-observing surface as their lock-based siblings, but every
//! operation runs inside an [`atomically`] block: mutations write
//! transaction-local shadow state (visible to later operations in the
//! same transaction), and listener notifications are queued rather than
//! fired. When the block completes, the transaction validates and commits
//! under first-committer-wins rules — conflicting transactions are rerun
//! transparently — and only then does the notification queue drain, in
//! enqueue order. A transaction that returns an error (or panics) leaves
//! nothing behind: shadow state and queued notifications are discarded
//! together, so a listener never observes a change that was rolled back.
//!
//! ```
//! use herald_stm::{atomically, TransactionalMap};
//!
//! let map: TransactionalMap<String, i32> = TransactionalMap::named("inventory");
//! atomically(|tx| {
//!     map.put_single(tx, "widgets".to_string(), 3);
//!     Ok(())
//! })
//! .unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod map;
mod registry;
mod txn;
mod value;
mod var;

pub use map::TransactionalMap;
pub use txn::{atomically, Transaction};
pub use value::TransactionalValue;
