//! Lock-based observable containers.
//!
//! Two primitives share one delivery discipline: listener callbacks run
//! synchronously on the mutating thread while that thread still holds the
//! lock protecting the state it changed.
//!
//! - [`ListenableValue`] — a single mutable cell guarded by one
//!   shared/exclusive lock, with independent Set and Send listener
//!   registries.
//! - [`ListenableMap`] — a multi-valued map partitioned into 32
//!   independently lockable segments, with per-key Put/Remove/Send
//!   listener registries.
//!
//! Because callbacks run under the lock, a callback must not re-enter the
//! cell or segment it was fired from; doing so deadlocks. This is a
//! documented contract, not something the type system enforces.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod map;
mod registry;
mod segment;
mod value;

pub use map::ListenableMap;
pub use value::ListenableValue;
