//! Core types shared by the herald container crates.
//!
//! This crate carries everything the lock-based and transactional
//! containers have in common: the immutable event records delivered to
//! listeners, the [`ListenerId`] tokens that identify registrations, and
//! the canonical [`Error`] type.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod event;
pub mod listener;

pub use error::{Error, Result};
pub use event::{PutEvent, RemoveEvent, SendEvent, SendValueEvent, SetEvent};
pub use listener::{
    ListenerId, PutCallback, RemoveCallback, SendCallback, SendValueCallback, SetCallback,
};
