//! Unified error type for herald containers.
//!
//! Conditional container operations signal failure through their return
//! values (`bool` / `Option`), never through this type. `Error` covers the
//! cases where an operation genuinely cannot proceed: bad arguments,
//! transaction conflicts, and aborted transactions.

use thiserror::Error;

/// All herald errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid argument supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Optimistic transaction conflict.
    ///
    /// Returned from a transaction body to force a restart; `atomically`
    /// treats it as retryable and reruns the body against fresh state, so
    /// callers never observe it on eventual success.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Transaction aborted by the caller's own logic.
    ///
    /// Every mutation made in the transaction is rolled back and every
    /// queued notification is dropped before this propagates.
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

/// Result type for herald operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable.
    ///
    /// Retryable errors (conflicts) may succeed on retry with fresh data.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Check if this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Check if this is an abort raised by caller logic.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_retryable() {
        assert!(Error::Conflict("write skew".into()).is_retryable());
        assert!(!Error::Aborted("divide by zero".into()).is_retryable());
        assert!(!Error::InvalidArgument("empty name".into()).is_retryable());
    }

    #[test]
    fn display_includes_detail() {
        let err = Error::Aborted("boom".into());
        assert_eq!(err.to_string(), "transaction aborted: boom");
    }
}
