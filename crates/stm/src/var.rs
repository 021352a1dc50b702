//! Transactional variables: the unit of conflict detection.
//!
//! An [`StmVar`] holds one committed `(value, version)` pair. Reading
//! inside a transaction clones the committed value into the transaction
//! and records the version for commit-time validation; writing stages a
//! shadow value that becomes visible to later reads in the same
//! transaction and is applied only when the transaction commits.
//!
//! Each listenable container keeps its entire state (entries, listener
//! registries, invocation counters) in a single variable, so a rollback
//! reverts all of it in one step. Transactions touching different
//! variables never conflict.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::txn::Transaction;

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(1);

/// Commit-side view of a variable: version check during validation and
/// type-erased application of the shadow value.
pub(crate) trait CommittableVar {
    fn committed_version(&self) -> u64;
    fn apply(&self, value: Box<dyn Any>, version: u64);
}

struct Committed<T> {
    value: T,
    version: u64,
}

struct VarInner<T> {
    id: u64,
    committed: Mutex<Committed<T>>,
}

impl<T: Clone + Send + 'static> CommittableVar for VarInner<T> {
    fn committed_version(&self) -> u64 {
        self.committed.lock().version
    }

    fn apply(&self, value: Box<dyn Any>, version: u64) {
        // The write set is keyed by var id; a type mismatch here is a bug,
        // not a recoverable condition.
        let value = *value
            .downcast::<T>()
            .expect("shadow value type matches its variable");
        let mut committed = self.committed.lock();
        committed.value = value;
        committed.version = version;
    }
}

/// A transactional variable holding a `Clone` value.
pub(crate) struct StmVar<T> {
    inner: Arc<VarInner<T>>,
}

impl<T> Clone for StmVar<T> {
    fn clone(&self) -> Self {
        StmVar {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> StmVar<T> {
    pub(crate) fn new(value: T) -> Self {
        StmVar {
            inner: Arc::new(VarInner {
                id: NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed),
                committed: Mutex::new(Committed { value, version: 0 }),
            }),
        }
    }

    /// Read the variable inside `tx`: the shadow value if this
    /// transaction already wrote one, otherwise a clone of the committed
    /// value with its version recorded for validation.
    pub(crate) fn read(&self, tx: &mut Transaction) -> T {
        if let Some(pending) = tx.pending(self.inner.id) {
            return pending
                .downcast_ref::<T>()
                .expect("shadow value type matches its variable")
                .clone();
        }
        let committed = self.inner.committed.lock();
        tx.record_read(
            self.inner.id,
            Arc::clone(&self.inner) as Arc<dyn CommittableVar>,
            committed.version,
        );
        committed.value.clone()
    }

    /// Stage a shadow write inside `tx`.
    ///
    /// Blind writes still record the committed version so the commit
    /// validation covers them.
    pub(crate) fn write(&self, tx: &mut Transaction, value: T) {
        if !tx.has_read(self.inner.id) {
            let committed = self.inner.committed.lock();
            tx.record_read(
                self.inner.id,
                Arc::clone(&self.inner) as Arc<dyn CommittableVar>,
                committed.version,
            );
        }
        tx.record_write(
            self.inner.id,
            Arc::clone(&self.inner) as Arc<dyn CommittableVar>,
            Box::new(value),
        );
    }

    /// Mutate the committed value directly, outside any transaction.
    ///
    /// Only for constructor/builder use before the variable is shared.
    pub(crate) fn update_committed(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.committed.lock().value);
    }
}
