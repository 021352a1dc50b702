//! Transaction context and the global optimistic runtime.
//!
//! Commit protocol (first-committer-wins):
//!
//! 1. Run the body against transaction-local shadow state.
//! 2. Acquire the commit lock — validation and apply must be atomic with
//!    respect to other committers, or a second transaction could apply
//!    between our validation and our writes.
//! 3. Validate the read set: every variable read must still be at the
//!    version observed. Any mismatch discards the attempt and reruns the
//!    body against fresh state.
//! 4. Allocate one commit version for the whole transaction, apply every
//!    shadow write, release the lock.
//! 5. Drain the deferred-action queue (listener notifications) in enqueue
//!    order — strictly after the commit point, never inside the body.
//!
//! A body returning a non-retryable error aborts: the shadow state and the
//! queue are dropped together and the error propagates. A body panic
//! unwinds the same way; nothing was applied, so nothing needs undoing.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use herald_core::Result;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::var::CommittableVar;

/// Deferred post-commit action (a queued listener notification).
type Deferred = Box<dyn FnOnce()>;

struct ReadEntry {
    var: Arc<dyn CommittableVar>,
    version: u64,
}

struct WriteEntry {
    var: Arc<dyn CommittableVar>,
    value: Box<dyn Any>,
}

/// One atomic execution context.
///
/// Created by [`atomically`] and threaded through every transactional
/// container operation. Holds the read set (variable versions observed),
/// the write set (shadow values, applied only at commit), and the
/// deferred-action queue.
pub struct Transaction {
    txn_id: u64,
    reads: FxHashMap<u64, ReadEntry>,
    writes: FxHashMap<u64, WriteEntry>,
    deferred: Vec<Deferred>,
}

impl Transaction {
    fn new(txn_id: u64) -> Self {
        Transaction {
            txn_id,
            reads: FxHashMap::default(),
            writes: FxHashMap::default(),
            deferred: Vec::new(),
        }
    }

    /// Queue an action to run after this transaction commits.
    ///
    /// Actions run in enqueue order on the committing thread, strictly
    /// after the commit point. They are discarded wholesale on abort.
    pub fn defer(&mut self, action: impl FnOnce() + 'static) {
        self.deferred.push(Box::new(action));
    }

    /// The transaction-local (shadow) value for `var_id`, if one was
    /// written in this transaction.
    pub(crate) fn pending(&self, var_id: u64) -> Option<&dyn Any> {
        self.writes.get(&var_id).map(|entry| entry.value.as_ref())
    }

    /// Record the committed version observed for `var_id`. Only the first
    /// observation counts; later reads inside the transaction see the
    /// shadow value anyway.
    pub(crate) fn record_read(&mut self, var_id: u64, var: Arc<dyn CommittableVar>, version: u64) {
        self.reads
            .entry(var_id)
            .or_insert(ReadEntry { var, version });
    }

    pub(crate) fn has_read(&self, var_id: u64) -> bool {
        self.reads.contains_key(&var_id)
    }

    /// Stage a shadow write for `var_id`, replacing any earlier one.
    pub(crate) fn record_write(
        &mut self,
        var_id: u64,
        var: Arc<dyn CommittableVar>,
        value: Box<dyn Any>,
    ) {
        self.writes.insert(var_id, WriteEntry { var, value });
    }
}

/// Global transaction runtime: version allocation and commit
/// serialization.
struct TxnRuntime {
    /// Monotonically increasing; each committed transaction takes one.
    version: AtomicU64,
    next_txn_id: AtomicU64,
    /// Serializes validate-then-apply across committers.
    commit_lock: Mutex<()>,
}

static RUNTIME: Lazy<TxnRuntime> = Lazy::new(|| TxnRuntime {
    version: AtomicU64::new(0),
    next_txn_id: AtomicU64::new(1),
    commit_lock: Mutex::new(()),
});

impl TxnRuntime {
    /// Validate the read set and apply the write set. Returns `false` on
    /// a conflict (caller retries with a fresh transaction).
    fn try_commit(&self, tx: &mut Transaction) -> bool {
        let _guard = self.commit_lock.lock();

        for read in tx.reads.values() {
            if read.var.committed_version() != read.version {
                return false;
            }
        }

        // One version for the whole transaction.
        let commit_version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        for (_, write) in tx.writes.drain() {
            write.var.apply(write.value, commit_version);
        }
        true
    }
}

/// Run `body` as one atomic transaction.
///
/// The body may run more than once: commit-time conflicts (and any
/// retryable error it returns, see
/// [`Error::is_retryable`](herald_core::Error::is_retryable)) rerun it
/// transparently against fresh state, so it must be free of side effects
/// other than transactional operations and [`Transaction::defer`]. On a
/// non-retryable error the transaction aborts — every mutation reverts,
/// every queued notification is dropped — and the error is returned.
pub fn atomically<T>(mut body: impl FnMut(&mut Transaction) -> Result<T>) -> Result<T> {
    let runtime = &*RUNTIME;
    let mut attempt = 0u64;
    loop {
        attempt += 1;
        let mut tx = Transaction::new(runtime.next_txn_id.fetch_add(1, Ordering::Relaxed));
        match body(&mut tx) {
            Ok(value) => {
                if runtime.try_commit(&mut tx) {
                    tracing::debug!(txn_id = tx.txn_id, attempt, "transaction committed");
                    for action in tx.deferred.drain(..) {
                        action();
                    }
                    return Ok(value);
                }
                tracing::trace!(txn_id = tx.txn_id, attempt, "commit conflict; retrying");
            }
            Err(err) if err.is_retryable() => {
                tracing::trace!(txn_id = tx.txn_id, attempt, "retryable error; retrying");
            }
            Err(err) => {
                tracing::debug!(txn_id = tx.txn_id, error = %err, "transaction rolled back");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var::StmVar;
    use herald_core::Error;

    #[test]
    fn read_your_own_writes() {
        let var = StmVar::new(1);
        let observed = atomically(|tx| {
            var.write(tx, 5);
            Ok(var.read(tx))
        })
        .unwrap();
        assert_eq!(observed, 5);
        assert_eq!(atomically(|tx| Ok(var.read(tx))).unwrap(), 5);
    }

    #[test]
    fn abort_discards_writes_and_deferred_actions() {
        let var = StmVar::new(1);
        let fired = Arc::new(AtomicU64::new(0));

        let fired_handle = Arc::clone(&fired);
        let result: Result<()> = atomically(|tx| {
            var.write(tx, 99);
            let fired = Arc::clone(&fired_handle);
            tx.defer(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            Err(Error::Aborted("boom".into()))
        });

        assert!(result.is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(atomically(|tx| Ok(var.read(tx))).unwrap(), 1);
    }

    #[test]
    fn deferred_actions_run_after_commit_in_order() {
        let var = StmVar::new(0);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_in_tx = Arc::clone(&order);
        atomically(|tx| {
            var.write(tx, 1);
            let order = Arc::clone(&order_in_tx);
            tx.defer(move || order.lock().push("first"));
            let order = Arc::clone(&order_in_tx);
            tx.defer(move || order.lock().push("second"));
            Ok(())
        })
        .unwrap();

        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn conflicting_writers_serialize_via_retry() {
        let var = StmVar::new(0i64);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let var = var.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    atomically(|tx| {
                        let current = var.read(tx);
                        var.write(tx, current + 1);
                        Ok(())
                    })
                    .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(atomically(|tx| Ok(var.read(tx))).unwrap(), 1000);
    }
}
