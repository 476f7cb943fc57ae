// src/concurrency/none.rs
//! Read-committed without coordination.

use tracing::trace;

use crate::concurrency::{ConcurrencyControl, ReadSnapshot, TransactionContext};
use crate::error::Result;
use crate::storage::{Lsn, PageId, TransactionId};

/// Every read sees the newest committed version; validation always passes.
#[derive(Debug, Default)]
pub struct NoIsolationStrategy;

impl NoIsolationStrategy {
    pub fn new() -> Self {
        NoIsolationStrategy
    }
}

impl ConcurrencyControl for NoIsolationStrategy {
    fn begin_read(&self, _txn: TransactionId) -> ReadSnapshot {
        ReadSnapshot::Unbounded
    }

    fn begin_write(&self, _txn: TransactionId, _page: PageId) {}

    fn validate(&self, _ctx: &TransactionContext) -> Result<()> {
        Ok(())
    }

    fn on_commit(&self, txn: TransactionId, lsn: Lsn) {
        trace!(txn_id = %txn, lsn = %lsn, "read-committed commit");
    }

    fn on_abort(&self, _txn: TransactionId) {}
}
