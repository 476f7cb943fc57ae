// src/concurrency/occ.rs
//! Optimistic concurrency control over per-page version counters.

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::concurrency::{ConcurrencyControl, ReadSnapshot, TransactionContext};
use crate::error::{IronDocError, Result};
use crate::storage::{Lsn, PageId, TransactionId};

/// Readers are never gated. At commit the read-set is checked against the
/// committed versions and, only if every page still matches, the write-set
/// versions are bumped. Check and bump happen under one validation lock.
#[derive(Debug, Default)]
pub struct OccConcurrencyStrategy {
    versions: DashMap<PageId, u64>,
    validation: Mutex<()>,
}

impl OccConcurrencyStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed version of `page`; pages never committed are at version 0
    pub fn version(&self, page: PageId) -> u64 {
        self.versions.get(&page).map_or(0, |entry| *entry.value())
    }
}

impl ConcurrencyControl for OccConcurrencyStrategy {
    fn begin_read(&self, _txn: TransactionId) -> ReadSnapshot {
        ReadSnapshot::Unbounded
    }

    fn begin_write(&self, _txn: TransactionId, _page: PageId) {}

    fn validate(&self, ctx: &TransactionContext) -> Result<()> {
        let _guard = self.validation.lock();

        for (page, observed) in &ctx.read_set {
            let current = self.version(*page);
            if current != *observed {
                warn!(
                    txn_id = %ctx.transaction_id,
                    page_id = %page,
                    observed = *observed,
                    current,
                    "optimistic validation failed"
                );
                return Err(IronDocError::Conflict {
                    transaction_id: ctx.transaction_id,
                    page_id: *page,
                });
            }
        }

        for page in &ctx.dirty_pages {
            *self.versions.entry(*page).or_insert(0) += 1;
        }
        Ok(())
    }

    fn on_commit(&self, txn: TransactionId, lsn: Lsn) {
        debug!(txn_id = %txn, lsn = %lsn, "optimistic transaction committed");
    }

    fn on_abort(&self, txn: TransactionId) {
        debug!(txn_id = %txn, "optimistic transaction aborted");
    }
}
