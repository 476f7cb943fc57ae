// src/concurrency/mvcc.rs
//! Snapshot isolation over a commit table and an in-progress set.

use std::sync::Arc;

use ahash::AHashSet;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::concurrency::commit_table::{CommitTable, WriteConflictTracker};
use crate::concurrency::{ConcurrencyControl, ReadSnapshot, TransactionContext};
use crate::error::{IronDocError, Result};
use crate::storage::{Lsn, PageId, TransactionId};

/// Immutable view captured at `begin_read`.
///
/// A version is visible when its creator is committed from this snapshot's
/// point of view and its superseder (if any) is not.
#[derive(Debug, Clone)]
pub struct MvccSnapshot {
    id: TransactionId,
    in_progress: Arc<AHashSet<TransactionId>>,
    commit_table: Arc<CommitTable>,
}

impl MvccSnapshot {
    pub fn new(
        id: TransactionId,
        in_progress: AHashSet<TransactionId>,
        commit_table: Arc<CommitTable>,
    ) -> Self {
        MvccSnapshot {
            id,
            in_progress: Arc::new(in_progress),
            commit_table,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn in_progress(&self) -> &AHashSet<TransactionId> {
        &self.in_progress
    }

    /// Smallest id this snapshot may still need to resolve
    pub fn horizon(&self) -> TransactionId {
        self.in_progress
            .iter()
            .copied()
            .min()
            .map_or(self.id, |oldest| oldest.min(self.id))
    }

    fn committed_before_snapshot(&self, txn: TransactionId) -> bool {
        if txn.is_bootstrap() {
            return true;
        }
        // ids above our own began after the snapshot was taken
        txn < self.id && !self.in_progress.contains(&txn) && self.commit_table.is_committed(txn)
    }

    pub fn is_visible(&self, xmin: TransactionId, xmax: TransactionId) -> bool {
        if !self.committed_before_snapshot(xmin) {
            return false;
        }
        xmax.is_bootstrap() || !self.committed_before_snapshot(xmax)
    }
}

#[derive(Debug, Default)]
pub struct MvccConcurrencyStrategy {
    commit_table: Arc<CommitTable>,
    tracker: WriteConflictTracker,
    /// Active transaction -> horizon of its snapshot
    active: DashMap<TransactionId, TransactionId>,
}

impl MvccConcurrencyStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_table(&self) -> &CommitTable {
        &self.commit_table
    }

    pub fn tracker(&self) -> &WriteConflictTracker {
        &self.tracker
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn horizon(&self, next_txn: TransactionId) -> TransactionId {
        self.active
            .iter()
            .map(|entry| *entry.value())
            .min()
            .unwrap_or(next_txn)
    }

    pub fn evict_before(&self, horizon: TransactionId) -> (usize, usize) {
        (
            self.commit_table.evict_below(horizon),
            self.tracker.evict_below(horizon),
        )
    }
}

impl ConcurrencyControl for MvccConcurrencyStrategy {
    fn begin_read(&self, txn: TransactionId) -> ReadSnapshot {
        let in_progress: AHashSet<TransactionId> = self
            .active
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| *id != txn)
            .collect();
        let snapshot = MvccSnapshot::new(txn, in_progress, self.commit_table.clone());

        self.commit_table.begin(txn);
        self.active.insert(txn, snapshot.horizon());
        debug!(
            txn_id = %txn,
            in_progress = snapshot.in_progress().len(),
            "snapshot opened"
        );
        ReadSnapshot::Mvcc(snapshot)
    }

    fn begin_write(&self, txn: TransactionId, page: PageId) {
        self.tracker.record(page, txn);
    }

    fn validate(&self, ctx: &TransactionContext) -> Result<()> {
        for page in &ctx.dirty_pages {
            if let Some(writer) = self.tracker.newer_writer(*page, ctx.transaction_id) {
                warn!(
                    txn_id = %ctx.transaction_id,
                    page_id = %page,
                    newer_writer = %writer,
                    "snapshot write conflict"
                );
                return Err(IronDocError::Conflict {
                    transaction_id: ctx.transaction_id,
                    page_id: *page,
                });
            }
        }
        Ok(())
    }

    fn on_commit(&self, txn: TransactionId, lsn: Lsn) {
        self.commit_table.commit(txn);
        self.active.remove(&txn);
        debug!(txn_id = %txn, lsn = %lsn, "snapshot transaction committed");
    }

    fn on_abort(&self, txn: TransactionId) {
        self.commit_table.abort(txn);
        self.active.remove(&txn);
        debug!(txn_id = %txn, "snapshot transaction aborted");
    }
}
