// src/concurrency/commit_table.rs
//! Transaction status table and per-page writer tracking for snapshot isolation.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::storage::{PageId, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    InProgress,
    Committed,
    Aborted,
}

/// `TransactionId -> TxnState`, append/overwrite only.
///
/// Entries are removed solely by [`CommitTable::evict_below`]. Ids below the
/// eviction watermark that have no entry read as committed: only committed
/// transactions leave versions behind in the page store, so an evicted id
/// that still appears as `xmin`/`xmax` belonged to a committed writer.
#[derive(Debug, Default)]
pub struct CommitTable {
    states: DashMap<TransactionId, TxnState>,
    evicted_below: AtomicU64,
}

impl CommitTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, txn: TransactionId) {
        self.states.insert(txn, TxnState::InProgress);
    }

    pub fn commit(&self, txn: TransactionId) {
        self.states.insert(txn, TxnState::Committed);
    }

    pub fn abort(&self, txn: TransactionId) {
        self.states.insert(txn, TxnState::Aborted);
    }

    pub fn state(&self, txn: TransactionId) -> Option<TxnState> {
        if txn.is_bootstrap() {
            return Some(TxnState::Committed);
        }
        self.states.get(&txn).map(|entry| *entry.value())
    }

    pub fn is_committed(&self, txn: TransactionId) -> bool {
        match self.state(txn) {
            Some(state) => state == TxnState::Committed,
            None => txn.0 < self.evicted_below.load(Ordering::Acquire),
        }
    }

    /// Remove terminal entries older than `horizon`; returns how many were dropped
    pub fn evict_below(&self, horizon: TransactionId) -> usize {
        let before = self.states.len();
        self.states
            .retain(|id, state| *id >= horizon || *state == TxnState::InProgress);
        self.evicted_below.fetch_max(horizon.0, Ordering::AcqRel);
        before.saturating_sub(self.states.len())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Highest transaction id that has declared write intent on each page
#[derive(Debug, Default)]
pub struct WriteConflictTracker {
    writers: DashMap<PageId, TransactionId>,
}

impl WriteConflictTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, page: PageId, txn: TransactionId) {
        self.writers
            .entry(page)
            .and_modify(|writer| {
                if txn > *writer {
                    *writer = txn;
                }
            })
            .or_insert(txn);
    }

    pub fn writer(&self, page: PageId) -> Option<TransactionId> {
        self.writers.get(&page).map(|entry| *entry.value())
    }

    /// A writer newer than `txn` on `page`, if any
    pub fn newer_writer(&self, page: PageId, txn: TransactionId) -> Option<TransactionId> {
        self.writer(page).filter(|writer| *writer > txn)
    }

    /// Forget writers older than `horizon`; they can no longer be newer than any live transaction
    pub fn evict_below(&self, horizon: TransactionId) -> usize {
        let before = self.writers.len();
        self.writers.retain(|_, writer| *writer >= horizon);
        before.saturating_sub(self.writers.len())
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}
