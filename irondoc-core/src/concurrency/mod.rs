// src/concurrency/mod.rs
//! Pluggable transaction isolation
//!
//! Every strategy answers the same five calls made by the storage engine:
//!
//! ```text
//! begin_transaction ── begin_read(txn) -> ReadSnapshot
//! mutation          ── begin_write(txn, page)
//! commit            ── validate(ctx)   (only place a Conflict is raised)
//!                   ── on_commit(txn, lsn) | on_abort(txn)
//! ```
//!
//! Strategy state (commit table, writer tracker, page versions) is private to
//! the strategy instance owned by one `StorageEngine`.

pub mod commit_table;
pub mod mvcc;
pub mod none;
pub mod occ;
pub mod retry;

use ahash::AHashMap;

use crate::config::IsolationLevel;
use crate::error::Result;
use crate::storage::{Lsn, PageId, TransactionId};

pub use commit_table::{CommitTable, TxnState, WriteConflictTracker};
pub use mvcc::{MvccConcurrencyStrategy, MvccSnapshot};
pub use none::NoIsolationStrategy;
pub use occ::OccConcurrencyStrategy;
pub use retry::OccRetry;

/// What a transaction hands to `validate` at commit time
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub transaction_id: TransactionId,
    /// Pages written by the transaction, ascending
    pub dirty_pages: Vec<PageId>,
    /// Page -> committed version observed at first read (OCC only)
    pub read_set: AHashMap<PageId, u64>,
}

/// Visibility rule a transaction reads under
#[derive(Debug, Clone)]
pub enum ReadSnapshot {
    /// Every committed version is visible; readers see the newest one
    Unbounded,
    Mvcc(MvccSnapshot),
}

impl ReadSnapshot {
    pub fn is_visible(&self, xmin: TransactionId, xmax: TransactionId) -> bool {
        match self {
            ReadSnapshot::Unbounded => true,
            ReadSnapshot::Mvcc(snapshot) => snapshot.is_visible(xmin, xmax),
        }
    }

    pub fn as_mvcc(&self) -> Option<&MvccSnapshot> {
        match self {
            ReadSnapshot::Mvcc(snapshot) => Some(snapshot),
            ReadSnapshot::Unbounded => None,
        }
    }
}

/// The isolation contract.
///
/// Calls are synchronous and never perform I/O; the engine invokes them
/// from inside its begin and commit critical sections.
pub trait ConcurrencyControl: Send + Sync {
    fn begin_read(&self, txn: TransactionId) -> ReadSnapshot;

    fn begin_write(&self, txn: TransactionId, page: PageId);

    /// Succeeds, or fails with `IronDocError::Conflict`
    fn validate(&self, ctx: &TransactionContext) -> Result<()>;

    fn on_commit(&self, txn: TransactionId, lsn: Lsn);

    fn on_abort(&self, txn: TransactionId);
}

/// Tagged strategy selected from [`IsolationLevel`]
#[derive(Debug)]
pub enum ConcurrencyStrategy {
    None(NoIsolationStrategy),
    Mvcc(MvccConcurrencyStrategy),
    Optimistic(OccConcurrencyStrategy),
}

impl ConcurrencyStrategy {
    pub fn from_isolation(level: IsolationLevel) -> Self {
        match level {
            IsolationLevel::None => ConcurrencyStrategy::None(NoIsolationStrategy::new()),
            IsolationLevel::Snapshot => ConcurrencyStrategy::Mvcc(MvccConcurrencyStrategy::new()),
            IsolationLevel::Optimistic => {
                ConcurrencyStrategy::Optimistic(OccConcurrencyStrategy::new())
            }
        }
    }

    pub fn isolation(&self) -> IsolationLevel {
        match self {
            ConcurrencyStrategy::None(_) => IsolationLevel::None,
            ConcurrencyStrategy::Mvcc(_) => IsolationLevel::Snapshot,
            ConcurrencyStrategy::Optimistic(_) => IsolationLevel::Optimistic,
        }
    }

    /// Whether superseded page versions must be retained for older snapshots
    pub fn keeps_history(&self) -> bool {
        matches!(self, ConcurrencyStrategy::Mvcc(_))
    }

    /// Committed version of `page`, tracked only under OCC
    pub fn observed_version(&self, page: PageId) -> Option<u64> {
        match self {
            ConcurrencyStrategy::Optimistic(occ) => Some(occ.version(page)),
            _ => None,
        }
    }

    /// Oldest transaction id any live snapshot may still consult
    pub fn horizon(&self, next_txn: TransactionId) -> TransactionId {
        match self {
            ConcurrencyStrategy::Mvcc(mvcc) => mvcc.horizon(next_txn),
            _ => next_txn,
        }
    }

    /// Evict strategy bookkeeping below `horizon`.
    /// Returns `(commit table entries, tracker entries)` removed.
    pub fn evict_before(&self, horizon: TransactionId) -> (usize, usize) {
        match self {
            ConcurrencyStrategy::Mvcc(mvcc) => mvcc.evict_before(horizon),
            _ => (0, 0),
        }
    }
}

impl ConcurrencyControl for ConcurrencyStrategy {
    fn begin_read(&self, txn: TransactionId) -> ReadSnapshot {
        match self {
            ConcurrencyStrategy::None(s) => s.begin_read(txn),
            ConcurrencyStrategy::Mvcc(s) => s.begin_read(txn),
            ConcurrencyStrategy::Optimistic(s) => s.begin_read(txn),
        }
    }

    fn begin_write(&self, txn: TransactionId, page: PageId) {
        match self {
            ConcurrencyStrategy::None(s) => s.begin_write(txn, page),
            ConcurrencyStrategy::Mvcc(s) => s.begin_write(txn, page),
            ConcurrencyStrategy::Optimistic(s) => s.begin_write(txn, page),
        }
    }

    fn validate(&self, ctx: &TransactionContext) -> Result<()> {
        match self {
            ConcurrencyStrategy::None(s) => s.validate(ctx),
            ConcurrencyStrategy::Mvcc(s) => s.validate(ctx),
            ConcurrencyStrategy::Optimistic(s) => s.validate(ctx),
        }
    }

    fn on_commit(&self, txn: TransactionId, lsn: Lsn) {
        match self {
            ConcurrencyStrategy::None(s) => s.on_commit(txn, lsn),
            ConcurrencyStrategy::Mvcc(s) => s.on_commit(txn, lsn),
            ConcurrencyStrategy::Optimistic(s) => s.on_commit(txn, lsn),
        }
    }

    fn on_abort(&self, txn: TransactionId) {
        match self {
            ConcurrencyStrategy::None(s) => s.on_abort(txn),
            ConcurrencyStrategy::Mvcc(s) => s.on_abort(txn),
            ConcurrencyStrategy::Optimistic(s) => s.on_abort(txn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_from_isolation() {
        for level in [
            IsolationLevel::None,
            IsolationLevel::Snapshot,
            IsolationLevel::Optimistic,
        ] {
            assert_eq!(ConcurrencyStrategy::from_isolation(level).isolation(), level);
        }
    }

    #[test]
    fn test_only_mvcc_keeps_history() {
        assert!(ConcurrencyStrategy::from_isolation(IsolationLevel::Snapshot).keeps_history());
        assert!(!ConcurrencyStrategy::from_isolation(IsolationLevel::None).keeps_history());
        assert!(!ConcurrencyStrategy::from_isolation(IsolationLevel::Optimistic).keeps_history());
    }

    #[test]
    fn test_only_occ_tracks_versions() {
        let occ = ConcurrencyStrategy::from_isolation(IsolationLevel::Optimistic);
        assert_eq!(occ.observed_version(PageId(1)), Some(0));
        let mvcc = ConcurrencyStrategy::from_isolation(IsolationLevel::Snapshot);
        assert_eq!(mvcc.observed_version(PageId(1)), None);
    }

    #[test]
    fn test_unbounded_snapshot_sees_everything() {
        assert!(ReadSnapshot::Unbounded.is_visible(TransactionId(99), TransactionId(100)));
    }
}
