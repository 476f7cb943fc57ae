// src/storage/engine.rs
//! Transactional page storage engine

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::concurrency::{
    ConcurrencyControl, ConcurrencyStrategy, ReadSnapshot, TransactionContext,
};
use crate::config::IsolationLevel;
use crate::error::Result;
use crate::storage::page_store::{PageStore, PageStoreStats};
use crate::storage::transaction::Transaction;
use crate::storage::{Lsn, PageId, PageRead, TransactionId};

/// Result of one [`StorageEngine::run_maintenance`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceStats {
    pub horizon: TransactionId,
    pub commit_entries_evicted: usize,
    pub tracker_entries_evicted: usize,
    pub versions_pruned: usize,
}

struct EngineShared {
    pages: RwLock<PageStore>,
    strategy: ConcurrencyStrategy,
    next_txn_id: AtomicU64,
    next_page_id: AtomicU64,
    next_lsn: AtomicU64,
    begin_lock: Mutex<()>,
    commits: AtomicU64,
    aborts: AtomicU64,
}

/// Shared handle to the page store and its concurrency strategy.
///
/// Cloning is cheap; all clones drive the same store.
#[derive(Clone)]
pub struct StorageEngine {
    shared: Arc<EngineShared>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("isolation", &self.isolation())
            .field("next_txn_id", &self.shared.next_txn_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl StorageEngine {
    pub fn new(strategy: ConcurrencyStrategy) -> Self {
        StorageEngine {
            shared: Arc::new(EngineShared {
                pages: RwLock::new(PageStore::new()),
                strategy,
                next_txn_id: AtomicU64::new(1),
                next_page_id: AtomicU64::new(1),
                next_lsn: AtomicU64::new(1),
                begin_lock: Mutex::new(()),
                commits: AtomicU64::new(0),
                aborts: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_isolation(level: IsolationLevel) -> Self {
        Self::new(ConcurrencyStrategy::from_isolation(level))
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.shared.strategy.isolation()
    }

    pub fn strategy(&self) -> &ConcurrencyStrategy {
        &self.shared.strategy
    }

    // ========== TRANSACTION LIFECYCLE ==========

    /// Open a transaction.
    ///
    /// Id assignment and `begin_read` happen under one lock, so a snapshot
    /// always sees every smaller id either as finished or as in progress.
    pub async fn begin_transaction(&self) -> Result<Transaction> {
        let (id, snapshot) = {
            let _guard = self.shared.begin_lock.lock();
            let id = TransactionId(self.shared.next_txn_id.fetch_add(1, Ordering::SeqCst));
            let snapshot = self.shared.strategy.begin_read(id);
            (id, snapshot)
        };
        debug!(txn_id = %id, isolation = ?self.isolation(), "transaction started");
        Ok(Transaction::new(id, self.clone(), snapshot))
    }

    /// Validate and apply a transaction's dirty pages.
    ///
    /// The page-store write lock is held across validation and apply, so no
    /// reader observes a validated but half-applied commit.
    pub(crate) fn commit_pages(
        &self,
        ctx: &TransactionContext,
        dirty: &BTreeMap<PageId, Arc<[u8]>>,
    ) -> Result<Lsn> {
        let lsn = {
            let mut pages = self.shared.pages.write();
            if let Err(err) = self.shared.strategy.validate(ctx) {
                drop(pages);
                self.abort_transaction(ctx.transaction_id);
                warn!(txn_id = %ctx.transaction_id, error = %err, "commit rejected");
                return Err(err);
            }
            let keep_history = self.shared.strategy.keeps_history();
            for (page, data) in dirty {
                pages.apply(*page, ctx.transaction_id, data.clone(), keep_history);
            }
            Lsn(self.shared.next_lsn.fetch_add(1, Ordering::SeqCst))
        };

        self.shared.strategy.on_commit(ctx.transaction_id, lsn);
        self.shared.commits.fetch_add(1, Ordering::Relaxed);
        debug!(
            txn_id = %ctx.transaction_id,
            lsn = %lsn,
            pages = dirty.len(),
            "transaction committed"
        );
        Ok(lsn)
    }

    pub(crate) fn abort_transaction(&self, txn: TransactionId) {
        self.shared.strategy.on_abort(txn);
        self.shared.aborts.fetch_add(1, Ordering::Relaxed);
        debug!(txn_id = %txn, "transaction aborted");
    }

    // ========== PAGE ACCESS ==========

    /// Reserve a fresh page id. The page exists only once something writes it.
    pub fn allocate_page(&self) -> PageId {
        PageId(self.shared.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocate a page whose initial content is owned by the bootstrap
    /// transaction and therefore visible to every snapshot.
    pub fn bootstrap_page(&self, data: Vec<u8>) -> PageId {
        let page = self.allocate_page();
        self.shared.pages.write().bootstrap(page, Arc::from(data));
        trace!(page_id = %page, "bootstrap page installed");
        page
    }

    pub fn read_latest(&self, page: PageId) -> Option<Arc<[u8]>> {
        self.shared.pages.read().read_latest(page)
    }

    /// Snapshot-aware read used by transactions.
    ///
    /// Returns the content plus, under OCC, the committed version it was read
    /// at. Both come from the same read lock.
    pub(crate) fn read_committed(
        &self,
        page: PageId,
        snapshot: &ReadSnapshot,
    ) -> (Option<Arc<[u8]>>, Option<u64>) {
        let pages = self.shared.pages.read();
        match snapshot {
            ReadSnapshot::Mvcc(mvcc) => (pages.read_visible(page, mvcc), None),
            ReadSnapshot::Unbounded => (
                pages.read_latest(page),
                self.shared.strategy.observed_version(page),
            ),
        }
    }

    /// Newest committed content together with its OCC version
    pub(crate) fn read_for_update(&self, page: PageId) -> (Option<Arc<[u8]>>, Option<u64>) {
        let pages = self.shared.pages.read();
        (
            pages.read_latest(page),
            self.shared.strategy.observed_version(page),
        )
    }

    pub(crate) fn observed_version(&self, page: PageId) -> Option<u64> {
        let _pages = self.shared.pages.read();
        self.shared.strategy.observed_version(page)
    }

    pub(crate) fn begin_write(&self, txn: TransactionId, page: PageId) {
        self.shared.strategy.begin_write(txn, page);
    }

    // ========== MAINTENANCE ==========

    /// Evict strategy bookkeeping and page versions no live snapshot can need.
    ///
    /// Never runs on its own; callers schedule it.
    pub fn run_maintenance(&self) -> MaintenanceStats {
        // no snapshot may open while the horizon is computed and applied
        let _guard = self.shared.begin_lock.lock();
        let next = TransactionId(self.shared.next_txn_id.load(Ordering::SeqCst));
        let horizon = self.shared.strategy.horizon(next);
        let (commit_entries_evicted, tracker_entries_evicted) =
            self.shared.strategy.evict_before(horizon);
        let versions_pruned = if self.shared.strategy.keeps_history() {
            self.shared.pages.write().prune_before(horizon)
        } else {
            0
        };

        let stats = MaintenanceStats {
            horizon,
            commit_entries_evicted,
            tracker_entries_evicted,
            versions_pruned,
        };
        info!(
            horizon = %horizon,
            commit_entries = commit_entries_evicted,
            tracker_entries = tracker_entries_evicted,
            versions = versions_pruned,
            "maintenance pass finished"
        );
        stats
    }

    pub fn stats(&self) -> PageStoreStats {
        let mut stats = self.shared.pages.read().stats();
        stats.commits = self.shared.commits.load(Ordering::Relaxed);
        stats.aborts = self.shared.aborts.load(Ordering::Relaxed);
        stats
    }

    pub fn version_count(&self, page: PageId) -> usize {
        self.shared.pages.read().version_count(page)
    }
}

#[async_trait]
impl PageRead for StorageEngine {
    async fn read_page(&self, page: PageId) -> Result<Option<Arc<[u8]>>> {
        Ok(self.read_latest(page))
    }
}
