// src/storage/transaction.rs
//! Transaction handle
//!
//! A transaction stages page writes locally and reads through its snapshot.
//! Nothing it writes is visible to anyone else until `commit` succeeds.
//! Dropping the last handle of a still-active transaction rolls it back, which
//! is how a cancelled (dropped) operation is guaranteed never to commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::concurrency::{ReadSnapshot, TransactionContext};
use crate::error::{IronDocError, Result};
use crate::storage::engine::StorageEngine;
use crate::storage::{Lsn, PageId, PageRead, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
}

type CommitHook = Box<dyn FnOnce() + Send>;

struct TxnLocal {
    status: TransactionStatus,
    dirty_pages: BTreeMap<PageId, Arc<[u8]>>,
    read_set: AHashMap<PageId, u64>,
    after_commit: Vec<CommitHook>,
}

struct TransactionInner {
    id: TransactionId,
    engine: StorageEngine,
    snapshot: ReadSnapshot,
    local: Mutex<TxnLocal>,
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        let local = self.local.get_mut();
        if local.status == TransactionStatus::Active {
            local.status = TransactionStatus::RolledBack;
            local.dirty_pages.clear();
            trace!(txn_id = %self.id, "active transaction dropped, rolling back");
            self.engine.abort_transaction(self.id);
        }
    }
}

/// Cheaply cloneable handle; every clone refers to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, engine: StorageEngine, snapshot: ReadSnapshot) -> Self {
        Transaction {
            inner: Arc::new(TransactionInner {
                id,
                engine,
                snapshot,
                local: Mutex::new(TxnLocal {
                    status: TransactionStatus::Active,
                    dirty_pages: BTreeMap::new(),
                    read_set: AHashMap::new(),
                    after_commit: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.inner.engine
    }

    pub fn snapshot(&self) -> &ReadSnapshot {
        &self.inner.snapshot
    }

    pub fn status(&self) -> TransactionStatus {
        self.inner.local.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// Pages written so far, ascending
    pub fn dirty_pages(&self) -> Vec<PageId> {
        self.inner.local.lock().dirty_pages.keys().copied().collect()
    }

    /// Page -> committed version observed (populated under OCC only)
    pub fn read_set(&self) -> AHashMap<PageId, u64> {
        self.inner.local.lock().read_set.clone()
    }

    fn ensure_active(&self, local: &TxnLocal) -> Result<()> {
        if local.status == TransactionStatus::Active {
            Ok(())
        } else {
            Err(IronDocError::TransactionClosed(self.inner.id))
        }
    }

    // ========== PAGE ACCESS ==========

    /// Own writes first, then the snapshot-visible committed version
    pub fn read(&self, page: PageId) -> Result<Option<Arc<[u8]>>> {
        let mut local = self.inner.local.lock();
        self.ensure_active(&local)?;
        if let Some(data) = local.dirty_pages.get(&page) {
            return Ok(Some(data.clone()));
        }

        let (data, version) = self.inner.engine.read_committed(page, &self.inner.snapshot);
        if let Some(version) = version {
            local.read_set.entry(page).or_insert(version);
        }
        trace!(txn_id = %self.inner.id, page_id = %page, found = data.is_some(), "page read");
        Ok(data)
    }

    /// Read the newest committed version of a page the caller intends to modify.
    ///
    /// Write intent is registered before the read, so validation sees any
    /// newer writer that raced past this read.
    pub fn read_for_update(&self, page: PageId) -> Result<Option<Arc<[u8]>>> {
        let mut local = self.inner.local.lock();
        self.ensure_active(&local)?;
        self.inner.engine.begin_write(self.inner.id, page);
        if let Some(data) = local.dirty_pages.get(&page) {
            return Ok(Some(data.clone()));
        }

        let (data, version) = self.inner.engine.read_for_update(page);
        if let Some(version) = version {
            local.read_set.entry(page).or_insert(version);
        }
        Ok(data)
    }

    /// Stage new content for `page`
    pub fn write(&self, page: PageId, data: Vec<u8>) -> Result<()> {
        let mut local = self.inner.local.lock();
        self.ensure_active(&local)?;
        self.inner.engine.begin_write(self.inner.id, page);
        // a blind write still pins the version it overwrites
        if !local.read_set.contains_key(&page) {
            if let Some(version) = self.inner.engine.observed_version(page) {
                local.read_set.insert(page, version);
            }
        }
        trace!(txn_id = %self.inner.id, page_id = %page, bytes = data.len(), "page staged");
        local.dirty_pages.insert(page, Arc::from(data));
        Ok(())
    }

    /// View whose reads go through [`Transaction::read_for_update`]
    pub fn for_update(&self) -> ForUpdate<'_> {
        ForUpdate { txn: self }
    }

    /// Run `hook` once this transaction has committed successfully
    pub fn after_commit<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.local.lock().after_commit.push(Box::new(hook));
    }

    // ========== TERMINATION ==========

    /// Validate and publish the staged pages.
    ///
    /// A conflict leaves the transaction rolled back. Committing twice is
    /// `TransactionClosed`.
    pub async fn commit(&self) -> Result<Lsn> {
        let mut local = self.inner.local.lock();
        self.ensure_active(&local)?;

        let ctx = TransactionContext {
            transaction_id: self.inner.id,
            dirty_pages: local.dirty_pages.keys().copied().collect(),
            read_set: local.read_set.clone(),
        };
        let result = self.inner.engine.commit_pages(&ctx, &local.dirty_pages);
        local.dirty_pages.clear();
        match result {
            Ok(lsn) => {
                local.status = TransactionStatus::Committed;
                let hooks = std::mem::take(&mut local.after_commit);
                drop(local);
                for hook in hooks {
                    hook();
                }
                Ok(lsn)
            }
            Err(err) => {
                local.status = TransactionStatus::RolledBack;
                local.after_commit.clear();
                Err(err)
            }
        }
    }

    /// Discard staged writes. Rolling back a finished transaction is a no-op.
    pub async fn rollback(&self) -> Result<()> {
        let mut local = self.inner.local.lock();
        if local.status != TransactionStatus::Active {
            return Ok(());
        }
        local.status = TransactionStatus::RolledBack;
        local.dirty_pages.clear();
        local.after_commit.clear();
        drop(local);
        self.inner.engine.abort_transaction(self.inner.id);
        Ok(())
    }
}

#[async_trait]
impl PageRead for Transaction {
    async fn read_page(&self, page: PageId) -> Result<Option<Arc<[u8]>>> {
        self.read(page)
    }
}

/// Borrowed for-update view of a transaction
#[derive(Clone, Copy)]
pub struct ForUpdate<'a> {
    txn: &'a Transaction,
}

impl<'a> ForUpdate<'a> {
    pub fn transaction(&self) -> &'a Transaction {
        self.txn
    }
}

#[async_trait]
impl<'a> PageRead for ForUpdate<'a> {
    async fn read_page(&self, page: PageId) -> Result<Option<Arc<[u8]>>> {
        self.txn.read_for_update(page)
    }
}
