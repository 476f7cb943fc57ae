// src/storage/page_store.rs
//! Committed page versions
//!
//! Each page maps to a chain of versions, oldest first. A version records the
//! transaction that created it (`xmin`) and the one that superseded it
//! (`xmax`, `0` while it is the newest). Snapshot isolation keeps the whole
//! chain until maintenance prunes it; the other strategies keep one version.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::concurrency::MvccSnapshot;
use crate::storage::{PageId, TransactionId};

/// One committed version of a page
#[derive(Debug, Clone)]
pub struct PageVersion {
    pub xmin: TransactionId,
    pub xmax: TransactionId,
    pub data: Arc<[u8]>,
}

/// Counters exposed through `StorageEngine::stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStoreStats {
    pub pages: usize,
    pub versions: usize,
    pub page_reads: u64,
    pub page_writes: u64,
    pub commits: u64,
    pub aborts: u64,
}

#[derive(Debug, Default)]
pub struct PageStore {
    pages: HashMap<PageId, Vec<PageVersion>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the initial content of a new page, owned by the bootstrap transaction
    pub fn bootstrap(&mut self, page: PageId, data: Arc<[u8]>) {
        self.pages.insert(
            page,
            vec![PageVersion {
                xmin: TransactionId::BOOTSTRAP,
                xmax: TransactionId::BOOTSTRAP,
                data,
            }],
        );
    }

    /// Newest committed content of `page`
    pub fn read_latest(&self, page: PageId) -> Option<Arc<[u8]>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.pages
            .get(&page)
            .and_then(|chain| chain.last())
            .map(|version| version.data.clone())
    }

    /// Newest version of `page` visible to `snapshot`
    pub fn read_visible(&self, page: PageId, snapshot: &MvccSnapshot) -> Option<Arc<[u8]>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.pages.get(&page).and_then(|chain| {
            chain
                .iter()
                .rev()
                .find(|version| snapshot.is_visible(version.xmin, version.xmax))
                .map(|version| version.data.clone())
        })
    }

    /// Append a committed version written by `writer`.
    ///
    /// With `keep_history` the previous newest version is stamped with
    /// `xmax = writer` and retained; otherwise it is replaced.
    pub fn apply(&mut self, page: PageId, writer: TransactionId, data: Arc<[u8]>, keep_history: bool) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let version = PageVersion {
            xmin: writer,
            xmax: TransactionId::BOOTSTRAP,
            data,
        };
        let chain = self.pages.entry(page).or_default();
        if keep_history {
            if let Some(previous) = chain.last_mut() {
                previous.xmax = writer;
            }
            chain.push(version);
        } else {
            chain.clear();
            chain.push(version);
        }
    }

    /// Drop superseded versions whose superseding transaction is older than `horizon`.
    /// Returns the number of versions removed.
    pub fn prune_before(&mut self, horizon: TransactionId) -> usize {
        let mut pruned = 0;
        for chain in self.pages.values_mut() {
            let before = chain.len();
            chain.retain(|version| version.xmax.is_bootstrap() || version.xmax >= horizon);
            pruned += before - chain.len();
        }
        pruned
    }

    pub fn contains(&self, page: PageId) -> bool {
        self.pages.contains_key(&page)
    }

    pub fn version_count(&self, page: PageId) -> usize {
        self.pages.get(&page).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> PageStoreStats {
        PageStoreStats {
            pages: self.pages.len(),
            versions: self.pages.values().map(Vec::len).sum(),
            page_reads: self.reads.load(Ordering::Relaxed),
            page_writes: self.writes.load(Ordering::Relaxed),
            commits: 0,
            aborts: 0,
        }
    }
}
