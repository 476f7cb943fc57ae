// src/index/rebuild.rs
// Rebuild secondary indexes from a full heap scan

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::document::Document;
use crate::error::{IronDocError, Result};
use crate::index::{IndexEntry, IndexRegistry};
use crate::storage::{DocumentSerializer, HeapFile, StorageEngine, Transaction};

/// Replays every live heap record into an index's updater.
///
/// Each rebuild runs in its own transaction: the index is reset and refilled
/// atomically, and a failure leaves the previous contents in place.
pub struct IndexRebuildService<T: Document> {
    engine: StorageEngine,
    heap: Arc<dyn HeapFile>,
    serializer: Arc<dyn DocumentSerializer<T>>,
    registry: Arc<IndexRegistry<T>>,
    progress: Arc<AtomicU64>,
}

impl<T: Document> Clone for IndexRebuildService<T> {
    fn clone(&self) -> Self {
        IndexRebuildService {
            engine: self.engine.clone(),
            heap: self.heap.clone(),
            serializer: self.serializer.clone(),
            registry: self.registry.clone(),
            progress: self.progress.clone(),
        }
    }
}

impl<T: Document> IndexRebuildService<T> {
    pub fn new(
        engine: StorageEngine,
        heap: Arc<dyn HeapFile>,
        serializer: Arc<dyn DocumentSerializer<T>>,
        registry: Arc<IndexRegistry<T>>,
    ) -> Self {
        IndexRebuildService {
            engine,
            heap,
            serializer,
            registry,
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Documents replayed by the current or most recent rebuild call
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    /// Rebuild one index; returns the number of documents indexed
    pub async fn rebuild_index(&self, field: &str) -> Result<u64> {
        let entry = self
            .registry
            .get(field)
            .ok_or_else(|| IronDocError::IndexNotFound(field.to_string()))?;
        self.progress.store(0, Ordering::Relaxed);
        self.rebuild_entry(&entry).await
    }

    /// Rebuild every registered index, one after another
    pub async fn rebuild_all(&self) -> Result<u64> {
        self.progress.store(0, Ordering::Relaxed);
        let mut total = 0;
        for entry in self.registry.entries() {
            total += self.rebuild_entry(&entry).await?;
        }
        Ok(total)
    }

    async fn rebuild_entry(&self, entry: &IndexEntry<T>) -> Result<u64> {
        let txn = self.engine.begin_transaction().await?;
        match self.replay(&txn, entry).await {
            Ok(count) => {
                let build = entry.build.clone();
                let build_txn = txn.id();
                txn.after_commit(move || build.mark_committed(build_txn));
                txn.commit().await?;
                info!(
                    field = %entry.definition.field,
                    documents = count,
                    "index rebuilt"
                );
                Ok(count)
            }
            Err(err) => {
                txn.rollback().await?;
                warn!(field = %entry.definition.field, error = %err, "index rebuild failed");
                Err(err)
            }
        }
    }

    async fn replay(&self, txn: &Transaction, entry: &IndexEntry<T>) -> Result<u64> {
        entry.updater.reset(txn).await?;

        let view = txn.for_update();
        let mut count = 0;
        for page in self.heap.page_ids(&view).await? {
            for (address, bytes) in self.heap.scan_page(&view, page).await? {
                let doc = self.serializer.deserialize(&bytes)?;
                let id = doc.id().ok_or_else(|| {
                    IronDocError::Corruption(format!("heap record {} has no id", address))
                })?;
                entry.updater.on_insert(txn, id, &doc).await?;
                count += 1;
                self.progress.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(count)
    }
}
