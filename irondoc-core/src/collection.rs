// irondoc-core/src/collection.rs
// Typed document collection over a heap file, a primary index and secondary indexes
//
// FILE STRUCTURE:
// ├── Constructor
// ├── CRUD Operations
// │   ├── insert, find, update, delete
// │   └── insert_in, find_in, update_in, delete_in (caller-owned transaction)
// ├── Scan & Query Operations
// │   ├── scan_all, scan_all_in, scan_index
// │   └── query, query_in
// ├── Index Operations
// │   └── create_index, drop_index, indexes, rebuild_service
// └── Crate Helpers (used by query cursors)

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::document::{Document, DocumentId, FieldValue, Schema};
use crate::error::{IronDocError, Result};
use crate::index::{
    IndexBuild, IndexDefinition, IndexEntry, IndexOptions, IndexRebuildService, IndexRegistry,
    SecondaryIndex,
};
use crate::query::{DocumentCursor, Queryable};
use crate::storage::{
    DocumentSerializer, HeapAddress, HeapFile, OrderedIndex, PageId, PageRead, PagedBTree,
    PagedHeap, ReadSource, StorageEngine, Transaction,
};

struct CollectionInner<T: Document> {
    name: String,
    engine: StorageEngine,
    schema: Schema<T>,
    heap: Arc<dyn HeapFile>,
    primary: Arc<dyn OrderedIndex<DocumentId, HeapAddress>>,
    serializer: Arc<dyn DocumentSerializer<T>>,
    registry: Arc<IndexRegistry<T>>,
    rebuild: IndexRebuildService<T>,
    approximate_count: Arc<AtomicI64>,
    leaf_capacity: usize,
}

/// Handle to one collection. Cloning is cheap; clones share all state.
///
/// Every mutation runs inside one transaction together with its index
/// maintenance, so heap and indexes never disagree in committed state.
pub struct Collection<T: Document> {
    inner: Arc<CollectionInner<T>>,
}

impl<T: Document> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Collection {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Document> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("indexes", &self.inner.registry.fields())
            .finish()
    }
}

impl<T: Document> Collection<T> {
    // ========== CONSTRUCTOR ==========

    /// Bootstrap an empty collection in `engine`
    pub fn create(
        name: impl Into<String>,
        engine: StorageEngine,
        serializer: Arc<dyn DocumentSerializer<T>>,
        config: &StoreConfig,
    ) -> Result<Self> {
        let name = name.into();
        let heap: Arc<dyn HeapFile> =
            Arc::new(PagedHeap::create(&engine, config.heap_page_capacity)?);
        let primary: Arc<dyn OrderedIndex<DocumentId, HeapAddress>> =
            Arc::new(PagedBTree::create(&engine, config.index_leaf_capacity)?);
        let registry = Arc::new(IndexRegistry::new());
        let rebuild = IndexRebuildService::new(
            engine.clone(),
            heap.clone(),
            serializer.clone(),
            registry.clone(),
        );

        debug!(collection = %name, "collection created");
        Ok(Collection {
            inner: Arc::new(CollectionInner {
                name,
                engine,
                schema: T::schema(),
                heap,
                primary,
                serializer,
                registry,
                rebuild,
                approximate_count: Arc::new(AtomicI64::new(0)),
                leaf_capacity: config.index_leaf_capacity,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn schema(&self) -> &Schema<T> {
        &self.inner.schema
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.inner.engine
    }

    /// Advisory document count, adjusted after each committed insert/delete
    pub fn approximate_count(&self) -> i64 {
        self.inner.approximate_count.load(Ordering::Relaxed)
    }

    // ========== CRUD OPERATIONS ==========

    /// Insert `doc`, generating an id when it has none
    pub async fn insert(&self, doc: T) -> Result<DocumentId> {
        let txn = self.inner.engine.begin_transaction().await?;
        match self.insert_in(&txn, doc).await {
            Ok(id) => {
                txn.commit().await?;
                Ok(id)
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    /// Point read of the newest committed version
    pub async fn find(&self, id: DocumentId) -> Result<Option<T>> {
        self.load(&self.inner.engine, id).await
    }

    /// Replace the document stored under `id`; `false` if there is none
    pub async fn update(&self, id: DocumentId, doc: T) -> Result<bool> {
        let txn = self.inner.engine.begin_transaction().await?;
        match self.update_in(&txn, id, doc).await {
            Ok(updated) => {
                txn.commit().await?;
                Ok(updated)
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    /// Remove the document stored under `id`; `false` if there is none
    pub async fn delete(&self, id: DocumentId) -> Result<bool> {
        let txn = self.inner.engine.begin_transaction().await?;
        match self.delete_in(&txn, id).await {
            Ok(deleted) => {
                txn.commit().await?;
                Ok(deleted)
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    /// Stage an insert in `txn`. Nothing is visible until `txn` commits.
    pub async fn insert_in(&self, txn: &Transaction, mut doc: T) -> Result<DocumentId> {
        let id = doc.id().unwrap_or_else(DocumentId::new);
        doc.set_id(id);

        if self.inner.primary.contains(&txn.for_update(), &id).await? {
            return Err(IronDocError::DuplicateKey(format!("document {}", id)));
        }

        let bytes = self.inner.serializer.serialize(&doc)?;
        let address = self.inner.heap.write(txn, &bytes).await?;
        self.inner.primary.insert(txn, id, address).await?;
        for updater in self.inner.registry.updaters() {
            updater.on_insert(txn, id, &doc).await?;
        }

        let counter = self.inner.approximate_count.clone();
        txn.after_commit(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        debug!(collection = %self.inner.name, txn_id = %txn.id(), doc_id = %id, "document inserted");
        Ok(id)
    }

    /// Read through `txn`: its own writes first, then its snapshot
    pub async fn find_in(&self, txn: &Transaction, id: DocumentId) -> Result<Option<T>> {
        self.load(txn, id).await
    }

    pub async fn update_in(&self, txn: &Transaction, id: DocumentId, mut doc: T) -> Result<bool> {
        let view = txn.for_update();
        let Some(address) = self.inner.primary.find(&view, &id).await? else {
            return Ok(false);
        };
        let Some(old_bytes) = self.inner.heap.read(&view, address).await? else {
            return Ok(false);
        };
        let old = self.inner.serializer.deserialize(&old_bytes)?;

        doc.set_id(id);
        let bytes = self.inner.serializer.serialize(&doc)?;
        let new_address = self.inner.heap.update(txn, address, &bytes).await?;
        if new_address != address {
            self.inner.primary.update(txn, id, new_address).await?;
        }
        for updater in self.inner.registry.updaters() {
            updater.on_update(txn, id, &old, &doc).await?;
        }
        debug!(collection = %self.inner.name, txn_id = %txn.id(), doc_id = %id, "document updated");
        Ok(true)
    }

    pub async fn delete_in(&self, txn: &Transaction, id: DocumentId) -> Result<bool> {
        let view = txn.for_update();
        let Some(address) = self.inner.primary.find(&view, &id).await? else {
            return Ok(false);
        };
        let Some(old_bytes) = self.inner.heap.read(&view, address).await? else {
            return Ok(false);
        };
        let old = self.inner.serializer.deserialize(&old_bytes)?;

        for updater in self.inner.registry.updaters() {
            updater.on_delete(txn, id, &old).await?;
        }
        self.inner.primary.delete(txn, &id).await?;
        self.inner.heap.delete(txn, address).await?;

        let counter = self.inner.approximate_count.clone();
        txn.after_commit(move || {
            counter.fetch_sub(1, Ordering::Relaxed);
        });
        debug!(collection = %self.inner.name, txn_id = %txn.id(), doc_id = %id, "document deleted");
        Ok(true)
    }

    // ========== SCAN & QUERY OPERATIONS ==========

    /// Lazily stream every live document of the newest committed state
    pub fn scan_all(&self) -> DocumentCursor<T> {
        DocumentCursor::scan(self.clone(), ReadSource::Latest(self.inner.engine.clone()))
    }

    /// Like [`scan_all`](Self::scan_all), through `txn`'s view
    pub fn scan_all_in(&self, txn: &Transaction) -> DocumentCursor<T> {
        DocumentCursor::scan(self.clone(), ReadSource::Transaction(txn.clone()))
    }

    /// Documents whose `field` lies in `from..=to`, in index order.
    ///
    /// Ids whose document vanished between the index read and the fetch are
    /// skipped. An index whose first build has not committed yet is
    /// `IndexNotFound`.
    pub fn scan_index(
        &self,
        field: &str,
        from: impl Into<FieldValue>,
        to: impl Into<FieldValue>,
    ) -> Result<DocumentCursor<T>> {
        let entry = self
            .inner
            .registry
            .get(field)
            .filter(|entry| entry.build.is_committed())
            .ok_or_else(|| IronDocError::IndexNotFound(field.to_string()))?;
        Ok(DocumentCursor::index_range(
            self.clone(),
            ReadSource::Latest(self.inner.engine.clone()),
            entry.executor,
            from.into(),
            to.into(),
        ))
    }

    /// Query the newest committed state
    pub fn query(&self) -> Queryable<T> {
        Queryable::new(self.clone(), ReadSource::Latest(self.inner.engine.clone()))
    }

    /// Query through `txn`'s view (snapshot-consistent under MVCC)
    pub fn query_in(&self, txn: &Transaction) -> Queryable<T> {
        Queryable::new(self.clone(), ReadSource::Transaction(txn.clone()))
    }

    // ========== INDEX OPERATIONS ==========

    /// Register a secondary index and populate it from the existing documents.
    ///
    /// Writers maintain the index from registration on, but the planner only
    /// uses it for views that see the populating commit. If population fails
    /// (e.g. existing data violates a unique index) the index is unregistered
    /// again and the error returned.
    pub async fn create_index(&self, options: IndexOptions) -> Result<()> {
        let descriptor = self.inner.schema.field(&options.field).ok_or_else(|| {
            IronDocError::InvalidArgument(format!(
                "collection '{}' has no field '{}'",
                self.inner.name, options.field
            ))
        })?;

        let definition = Arc::new(IndexDefinition {
            field: options.field.clone(),
            kind: descriptor.kind,
            unique: options.unique,
            direction: options.direction,
            extractor: descriptor.accessor,
        });
        let index = Arc::new(SecondaryIndex::create(
            &self.inner.engine,
            definition.clone(),
            self.inner.leaf_capacity,
        )?);
        self.inner.registry.register(IndexEntry {
            definition,
            updater: index.clone(),
            executor: index,
            build: Arc::new(IndexBuild::pending()),
        })?;

        match self.inner.rebuild.rebuild_index(&options.field).await {
            Ok(count) => {
                info!(
                    collection = %self.inner.name,
                    field = %options.field,
                    unique = options.unique,
                    documents = count,
                    "index created"
                );
                Ok(())
            }
            Err(err) => {
                self.inner.registry.unregister(&options.field);
                Err(err)
            }
        }
    }

    pub fn drop_index(&self, field: &str) -> Result<()> {
        self.inner
            .registry
            .unregister(field)
            .map(|_| {
                info!(collection = %self.inner.name, field, "index dropped");
            })
            .ok_or_else(|| IronDocError::IndexNotFound(field.to_string()))
    }

    /// Indexed field names, sorted
    pub fn indexes(&self) -> Vec<String> {
        self.inner.registry.fields()
    }

    pub fn rebuild_service(&self) -> &IndexRebuildService<T> {
        &self.inner.rebuild
    }

    // ========== CRATE HELPERS ==========

    pub(crate) fn registry(&self) -> &IndexRegistry<T> {
        &self.inner.registry
    }

    /// Resolve `id` through the primary index and fetch it from the heap
    pub(crate) async fn load(&self, src: &dyn PageRead, id: DocumentId) -> Result<Option<T>> {
        let Some(address) = self.inner.primary.find(src, &id).await? else {
            return Ok(None);
        };
        match self.inner.heap.read(src, address).await? {
            Some(bytes) => Ok(Some(self.inner.serializer.deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn heap_pages(&self, src: &dyn PageRead) -> Result<Vec<PageId>> {
        self.inner.heap.page_ids(src).await
    }

    pub(crate) async fn load_heap_page(&self, src: &dyn PageRead, page: PageId) -> Result<Vec<T>> {
        self.inner
            .heap
            .scan_page(src, page)
            .await?
            .into_iter()
            .map(|(_, bytes)| self.inner.serializer.deserialize(&bytes))
            .collect()
    }
}
