// src/index/mod.rs
// Secondary indexes: definitions, maintenance hooks and lookups

pub mod rebuild;
pub mod registry;

use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::document::{Document, DocumentId, FieldAccessor, FieldKind, FieldValue};
use crate::error::{IronDocError, Result};
use crate::storage::{OrderedIndex, PageRead, PagedBTree, StorageEngine, Transaction};

pub use rebuild::IndexRebuildService;
pub use registry::{IndexBuild, IndexEntry, IndexRegistry};

/// Sort direction for indexes and order-by clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl Default for SortDirection {
    fn default() -> Self {
        SortDirection::Ascending
    }
}

/// Immutable description of a registered index
pub struct IndexDefinition<T> {
    pub field: String,
    pub kind: FieldKind,
    pub unique: bool,
    pub direction: SortDirection,
    pub extractor: FieldAccessor<T>,
}

impl<T> IndexDefinition<T> {
    pub fn key_of(&self, doc: &T) -> FieldValue {
        (self.extractor)(doc)
    }
}

impl<T> std::fmt::Debug for IndexDefinition<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDefinition")
            .field("field", &self.field)
            .field("kind", &self.kind)
            .field("unique", &self.unique)
            .field("direction", &self.direction)
            .finish()
    }
}

/// What a caller asks for; resolved against the schema by `Collection::create_index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    pub field: String,
    pub unique: bool,
    pub direction: SortDirection,
}

impl IndexOptions {
    pub fn new(field: impl Into<String>) -> Self {
        IndexOptions {
            field: field.into(),
            unique: false,
            direction: SortDirection::Ascending,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn descending(mut self) -> Self {
        self.direction = SortDirection::Descending;
        self
    }

    pub fn with_direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// Keeps an index in step with collection mutations
#[async_trait]
pub trait IndexUpdater<T: Document>: Send + Sync {
    async fn on_insert(&self, txn: &Transaction, id: DocumentId, doc: &T) -> Result<()>;

    async fn on_update(&self, txn: &Transaction, id: DocumentId, old: &T, new: &T) -> Result<()>;

    async fn on_delete(&self, txn: &Transaction, id: DocumentId, doc: &T) -> Result<()>;

    /// Drop every entry, ahead of a rebuild
    async fn reset(&self, txn: &Transaction) -> Result<()>;
}

/// Answers point and range lookups with document ids, in index order
#[async_trait]
pub trait IndexExecutor: Send + Sync {
    async fn lookup(&self, src: &dyn PageRead, key: &FieldValue) -> Result<Vec<DocumentId>>;

    async fn scan_range(
        &self,
        src: &dyn PageRead,
        lower: Bound<FieldValue>,
        upper: Bound<FieldValue>,
    ) -> Result<Vec<DocumentId>>;
}

type CompositeKey = (FieldValue, DocumentId);

/// Secondary index stored as `(key, id) -> ()` so equal keys coexist
pub struct SecondaryIndex<T> {
    definition: Arc<IndexDefinition<T>>,
    tree: PagedBTree<CompositeKey, ()>,
}

impl<T: Document> SecondaryIndex<T> {
    pub fn create(
        engine: &StorageEngine,
        definition: Arc<IndexDefinition<T>>,
        leaf_capacity: usize,
    ) -> Result<Self> {
        Ok(SecondaryIndex {
            definition,
            tree: PagedBTree::create(engine, leaf_capacity)?,
        })
    }

    pub fn definition(&self) -> &Arc<IndexDefinition<T>> {
        &self.definition
    }

    fn lower_key(bound: Bound<FieldValue>) -> Bound<CompositeKey> {
        match bound {
            Bound::Included(v) => Bound::Included((v, DocumentId::MIN)),
            Bound::Excluded(v) => Bound::Excluded((v, DocumentId::MAX)),
            Bound::Unbounded => Bound::Unbounded,
        }
    }

    fn upper_key(bound: Bound<FieldValue>) -> Bound<CompositeKey> {
        match bound {
            Bound::Included(v) => Bound::Included((v, DocumentId::MAX)),
            Bound::Excluded(v) => Bound::Excluded((v, DocumentId::MIN)),
            Bound::Unbounded => Bound::Unbounded,
        }
    }

    async fn ids_between(
        &self,
        src: &dyn PageRead,
        lower: Bound<FieldValue>,
        upper: Bound<FieldValue>,
    ) -> Result<Vec<DocumentId>> {
        let entries = self
            .tree
            .range(src, Self::lower_key(lower), Self::upper_key(upper))
            .await?;
        let mut ids: Vec<DocumentId> = entries.into_iter().map(|((_, id), _)| id).collect();
        if self.definition.direction == SortDirection::Descending {
            ids.reverse();
        }
        Ok(ids)
    }

    /// Insert `(key, id)`, enforcing uniqueness against the newest committed state
    async fn add(&self, txn: &Transaction, id: DocumentId, key: FieldValue) -> Result<()> {
        if self.definition.unique && !key.is_null() {
            let holders = self
                .tree
                .range(
                    &txn.for_update(),
                    Bound::Included((key.clone(), DocumentId::MIN)),
                    Bound::Included((key.clone(), DocumentId::MAX)),
                )
                .await?;
            if holders.iter().any(|((_, holder), _)| *holder != id) {
                return Err(IronDocError::DuplicateKey(format!(
                    "{} = {}",
                    self.definition.field, key
                )));
            }
        }
        self.tree.insert(txn, (key, id), ()).await
    }
}

#[async_trait]
impl<T: Document> IndexUpdater<T> for SecondaryIndex<T> {
    async fn on_insert(&self, txn: &Transaction, id: DocumentId, doc: &T) -> Result<()> {
        let key = self.definition.key_of(doc);
        trace!(txn_id = %txn.id(), field = %self.definition.field, key = %key, "index insert");
        self.add(txn, id, key).await
    }

    async fn on_update(&self, txn: &Transaction, id: DocumentId, old: &T, new: &T) -> Result<()> {
        let old_key = self.definition.key_of(old);
        let new_key = self.definition.key_of(new);
        if old_key == new_key {
            return Ok(());
        }
        self.tree.delete(txn, &(old_key, id)).await?;
        self.add(txn, id, new_key).await
    }

    async fn on_delete(&self, txn: &Transaction, id: DocumentId, doc: &T) -> Result<()> {
        let key = self.definition.key_of(doc);
        self.tree.delete(txn, &(key, id)).await?;
        Ok(())
    }

    async fn reset(&self, txn: &Transaction) -> Result<()> {
        self.tree.clear(txn).await
    }
}

#[async_trait]
impl<T: Document> IndexExecutor for SecondaryIndex<T> {
    async fn lookup(&self, src: &dyn PageRead, key: &FieldValue) -> Result<Vec<DocumentId>> {
        self.ids_between(src, Bound::Included(key.clone()), Bound::Included(key.clone()))
            .await
    }

    async fn scan_range(
        &self,
        src: &dyn PageRead,
        lower: Bound<FieldValue>,
        upper: Bound<FieldValue>,
    ) -> Result<Vec<DocumentId>> {
        self.ids_between(src, lower, upper).await
    }
}
