// src/index/registry.rs
// Field name -> index definition, updater and executor

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::document::Document;
use crate::error::{IronDocError, Result};
use crate::index::{IndexDefinition, IndexExecutor, IndexUpdater};
use crate::storage::{ReadSource, TransactionId};

/// Records the transaction whose commit first populated an index.
///
/// An index is registered before it is filled so concurrent writers maintain
/// it, but its pages are empty for any view that cannot see that commit.
#[derive(Debug, Default)]
pub struct IndexBuild {
    committed_by: OnceLock<TransactionId>,
}

impl IndexBuild {
    pub fn pending() -> Self {
        Self::default()
    }

    /// An index that is complete for every view, e.g. one created over no data
    pub fn bootstrap() -> Self {
        let build = Self::default();
        build.mark_committed(TransactionId::BOOTSTRAP);
        build
    }

    /// Later rebuilds keep the first id; views that saw it still see a complete index.
    pub fn mark_committed(&self, txn: TransactionId) {
        let _ = self.committed_by.set(txn);
    }

    pub fn committed_by(&self) -> Option<TransactionId> {
        self.committed_by.get().copied()
    }

    pub fn is_committed(&self) -> bool {
        self.committed_by.get().is_some()
    }

    /// Whether `source` can answer queries from this index
    pub fn is_visible_to(&self, source: &ReadSource) -> bool {
        self.committed_by().map_or(false, |txn| source.sees_commit_of(txn))
    }
}

/// One registered index. The updater and executor are usually the same object.
pub struct IndexEntry<T: Document> {
    pub definition: Arc<IndexDefinition<T>>,
    pub updater: Arc<dyn IndexUpdater<T>>,
    pub executor: Arc<dyn IndexExecutor>,
    pub build: Arc<IndexBuild>,
}

impl<T: Document> Clone for IndexEntry<T> {
    fn clone(&self) -> Self {
        IndexEntry {
            definition: self.definition.clone(),
            updater: self.updater.clone(),
            executor: self.executor.clone(),
            build: self.build.clone(),
        }
    }
}

/// Registry of the secondary indexes of one collection.
///
/// Accessors hand out clones so no lock is held while an index is used.
pub struct IndexRegistry<T: Document> {
    entries: RwLock<BTreeMap<String, IndexEntry<T>>>,
}

impl<T: Document> Default for IndexRegistry<T> {
    fn default() -> Self {
        IndexRegistry {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: Document> IndexRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: IndexEntry<T>) -> Result<()> {
        let mut entries = self.entries.write();
        let field = entry.definition.field.clone();
        if entries.contains_key(&field) {
            return Err(IronDocError::InvalidArgument(format!(
                "an index on '{}' already exists",
                field
            )));
        }
        entries.insert(field, entry);
        Ok(())
    }

    pub fn unregister(&self, field: &str) -> Option<IndexEntry<T>> {
        self.entries.write().remove(field)
    }

    pub fn get(&self, field: &str) -> Option<IndexEntry<T>> {
        self.entries.read().get(field).cloned()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.entries.read().contains_key(field)
    }

    pub fn entries(&self) -> Vec<IndexEntry<T>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<Arc<IndexDefinition<T>>> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.definition.clone())
            .collect()
    }

    pub fn updaters(&self) -> Vec<Arc<dyn IndexUpdater<T>>> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.updater.clone())
            .collect()
    }

    /// Registered field names, sorted
    pub fn fields(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
