// irondoc-core/src/database.rs
// Database facade: one storage engine, many typed collections

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::collection::Collection;
use crate::concurrency::OccRetry;
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{IronDocError, Result};
use crate::logging::{init_logging, LogLevel};
use crate::storage::{
    DocumentSerializer, JsonSerializer, MaintenanceStats, StorageEngine, Transaction,
};

/// In-memory IronDoc database
///
/// Collections are created on first use and cached by name. A name is bound
/// to the document type it was first opened with.
pub struct Database {
    engine: StorageEngine,
    config: StoreConfig,
    collections: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("isolation", &self.config.isolation)
            .field("collections", &self.list_collections())
            .finish()
    }
}

impl Database {
    /// Open a database with `config`, installing logging if `log_level` is set
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        if let Some(name) = config.log_level.as_deref() {
            init_logging(name.parse::<LogLevel>()?);
        }

        let engine = StorageEngine::with_isolation(config.isolation);
        info!(isolation = ?config.isolation, "database opened");
        Ok(Database {
            engine,
            config,
            collections: RwLock::new(HashMap::new()),
        })
    }

    /// Default configuration (snapshot isolation)
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    // ========== COLLECTIONS ==========

    /// Get or create a JSON-encoded collection
    pub fn collection<T>(&self, name: &str) -> Result<Collection<T>>
    where
        T: Document + Serialize + DeserializeOwned,
    {
        self.collection_with_serializer(name, Arc::new(JsonSerializer))
    }

    /// Get or create a collection using `serializer`.
    ///
    /// The serializer only applies on creation; reopening returns the cached
    /// handle unchanged.
    pub fn collection_with_serializer<T: Document>(
        &self,
        name: &str,
        serializer: Arc<dyn DocumentSerializer<T>>,
    ) -> Result<Collection<T>> {
        if let Some(existing) = self.collections.read().get(name) {
            return Self::downcast(name, existing);
        }

        let mut collections = self.collections.write();
        if let Some(existing) = collections.get(name) {
            return Self::downcast(name, existing);
        }

        let collection = Collection::create(name, self.engine.clone(), serializer, &self.config)?;
        collections.insert(name.to_string(), Arc::new(collection.clone()));
        debug!(collection = name, "collection registered");
        Ok(collection)
    }

    fn downcast<T: Document>(name: &str, handle: &Arc<dyn Any + Send + Sync>) -> Result<Collection<T>> {
        handle
            .downcast_ref::<Collection<T>>()
            .cloned()
            .ok_or_else(|| {
                IronDocError::InvalidArgument(format!(
                    "collection '{}' was opened with a different document type",
                    name
                ))
            })
    }

    /// Collection names, sorted
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ========== TRANSACTIONS ==========

    pub async fn begin_transaction(&self) -> Result<Transaction> {
        self.engine.begin_transaction().await
    }

    /// Retry helper configured from `StoreConfig::retry`
    pub fn retry(&self) -> OccRetry {
        OccRetry::from_config(self.engine.clone(), &self.config.retry)
    }

    /// Evict commit-table/conflict-tracker entries and page versions no live
    /// snapshot can still need
    pub fn run_maintenance(&self) -> MaintenanceStats {
        self.engine.run_maintenance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolationLevel;
    use crate::document::{DocumentId, FieldKind, Schema};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: Option<DocumentId>,
        text: String,
    }

    impl Document for Note {
        fn id(&self) -> Option<DocumentId> {
            self.id
        }

        fn set_id(&mut self, id: DocumentId) {
            self.id = Some(id);
        }

        fn schema() -> Schema<Self> {
            Schema::builder()
                .field("text", FieldKind::String, |n: &Note| n.text.clone().into())
                .build()
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Other {
        id: Option<DocumentId>,
    }

    impl Document for Other {
        fn id(&self) -> Option<DocumentId> {
            self.id
        }

        fn set_id(&mut self, id: DocumentId) {
            self.id = Some(id);
        }

        fn schema() -> Schema<Self> {
            Schema::builder().build()
        }
    }

    #[tokio::test]
    async fn test_collection_handles_are_shared() {
        let db = Database::in_memory().unwrap();
        let first = db.collection::<Note>("notes").unwrap();
        let id = first
            .insert(Note {
                id: None,
                text: "hello".into(),
            })
            .await
            .unwrap();

        let again = db.collection::<Note>("notes").unwrap();
        assert_eq!(again.find(id).await.unwrap().map(|n| n.text), Some("hello".to_string()));
        assert_eq!(db.list_collections(), vec!["notes".to_string()]);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let db = Database::in_memory().unwrap();
        db.collection::<Note>("things").unwrap();
        assert!(matches!(
            db.collection::<Other>("things"),
            Err(IronDocError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_open_validates_config() {
        assert!(Database::open(StoreConfig::new().with_heap_page_capacity(0)).is_err());
        assert!(matches!(
            Database::open(StoreConfig::new().with_log_level("chatty")),
            Err(IronDocError::Config(_))
        ));
        let db = Database::open(StoreConfig::new().with_isolation(IsolationLevel::Optimistic)).unwrap();
        assert_eq!(db.engine().isolation(), IsolationLevel::Optimistic);
        assert_eq!(db.retry().max_retries(), 5);
    }
}
