// irondoc-core/src/lib.rs
//! IronDoc: embedded transactional document store.
//!
//! Documents live in a paged heap, addressed through a primary B+-tree on
//! [`DocumentId`] and any number of secondary indexes. Every mutation runs in
//! a transaction under one of three isolation strategies (none, snapshot MVCC,
//! optimistic). Queries are written with a LINQ-style builder and compiled to
//! a full scan, an index point lookup or an index range scan.
//!
//! ```ignore
//! use irondoc_core::{Database, IndexOptions};
//! use irondoc_core::query::field;
//!
//! let db = Database::in_memory()?;
//! let people = db.collection::<Person>("people")?;
//! people.create_index(IndexOptions::new("age").unique()).await?;
//! people.insert(person).await?;
//!
//! let thirty = people.query().filter(field("age").eq(30)).to_list().await?;
//! ```

pub mod collection;
pub mod concurrency;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod index;
pub mod logging;
pub mod query;
pub mod storage;

// Public exports
pub use collection::Collection;
pub use concurrency::{ConcurrencyStrategy, OccRetry};
pub use config::{IsolationLevel, RetryConfig, StoreConfig};
pub use database::Database;
pub use document::{Document, DocumentId, FieldKind, FieldValue, Schema};
pub use error::{IronDocError, Result};
pub use index::{IndexOptions, SortDirection};
pub use logging::{init_logging, init_logging_from_env, LogLevel};
pub use query::{DocumentCursor, QueryPlan, Queryable};
pub use storage::{
    BincodeSerializer, DocumentSerializer, JsonSerializer, Lsn, MaintenanceStats, StorageEngine,
    Transaction, TransactionId, TransactionStatus,
};
