// src/storage/mod.rs
//! Page-oriented in-memory storage backend
//!
//! Everything the collection layer persists lives in fixed-identity pages
//! whose committed versions are kept by the [`PageStore`]. Pages are only
//! changed through a [`Transaction`], which stages writes locally and hands
//! them to the active concurrency strategy at commit.
//!
//! # Architecture
//!
//! ```text
//! StorageEngine (begin / commit / abort / maintenance)
//!   ├── PageStore        page id -> committed versions {xmin, xmax, data}
//!   ├── ConcurrencyStrategy (None | Mvcc | Optimistic)
//!   └── Transaction      dirty pages + read-set, cheap Clone handle
//!
//! PagedHeap  (HeapFile)            variable-length records on slotted pages
//! PagedBTree (OrderedIndex<K, V>)  root page + sorted leaf pages
//! ```

pub mod btree;
pub mod engine;
pub mod heap;
pub mod page_store;
pub mod serializer;
pub mod transaction;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use btree::{OrderedIndex, OrderedKey, PagedBTree, StoredValue};
pub use engine::{MaintenanceStats, StorageEngine};
pub use heap::{HeapAddress, HeapFile, PagedHeap};
pub use page_store::{PageStore, PageStoreStats, PageVersion};
pub use serializer::{BincodeSerializer, DocumentSerializer, JsonSerializer};
pub use transaction::{ForUpdate, Transaction, TransactionStatus};

/// Identity of a storage page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u64);

/// Log sequence number assigned to each successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lsn(pub u64);

/// Monotonically assigned transaction identifier.
///
/// Id 0 is the bootstrap owner of freshly created structures and is
/// treated as committed by every snapshot.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub const BOOTSTRAP: TransactionId = TransactionId(0);

    pub fn is_bootstrap(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read access to pages through some view of the store.
///
/// Heap and index lookups are written against this trait so the same code
/// serves latest-committed reads, snapshot reads inside a transaction, and
/// for-update reads during mutations.
#[async_trait]
pub trait PageRead: Send + Sync {
    /// Returns `None` when the page does not exist in this view
    async fn read_page(&self, page: PageId) -> Result<Option<Arc<[u8]>>>;
}

/// Owned read view used by cursors, which outlive the call that created them
#[derive(Clone)]
pub enum ReadSource {
    /// Newest committed state, no transaction
    Latest(StorageEngine),
    /// The transaction's own view (own writes, then its snapshot)
    Transaction(Transaction),
}

impl ReadSource {
    /// Whether work committed by `txn` is part of this view.
    ///
    /// A transaction needs both a snapshot that counts `txn` as committed and
    /// to have begun after it, so none of its own writes predate that commit.
    pub fn sees_commit_of(&self, txn: TransactionId) -> bool {
        match self {
            ReadSource::Latest(_) => true,
            ReadSource::Transaction(reader) => {
                txn.is_bootstrap()
                    || (reader.id() > txn
                        && reader.snapshot().is_visible(txn, TransactionId::BOOTSTRAP))
            }
        }
    }
}

#[async_trait]
impl PageRead for ReadSource {
    async fn read_page(&self, page: PageId) -> Result<Option<Arc<[u8]>>> {
        match self {
            ReadSource::Latest(engine) => engine.read_page(page).await,
            ReadSource::Transaction(txn) => txn.read_page(page).await,
        }
    }
}
