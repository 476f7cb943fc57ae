// src/storage/btree.rs
// Paged B+ tree: one root page with the leaf directory, sorted leaf pages

use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::{Bound, RangeBounds};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{IronDocError, Result};
use crate::storage::engine::StorageEngine;
use crate::storage::transaction::Transaction;
use crate::storage::{PageId, PageRead};

/// Key type storable in a [`PagedBTree`]
pub trait OrderedKey: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> OrderedKey for T where T: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Value type storable in a [`PagedBTree`]
pub trait StoredValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StoredValue for T where T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Ordered key-value index.
///
/// Lookups take any read view; mutations stage pages in a transaction and
/// read what they modify for update.
#[async_trait]
pub trait OrderedIndex<K: OrderedKey, V: StoredValue>: Send + Sync {
    async fn contains(&self, src: &dyn PageRead, key: &K) -> Result<bool> {
        Ok(self.find(src, key).await?.is_some())
    }

    async fn find(&self, src: &dyn PageRead, key: &K) -> Result<Option<V>>;

    /// Fails with `DuplicateKey` when `key` is already present
    async fn insert(&self, txn: &Transaction, key: K, value: V) -> Result<()>;

    /// Replace the value of an existing key; `false` if the key is absent
    async fn update(&self, txn: &Transaction, key: K, value: V) -> Result<bool>;

    async fn delete(&self, txn: &Transaction, key: &K) -> Result<bool>;

    /// Entries within the bounds, ascending by key
    async fn range(&self, src: &dyn PageRead, lower: Bound<K>, upper: Bound<K>)
        -> Result<Vec<(K, V)>>;

    /// Remove every entry
    async fn clear(&self, txn: &Transaction) -> Result<()>;
}

/// Leaf directory entry; the first leaf has no low key
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeafRef<K> {
    low_key: Option<K>,
    page: PageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RootNode<K> {
    leaves: Vec<LeafRef<K>>,
}

impl<K: Ord> RootNode<K> {
    /// Position of the leaf whose key range covers `key`
    fn leaf_for(&self, key: &K) -> usize {
        self.leaves
            .partition_point(|leaf| leaf.low_key.as_ref().map_or(true, |low| low <= key))
            .saturating_sub(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeafNode<K, V> {
    entries: Vec<(K, V)>,
}

impl<K, V> Default for LeafNode<K, V> {
    fn default() -> Self {
        LeafNode {
            entries: Vec::new(),
        }
    }
}

fn decode<T: DeserializeOwned>(page: PageId, data: Option<std::sync::Arc<[u8]>>) -> Result<T> {
    match data {
        Some(bytes) => bincode::deserialize(&bytes)
            .map_err(|e| IronDocError::Corruption(format!("index page {}: {}", page, e))),
        None => Err(IronDocError::Corruption(format!("index page {} is missing", page))),
    }
}

fn past_upper<K: Ord>(key: &K, upper: &Bound<K>) -> bool {
    match upper {
        Bound::Included(limit) => key > limit,
        Bound::Excluded(limit) => key >= limit,
        Bound::Unbounded => false,
    }
}

/// Two-level B+ tree over storage pages
pub struct PagedBTree<K, V> {
    root: PageId,
    leaf_capacity: usize,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Debug for PagedBTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedBTree")
            .field("root", &self.root)
            .field("leaf_capacity", &self.leaf_capacity)
            .finish()
    }
}

impl<K: OrderedKey, V: StoredValue> PagedBTree<K, V> {
    /// Bootstrap an empty tree with one empty leaf
    pub fn create(engine: &StorageEngine, leaf_capacity: usize) -> Result<Self> {
        if leaf_capacity < 2 {
            return Err(IronDocError::InvalidArgument(
                "index leaf capacity must be at least 2".to_string(),
            ));
        }
        let leaf = engine.bootstrap_page(bincode::serialize(&LeafNode::<K, V>::default())?);
        let root = RootNode {
            leaves: vec![LeafRef {
                low_key: None::<K>,
                page: leaf,
            }],
        };
        let root = engine.bootstrap_page(bincode::serialize(&root)?);
        Ok(PagedBTree {
            root,
            leaf_capacity,
            _marker: PhantomData,
        })
    }

    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Number of leaves currently linked from the root
    pub async fn leaf_count(&self, src: &dyn PageRead) -> Result<usize> {
        Ok(self.load_root(src).await?.leaves.len())
    }

    async fn load_root(&self, src: &dyn PageRead) -> Result<RootNode<K>> {
        decode(self.root, src.read_page(self.root).await?)
    }

    async fn load_leaf(&self, src: &dyn PageRead, page: PageId) -> Result<LeafNode<K, V>> {
        decode(page, src.read_page(page).await?)
    }

    fn store<T: Serialize>(&self, txn: &Transaction, page: PageId, node: &T) -> Result<()> {
        txn.write(page, bincode::serialize(node)?)
    }

    /// Root and the covering leaf of `key`, both read for update
    async fn locate_for_update(
        &self,
        txn: &Transaction,
        key: &K,
    ) -> Result<(RootNode<K>, usize, LeafNode<K, V>)> {
        let view = txn.for_update();
        let root = self.load_root(&view).await?;
        let position = root.leaf_for(key);
        let leaf = self.load_leaf(&view, root.leaves[position].page).await?;
        Ok((root, position, leaf))
    }
}

#[async_trait]
impl<K: OrderedKey, V: StoredValue> OrderedIndex<K, V> for PagedBTree<K, V> {
    async fn find(&self, src: &dyn PageRead, key: &K) -> Result<Option<V>> {
        let root = self.load_root(src).await?;
        let leaf = self.load_leaf(src, root.leaves[root.leaf_for(key)].page).await?;
        Ok(leaf
            .entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|pos| leaf.entries[pos].1.clone()))
    }

    async fn insert(&self, txn: &Transaction, key: K, value: V) -> Result<()> {
        let (mut root, position, mut leaf) = self.locate_for_update(txn, &key).await?;
        let leaf_page = root.leaves[position].page;

        let at = match leaf.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(_) => return Err(IronDocError::DuplicateKey(format!("{:?}", key))),
            Err(at) => at,
        };
        leaf.entries.insert(at, (key, value));

        if leaf.entries.len() > self.leaf_capacity {
            let right = LeafNode {
                entries: leaf.entries.split_off(leaf.entries.len() / 2),
            };
            let right_page = txn.engine().allocate_page();
            let low_key = right.entries[0].0.clone();
            self.store(txn, right_page, &right)?;
            root.leaves.insert(
                position + 1,
                LeafRef {
                    low_key: Some(low_key),
                    page: right_page,
                },
            );
            self.store(txn, self.root, &root)?;
            trace!(
                txn_id = %txn.id(),
                leaf = %leaf_page,
                new_leaf = %right_page,
                "index leaf split"
            );
        }
        self.store(txn, leaf_page, &leaf)
    }

    async fn update(&self, txn: &Transaction, key: K, value: V) -> Result<bool> {
        let (root, position, mut leaf) = self.locate_for_update(txn, &key).await?;
        match leaf.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(at) => {
                leaf.entries[at].1 = value;
                self.store(txn, root.leaves[position].page, &leaf)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn delete(&self, txn: &Transaction, key: &K) -> Result<bool> {
        let (root, position, mut leaf) = self.locate_for_update(txn, key).await?;
        match leaf.entries.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(at) => {
                leaf.entries.remove(at);
                self.store(txn, root.leaves[position].page, &leaf)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn range(
        &self,
        src: &dyn PageRead,
        lower: Bound<K>,
        upper: Bound<K>,
    ) -> Result<Vec<(K, V)>> {
        let root = self.load_root(src).await?;
        let start = match &lower {
            Bound::Included(key) | Bound::Excluded(key) => root.leaf_for(key),
            Bound::Unbounded => 0,
        };
        let bounds = (lower, upper);

        let mut out = Vec::new();
        for leaf_ref in &root.leaves[start..] {
            let leaf = self.load_leaf(src, leaf_ref.page).await?;
            for (key, value) in leaf.entries {
                if past_upper(&key, &bounds.1) {
                    return Ok(out);
                }
                if bounds.contains(&key) {
                    out.push((key, value));
                }
            }
        }
        Ok(out)
    }

    async fn clear(&self, txn: &Transaction) -> Result<()> {
        let view = txn.for_update();
        let mut root = self.load_root(&view).await?;
        for leaf_ref in &root.leaves {
            self.store(txn, leaf_ref.page, &LeafNode::<K, V>::default())?;
        }
        root.leaves.truncate(1);
        self.store(txn, self.root, &root)
    }
}
