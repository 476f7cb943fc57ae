// src/storage/heap.rs
//! Heap file of variable-length records
//!
//! ```text
//! directory page  HeapDirectory { pages: [p1, p2, ...] }
//! data page       HeapPage { slots: [Some(bytes), None, Some(bytes), ...] }
//! ```
//!
//! A record is addressed by `(page, slot)`. Slots of deleted records stay
//! empty forever, so an address never silently points at a different record.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{IronDocError, Result};
use crate::storage::engine::StorageEngine;
use crate::storage::transaction::Transaction;
use crate::storage::{PageId, PageRead};

/// Locator of one heap record. `Option<HeapAddress>::None` is the null address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapAddress {
    pub page: PageId,
    pub slot: u32,
}

impl std::fmt::Display for HeapAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page, self.slot)
    }
}

/// Byte-record store independent of any index.
///
/// Mutations stage pages in the given transaction; reads go through any
/// [`PageRead`] view.
#[async_trait]
pub trait HeapFile: Send + Sync {
    async fn write(&self, txn: &Transaction, bytes: &[u8]) -> Result<HeapAddress>;

    /// `None` when the slot is empty or the page is not visible in `src`
    async fn read(&self, src: &dyn PageRead, address: HeapAddress) -> Result<Option<Vec<u8>>>;

    /// Replace a record. The returned address differs from `address` when the
    /// record had to move to another page.
    async fn update(&self, txn: &Transaction, address: HeapAddress, bytes: &[u8])
        -> Result<HeapAddress>;

    async fn delete(&self, txn: &Transaction, address: HeapAddress) -> Result<bool>;

    /// Data pages in allocation order
    async fn page_ids(&self, src: &dyn PageRead) -> Result<Vec<PageId>>;

    /// Live records of one data page
    async fn scan_page(&self, src: &dyn PageRead, page: PageId)
        -> Result<Vec<(HeapAddress, Vec<u8>)>>;

    /// Every live record
    async fn scan_all(&self, src: &dyn PageRead) -> Result<Vec<(HeapAddress, Vec<u8>)>> {
        let mut records = Vec::new();
        for page in self.page_ids(src).await? {
            records.extend(self.scan_page(src, page).await?);
        }
        Ok(records)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HeapDirectory {
    pages: Vec<PageId>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HeapPage {
    slots: Vec<Option<Vec<u8>>>,
}

impl HeapPage {
    fn used_bytes(&self) -> usize {
        self.slots.iter().flatten().map(Vec::len).sum()
    }
}

fn decode<T: for<'de> Deserialize<'de>>(page: PageId, data: &[u8]) -> Result<T> {
    bincode::deserialize(data)
        .map_err(|e| IronDocError::Corruption(format!("heap page {}: {}", page, e)))
}

/// [`HeapFile`] over slotted pages with a fixed payload budget
#[derive(Debug, Clone)]
pub struct PagedHeap {
    directory: PageId,
    capacity: usize,
}

impl PagedHeap {
    /// Bootstrap an empty heap; `capacity` is the payload budget per page
    pub fn create(engine: &StorageEngine, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(IronDocError::InvalidArgument(
                "heap page capacity must be greater than zero".to_string(),
            ));
        }
        let directory = engine.bootstrap_page(bincode::serialize(&HeapDirectory::default())?);
        Ok(PagedHeap {
            directory,
            capacity,
        })
    }

    pub fn directory_page(&self) -> PageId {
        self.directory
    }

    fn fits(&self, page: &HeapPage, extra: usize) -> bool {
        page.used_bytes() + extra <= self.capacity
    }

    fn load_page(&self, data: Option<Arc<[u8]>>, page: PageId) -> Result<HeapPage> {
        match data {
            Some(bytes) => decode(page, &bytes),
            None => Err(IronDocError::Corruption(format!("heap page {} is missing", page))),
        }
    }

    fn store_page(&self, txn: &Transaction, page: PageId, content: &HeapPage) -> Result<()> {
        txn.write(page, bincode::serialize(content)?)
    }

    /// Append to a brand-new page and link it into the directory
    fn write_to_new_page(&self, txn: &Transaction, bytes: &[u8]) -> Result<HeapAddress> {
        let mut directory: HeapDirectory = match txn.read_for_update(self.directory)? {
            Some(data) => decode(self.directory, &data)?,
            None => return Err(IronDocError::Corruption("heap directory is missing".into())),
        };
        let page = txn.engine().allocate_page();
        let content = HeapPage {
            slots: vec![Some(bytes.to_vec())],
        };
        self.store_page(txn, page, &content)?;
        directory.pages.push(page);
        txn.write(self.directory, bincode::serialize(&directory)?)?;
        trace!(txn_id = %txn.id(), page_id = %page, "heap page appended");
        Ok(HeapAddress { page, slot: 0 })
    }
}

#[async_trait]
impl HeapFile for PagedHeap {
    async fn write(&self, txn: &Transaction, bytes: &[u8]) -> Result<HeapAddress> {
        let directory: HeapDirectory = match txn.read(self.directory)? {
            Some(data) => decode(self.directory, &data)?,
            None => return Err(IronDocError::Corruption("heap directory is missing".into())),
        };

        if let Some(last) = directory.pages.last().copied() {
            let mut content = self.load_page(txn.read_for_update(last)?, last)?;
            if self.fits(&content, bytes.len()) {
                let slot = content.slots.len() as u32;
                content.slots.push(Some(bytes.to_vec()));
                self.store_page(txn, last, &content)?;
                return Ok(HeapAddress { page: last, slot });
            }
        }
        self.write_to_new_page(txn, bytes)
    }

    async fn read(&self, src: &dyn PageRead, address: HeapAddress) -> Result<Option<Vec<u8>>> {
        let Some(data) = src.read_page(address.page).await? else {
            return Ok(None);
        };
        let content: HeapPage = decode(address.page, &data)?;
        Ok(content
            .slots
            .get(address.slot as usize)
            .and_then(|slot| slot.clone()))
    }

    async fn update(
        &self,
        txn: &Transaction,
        address: HeapAddress,
        bytes: &[u8],
    ) -> Result<HeapAddress> {
        let mut content = self.load_page(txn.read_for_update(address.page)?, address.page)?;
        let old_len = match content.slots.get(address.slot as usize) {
            Some(Some(record)) => record.len(),
            _ => {
                return Err(IronDocError::Corruption(format!(
                    "no heap record at {}",
                    address
                )))
            }
        };

        let remaining = content.used_bytes() - old_len;
        if remaining + bytes.len() <= self.capacity || remaining == 0 {
            content.slots[address.slot as usize] = Some(bytes.to_vec());
            self.store_page(txn, address.page, &content)?;
            return Ok(address);
        }

        content.slots[address.slot as usize] = None;
        self.store_page(txn, address.page, &content)?;
        let relocated = self.write(txn, bytes).await?;
        trace!(txn_id = %txn.id(), from = %address, to = %relocated, "heap record relocated");
        Ok(relocated)
    }

    async fn delete(&self, txn: &Transaction, address: HeapAddress) -> Result<bool> {
        let Some(data) = txn.read_for_update(address.page)? else {
            return Ok(false);
        };
        let mut content: HeapPage = decode(address.page, &data)?;
        match content.slots.get_mut(address.slot as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.store_page(txn, address.page, &content)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn page_ids(&self, src: &dyn PageRead) -> Result<Vec<PageId>> {
        match src.read_page(self.directory).await? {
            Some(data) => Ok(decode::<HeapDirectory>(self.directory, &data)?.pages),
            None => Ok(Vec::new()),
        }
    }

    async fn scan_page(
        &self,
        src: &dyn PageRead,
        page: PageId,
    ) -> Result<Vec<(HeapAddress, Vec<u8>)>> {
        let Some(data) = src.read_page(page).await? else {
            return Ok(Vec::new());
        };
        let content: HeapPage = decode(page, &data)?;
        Ok(content
            .slots
            .into_iter()
            .enumerate()
            .filter_map(|(slot, record)| {
                record.map(|bytes| {
                    (
                        HeapAddress {
                            page,
                            slot: slot as u32,
                        },
                        bytes,
                    )
                })
            })
            .collect())
    }
}
