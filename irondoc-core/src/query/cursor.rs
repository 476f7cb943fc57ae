// src/query/cursor.rs
// Lazy, single-pass document stream over a plan's access path

use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;

use ahash::AHashSet;

use crate::collection::Collection;
use crate::document::{Document, DocumentId, FieldValue};
use crate::error::{IronDocError, Result};
use crate::index::{IndexExecutor, SortDirection};
use crate::query::plan::{ExecutionSteps, QueryPlan};
use crate::storage::{PageId, ReadSource};

enum IndexProbe {
    Point(FieldValue),
    Range(Bound<FieldValue>, Bound<FieldValue>),
}

enum Candidates<T> {
    Heap {
        pages: Option<VecDeque<PageId>>,
        buffer: VecDeque<T>,
    },
    Index {
        executor: Arc<dyn IndexExecutor>,
        probe: IndexProbe,
        ids: Option<VecDeque<DocumentId>>,
    },
}

/// Asynchronous document sequence produced by a query or scan.
///
/// Nothing is read until the first [`next`](Self::next). Pages and index
/// entries are fetched on demand unless the plan needs a sort, in which case
/// all matching documents are materialized first.
pub struct DocumentCursor<T: Document> {
    collection: Collection<T>,
    source: ReadSource,
    candidates: Candidates<T>,
    steps: ExecutionSteps,
    sorted: Option<VecDeque<T>>,
    seen: AHashSet<DocumentId>,
    skipped: usize,
    returned: usize,
}

impl<T: Document> DocumentCursor<T> {
    pub(crate) fn scan(collection: Collection<T>, source: ReadSource) -> Self {
        Self::with_steps(
            collection,
            source,
            Candidates::Heap {
                pages: None,
                buffer: VecDeque::new(),
            },
            ExecutionSteps::default(),
        )
    }

    pub(crate) fn index_range(
        collection: Collection<T>,
        source: ReadSource,
        executor: Arc<dyn IndexExecutor>,
        from: FieldValue,
        to: FieldValue,
    ) -> Self {
        Self::with_steps(
            collection,
            source,
            Candidates::Index {
                executor,
                probe: IndexProbe::Range(Bound::Included(from), Bound::Included(to)),
                ids: None,
            },
            ExecutionSteps::default(),
        )
    }

    pub(crate) fn from_plan(collection: Collection<T>, source: ReadSource, plan: QueryPlan) -> Result<Self> {
        let (candidates, steps) = match plan {
            QueryPlan::FullScan { steps } => (
                Candidates::Heap {
                    pages: None,
                    buffer: VecDeque::new(),
                },
                steps,
            ),
            QueryPlan::IndexPointLookup {
                field, key, steps, ..
            } => (
                Candidates::Index {
                    executor: Self::executor(&collection, &field)?,
                    probe: IndexProbe::Point(key),
                    ids: None,
                },
                steps,
            ),
            QueryPlan::IndexRangeScan {
                field,
                lower,
                upper,
                steps,
                ..
            } => (
                Candidates::Index {
                    executor: Self::executor(&collection, &field)?,
                    probe: IndexProbe::Range(lower, upper),
                    ids: None,
                },
                steps,
            ),
        };
        Ok(Self::with_steps(collection, source, candidates, steps))
    }

    fn executor(collection: &Collection<T>, field: &str) -> Result<Arc<dyn IndexExecutor>> {
        collection
            .registry()
            .get(field)
            .map(|entry| entry.executor)
            .ok_or_else(|| IronDocError::IndexNotFound(field.to_string()))
    }

    fn with_steps(
        collection: Collection<T>,
        source: ReadSource,
        candidates: Candidates<T>,
        steps: ExecutionSteps,
    ) -> Self {
        DocumentCursor {
            collection,
            source,
            candidates,
            steps,
            sorted: None,
            seen: AHashSet::new(),
            skipped: 0,
            returned: 0,
        }
    }

    /// Next document, or `None` once the sequence is exhausted
    pub async fn next(&mut self) -> Result<Option<T>> {
        loop {
            if self.steps.take.map_or(false, |take| self.returned >= take) {
                return Ok(None);
            }

            let doc = if self.steps.sort {
                if self.sorted.is_none() {
                    self.sorted = Some(self.materialize_sorted().await?);
                }
                self.sorted.as_mut().and_then(VecDeque::pop_front)
            } else {
                self.next_matching().await?
            };
            let Some(doc) = doc else {
                return Ok(None);
            };

            if self.steps.distinct {
                if let Some(id) = doc.id() {
                    if !self.seen.insert(id) {
                        continue;
                    }
                }
            }
            if self.skipped < self.steps.skip {
                self.skipped += 1;
                continue;
            }
            self.returned += 1;
            return Ok(Some(doc));
        }
    }

    /// Drain the remaining documents
    pub async fn to_list(mut self) -> Result<Vec<T>> {
        let mut docs = Vec::new();
        while let Some(doc) = self.next().await? {
            docs.push(doc);
        }
        Ok(docs)
    }

    pub async fn count(mut self) -> Result<usize> {
        let mut count = 0;
        while self.next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    // ========== PIPELINE ==========

    async fn materialize_sorted(&mut self) -> Result<VecDeque<T>> {
        let mut docs = Vec::new();
        while let Some(doc) = self.next_matching().await? {
            docs.push(doc);
        }

        let schema = self.collection.schema();
        docs.sort_by(|a, b| {
            for clause in &self.steps.order_by {
                let left = schema.value_of(a, &clause.field).unwrap_or(FieldValue::Null);
                let right = schema.value_of(b, &clause.field).unwrap_or(FieldValue::Null);
                let ordering = match clause.direction {
                    SortDirection::Ascending => left.cmp(&right),
                    SortDirection::Descending => right.cmp(&left),
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(docs.into())
    }

    async fn next_matching(&mut self) -> Result<Option<T>> {
        while let Some(doc) = self.next_candidate().await? {
            let keep = match &self.steps.residual {
                Some(residual) => residual.evaluate(&doc, self.collection.schema()),
                None => true,
            };
            if keep {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    async fn next_candidate(&mut self) -> Result<Option<T>> {
        match &mut self.candidates {
            Candidates::Heap { pages, buffer } => {
                if pages.is_none() {
                    *pages = Some(self.collection.heap_pages(&self.source).await?.into());
                }
                loop {
                    if let Some(doc) = buffer.pop_front() {
                        return Ok(Some(doc));
                    }
                    let Some(page) = pages.as_mut().and_then(VecDeque::pop_front) else {
                        return Ok(None);
                    };
                    *buffer = self.collection.load_heap_page(&self.source, page).await?.into();
                }
            }
            Candidates::Index {
                executor,
                probe,
                ids,
            } => {
                if ids.is_none() {
                    let fetched = match probe {
                        IndexProbe::Point(key) => executor.lookup(&self.source, key).await?,
                        IndexProbe::Range(lower, upper) => {
                            executor
                                .scan_range(&self.source, lower.clone(), upper.clone())
                                .await?
                        }
                    };
                    *ids = Some(fetched.into());
                }
                while let Some(id) = ids.as_mut().and_then(VecDeque::pop_front) {
                    // the document may be gone since the index was read
                    if let Some(doc) = self.collection.load(&self.source, id).await? {
                        return Ok(Some(doc));
                    }
                }
                Ok(None)
            }
        }
    }
}
