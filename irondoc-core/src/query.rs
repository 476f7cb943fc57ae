// src/query.rs
//! LINQ-style query surface.
//!
//! A [`Queryable`] records operators; nothing touches storage until a
//! terminal call (`cursor`, `to_list`, `first`, `count`). Execution runs in
//! three stages:
//!
//! ```text
//! operators ──translator──► TranslatedQuery ──planner──► QueryPlan ──cursor──► documents
//!             (expr trees →      (filters, order,         (FullScan |
//!              filter clauses)    skip/take)               IndexPointLookup |
//!                                                          IndexRangeScan)
//! ```
//!
//! Translation errors (`NotSupportedInQuery`) surface before any page is read.
//!
//! ```ignore
//! let adults = people
//!     .query()
//!     .filter(field("age").ge(18))
//!     .order_by(field("age"))
//!     .take(10)
//!     .to_list()
//!     .await?;
//! ```

pub mod cursor;
pub mod expr;
pub mod filter;
pub mod plan;
pub mod planner;
pub mod translator;

use tracing::debug;

use crate::collection::Collection;
use crate::document::Document;
use crate::error::Result;
use crate::storage::ReadSource;

pub use cursor::DocumentCursor;
pub use expr::{field, lit, param, BinaryOp, Expr, IntoExpr};
pub use filter::{ComparisonOp, FilterClause, StringMethod};
pub use plan::{ExecutionSteps, QueryPlan};
pub use planner::QueryPlanner;
pub use translator::{OrderClause, QueryOperator, QueryTranslator, TranslatedQuery};

/// Query under construction against one collection
pub struct Queryable<T: Document> {
    collection: Collection<T>,
    source: ReadSource,
    operators: Vec<QueryOperator>,
}

impl<T: Document> Clone for Queryable<T> {
    fn clone(&self) -> Self {
        Queryable {
            collection: self.collection.clone(),
            source: self.source.clone(),
            operators: self.operators.clone(),
        }
    }
}

impl<T: Document> Queryable<T> {
    pub(crate) fn new(collection: Collection<T>, source: ReadSource) -> Self {
        Queryable {
            collection,
            source,
            operators: Vec::new(),
        }
    }

    fn push(mut self, operator: QueryOperator) -> Self {
        self.operators.push(operator);
        self
    }

    pub fn operators(&self) -> &[QueryOperator] {
        &self.operators
    }

    // ========== OPERATORS ==========

    pub fn filter(self, predicate: Expr) -> Self {
        self.push(QueryOperator::Where(predicate))
    }

    pub fn order_by(self, key: Expr) -> Self {
        self.push(QueryOperator::OrderBy(key))
    }

    pub fn order_by_descending(self, key: Expr) -> Self {
        self.push(QueryOperator::OrderByDescending(key))
    }

    pub fn then_by(self, key: Expr) -> Self {
        self.push(QueryOperator::ThenBy(key))
    }

    pub fn then_by_descending(self, key: Expr) -> Self {
        self.push(QueryOperator::ThenByDescending(key))
    }

    pub fn take(self, count: impl IntoExpr) -> Self {
        self.push(QueryOperator::Take(count.into_expr()))
    }

    pub fn skip(self, count: impl IntoExpr) -> Self {
        self.push(QueryOperator::Skip(count.into_expr()))
    }

    pub fn distinct(self) -> Self {
        self.push(QueryOperator::Distinct)
    }

    /// Projections are not executed in storage; translation rejects them
    pub fn select(self, projection: Expr) -> Self {
        self.push(QueryOperator::Select(projection))
    }

    pub fn join(self, key: Expr) -> Self {
        self.push(QueryOperator::Join(key))
    }

    pub fn group_join(self, key: Expr) -> Self {
        self.push(QueryOperator::GroupJoin(key))
    }

    pub fn group_by(self, key: Expr) -> Self {
        self.push(QueryOperator::GroupBy(key))
    }

    // ========== EXECUTION ==========

    pub fn translate(&self) -> Result<TranslatedQuery> {
        QueryTranslator::new(self.collection.schema()).translate(&self.operators)
    }

    /// The plan this query would run through its read view, without reading storage
    pub fn explain(&self) -> Result<QueryPlan> {
        let translated = self.translate()?;
        Ok(QueryPlanner::new(self.collection.registry())
            .for_source(&self.source)
            .plan(translated))
    }

    pub fn cursor(&self) -> Result<DocumentCursor<T>> {
        let plan = self.explain()?;
        debug!(collection = %self.collection.name(), plan = %plan, "executing query");
        DocumentCursor::from_plan(self.collection.clone(), self.source.clone(), plan)
    }

    pub async fn to_list(&self) -> Result<Vec<T>> {
        self.cursor()?.to_list().await
    }

    pub async fn first(&self) -> Result<Option<T>> {
        self.clone().take(1usize).cursor()?.next().await
    }

    pub async fn count(&self) -> Result<usize> {
        self.cursor()?.count().await
    }
}
