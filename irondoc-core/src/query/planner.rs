// src/query/planner.rs
//! Index selection.
//!
//! ```text
//! TranslatedQuery.filters ──flatten ANDs──► conjuncts
//!                                              │
//!            score each indexed comparison:    │  Eq = 3, range = 1, unique +1
//!                                              ▼
//!     none ─► FullScan          Eq ─► IndexPointLookup      range ─► IndexRangeScan
//!                                                                   (all bounds on the field merged)
//!
//!     remaining conjuncts ─► residual predicate
//! ```

use std::cmp::Ordering;
use std::ops::Bound;

use tracing::debug;

use crate::document::{Document, FieldValue};
use crate::index::{IndexEntry, IndexRegistry};
use crate::query::filter::{ComparisonOp, FilterClause};
use crate::query::plan::{ExecutionSteps, QueryPlan};
use crate::query::translator::TranslatedQuery;
use crate::storage::ReadSource;

/// Chooses the access path for a translated query.
///
/// Without a source only indexes whose build has committed are considered;
/// with one, the build must also be visible to that view.
pub struct QueryPlanner<'a, T: Document> {
    registry: &'a IndexRegistry<T>,
    source: Option<&'a ReadSource>,
}

struct Candidate<T: Document> {
    position: usize,
    score: u8,
    entry: IndexEntry<T>,
}

impl<'a, T: Document> QueryPlanner<'a, T> {
    pub fn new(registry: &'a IndexRegistry<T>) -> Self {
        QueryPlanner {
            registry,
            source: None,
        }
    }

    /// Plan for reads through `source`
    pub fn for_source(mut self, source: &'a ReadSource) -> Self {
        self.source = Some(source);
        self
    }

    fn usable(&self, entry: &IndexEntry<T>) -> bool {
        match self.source {
            Some(source) => entry.build.is_visible_to(source),
            None => entry.build.is_committed(),
        }
    }

    pub fn plan(&self, query: TranslatedQuery) -> QueryPlan {
        let mut conjuncts: Vec<FilterClause> = query
            .filters
            .into_iter()
            .flat_map(FilterClause::into_conjuncts)
            .filter(|clause| *clause != FilterClause::Constant(true))
            .collect();

        let mut steps = ExecutionSteps {
            residual: None,
            order_by: query.order_by,
            sort: false,
            skip: query.skip,
            take: query.take,
            distinct: query.distinct,
        };

        let Some(best) = self.best_candidate(&conjuncts) else {
            steps.sort = !steps.order_by.is_empty();
            steps.residual = residual(conjuncts);
            let plan = QueryPlan::FullScan { steps };
            debug!(plan = %plan, "no usable index");
            return plan;
        };

        let definition = best.entry.definition;
        let field = definition.field.clone();

        let plan = match conjuncts.remove(best.position) {
            FilterClause::Comparison {
                op: ComparisonOp::Eq,
                value,
                ..
            } => {
                steps.sort = !steps.order_by.is_empty();
                steps.residual = residual(conjuncts);
                QueryPlan::IndexPointLookup {
                    field,
                    key: value,
                    unique: definition.unique,
                    steps,
                }
            }
            range => {
                // put it back so the merge sees every bound on the field
                conjuncts.insert(best.position, range);
                let (lower, upper) = merge_bounds(&field, &mut conjuncts);
                let direction = definition.direction;
                let ordered_by_index = matches!(
                    steps.order_by.as_slice(),
                    [only] if only.field == field && only.direction == direction
                );
                steps.sort = !steps.order_by.is_empty() && !ordered_by_index;
                steps.residual = residual(conjuncts);
                QueryPlan::IndexRangeScan {
                    field,
                    lower,
                    upper,
                    direction,
                    steps,
                }
            }
        };

        debug!(plan = %plan, "index selected");
        plan
    }

    /// Highest-scoring indexed comparison; the earliest wins ties
    fn best_candidate(&self, conjuncts: &[FilterClause]) -> Option<Candidate<T>> {
        let mut best: Option<Candidate<T>> = None;
        for (position, clause) in conjuncts.iter().enumerate() {
            let FilterClause::Comparison { field, op, .. } = clause else {
                continue;
            };
            if !clause.is_index_satisfiable() {
                continue;
            }
            let Some(entry) = self.registry.get(field).filter(|entry| self.usable(entry)) else {
                continue;
            };

            let shape: u8 = if *op == ComparisonOp::Eq { 3 } else { 1 };
            let score = shape + u8::from(entry.definition.unique);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(Candidate {
                    position,
                    score,
                    entry,
                });
            }
        }
        best
    }
}

/// Remove every range comparison on `field` from `conjuncts` and intersect them.
/// An open lower end becomes `Excluded(Null)` so null keys stay out of the scan.
fn merge_bounds(field: &str, conjuncts: &mut Vec<FilterClause>) -> (Bound<FieldValue>, Bound<FieldValue>) {
    let mut lower = Bound::Unbounded;
    let mut upper = Bound::Unbounded;

    conjuncts.retain(|clause| match clause {
        FilterClause::Comparison { field: f, op, value }
            if f == field && op.is_range() && clause.is_index_satisfiable() =>
        {
            match op {
                ComparisonOp::Gt => lower = tighter_lower(lower.clone(), Bound::Excluded(value.clone())),
                ComparisonOp::Ge => lower = tighter_lower(lower.clone(), Bound::Included(value.clone())),
                ComparisonOp::Lt => upper = tighter_upper(upper.clone(), Bound::Excluded(value.clone())),
                _ => upper = tighter_upper(upper.clone(), Bound::Included(value.clone())),
            }
            false
        }
        _ => true,
    });

    if matches!(lower, Bound::Unbounded) {
        lower = Bound::Excluded(FieldValue::Null);
    }
    (lower, upper)
}

fn bound_value(bound: &Bound<FieldValue>) -> Option<&FieldValue> {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => Some(v),
        Bound::Unbounded => None,
    }
}

fn tighter_lower(current: Bound<FieldValue>, candidate: Bound<FieldValue>) -> Bound<FieldValue> {
    let (Some(a), Some(b)) = (bound_value(&current), bound_value(&candidate)) else {
        return if matches!(current, Bound::Unbounded) { candidate } else { current };
    };
    match a.cmp(b) {
        Ordering::Less => candidate,
        Ordering::Greater => current,
        Ordering::Equal if matches!(candidate, Bound::Excluded(_)) => candidate,
        Ordering::Equal => current,
    }
}

fn tighter_upper(current: Bound<FieldValue>, candidate: Bound<FieldValue>) -> Bound<FieldValue> {
    let (Some(a), Some(b)) = (bound_value(&current), bound_value(&candidate)) else {
        return if matches!(current, Bound::Unbounded) { candidate } else { current };
    };
    match a.cmp(b) {
        Ordering::Greater => candidate,
        Ordering::Less => current,
        Ordering::Equal if matches!(candidate, Bound::Excluded(_)) => candidate,
        Ordering::Equal => current,
    }
}

fn residual(conjuncts: Vec<FilterClause>) -> Option<FilterClause> {
    if conjuncts.is_empty() {
        None
    } else {
        Some(FilterClause::all(conjuncts))
    }
}
