// src/query/plan.rs
// Execution plans chosen by the planner

use std::fmt;
use std::ops::Bound;

use crate::document::FieldValue;
use crate::index::SortDirection;
use crate::query::filter::FilterClause;
use crate::query::translator::OrderClause;

/// Work applied to candidate documents after the access path produced them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSteps {
    /// Filters the access path does not already guarantee
    pub residual: Option<FilterClause>,
    pub order_by: Vec<OrderClause>,
    /// Materialize and sort by `order_by` before paging
    pub sort: bool,
    pub skip: usize,
    pub take: Option<usize>,
    pub distinct: bool,
}

/// How a query reaches its candidate documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    FullScan {
        steps: ExecutionSteps,
    },
    IndexPointLookup {
        field: String,
        key: FieldValue,
        unique: bool,
        steps: ExecutionSteps,
    },
    IndexRangeScan {
        field: String,
        lower: Bound<FieldValue>,
        upper: Bound<FieldValue>,
        direction: SortDirection,
        steps: ExecutionSteps,
    },
}

impl QueryPlan {
    pub fn steps(&self) -> &ExecutionSteps {
        match self {
            QueryPlan::FullScan { steps }
            | QueryPlan::IndexPointLookup { steps, .. }
            | QueryPlan::IndexRangeScan { steps, .. } => steps,
        }
    }

    /// Field of the index the plan reads, if any
    pub fn index_field(&self) -> Option<&str> {
        match self {
            QueryPlan::FullScan { .. } => None,
            QueryPlan::IndexPointLookup { field, .. } | QueryPlan::IndexRangeScan { field, .. } => {
                Some(field)
            }
        }
    }

    pub fn is_full_scan(&self) -> bool {
        matches!(self, QueryPlan::FullScan { .. })
    }

    pub fn is_point_lookup(&self) -> bool {
        matches!(self, QueryPlan::IndexPointLookup { .. })
    }

    pub fn is_range_scan(&self) -> bool {
        matches!(self, QueryPlan::IndexRangeScan { .. })
    }

    /// One-line rendering, e.g. `IndexRangeScan(age > 15, sort=false)`
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        match self {
            QueryPlan::FullScan { .. } => {}
            QueryPlan::IndexPointLookup { field, key, .. } => {
                parts.push(format!("{} = {}", field, key));
            }
            QueryPlan::IndexRangeScan {
                field, lower, upper, ..
            } => {
                let mut bounds = Vec::new();
                match lower {
                    Bound::Included(v) => bounds.push(format!("{} >= {}", field, v)),
                    Bound::Excluded(v) if !v.is_null() => bounds.push(format!("{} > {}", field, v)),
                    _ => {}
                }
                match upper {
                    Bound::Included(v) => bounds.push(format!("{} <= {}", field, v)),
                    Bound::Excluded(v) => bounds.push(format!("{} < {}", field, v)),
                    Bound::Unbounded => {}
                }
                parts.push(bounds.join(" AND "));
            }
        }

        let steps = self.steps();
        if let Some(residual) = &steps.residual {
            parts.push(format!("residual={}", residual));
        }
        parts.push(format!("sort={}", steps.sort));

        let name = match self {
            QueryPlan::FullScan { .. } => "FullScan",
            QueryPlan::IndexPointLookup { .. } => "IndexPointLookup",
            QueryPlan::IndexRangeScan { .. } => "IndexRangeScan",
        };
        format!("{}({})", name, parts.join(", "))
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::ComparisonOp;

    #[test]
    fn test_describe_range() {
        let plan = QueryPlan::IndexRangeScan {
            field: "age".into(),
            lower: Bound::Excluded(FieldValue::Int(15)),
            upper: Bound::Unbounded,
            direction: SortDirection::Ascending,
            steps: ExecutionSteps::default(),
        };
        assert_eq!(plan.describe(), "IndexRangeScan(age > 15, sort=false)");
    }

    #[test]
    fn test_describe_open_lower_bound() {
        let plan = QueryPlan::IndexRangeScan {
            field: "age".into(),
            lower: Bound::Excluded(FieldValue::Null),
            upper: Bound::Included(FieldValue::Int(40)),
            direction: SortDirection::Ascending,
            steps: ExecutionSteps {
                sort: true,
                ..Default::default()
            },
        };
        assert_eq!(plan.describe(), "IndexRangeScan(age <= 40, sort=true)");
    }

    #[test]
    fn test_describe_with_residual() {
        let plan = QueryPlan::IndexPointLookup {
            field: "age".into(),
            key: FieldValue::Int(30),
            unique: true,
            steps: ExecutionSteps {
                residual: Some(FilterClause::comparison("city", ComparisonOp::Eq, "Oslo")),
                ..Default::default()
            },
        };
        assert_eq!(
            plan.describe(),
            "IndexPointLookup(age = 30, residual=city = \"Oslo\", sort=false)"
        );
        assert_eq!(plan.index_field(), Some("age"));
    }

    #[test]
    fn test_describe_full_scan() {
        let plan = QueryPlan::FullScan {
            steps: ExecutionSteps::default(),
        };
        assert_eq!(plan.describe(), "FullScan(sort=false)");
        assert!(plan.is_full_scan());
    }
}
