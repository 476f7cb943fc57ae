// src/query/filter.rs
// Translated filter tree and its interpreter

use std::cmp::Ordering;
use std::fmt;

use crate::document::{FieldValue, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    /// Operator to use when the operands swap sides (`3 < x` is `x > 3`)
    pub fn flipped(self) -> Self {
        match self {
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Le => ComparisonOp::Ge,
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Ge => ComparisonOp::Le,
            other => other,
        }
    }

    pub fn is_range(self) -> bool {
        matches!(
            self,
            ComparisonOp::Lt | ComparisonOp::Le | ComparisonOp::Gt | ComparisonOp::Ge
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }

    /// Apply to a field value and a constant. Ordering against null never matches.
    pub fn matches(self, actual: &FieldValue, expected: &FieldValue) -> bool {
        match self {
            ComparisonOp::Eq => actual == expected,
            ComparisonOp::Ne => actual != expected,
            _ if actual.is_null() || expected.is_null() => false,
            _ => {
                let ordering = actual.cmp(expected);
                match self {
                    ComparisonOp::Lt => ordering == Ordering::Less,
                    ComparisonOp::Le => ordering != Ordering::Greater,
                    ComparisonOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringMethod {
    StartsWith,
    EndsWith,
    Contains,
}

impl StringMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "starts_with" => Some(StringMethod::StartsWith),
            "ends_with" => Some(StringMethod::EndsWith),
            "contains" => Some(StringMethod::Contains),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StringMethod::StartsWith => "starts_with",
            StringMethod::EndsWith => "ends_with",
            StringMethod::Contains => "contains",
        }
    }

    fn apply(self, haystack: &str, argument: &str) -> bool {
        match self {
            StringMethod::StartsWith => haystack.starts_with(argument),
            StringMethod::EndsWith => haystack.ends_with(argument),
            StringMethod::Contains => haystack.contains(argument),
        }
    }
}

/// Filter over named schema fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterClause {
    Comparison {
        field: String,
        op: ComparisonOp,
        value: FieldValue,
    },
    And(Box<FilterClause>, Box<FilterClause>),
    Or(Box<FilterClause>, Box<FilterClause>),
    Not(Box<FilterClause>),
    Method {
        field: String,
        method: StringMethod,
        argument: String,
    },
    Constant(bool),
}

impl FilterClause {
    pub fn comparison(field: impl Into<String>, op: ComparisonOp, value: impl Into<FieldValue>) -> Self {
        FilterClause::Comparison {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// AND of `clauses`; `Constant(true)` when empty
    pub fn all(clauses: Vec<FilterClause>) -> Self {
        clauses
            .into_iter()
            .reduce(|acc, clause| FilterClause::And(Box::new(acc), Box::new(clause)))
            .unwrap_or(FilterClause::Constant(true))
    }

    /// Split nested ANDs into their operands, left to right
    pub fn into_conjuncts(self) -> Vec<FilterClause> {
        match self {
            FilterClause::And(left, right) => {
                let mut conjuncts = left.into_conjuncts();
                conjuncts.extend(right.into_conjuncts());
                conjuncts
            }
            other => vec![other],
        }
    }

    /// Whether an ordered index on the clause's field can answer it on its own.
    ///
    /// OR, NOT and string methods never can; neither can `!=` or an ordering
    /// against null.
    pub fn is_index_satisfiable(&self) -> bool {
        match self {
            FilterClause::Comparison { op, value, .. } => match op {
                ComparisonOp::Eq => true,
                ComparisonOp::Ne => false,
                _ => !value.is_null(),
            },
            _ => false,
        }
    }

    pub fn evaluate<T>(&self, doc: &T, schema: &Schema<T>) -> bool {
        match self {
            FilterClause::Comparison { field, op, value } => schema
                .value_of(doc, field)
                .map_or(false, |actual| op.matches(&actual, value)),
            FilterClause::And(left, right) => {
                left.evaluate(doc, schema) && right.evaluate(doc, schema)
            }
            FilterClause::Or(left, right) => {
                left.evaluate(doc, schema) || right.evaluate(doc, schema)
            }
            FilterClause::Not(inner) => !inner.evaluate(doc, schema),
            FilterClause::Method {
                field,
                method,
                argument,
            } => match schema.value_of(doc, field) {
                Some(FieldValue::String(s)) => method.apply(&s, argument),
                _ => false,
            },
            FilterClause::Constant(b) => *b,
        }
    }
}

impl fmt::Display for FilterClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterClause::Comparison { field, op, value } => {
                write!(f, "{} {} {}", field, op.symbol(), value)
            }
            FilterClause::And(left, right) => write!(f, "({} AND {})", left, right),
            FilterClause::Or(left, right) => write!(f, "({} OR {})", left, right),
            FilterClause::Not(inner) => write!(f, "NOT {}", inner),
            FilterClause::Method {
                field,
                method,
                argument,
            } => write!(f, "{}.{}({:?})", field, method.name(), argument),
            FilterClause::Constant(b) => write!(f, "{}", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, DocumentId, FieldKind};

    #[derive(Clone)]
    struct City {
        id: Option<DocumentId>,
        name: String,
        population: Option<i64>,
    }

    impl Document for City {
        fn id(&self) -> Option<DocumentId> {
            self.id
        }

        fn set_id(&mut self, id: DocumentId) {
            self.id = Some(id);
        }

        fn schema() -> Schema<Self> {
            Schema::builder()
                .field("name", FieldKind::String, |c: &City| c.name.clone().into())
                .field("population", FieldKind::Int, |c: &City| c.population.into())
                .build()
        }
    }

    fn city(name: &str, population: Option<i64>) -> City {
        City {
            id: None,
            name: name.to_string(),
            population,
        }
    }

    #[test]
    fn test_comparison_and_logic() {
        let schema = City::schema();
        let big = FilterClause::comparison("population", ComparisonOp::Gt, 1_000_000i64);
        let named = FilterClause::Method {
            field: "name".into(),
            method: StringMethod::StartsWith,
            argument: "B".into(),
        };
        let both = FilterClause::And(Box::new(big.clone()), Box::new(named.clone()));

        assert!(both.evaluate(&city("Berlin", Some(3_600_000)), &schema));
        assert!(!both.evaluate(&city("Bonn", Some(300_000)), &schema));
        assert!(FilterClause::Not(Box::new(big)).evaluate(&city("Bonn", Some(300_000)), &schema));
    }

    #[test]
    fn test_ordering_against_null_never_matches() {
        let schema = City::schema();
        let unknown = city("Atlantis", None);
        assert!(!FilterClause::comparison("population", ComparisonOp::Lt, 10i64).evaluate(&unknown, &schema));
        assert!(!FilterClause::comparison("population", ComparisonOp::Ge, 10i64).evaluate(&unknown, &schema));
        assert!(FilterClause::comparison("population", ComparisonOp::Eq, FieldValue::Null)
            .evaluate(&unknown, &schema));
        assert!(FilterClause::comparison("population", ComparisonOp::Ne, 10i64).evaluate(&unknown, &schema));
    }

    #[test]
    fn test_index_satisfiable() {
        assert!(FilterClause::comparison("a", ComparisonOp::Eq, 1i64).is_index_satisfiable());
        assert!(FilterClause::comparison("a", ComparisonOp::Le, 1i64).is_index_satisfiable());
        assert!(!FilterClause::comparison("a", ComparisonOp::Ne, 1i64).is_index_satisfiable());
        assert!(!FilterClause::comparison("a", ComparisonOp::Gt, FieldValue::Null).is_index_satisfiable());
        assert!(!FilterClause::Constant(true).is_index_satisfiable());
    }

    #[test]
    fn test_conjuncts_flatten_left_to_right() {
        let a = FilterClause::comparison("a", ComparisonOp::Eq, 1i64);
        let b = FilterClause::comparison("b", ComparisonOp::Eq, 2i64);
        let c = FilterClause::comparison("c", ComparisonOp::Eq, 3i64);
        let tree = FilterClause::all(vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(tree.to_string(), "((a = 1 AND b = 2) AND c = 3)");
        assert_eq!(tree.into_conjuncts(), vec![a, b, c]);
    }

    #[test]
    fn test_flipped() {
        assert_eq!(ComparisonOp::Lt.flipped(), ComparisonOp::Gt);
        assert_eq!(ComparisonOp::Ge.flipped(), ComparisonOp::Le);
        assert_eq!(ComparisonOp::Eq.flipped(), ComparisonOp::Eq);
    }
}
