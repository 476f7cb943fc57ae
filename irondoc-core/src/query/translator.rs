// src/query/translator.rs
// Expression trees -> filter clauses, ordering and paging

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::document::{FieldDescriptor, FieldKind, FieldValue, Schema};
use crate::error::{IronDocError, Result};
use crate::index::SortDirection;
use crate::query::expr::{BinaryOp, Expr};
use crate::query::filter::{ComparisonOp, FilterClause, StringMethod};

/// One call recorded on a [`Queryable`](crate::query::Queryable)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOperator {
    Where(Expr),
    OrderBy(Expr),
    OrderByDescending(Expr),
    ThenBy(Expr),
    ThenByDescending(Expr),
    Take(Expr),
    Skip(Expr),
    Distinct,
    Select(Expr),
    Join(Expr),
    GroupJoin(Expr),
    GroupBy(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderClause {
    pub field: String,
    pub direction: SortDirection,
}

/// Query after translation: conjunctive filters plus ordering and paging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslatedQuery {
    pub filters: Vec<FilterClause>,
    pub order_by: Vec<OrderClause>,
    pub take: Option<usize>,
    pub skip: usize,
    pub distinct: bool,
}

impl TranslatedQuery {
    fn is_paged(&self) -> bool {
        self.take.is_some() || self.skip > 0
    }
}

pub struct QueryTranslator<'a, T> {
    schema: &'a Schema<T>,
}

impl<'a, T> QueryTranslator<'a, T> {
    pub fn new(schema: &'a Schema<T>) -> Self {
        QueryTranslator { schema }
    }

    pub fn translate(&self, operators: &[QueryOperator]) -> Result<TranslatedQuery> {
        let mut query = TranslatedQuery::default();

        for operator in operators {
            match operator {
                QueryOperator::Where(predicate) => {
                    if query.is_paged() {
                        return Err(unsupported("Where after Take/Skip"));
                    }
                    match self.translate_predicate(predicate)? {
                        FilterClause::Constant(true) => {}
                        clause => query.filters.push(clause),
                    }
                }
                QueryOperator::OrderBy(key) | QueryOperator::OrderByDescending(key) => {
                    if query.is_paged() {
                        return Err(unsupported("OrderBy after Take/Skip"));
                    }
                    let direction = if matches!(operator, QueryOperator::OrderBy(_)) {
                        SortDirection::Ascending
                    } else {
                        SortDirection::Descending
                    };
                    query.order_by = vec![OrderClause {
                        field: self.field_name(key)?.to_string(),
                        direction,
                    }];
                }
                QueryOperator::ThenBy(key) | QueryOperator::ThenByDescending(key) => {
                    if query.order_by.is_empty() {
                        return Err(unsupported("ThenBy without a preceding OrderBy"));
                    }
                    if query.is_paged() {
                        return Err(unsupported("ThenBy after Take/Skip"));
                    }
                    let direction = if matches!(operator, QueryOperator::ThenBy(_)) {
                        SortDirection::Ascending
                    } else {
                        SortDirection::Descending
                    };
                    query.order_by.push(OrderClause {
                        field: self.field_name(key)?.to_string(),
                        direction,
                    });
                }
                QueryOperator::Take(count) => {
                    let count = self.count(count)?;
                    query.take = Some(query.take.map_or(count, |take| take.min(count)));
                }
                QueryOperator::Skip(count) => {
                    let count = self.count(count)?;
                    query.skip = query.skip.saturating_add(count);
                    query.take = query.take.map(|take| take.saturating_sub(count));
                }
                QueryOperator::Distinct => query.distinct = true,
                QueryOperator::Select(_) => return Err(materialize_first("Select")),
                QueryOperator::Join(_) => return Err(materialize_first("Join")),
                QueryOperator::GroupJoin(_) => return Err(materialize_first("GroupJoin")),
                QueryOperator::GroupBy(_) => return Err(materialize_first("GroupBy")),
            }
        }

        trace!(filters = query.filters.len(), order_by = query.order_by.len(), "query translated");
        Ok(query)
    }

    /// Decompose a boolean expression into a filter clause
    pub fn translate_predicate(&self, expr: &Expr) -> Result<FilterClause> {
        if !expr.references_parameter() {
            return match expr.evaluate_constant()? {
                FieldValue::Bool(b) => Ok(FilterClause::Constant(b)),
                other => Err(unsupported(&format!("predicate folds to non-boolean {}", other))),
            };
        }

        match expr {
            Expr::Binary { op, left, right } if op.is_logical() => {
                let left = self.translate_predicate(left)?;
                let right = self.translate_predicate(right)?;
                Ok(combine(*op, left, right))
            }
            Expr::Binary { op, left, right } if op.is_comparison() => {
                self.translate_comparison(*op, left, right)
            }
            Expr::Not(inner) => Ok(match self.translate_predicate(inner)? {
                FilterClause::Constant(b) => FilterClause::Constant(!b),
                FilterClause::Not(inner) => *inner,
                clause => FilterClause::Not(Box::new(clause)),
            }),
            Expr::Member { .. } => {
                let field = self.field_name(expr)?;
                self.check_kind(field, FieldKind::Bool, expr)?;
                Ok(FilterClause::comparison(field, ComparisonOp::Eq, true))
            }
            Expr::Call {
                target,
                method,
                args,
            } => self.translate_call(target, method, args),
            _ => Err(unsupported(&format!("expression '{}' is not a predicate", expr))),
        }
    }

    fn translate_comparison(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<FilterClause> {
        let op = match op {
            BinaryOp::Eq => ComparisonOp::Eq,
            BinaryOp::Ne => ComparisonOp::Ne,
            BinaryOp::Lt => ComparisonOp::Lt,
            BinaryOp::Le => ComparisonOp::Le,
            BinaryOp::Gt => ComparisonOp::Gt,
            _ => ComparisonOp::Ge,
        };

        let (field_side, constant_side, op) =
            match (left.references_parameter(), right.references_parameter()) {
                (true, false) => (left, right, op),
                (false, true) => (right, left, op.flipped()),
                _ => {
                    return Err(unsupported(&format!(
                        "comparison '{} {} {}' must compare one field with a constant",
                        left,
                        op.symbol(),
                        right
                    )))
                }
            };

        let field = self.field_name(field_side)?;
        let value = constant_side.evaluate_constant()?;
        let descriptor = self.descriptor(field)?;
        if !descriptor.kind.accepts(&value) {
            return Err(unsupported(&format!(
                "field '{}' is {:?} and cannot be compared with {}",
                field, descriptor.kind, value
            )));
        }
        Ok(FilterClause::comparison(field, op, value))
    }

    fn translate_call(&self, target: &Expr, method: &str, args: &[Expr]) -> Result<FilterClause> {
        let field = self.field_name(target)?;
        self.check_kind(field, FieldKind::String, target)?;

        let [argument] = args else {
            return Err(unsupported(&format!("method '{}' takes exactly one argument", method)));
        };
        if argument.references_parameter() {
            return Err(unsupported(&format!(
                "argument of '{}' must not reference the document",
                method
            )));
        }
        let argument = match argument.evaluate_constant()? {
            FieldValue::String(s) => s,
            other => {
                return Err(unsupported(&format!(
                    "method '{}' expects a string argument, got {}",
                    method, other
                )))
            }
        };

        if method == "equals" {
            return Ok(FilterClause::comparison(field, ComparisonOp::Eq, argument));
        }
        let method = StringMethod::from_name(method)
            .ok_or_else(|| unsupported(&format!("method '{}' is not supported", method)))?;
        Ok(FilterClause::Method {
            field: field.to_string(),
            method,
            argument,
        })
    }

    /// Resolve a direct `parameter.field` access to a schema field name
    fn field_name<'e>(&self, expr: &'e Expr) -> Result<&'e str> {
        match expr {
            Expr::Member { target, name } => match target.as_ref() {
                Expr::Parameter => {
                    self.descriptor(name)?;
                    Ok(name)
                }
                Expr::Member { .. } => Err(unsupported(&format!(
                    "nested member path '{}' is not supported",
                    expr
                ))),
                _ => Err(unsupported(&format!("'{}' is not a field access", expr))),
            },
            _ => Err(unsupported(&format!("'{}' is not a field access", expr))),
        }
    }

    fn descriptor(&self, field: &str) -> Result<&FieldDescriptor<T>> {
        self.schema
            .field(field)
            .ok_or_else(|| unsupported(&format!("unknown field '{}'", field)))
    }

    fn check_kind(&self, field: &str, expected: FieldKind, expr: &Expr) -> Result<()> {
        let kind = self.descriptor(field)?.kind;
        if kind != expected {
            return Err(unsupported(&format!(
                "'{}' needs a {:?} field but '{}' is {:?}",
                expr, expected, field, kind
            )));
        }
        Ok(())
    }

    fn count(&self, expr: &Expr) -> Result<usize> {
        if expr.references_parameter() {
            return Err(unsupported("Take/Skip count must not reference the document"));
        }
        match expr.evaluate_constant()? {
            FieldValue::Int(n) => Ok(usize::try_from(n.max(0)).unwrap_or(usize::MAX)),
            other => Err(unsupported(&format!("Take/Skip count must be an integer, got {}", other))),
        }
    }
}

fn combine(op: BinaryOp, left: FilterClause, right: FilterClause) -> FilterClause {
    use FilterClause::Constant;

    match (op, left, right) {
        (BinaryOp::And, Constant(true), other) | (BinaryOp::And, other, Constant(true)) => other,
        (BinaryOp::And, Constant(false), _) | (BinaryOp::And, _, Constant(false)) => Constant(false),
        (BinaryOp::Or, Constant(false), other) | (BinaryOp::Or, other, Constant(false)) => other,
        (BinaryOp::Or, Constant(true), _) | (BinaryOp::Or, _, Constant(true)) => Constant(true),
        (BinaryOp::And, left, right) => FilterClause::And(Box::new(left), Box::new(right)),
        (_, left, right) => FilterClause::Or(Box::new(left), Box::new(right)),
    }
}

fn unsupported(what: &str) -> IronDocError {
    IronDocError::NotSupportedInQuery(what.to_string())
}

fn materialize_first(operator: &str) -> IronDocError {
    IronDocError::NotSupportedInQuery(format!(
        "{} is not supported in queries; materialize the results with to_list() first",
        operator
    ))
}
