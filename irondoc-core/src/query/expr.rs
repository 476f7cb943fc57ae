// src/query/expr.rs
//! Predicate/sort/paging expression trees.
//!
//! Queries are written against the document parameter with a small builder
//! DSL. `field("age").gt(30)` reads "parameter.age > 30".
//!
//! ```ignore
//! use irondoc_core::query::{field, lit};
//!
//! let adults = field("age").ge(18).and(field("city").eq("Berlin"));
//! let page = lit(10).mul(3);
//! ```

use std::fmt;
use std::ops;

use serde::{Deserialize, Serialize};

use crate::document::{DocumentId, FieldValue, OrderedFloat};
use crate::error::{IronDocError, Result};

/// Binary operators of the expression tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// Expression over the document parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// The document being filtered
    Parameter,
    Member {
        target: Box<Expr>,
        name: String,
    },
    Constant(FieldValue),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Call {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
}

/// Anything usable as an operand in the builder DSL
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for FieldValue {
    fn into_expr(self) -> Expr {
        Expr::Constant(self)
    }
}

macro_rules! constant_operand {
    ($($ty:ty),*) => {
        $(
            impl IntoExpr for $ty {
                fn into_expr(self) -> Expr {
                    Expr::Constant(FieldValue::from(self))
                }
            }
        )*
    };
}

constant_operand!(bool, i64, i32, u32, f64, &str, String, DocumentId);

impl IntoExpr for usize {
    fn into_expr(self) -> Expr {
        Expr::Constant(FieldValue::Int(i64::try_from(self).unwrap_or(i64::MAX)))
    }
}

/// `parameter.name`
pub fn field(name: impl Into<String>) -> Expr {
    param().member(name)
}

/// A constant operand
pub fn lit(value: impl Into<FieldValue>) -> Expr {
    Expr::Constant(value.into())
}

/// The document parameter itself
pub fn param() -> Expr {
    Expr::Parameter
}

impl Expr {
    fn binary(self, op: BinaryOp, rhs: impl IntoExpr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(rhs.into_expr()),
        }
    }

    pub fn member(self, name: impl Into<String>) -> Expr {
        Expr::Member {
            target: Box::new(self),
            name: name.into(),
        }
    }

    pub fn call(self, method: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call {
            target: Box::new(self),
            method: method.into(),
            args,
        }
    }

    // ========== COMPARISONS ==========

    pub fn eq(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn ne(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Ge, rhs)
    }

    // ========== LOGICAL ==========

    pub fn and(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Or, rhs)
    }

    // ========== STRING METHODS ==========

    pub fn starts_with(self, prefix: impl IntoExpr) -> Expr {
        self.call("starts_with", vec![prefix.into_expr()])
    }

    pub fn ends_with(self, suffix: impl IntoExpr) -> Expr {
        self.call("ends_with", vec![suffix.into_expr()])
    }

    pub fn contains(self, needle: impl IntoExpr) -> Expr {
        self.call("contains", vec![needle.into_expr()])
    }

    pub fn equals(self, other: impl IntoExpr) -> Expr {
        self.call("equals", vec![other.into_expr()])
    }

    // ========== CONSTANT FOLDING ==========

    /// Whether the document parameter occurs anywhere in this tree
    pub fn references_parameter(&self) -> bool {
        match self {
            Expr::Parameter => true,
            Expr::Constant(_) => false,
            Expr::Member { target, .. } => target.references_parameter(),
            Expr::Binary { left, right, .. } => {
                left.references_parameter() || right.references_parameter()
            }
            Expr::Not(inner) => inner.references_parameter(),
            Expr::Call { target, args, .. } => {
                target.references_parameter() || args.iter().any(Expr::references_parameter)
            }
        }
    }

    /// Evaluate a parameter-free subtree to a value
    pub fn evaluate_constant(&self) -> Result<FieldValue> {
        match self {
            Expr::Constant(value) => Ok(value.clone()),
            Expr::Parameter | Expr::Member { .. } => Err(IronDocError::NotSupportedInQuery(
                format!("'{}' is not a constant expression", self),
            )),
            Expr::Not(inner) => match inner.evaluate_constant()? {
                FieldValue::Bool(b) => Ok(FieldValue::Bool(!b)),
                other => Err(IronDocError::NotSupportedInQuery(format!(
                    "cannot negate non-boolean value {}",
                    other
                ))),
            },
            Expr::Binary { op, left, right } => {
                let left = left.evaluate_constant()?;
                let right = right.evaluate_constant()?;
                fold_binary(*op, left, right)
            }
            Expr::Call {
                target,
                method,
                args,
            } => {
                let target = target.evaluate_constant()?;
                let [arg] = args.as_slice() else {
                    return Err(IronDocError::NotSupportedInQuery(format!(
                        "method '{}' takes exactly one argument",
                        method
                    )));
                };
                let arg = arg.evaluate_constant()?;
                match (target.as_str(), arg.as_str()) {
                    (Some(s), Some(a)) => match method.as_str() {
                        "starts_with" => Ok(FieldValue::Bool(s.starts_with(a))),
                        "ends_with" => Ok(FieldValue::Bool(s.ends_with(a))),
                        "contains" => Ok(FieldValue::Bool(s.contains(a))),
                        "equals" => Ok(FieldValue::Bool(s == a)),
                        _ => Err(IronDocError::NotSupportedInQuery(format!(
                            "method '{}' is not supported",
                            method
                        ))),
                    },
                    _ => Err(IronDocError::NotSupportedInQuery(format!(
                        "method '{}' requires string operands",
                        method
                    ))),
                }
            }
        }
    }
}

fn fold_binary(op: BinaryOp, left: FieldValue, right: FieldValue) -> Result<FieldValue> {
    use FieldValue::*;

    match op {
        BinaryOp::Eq => Ok(Bool(left == right)),
        BinaryOp::Ne => Ok(Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if left.is_null() || right.is_null() {
                return Ok(Bool(false));
            }
            let ordering = left.cmp(&right);
            Ok(Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => match (left.as_bool(), right.as_bool()) {
            (Some(a), Some(b)) if op == BinaryOp::And => Ok(Bool(a && b)),
            (Some(a), Some(b)) => Ok(Bool(a || b)),
            _ => Err(IronDocError::NotSupportedInQuery(format!(
                "'{}' requires boolean operands",
                op.symbol()
            ))),
        },
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            match (left, right) {
                (Null, _) | (_, Null) => Ok(Null),
                (Int(a), Int(b)) => fold_int(op, a, b),
                (Int(a), Float(b)) => Ok(fold_float(op, a as f64, b.0)),
                (Float(a), Int(b)) => Ok(fold_float(op, a.0, b as f64)),
                (Float(a), Float(b)) => Ok(fold_float(op, a.0, b.0)),
                (String(a), String(b)) if op == BinaryOp::Add => Ok(String(a + &b)),
                (a, b) => Err(IronDocError::NotSupportedInQuery(format!(
                    "cannot apply '{}' to {} and {}",
                    op.symbol(),
                    a,
                    b
                ))),
            }
        }
    }
}

fn fold_int(op: BinaryOp, a: i64, b: i64) -> Result<FieldValue> {
    let folded = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        _ => a.checked_div(b),
    };
    folded.map(FieldValue::Int).ok_or_else(|| {
        IronDocError::NotSupportedInQuery(format!(
            "integer overflow or division by zero in {} {} {}",
            a,
            op.symbol(),
            b
        ))
    })
}

fn fold_float(op: BinaryOp, a: f64, b: f64) -> FieldValue {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        _ => a / b,
    };
    FieldValue::Float(OrderedFloat(value))
}

impl<R: IntoExpr> ops::Add<R> for Expr {
    type Output = Expr;

    fn add(self, rhs: R) -> Expr {
        self.binary(BinaryOp::Add, rhs)
    }
}

impl<R: IntoExpr> ops::Sub<R> for Expr {
    type Output = Expr;

    fn sub(self, rhs: R) -> Expr {
        self.binary(BinaryOp::Sub, rhs)
    }
}

impl<R: IntoExpr> ops::Mul<R> for Expr {
    type Output = Expr;

    fn mul(self, rhs: R) -> Expr {
        self.binary(BinaryOp::Mul, rhs)
    }
}

impl<R: IntoExpr> ops::Div<R> for Expr {
    type Output = Expr;

    fn div(self, rhs: R) -> Expr {
        self.binary(BinaryOp::Div, rhs)
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Parameter => write!(f, "x"),
            Expr::Member { target, name } => write!(f, "{}.{}", target, name),
            Expr::Constant(value) => write!(f, "{}", value),
            Expr::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Not(inner) => write!(f, "!{}", inner),
            Expr::Call {
                target,
                method,
                args,
            } => {
                write!(f, "{}.{}(", target, method)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builds_member_of_parameter() {
        assert_eq!(
            field("age"),
            Expr::Member {
                target: Box::new(Expr::Parameter),
                name: "age".to_string()
            }
        );
        assert_eq!(field("age").gt(3).to_string(), "(x.age > 3)");
    }

    #[test]
    fn test_references_parameter() {
        assert!(field("age").gt(3).references_parameter());
        assert!(!(lit(1) + 2).references_parameter());
        assert!(lit("a").starts_with(field("name")).references_parameter());
    }

    #[test]
    fn test_constant_folding_arithmetic() {
        assert_eq!((lit(10) * 3).evaluate_constant().unwrap(), FieldValue::Int(30));
        assert_eq!(
            (lit(1) + 0.5).evaluate_constant().unwrap(),
            FieldValue::Float(OrderedFloat(1.5))
        );
        assert_eq!(
            (lit("ab") + "c").evaluate_constant().unwrap(),
            FieldValue::String("abc".into())
        );
        assert!(matches!(
            (lit(1) / 0).evaluate_constant(),
            Err(IronDocError::NotSupportedInQuery(_))
        ));
    }

    #[test]
    fn test_constant_folding_logic() {
        assert_eq!(
            lit(2).gt(1).and(lit(true)).evaluate_constant().unwrap(),
            FieldValue::Bool(true)
        );
        assert_eq!((!lit(true)).evaluate_constant().unwrap(), FieldValue::Bool(false));
        assert_eq!(
            lit("hello").starts_with("he").evaluate_constant().unwrap(),
            FieldValue::Bool(true)
        );
    }

    #[test]
    fn test_null_ordering_folds_to_false() {
        assert_eq!(
            lit(FieldValue::Null).lt(3).evaluate_constant().unwrap(),
            FieldValue::Bool(false)
        );
    }

    #[test]
    fn test_member_is_not_constant() {
        assert!(field("age").evaluate_constant().is_err());
    }
}
