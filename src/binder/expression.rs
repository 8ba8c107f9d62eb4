//! Typed bound expressions
//!
//! Every node carries its resolved logical type. Column references carry
//! both their (table, column) origin and a flat index into the chunk the
//! expression executes against; the planner rewrites flat indices when it
//! prunes scan columns.

use crate::error::{Error, Result};
use crate::functions::ScalarFunction;
use crate::types::{LogicalType, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
            ArithmeticOp::Remainder => "%",
        }
    }
}

#[derive(Debug, Clone)]
pub enum BoundExpression {
    /// A literal or folded constant. Untyped NULL carries no datatype until
    /// context provides one.
    Constant {
        value: Value,
        datatype: Option<LogicalType>,
    },
    ColumnRef {
        table: usize,
        column: usize,
        /// Index into the chunk flowing through the expression executor.
        flat: usize,
        datatype: LogicalType,
        name: String,
    },
    /// Direct reference to a child operator's output column (group keys and
    /// aggregate results after an Aggregate).
    Reference {
        index: usize,
        datatype: LogicalType,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<BoundExpression>,
        right: Box<BoundExpression>,
    },
    Conjunction {
        and: bool,
        left: Box<BoundExpression>,
        right: Box<BoundExpression>,
    },
    Not(Box<BoundExpression>),
    IsNull {
        expr: Box<BoundExpression>,
        negated: bool,
    },
    InList {
        expr: Box<BoundExpression>,
        list: Vec<BoundExpression>,
        negated: bool,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<BoundExpression>,
        right: Box<BoundExpression>,
        datatype: LogicalType,
    },
    Negate {
        expr: Box<BoundExpression>,
        datatype: LogicalType,
    },
    Cast {
        expr: Box<BoundExpression>,
        datatype: LogicalType,
    },
    Function {
        function: Arc<dyn ScalarFunction>,
        args: Vec<BoundExpression>,
        datatype: LogicalType,
    },
    /// `$N`, 0-based. The type is resolved from context during binding and
    /// the node is substituted with a constant before execution.
    Parameter {
        index: usize,
        datatype: Option<LogicalType>,
    },
    /// Uncorrelated scalar subquery; unnested by the planner.
    Subquery {
        select: Box<super::BoundSelect>,
        datatype: LogicalType,
    },
}

impl BoundExpression {
    pub fn constant(value: Value) -> Self {
        let datatype = value.data_type();
        BoundExpression::Constant { value, datatype }
    }

    pub fn return_type(&self) -> Option<LogicalType> {
        match self {
            BoundExpression::Constant { datatype, .. } => datatype.clone(),
            BoundExpression::ColumnRef { datatype, .. } => Some(datatype.clone()),
            BoundExpression::Reference { datatype, .. } => Some(datatype.clone()),
            BoundExpression::Comparison { .. }
            | BoundExpression::Conjunction { .. }
            | BoundExpression::Not(_)
            | BoundExpression::IsNull { .. }
            | BoundExpression::InList { .. } => Some(LogicalType::Boolean),
            BoundExpression::Arithmetic { datatype, .. } => Some(datatype.clone()),
            BoundExpression::Negate { datatype, .. } => Some(datatype.clone()),
            BoundExpression::Cast { datatype, .. } => Some(datatype.clone()),
            BoundExpression::Function { datatype, .. } => Some(datatype.clone()),
            BoundExpression::Parameter { datatype, .. } => datatype.clone(),
            BoundExpression::Subquery { datatype, .. } => Some(datatype.clone()),
        }
    }

    /// An expression folds iff all children fold and no function in it has
    /// side effects.
    pub fn is_foldable(&self) -> bool {
        match self {
            BoundExpression::Constant { .. } => true,
            BoundExpression::ColumnRef { .. }
            | BoundExpression::Reference { .. }
            | BoundExpression::Parameter { .. }
            | BoundExpression::Subquery { .. } => false,
            BoundExpression::Function { function, args, .. } => {
                !function.has_side_effects() && args.iter().all(|a| a.is_foldable())
            }
            other => {
                let mut foldable = true;
                other.for_each_child(&mut |child| foldable &= child.is_foldable());
                foldable
            }
        }
    }

    pub fn for_each_child(&self, f: &mut impl FnMut(&BoundExpression)) {
        match self {
            BoundExpression::Comparison { left, right, .. }
            | BoundExpression::Conjunction { left, right, .. }
            | BoundExpression::Arithmetic { left, right, .. } => {
                f(left);
                f(right);
            }
            BoundExpression::Not(expr)
            | BoundExpression::Negate { expr, .. }
            | BoundExpression::Cast { expr, .. }
            | BoundExpression::IsNull { expr, .. } => f(expr),
            BoundExpression::InList { expr, list, .. } => {
                f(expr);
                for item in list {
                    f(item);
                }
            }
            BoundExpression::Function { args, .. } => {
                for arg in args {
                    f(arg);
                }
            }
            _ => {}
        }
    }

    pub fn walk(&self, f: &mut impl FnMut(&BoundExpression)) {
        f(self);
        self.for_each_child(&mut |child| child.walk(f));
    }

    /// Rewrite the tree bottom-up through `f`.
    pub fn transform(self, f: &mut impl FnMut(BoundExpression) -> Result<BoundExpression>) -> Result<BoundExpression> {
        let rewritten = match self {
            BoundExpression::Comparison { op, left, right } => BoundExpression::Comparison {
                op,
                left: Box::new(left.transform(f)?),
                right: Box::new(right.transform(f)?),
            },
            BoundExpression::Conjunction { and, left, right } => BoundExpression::Conjunction {
                and,
                left: Box::new(left.transform(f)?),
                right: Box::new(right.transform(f)?),
            },
            BoundExpression::Arithmetic {
                op,
                left,
                right,
                datatype,
            } => BoundExpression::Arithmetic {
                op,
                left: Box::new(left.transform(f)?),
                right: Box::new(right.transform(f)?),
                datatype,
            },
            BoundExpression::Not(expr) => BoundExpression::Not(Box::new(expr.transform(f)?)),
            BoundExpression::Negate { expr, datatype } => BoundExpression::Negate {
                expr: Box::new(expr.transform(f)?),
                datatype,
            },
            BoundExpression::Cast { expr, datatype } => BoundExpression::Cast {
                expr: Box::new(expr.transform(f)?),
                datatype,
            },
            BoundExpression::IsNull { expr, negated } => BoundExpression::IsNull {
                expr: Box::new(expr.transform(f)?),
                negated,
            },
            BoundExpression::InList {
                expr,
                list,
                negated,
            } => BoundExpression::InList {
                expr: Box::new(expr.transform(f)?),
                list: list
                    .into_iter()
                    .map(|e| e.transform(f))
                    .collect::<Result<Vec<_>>>()?,
                negated,
            },
            BoundExpression::Function {
                function,
                args,
                datatype,
            } => BoundExpression::Function {
                function,
                args: args
                    .into_iter()
                    .map(|e| e.transform(f))
                    .collect::<Result<Vec<_>>>()?,
                datatype,
            },
            BoundExpression::Subquery { select, datatype } => BoundExpression::Subquery {
                select: Box::new(super::transform_select(*select, f)?),
                datatype,
            },
            leaf => leaf,
        };
        f(rewritten)
    }

    /// Wrap in a cast when the resolved type differs from `target`. Untyped
    /// NULL constants adopt the target type directly.
    pub fn cast_to(self, target: &LogicalType) -> BoundExpression {
        match self {
            BoundExpression::Constant {
                value: Value::Null, ..
            } => BoundExpression::Constant {
                value: Value::Null,
                datatype: Some(target.clone()),
            },
            expr if expr.return_type().as_ref() == Some(target) => expr,
            expr => BoundExpression::Cast {
                expr: Box::new(expr),
                datatype: target.clone(),
            },
        }
    }
}

/// The join of two operand types for comparison and arithmetic promotion.
/// Text joins with temporal types by parsing; everything else follows the
/// numeric lattice.
pub fn join_operand_types(a: &LogicalType, b: &LogicalType) -> Result<LogicalType> {
    if let Some(joined) = LogicalType::join(a, b) {
        return Ok(joined);
    }
    match (a, b) {
        (LogicalType::Varchar(_), t) if t.is_temporal() => Ok(t.clone()),
        (t, LogicalType::Varchar(_)) if t.is_temporal() => Ok(t.clone()),
        _ => Err(Error::TypeMismatch {
            expected: a.to_string(),
            found: b.to_string(),
        }),
    }
}
