//! Vectorized expression executor
//!
//! `execute` evaluates a bound expression over a chunk into one result
//! vector; `select` evaluates predicates into selection vectors without
//! touching data buffers. Casts run per element and report the first
//! failing row index.

use crate::binder::{ArithmeticOp, BoundExpression, ComparisonOp};
use crate::error::{Error, Result};
use crate::functions::BindData;
use crate::types::{LogicalType, Value};
use crate::vector::{DataChunk, SelectionVector, Vector, VectorBuffer};
use std::cmp::Ordering;

/// Evaluates one expression tree. Holds the per-statement bind data of any
/// side-effecting functions in the tree, so the tree itself stays immutable
/// and re-entrant.
pub struct ExpressionExecutor {
    expr: BoundExpression,
    bind_data: Vec<Option<BindData>>,
}

impl ExpressionExecutor {
    pub fn new(expr: BoundExpression) -> Self {
        let mut bind_data = Vec::new();
        expr.walk(&mut |e| {
            if let BoundExpression::Function { function, .. } = e {
                bind_data.push(function.init_bind_data());
            }
        });
        Self { expr, bind_data }
    }

    pub fn expression(&self) -> &BoundExpression {
        &self.expr
    }

    pub fn execute(&mut self, chunk: &DataChunk) -> Result<Vector> {
        let mut cursor = 0;
        eval(&self.expr, chunk, &mut self.bind_data, &mut cursor)
    }

    /// Predicate evaluation producing a selection vector of the rows where
    /// the predicate is true. NULL never selects.
    pub fn select(&mut self, chunk: &DataChunk) -> Result<SelectionVector> {
        let mut cursor = 0;
        select(&self.expr, chunk, &mut self.bind_data, &mut cursor)
    }
}

/// Fold a constant expression to a single value by evaluating it over a
/// one-row carrier chunk.
pub fn fold_constant(expr: &BoundExpression) -> Result<Value> {
    let mut executor = ExpressionExecutor::new(expr.clone());
    let chunk = DataChunk::carrier(1);
    let vector = executor.execute(&chunk)?;
    Ok(vector.value_at(0))
}

fn eval(
    expr: &BoundExpression,
    chunk: &DataChunk,
    bind_data: &mut [Option<BindData>],
    cursor: &mut usize,
) -> Result<Vector> {
    let count = chunk.len();
    match expr {
        BoundExpression::Constant { value, datatype } => {
            let datatype = datatype.clone().unwrap_or(LogicalType::Varchar(None));
            Vector::constant(value, datatype, count)
        }
        BoundExpression::ColumnRef { flat, .. } => Ok(chunk.column(*flat).clone()),
        BoundExpression::Reference { index, .. } => Ok(chunk.column(*index).clone()),
        BoundExpression::Cast { expr, datatype } => {
            let input = eval(expr, chunk, bind_data, cursor)?;
            cast_vector(&input, datatype, count)
        }
        BoundExpression::Comparison { op, left, right } => {
            let l = eval(left, chunk, bind_data, cursor)?;
            let r = eval(right, chunk, bind_data, cursor)?;
            compare_vectors(*op, &l, &r, count)
        }
        BoundExpression::Conjunction { and, left, right } => {
            let l = eval(left, chunk, bind_data, cursor)?;
            let r = eval(right, chunk, bind_data, cursor)?;
            conjunction_vectors(*and, &l, &r, count)
        }
        BoundExpression::Not(inner) => {
            let input = eval(inner, chunk, bind_data, cursor)?;
            let mut out = Vector::with_capacity(LogicalType::Boolean, count);
            for k in 0..count {
                match input.value_at(k) {
                    Value::Boolean(b) => out.push_value(&Value::Boolean(!b))?,
                    _ => out.push_value(&Value::Null)?,
                }
            }
            Ok(out)
        }
        BoundExpression::IsNull { expr, negated } => {
            let input = eval(expr, chunk, bind_data, cursor)?;
            let mut out = Vector::with_capacity(LogicalType::Boolean, count);
            for k in 0..count {
                let is_null = !input.is_valid(k);
                out.push_value(&Value::Boolean(is_null != *negated))?;
            }
            Ok(out)
        }
        BoundExpression::InList {
            expr,
            list,
            negated,
        } => {
            let input = eval(expr, chunk, bind_data, cursor)?;
            let members = list
                .iter()
                .map(|e| eval(e, chunk, bind_data, cursor))
                .collect::<Result<Vec<_>>>()?;
            let mut out = Vector::with_capacity(LogicalType::Boolean, count);
            for k in 0..count {
                let needle = input.value_at(k);
                if needle.is_null() {
                    out.push_value(&Value::Null)?;
                    continue;
                }
                let mut saw_null = false;
                let mut found = false;
                for member in &members {
                    let candidate = member.value_at(k);
                    if candidate.is_null() {
                        saw_null = true;
                    } else if candidate.compare(&needle) == Ordering::Equal {
                        found = true;
                        break;
                    }
                }
                let result = if found {
                    Value::Boolean(!*negated)
                } else if saw_null {
                    Value::Null
                } else {
                    Value::Boolean(*negated)
                };
                out.push_value(&result)?;
            }
            Ok(out)
        }
        BoundExpression::Arithmetic {
            op,
            left,
            right,
            datatype,
        } => {
            let l = eval(left, chunk, bind_data, cursor)?;
            let r = eval(right, chunk, bind_data, cursor)?;
            arithmetic_vectors(*op, &l, &r, datatype, count)
        }
        BoundExpression::Negate { expr, datatype } => {
            let input = eval(expr, chunk, bind_data, cursor)?;
            let mut out = Vector::with_capacity(datatype.clone(), count);
            for k in 0..count {
                let value = match input.value_at(k) {
                    Value::Null => Value::Null,
                    Value::TinyInt(v) => Value::TinyInt(v.checked_neg().ok_or_else(|| {
                        overflow(&Value::TinyInt(v), datatype, k)
                    })?),
                    Value::SmallInt(v) => Value::SmallInt(v.checked_neg().ok_or_else(|| {
                        overflow(&Value::SmallInt(v), datatype, k)
                    })?),
                    Value::Integer(v) => Value::Integer(v.checked_neg().ok_or_else(|| {
                        overflow(&Value::Integer(v), datatype, k)
                    })?),
                    Value::BigInt(v) => Value::BigInt(v.checked_neg().ok_or_else(|| {
                        overflow(&Value::BigInt(v), datatype, k)
                    })?),
                    Value::Real(v) => Value::Real(-v),
                    Value::Double(v) => Value::Double(-v),
                    other => {
                        return Err(Error::TypeMismatch {
                            expected: "a numeric operand".into(),
                            found: other.to_string(),
                        })
                    }
                };
                out.push_value(&value)?;
            }
            Ok(out)
        }
        BoundExpression::Function {
            function, args, ..
        } => {
            let slot = *cursor;
            *cursor += 1;
            let arg_vectors = args
                .iter()
                .map(|a| eval(a, chunk, bind_data, cursor))
                .collect::<Result<Vec<_>>>()?;
            function.execute(&arg_vectors, count, bind_data[slot].as_mut())
        }
        BoundExpression::Parameter { index, .. } => Err(Error::Internal(format!(
            "parameter ${} was not substituted before execution",
            index + 1
        ))),
        BoundExpression::Subquery { .. } => Err(Error::Internal(
            "subquery was not resolved before execution".into(),
        )),
    }
}

fn skip_bind_data(expr: &BoundExpression, cursor: &mut usize) {
    expr.walk(&mut |e| {
        if matches!(e, BoundExpression::Function { .. }) {
            *cursor += 1;
        }
    });
}

fn overflow(value: &Value, target: &LogicalType, row: usize) -> Error {
    Error::OutOfRange {
        value: value.to_string(),
        target: target.to_string(),
        row: Some(row),
    }
}

fn cast_vector(input: &Vector, target: &LogicalType, count: usize) -> Result<Vector> {
    let mut out = Vector::with_capacity(target.clone(), count);
    for k in 0..count {
        let value = input
            .value_at(k)
            .try_cast(target)
            .map_err(|e| e.at_row(k))?;
        out.push_value(&value)?;
    }
    Ok(out)
}

fn compare_values(op: ComparisonOp, a: &Value, b: &Value) -> bool {
    let ordering = a.compare(b);
    match op {
        ComparisonOp::Equal => ordering == Ordering::Equal,
        ComparisonOp::NotEqual => ordering != Ordering::Equal,
        ComparisonOp::LessThan => ordering == Ordering::Less,
        ComparisonOp::LessThanOrEqual => ordering != Ordering::Greater,
        ComparisonOp::GreaterThan => ordering == Ordering::Greater,
        ComparisonOp::GreaterThanOrEqual => ordering != Ordering::Less,
    }
}

fn compare_vectors(op: ComparisonOp, left: &Vector, right: &Vector, count: usize) -> Result<Vector> {
    let mut out = Vector::with_capacity(LogicalType::Boolean, count);
    // Typed fast path for aligned integer buffers, the common case after
    // binder promotion.
    if let (VectorBuffer::I32(l), VectorBuffer::I32(r)) = (left.buffer(), right.buffer()) {
        for k in 0..count {
            if !left.is_valid(k) || !right.is_valid(k) {
                out.push_value(&Value::Null)?;
                continue;
            }
            let (a, b) = (l[left.physical_index(k)], r[right.physical_index(k)]);
            let result = match op {
                ComparisonOp::Equal => a == b,
                ComparisonOp::NotEqual => a != b,
                ComparisonOp::LessThan => a < b,
                ComparisonOp::LessThanOrEqual => a <= b,
                ComparisonOp::GreaterThan => a > b,
                ComparisonOp::GreaterThanOrEqual => a >= b,
            };
            out.push_value(&Value::Boolean(result))?;
        }
        return Ok(out);
    }
    for k in 0..count {
        if !left.is_valid(k) || !right.is_valid(k) {
            out.push_value(&Value::Null)?;
            continue;
        }
        let result = compare_values(op, &left.value_at(k), &right.value_at(k));
        out.push_value(&Value::Boolean(result))?;
    }
    Ok(out)
}

/// Three-valued AND/OR.
fn conjunction_vectors(and: bool, left: &Vector, right: &Vector, count: usize) -> Result<Vector> {
    let mut out = Vector::with_capacity(LogicalType::Boolean, count);
    for k in 0..count {
        let l = match left.is_valid(k) {
            true => match left.value_at(k) {
                Value::Boolean(b) => Some(b),
                _ => None,
            },
            false => None,
        };
        let r = match right.is_valid(k) {
            true => match right.value_at(k) {
                Value::Boolean(b) => Some(b),
                _ => None,
            },
            false => None,
        };
        let result = if and {
            match (l, r) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }
        } else {
            match (l, r) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }
        };
        match result {
            Some(b) => out.push_value(&Value::Boolean(b))?,
            None => out.push_value(&Value::Null)?,
        }
    }
    Ok(out)
}

fn arithmetic_values(
    op: ArithmeticOp,
    a: &Value,
    b: &Value,
    datatype: &LogicalType,
    row: usize,
) -> Result<Value> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    macro_rules! checked {
        ($lhs:expr, $rhs:expr, $variant:ident) => {{
            let result = match op {
                ArithmeticOp::Add => $lhs.checked_add($rhs),
                ArithmeticOp::Subtract => $lhs.checked_sub($rhs),
                ArithmeticOp::Multiply => $lhs.checked_mul($rhs),
                ArithmeticOp::Divide => {
                    if $rhs == 0 {
                        return Ok(Value::Null);
                    }
                    $lhs.checked_div($rhs)
                }
                ArithmeticOp::Remainder => {
                    if $rhs == 0 {
                        return Ok(Value::Null);
                    }
                    $lhs.checked_rem($rhs)
                }
            };
            result
                .map(Value::$variant)
                .ok_or_else(|| overflow(a, datatype, row))
        }};
    }
    match (a, b) {
        (Value::TinyInt(x), Value::TinyInt(y)) => checked!(*x, *y, TinyInt),
        (Value::SmallInt(x), Value::SmallInt(y)) => checked!(*x, *y, SmallInt),
        (Value::Integer(x), Value::Integer(y)) => checked!(*x, *y, Integer),
        (Value::BigInt(x), Value::BigInt(y)) => checked!(*x, *y, BigInt),
        (Value::Real(x), Value::Real(y)) => Ok(float_op(op, *x as f64, *y as f64)
            .map_or(Value::Null, |v| Value::Real(v as f32))),
        (Value::Double(x), Value::Double(y)) => {
            Ok(float_op(op, *x, *y).map_or(Value::Null, Value::Double))
        }
        (a, b) => Err(Error::TypeMismatch {
            expected: "matching numeric operands".into(),
            found: format!("{} {} {}", a, op.symbol(), b),
        }),
    }
}

/// Float arithmetic; a zero divisor yields `None` (NULL), matching the
/// integer path, so no Inf/NaN flows into comparisons or aggregates.
fn float_op(op: ArithmeticOp, a: f64, b: f64) -> Option<f64> {
    match op {
        ArithmeticOp::Add => Some(a + b),
        ArithmeticOp::Subtract => Some(a - b),
        ArithmeticOp::Multiply => Some(a * b),
        ArithmeticOp::Divide | ArithmeticOp::Remainder if b == 0.0 => None,
        ArithmeticOp::Divide => Some(a / b),
        ArithmeticOp::Remainder => Some(a % b),
    }
}

fn arithmetic_vectors(
    op: ArithmeticOp,
    left: &Vector,
    right: &Vector,
    datatype: &LogicalType,
    count: usize,
) -> Result<Vector> {
    let mut out = Vector::with_capacity(datatype.clone(), count);
    for k in 0..count {
        let value = arithmetic_values(op, &left.value_at(k), &right.value_at(k), datatype, k)?;
        out.push_value(&value)?;
    }
    Ok(out)
}

fn select(
    expr: &BoundExpression,
    chunk: &DataChunk,
    bind_data: &mut [Option<BindData>],
    cursor: &mut usize,
) -> Result<SelectionVector> {
    match expr {
        // A comparison produces a selection vector directly.
        BoundExpression::Comparison { op, left, right } => {
            let l = eval(left, chunk, bind_data, cursor)?;
            let r = eval(right, chunk, bind_data, cursor)?;
            let mut selected = Vec::new();
            for k in 0..chunk.len() {
                if !l.is_valid(k) || !r.is_valid(k) {
                    continue;
                }
                if compare_values(*op, &l.value_at(k), &r.value_at(k)) {
                    selected.push(k as u32);
                }
            }
            Ok(SelectionVector::new(selected))
        }
        // AND composes: the right side is only evaluated over rows the
        // left side selected.
        BoundExpression::Conjunction {
            and: true,
            left,
            right,
        } => {
            let left_sel = select(left, chunk, bind_data, cursor)?;
            if left_sel.is_empty() {
                // Keep the bind-data cursor aligned with the skipped side.
                skip_bind_data(right, cursor);
                return Ok(left_sel);
            }
            let narrowed = chunk.clone().slice(&left_sel);
            let right_sel = select(right, &narrowed, bind_data, cursor)?;
            Ok(left_sel.compose(&right_sel))
        }
        // OR merges the two selections.
        BoundExpression::Conjunction {
            and: false,
            left,
            right,
        } => {
            let left_sel = select(left, chunk, bind_data, cursor)?;
            let right_sel = select(right, chunk, bind_data, cursor)?;
            let mut merged: Vec<u32> = left_sel.iter().chain(right_sel.iter()).collect();
            merged.sort_unstable();
            merged.dedup();
            Ok(SelectionVector::new(merged))
        }
        // Everything else evaluates to a boolean vector first.
        other => {
            let vector = eval(other, chunk, bind_data, cursor)?;
            let mut selected = Vec::new();
            for k in 0..chunk.len() {
                if vector.is_valid(k) && vector.value_at(k) == Value::Boolean(true) {
                    selected.push(k as u32);
                }
            }
            Ok(SelectionVector::new(selected))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::BoundExpression as E;

    fn int_chunk(values: &[Option<i32>]) -> DataChunk {
        let mut chunk = DataChunk::with_types(&[LogicalType::Integer], values.len());
        for v in values {
            chunk
                .append_row(&[v.map(Value::Integer).unwrap_or(Value::Null)])
                .unwrap();
        }
        chunk
    }

    fn column(flat: usize) -> E {
        E::ColumnRef {
            table: 0,
            column: flat,
            flat,
            datatype: LogicalType::Integer,
            name: "a".into(),
        }
    }

    #[test]
    fn comparison_produces_selection() {
        let chunk = int_chunk(&[Some(1), Some(5), None, Some(3)]);
        let expr = E::Comparison {
            op: ComparisonOp::GreaterThan,
            left: Box::new(column(0)),
            right: Box::new(E::constant(Value::Integer(2))),
        };
        let mut executor = ExpressionExecutor::new(expr);
        let sel = executor.select(&chunk).unwrap();
        assert_eq!(sel.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn and_composes_selections() {
        let chunk = int_chunk(&[Some(1), Some(5), Some(8), Some(3)]);
        let expr = E::Conjunction {
            and: true,
            left: Box::new(E::Comparison {
                op: ComparisonOp::GreaterThan,
                left: Box::new(column(0)),
                right: Box::new(E::constant(Value::Integer(2))),
            }),
            right: Box::new(E::Comparison {
                op: ComparisonOp::LessThan,
                left: Box::new(column(0)),
                right: Box::new(E::constant(Value::Integer(8))),
            }),
        };
        let mut executor = ExpressionExecutor::new(expr);
        let sel = executor.select(&chunk).unwrap();
        assert_eq!(sel.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn cast_failure_reports_row() {
        let chunk = int_chunk(&[Some(1), Some(70000)]);
        let expr = E::Cast {
            expr: Box::new(column(0)),
            datatype: LogicalType::SmallInt,
        };
        let mut executor = ExpressionExecutor::new(expr);
        match executor.execute(&chunk) {
            Err(Error::OutOfRange { row, .. }) => assert_eq!(row, Some(1)),
            other => panic!("expected OutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn division_by_zero_is_null() {
        let chunk = DataChunk::carrier(1);
        // Float and integer paths agree: a zero divisor yields NULL, never
        // Inf or NaN.
        for op in [ArithmeticOp::Divide, ArithmeticOp::Remainder] {
            let expr = E::Arithmetic {
                op,
                left: Box::new(E::constant(Value::Double(1.0))),
                right: Box::new(E::constant(Value::Double(0.0))),
                datatype: LogicalType::Double,
            };
            let mut executor = ExpressionExecutor::new(expr);
            assert_eq!(executor.execute(&chunk).unwrap().value_at(0), Value::Null);

            let expr = E::Arithmetic {
                op,
                left: Box::new(E::constant(Value::Integer(1))),
                right: Box::new(E::constant(Value::Integer(0))),
                datatype: LogicalType::Integer,
            };
            let mut executor = ExpressionExecutor::new(expr);
            assert_eq!(executor.execute(&chunk).unwrap().value_at(0), Value::Null);
        }
        // 0.0 / 0.0 is NULL as well, not NaN.
        let expr = E::Arithmetic {
            op: ArithmeticOp::Divide,
            left: Box::new(E::constant(Value::Double(0.0))),
            right: Box::new(E::constant(Value::Double(0.0))),
            datatype: LogicalType::Double,
        };
        let mut executor = ExpressionExecutor::new(expr);
        assert_eq!(executor.execute(&chunk).unwrap().value_at(0), Value::Null);
    }

    #[test]
    fn vector_execution_matches_row_at_a_time() {
        let chunk = int_chunk(&[Some(4), None, Some(-2), Some(9)]);
        let expr = E::Arithmetic {
            op: ArithmeticOp::Multiply,
            left: Box::new(column(0)),
            right: Box::new(E::constant(Value::Integer(3))),
            datatype: LogicalType::Integer,
        };
        let mut executor = ExpressionExecutor::new(expr.clone());
        let whole = executor.execute(&chunk).unwrap();
        for k in 0..chunk.len() {
            let single = int_chunk(&[match chunk.column(0).value_at(k) {
                Value::Integer(v) => Some(v),
                _ => None,
            }]);
            let mut one = ExpressionExecutor::new(expr.clone());
            assert_eq!(one.execute(&single).unwrap().value_at(0), whole.value_at(k));
        }
    }
}
