//! Vectorized execution engine: expression evaluation, physical operators
//! and the pull loop that drives them.

pub mod expression;
pub mod operators;

pub use expression::{fold_constant, ExpressionExecutor};
pub use operators::{get_chunk, init_state, OperatorState};

use crate::binder::BoundExpression;
use crate::error::{Error, Result};
use crate::planner::{plan_select, PhysicalOperator};
use crate::storage::StorageManager;
use crate::types::Value;
use crate::vector::DataChunk;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything an operator needs to run: the storage it scans, the
/// transaction snapshot it reads under, and the statement's interrupt
/// flag, polled between chunks.
pub struct ExecutionContext<'a> {
    pub storage: &'a StorageManager,
    pub txn_id: u64,
    pub start_time: u64,
    pub interrupt: &'a AtomicBool,
}

impl ExecutionContext<'_> {
    pub fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.load(Ordering::Relaxed) {
            return Err(Error::Interrupted);
        }
        Ok(())
    }
}

/// Drive an operator tree to completion, materializing its output.
pub fn execute_to_completion(
    op: &PhysicalOperator,
    ctx: &ExecutionContext<'_>,
) -> Result<Vec<DataChunk>> {
    let mut state = init_state(op);
    let mut chunks = Vec::new();
    while let Some(chunk) = get_chunk(op, &mut state, ctx)? {
        chunks.push(chunk);
    }
    Ok(chunks)
}

fn resolve_one_subquery(
    expr: BoundExpression,
    ctx: &ExecutionContext<'_>,
) -> Result<BoundExpression> {
    match expr {
        BoundExpression::Subquery { select, datatype } => {
            let plan = plan_select(*select)?;
            let chunks = execute_to_completion(&plan, ctx)?;
            let mut rows = 0;
            let mut value = Value::Null;
            for chunk in &chunks {
                if rows == 0 && !chunk.is_empty() {
                    value = chunk.column(0).value_at(0);
                }
                rows += chunk.len();
            }
            if rows > 1 {
                return Err(Error::TypeMismatch {
                    expected: "at most one row from a scalar subquery".into(),
                    found: format!("{} rows", rows),
                });
            }
            Ok(BoundExpression::Constant {
                value,
                datatype: Some(datatype),
            })
        }
        other => Ok(other),
    }
}

/// Unnest uncorrelated scalar subqueries: each subquery plan runs once at
/// execution start and its single value replaces the expression node.
/// Nested subqueries resolve inside-out because the rewrite is bottom-up.
pub fn resolve_subqueries(
    op: PhysicalOperator,
    ctx: &ExecutionContext<'_>,
) -> Result<PhysicalOperator> {
    op.transform_expressions(&mut |expr| resolve_one_subquery(expr, ctx))
}

/// Subquery resolution for a standalone expression (INSERT values, UPDATE
/// assignments).
pub fn resolve_expression_subqueries(
    expr: BoundExpression,
    ctx: &ExecutionContext<'_>,
) -> Result<BoundExpression> {
    expr.transform(&mut |e| resolve_one_subquery(e, ctx))
}
