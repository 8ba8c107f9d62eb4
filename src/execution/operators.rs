//! Pull-based physical operators
//!
//! Operator trees are immutable and re-entrant; all mutable execution
//! state lives in `OperatorState`, owned by the executor and created fresh
//! per execution, so a prepared statement can run its tree any number of
//! times. `get_chunk` returns `None` at end of stream.

use crate::binder::BoundAggregate;
use crate::error::{Error, Result};
use crate::execution::expression::ExpressionExecutor;
use crate::execution::ExecutionContext;
use crate::functions::AggregateState;
use crate::parsing::ast::Direction;
use crate::planner::PhysicalOperator;
use crate::types::{LogicalType, Value};
use crate::vector::{DataChunk, SelectionVector, Vector, STANDARD_VECTOR_SIZE};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Mutable per-execution state, one node per operator in the tree.
pub enum OperatorState {
    Scan {
        next_group: usize,
    },
    SingleRow {
        done: bool,
    },
    Filter {
        child: Box<OperatorState>,
        predicate: ExpressionExecutor,
    },
    Projection {
        child: Box<OperatorState>,
        expressions: Vec<ExpressionExecutor>,
    },
    SimpleAggregate {
        child: Box<OperatorState>,
        arguments: Vec<Option<ExpressionExecutor>>,
        done: bool,
    },
    HashAggregate {
        child: Box<OperatorState>,
        groups: Vec<ExpressionExecutor>,
        arguments: Vec<Option<ExpressionExecutor>>,
        output: Option<Vec<DataChunk>>,
        cursor: usize,
    },
    SortedAggregate {
        child: Box<OperatorState>,
        groups: Vec<ExpressionExecutor>,
        arguments: Vec<Option<ExpressionExecutor>>,
        output: Option<Vec<DataChunk>>,
        cursor: usize,
    },
    Sort {
        child: Box<OperatorState>,
        output: Option<Vec<DataChunk>>,
        cursor: usize,
    },
    Limit {
        child: Box<OperatorState>,
        skipped: usize,
        emitted: usize,
    },
    NestedLoopJoin {
        left: Box<OperatorState>,
        right: Box<OperatorState>,
        predicate: Option<ExpressionExecutor>,
        build: Option<(Vec<LogicalType>, Vec<Vec<Value>>)>,
        buffer: Vec<Vec<Value>>,
        types: Option<Vec<LogicalType>>,
        right_done: bool,
    },
    HashJoin {
        left: Box<OperatorState>,
        right: Box<OperatorState>,
        left_keys: Vec<ExpressionExecutor>,
        right_keys: Vec<ExpressionExecutor>,
        residual: Option<ExpressionExecutor>,
        build: Option<(Vec<LogicalType>, HashMap<GroupKey, Vec<Vec<Value>>>)>,
        buffer: Vec<Vec<Value>>,
        types: Option<Vec<LogicalType>>,
        right_done: bool,
    },
}

/// Initialize the state tree for one execution of an operator tree.
pub fn init_state(op: &PhysicalOperator) -> OperatorState {
    match op {
        PhysicalOperator::Scan { .. } => OperatorState::Scan { next_group: 0 },
        PhysicalOperator::SingleRow => OperatorState::SingleRow { done: false },
        PhysicalOperator::Filter { child, predicate } => OperatorState::Filter {
            child: Box::new(init_state(child)),
            predicate: ExpressionExecutor::new(predicate.clone()),
        },
        PhysicalOperator::Projection { child, expressions } => OperatorState::Projection {
            child: Box::new(init_state(child)),
            expressions: expressions
                .iter()
                .map(|e| ExpressionExecutor::new(e.clone()))
                .collect(),
        },
        PhysicalOperator::SimpleAggregate { child, aggregates } => OperatorState::SimpleAggregate {
            child: Box::new(init_state(child)),
            arguments: argument_executors(aggregates),
            done: false,
        },
        PhysicalOperator::HashAggregate {
            child,
            groups,
            aggregates,
        } => OperatorState::HashAggregate {
            child: Box::new(init_state(child)),
            groups: groups
                .iter()
                .map(|g| ExpressionExecutor::new(g.clone()))
                .collect(),
            arguments: argument_executors(aggregates),
            output: None,
            cursor: 0,
        },
        PhysicalOperator::SortedAggregate {
            child,
            groups,
            aggregates,
        } => OperatorState::SortedAggregate {
            child: Box::new(init_state(child)),
            groups: groups
                .iter()
                .map(|g| ExpressionExecutor::new(g.clone()))
                .collect(),
            arguments: argument_executors(aggregates),
            output: None,
            cursor: 0,
        },
        PhysicalOperator::Sort { child, .. } => OperatorState::Sort {
            child: Box::new(init_state(child)),
            output: None,
            cursor: 0,
        },
        PhysicalOperator::Limit { child, .. } => OperatorState::Limit {
            child: Box::new(init_state(child)),
            skipped: 0,
            emitted: 0,
        },
        PhysicalOperator::NestedLoopJoin {
            left,
            right,
            predicate,
        } => OperatorState::NestedLoopJoin {
            left: Box::new(init_state(left)),
            right: Box::new(init_state(right)),
            predicate: predicate
                .as_ref()
                .map(|p| ExpressionExecutor::new(p.clone())),
            build: None,
            buffer: Vec::new(),
            types: None,
            right_done: false,
        },
        PhysicalOperator::HashJoin {
            left,
            right,
            left_keys,
            right_keys,
            residual,
        } => OperatorState::HashJoin {
            left: Box::new(init_state(left)),
            right: Box::new(init_state(right)),
            left_keys: left_keys
                .iter()
                .map(|k| ExpressionExecutor::new(k.clone()))
                .collect(),
            right_keys: right_keys
                .iter()
                .map(|k| ExpressionExecutor::new(k.clone()))
                .collect(),
            residual: residual
                .as_ref()
                .map(|r| ExpressionExecutor::new(r.clone())),
            build: None,
            buffer: Vec::new(),
            types: None,
            right_done: false,
        },
    }
}

fn argument_executors(aggregates: &[BoundAggregate]) -> Vec<Option<ExpressionExecutor>> {
    aggregates
        .iter()
        .map(|a| a.arg.as_ref().map(|e| ExpressionExecutor::new(e.clone())))
        .collect()
}

/// Pull the next chunk from `op`. `None` signals end of stream.
pub fn get_chunk(
    op: &PhysicalOperator,
    state: &mut OperatorState,
    ctx: &ExecutionContext<'_>,
) -> Result<Option<DataChunk>> {
    ctx.check_interrupt()?;
    match (op, state) {
        (
            PhysicalOperator::Scan {
                table,
                column_ids,
                emit_row_ids,
                ..
            },
            OperatorState::Scan { next_group },
        ) => {
            let data = ctx.storage.table(table)?;
            let all_columns: Vec<usize>;
            let columns: &[usize] = if column_ids.is_empty() && *emit_row_ids {
                all_columns = (0..data.column_count()).collect();
                &all_columns
            } else {
                column_ids
            };
            while *next_group < data.row_group_count() {
                let group = *next_group;
                *next_group += 1;
                let Some(scan) = data.scan_group(group, columns, ctx.txn_id, ctx.start_time)
                else {
                    continue;
                };
                if scan.row_ids.is_empty() {
                    continue;
                }
                let count = scan.row_ids.len();
                let mut vectors = scan.columns;
                if *emit_row_ids {
                    let mut ids = Vector::with_capacity(LogicalType::BigInt, count);
                    for id in &scan.row_ids {
                        ids.push_value(&Value::BigInt(*id as i64))?;
                    }
                    vectors.push(ids);
                }
                if vectors.is_empty() {
                    return Ok(Some(DataChunk::carrier(count)));
                }
                return Ok(Some(DataChunk::new(vectors)));
            }
            Ok(None)
        }

        (PhysicalOperator::SingleRow, OperatorState::SingleRow { done }) => {
            if *done {
                return Ok(None);
            }
            *done = true;
            Ok(Some(DataChunk::carrier(1)))
        }

        (PhysicalOperator::Filter { child, .. }, OperatorState::Filter { child: cstate, predicate }) => {
            while let Some(chunk) = get_chunk(child, cstate, ctx)? {
                let sel = predicate.select(&chunk)?;
                if sel.is_empty() {
                    continue;
                }
                return Ok(Some(chunk.slice(&sel)));
            }
            Ok(None)
        }

        (
            PhysicalOperator::Projection { child, .. },
            OperatorState::Projection {
                child: cstate,
                expressions,
            },
        ) => {
            let Some(chunk) = get_chunk(child, cstate, ctx)? else {
                return Ok(None);
            };
            let count = chunk.len();
            let vectors = expressions
                .iter_mut()
                .map(|e| e.execute(&chunk))
                .collect::<Result<Vec<_>>>()?;
            if vectors.is_empty() {
                return Ok(Some(DataChunk::carrier(count)));
            }
            Ok(Some(DataChunk::new(vectors)))
        }

        (
            PhysicalOperator::SimpleAggregate { child, aggregates },
            OperatorState::SimpleAggregate {
                child: cstate,
                arguments,
                done,
            },
        ) => {
            if *done {
                return Ok(None);
            }
            *done = true;
            let mut states: Vec<AggregateState> =
                aggregates.iter().map(|a| AggregateState::new(a.kind)).collect();
            while let Some(chunk) = get_chunk(child, cstate, ctx)? {
                ctx.check_interrupt()?;
                update_aggregates(&chunk, arguments, &mut states)?;
            }
            let mut chunk = DataChunk::with_types(
                &aggregates.iter().map(|a| a.datatype.clone()).collect::<Vec<_>>(),
                1,
            );
            let row = states
                .iter()
                .zip(aggregates)
                .map(|(s, a)| s.finalize(&a.datatype))
                .collect::<Result<Vec<_>>>()?;
            chunk.append_row(&row)?;
            Ok(Some(chunk))
        }

        (
            PhysicalOperator::HashAggregate { child, aggregates, groups },
            OperatorState::HashAggregate {
                child: cstate,
                groups: group_exprs,
                arguments,
                output,
                cursor,
            },
        ) => {
            if output.is_none() {
                // Build phase: hash every input row into its group.
                let mut table: HashMap<GroupKey, Vec<AggregateState>> = HashMap::new();
                let mut order: Vec<GroupKey> = Vec::new();
                while let Some(chunk) = get_chunk(child, cstate, ctx)? {
                    ctx.check_interrupt()?;
                    let key_vectors = group_exprs
                        .iter_mut()
                        .map(|g| g.execute(&chunk))
                        .collect::<Result<Vec<_>>>()?;
                    let arg_vectors = argument_vectors(&chunk, arguments)?;
                    for k in 0..chunk.len() {
                        let key =
                            GroupKey(key_vectors.iter().map(|v| v.value_at(k)).collect());
                        if !table.contains_key(&key) {
                            order.push(key.clone());
                        }
                        let states = table.entry(key).or_insert_with(|| {
                            aggregates
                                .iter()
                                .map(|a| AggregateState::new(a.kind))
                                .collect()
                        });
                        for (slot, vector) in arg_vectors.iter().enumerate() {
                            states[slot].update(vector.as_ref().map(|v| v.value_at(k)).as_ref());
                        }
                    }
                }
                *output = Some(emit_groups(&order, &table, groups, group_exprs, aggregates)?);
            }
            next_buffered(output, cursor)
        }

        (
            PhysicalOperator::SortedAggregate { child, aggregates, groups },
            OperatorState::SortedAggregate {
                child: cstate,
                groups: group_exprs,
                arguments,
                output,
                cursor,
            },
        ) => {
            if output.is_none() {
                // The child is ordered on the group keys, so groups arrive
                // as contiguous runs.
                let mut rows: Vec<Vec<Value>> = Vec::new();
                let mut current: Option<(GroupKey, Vec<AggregateState>)> = None;
                while let Some(chunk) = get_chunk(child, cstate, ctx)? {
                    ctx.check_interrupt()?;
                    let key_vectors = group_exprs
                        .iter_mut()
                        .map(|g| g.execute(&chunk))
                        .collect::<Result<Vec<_>>>()?;
                    let arg_vectors = argument_vectors(&chunk, arguments)?;
                    for k in 0..chunk.len() {
                        let key =
                            GroupKey(key_vectors.iter().map(|v| v.value_at(k)).collect());
                        let switch = match &current {
                            Some((open, _)) => *open != key,
                            None => true,
                        };
                        if switch {
                            if let Some((open, states)) = current.take() {
                                rows.push(finalize_group(open, &states, aggregates)?);
                            }
                            current = Some((
                                key,
                                aggregates
                                    .iter()
                                    .map(|a| AggregateState::new(a.kind))
                                    .collect(),
                            ));
                        }
                        if let Some((_, states)) = &mut current {
                            for (slot, vector) in arg_vectors.iter().enumerate() {
                                states[slot]
                                    .update(vector.as_ref().map(|v| v.value_at(k)).as_ref());
                            }
                        }
                    }
                }
                if let Some((open, states)) = current.take() {
                    rows.push(finalize_group(open, &states, aggregates)?);
                }
                let types = aggregate_output_types(groups, aggregates);
                *output = Some(chunks_from_rows(&types, rows)?);
            }
            next_buffered(output, cursor)
        }

        (PhysicalOperator::Sort { child, keys }, OperatorState::Sort { child: cstate, output, cursor }) => {
            if output.is_none() {
                let mut types: Option<Vec<LogicalType>> = None;
                let mut rows: Vec<Vec<Value>> = Vec::new();
                while let Some(chunk) = get_chunk(child, cstate, ctx)? {
                    ctx.check_interrupt()?;
                    if types.is_none() {
                        types = Some(
                            chunk
                                .columns()
                                .iter()
                                .map(|v| v.logical_type().clone())
                                .collect(),
                        );
                    }
                    for k in 0..chunk.len() {
                        rows.push(chunk.row(k));
                    }
                }
                let Some(types) = types else {
                    *output = Some(Vec::new());
                    return next_buffered(output, cursor);
                };
                // Stable sort: ties keep their input order. NULLs sort
                // first ascending, last descending.
                rows.sort_by(|a, b| compare_rows(a, b, keys));
                *output = Some(chunks_from_rows(&types, rows)?);
            }
            next_buffered(output, cursor)
        }

        (
            PhysicalOperator::Limit { child, limit, offset },
            OperatorState::Limit {
                child: cstate,
                skipped,
                emitted,
            },
        ) => {
            loop {
                if let Some(limit) = limit {
                    if *emitted >= *limit {
                        return Ok(None);
                    }
                }
                let Some(chunk) = get_chunk(child, cstate, ctx)? else {
                    return Ok(None);
                };
                let mut keep = Vec::new();
                for k in 0..chunk.len() {
                    if *skipped < *offset {
                        *skipped += 1;
                        continue;
                    }
                    if let Some(limit) = limit {
                        if *emitted >= *limit {
                            break;
                        }
                    }
                    keep.push(k as u32);
                    *emitted += 1;
                }
                if keep.is_empty() {
                    continue;
                }
                return Ok(Some(chunk.slice(&SelectionVector::new(keep))));
            }
        }

        (
            PhysicalOperator::NestedLoopJoin { left, right, .. },
            OperatorState::NestedLoopJoin {
                left: lstate,
                right: rstate,
                predicate,
                build,
                buffer,
                types,
                right_done,
            },
        ) => {
            if build.is_none() {
                let (left_types, left_rows) = materialize(left, lstate, ctx)?;
                *build = Some((left_types, left_rows));
            }
            let (left_types, left_rows) = build
                .as_ref()
                .ok_or_else(|| Error::Internal("join build side missing".into()))?;
            if left_rows.is_empty() {
                return Ok(None);
            }
            loop {
                if buffer.len() >= STANDARD_VECTOR_SIZE || (*right_done && !buffer.is_empty()) {
                    let types = types
                        .as_ref()
                        .ok_or_else(|| Error::Internal("join output types missing".into()))?;
                    return flush_buffer(types, buffer);
                }
                if *right_done {
                    return Ok(None);
                }
                let Some(chunk) = get_chunk(right, rstate, ctx)? else {
                    *right_done = true;
                    continue;
                };
                ctx.check_interrupt()?;
                let right_types: Vec<LogicalType> = chunk
                    .columns()
                    .iter()
                    .map(|v| v.logical_type().clone())
                    .collect();
                let combined_types: Vec<LogicalType> = left_types
                    .iter()
                    .cloned()
                    .chain(right_types)
                    .collect();
                let mut candidates = Vec::new();
                for k in 0..chunk.len() {
                    let right_row = chunk.row(k);
                    for left_row in left_rows {
                        let mut row = left_row.clone();
                        row.extend(right_row.iter().cloned());
                        candidates.push(row);
                    }
                }
                let mut accepted =
                    filter_rows(&combined_types, candidates, predicate.as_mut())?;
                buffer.append(&mut accepted);
                *types = Some(combined_types);
            }
        }

        (
            PhysicalOperator::HashJoin { left, right, .. },
            OperatorState::HashJoin {
                left: lstate,
                right: rstate,
                left_keys,
                right_keys,
                residual,
                build,
                buffer,
                types,
                right_done,
            },
        ) => {
            if build.is_none() {
                // Build phase: hash the left side on its join keys. NULL
                // keys never match and are not inserted.
                let mut table: HashMap<GroupKey, Vec<Vec<Value>>> = HashMap::new();
                let mut left_types = Vec::new();
                while let Some(chunk) = get_chunk(left, lstate, ctx)? {
                    ctx.check_interrupt()?;
                    if left_types.is_empty() {
                        left_types = chunk
                            .columns()
                            .iter()
                            .map(|v| v.logical_type().clone())
                            .collect();
                    }
                    let key_vectors = left_keys
                        .iter_mut()
                        .map(|e| e.execute(&chunk))
                        .collect::<Result<Vec<_>>>()?;
                    for k in 0..chunk.len() {
                        let key: Vec<Value> =
                            key_vectors.iter().map(|v| v.value_at(k)).collect();
                        if key.iter().any(Value::is_null) {
                            continue;
                        }
                        table.entry(GroupKey(key)).or_default().push(chunk.row(k));
                    }
                }
                *build = Some((left_types, table));
            }
            let (left_types, table) = build
                .as_ref()
                .ok_or_else(|| Error::Internal("join build side missing".into()))?;
            loop {
                if buffer.len() >= STANDARD_VECTOR_SIZE || (*right_done && !buffer.is_empty()) {
                    let types = types
                        .as_ref()
                        .ok_or_else(|| Error::Internal("join output types missing".into()))?;
                    return flush_buffer(types, buffer);
                }
                if *right_done {
                    return Ok(None);
                }
                let Some(chunk) = get_chunk(right, rstate, ctx)? else {
                    *right_done = true;
                    continue;
                };
                ctx.check_interrupt()?;
                if table.is_empty() {
                    continue;
                }
                let right_types: Vec<LogicalType> = chunk
                    .columns()
                    .iter()
                    .map(|v| v.logical_type().clone())
                    .collect();
                let combined_types: Vec<LogicalType> = left_types
                    .iter()
                    .cloned()
                    .chain(right_types)
                    .collect();
                let key_vectors = right_keys
                    .iter_mut()
                    .map(|e| e.execute(&chunk))
                    .collect::<Result<Vec<_>>>()?;
                let mut candidates = Vec::new();
                for k in 0..chunk.len() {
                    let key: Vec<Value> = key_vectors.iter().map(|v| v.value_at(k)).collect();
                    if key.iter().any(Value::is_null) {
                        continue;
                    }
                    let Some(matches) = table.get(&GroupKey(key)) else {
                        continue;
                    };
                    let right_row = chunk.row(k);
                    for left_row in matches {
                        let mut row = left_row.clone();
                        row.extend(right_row.iter().cloned());
                        candidates.push(row);
                    }
                }
                let mut accepted = filter_rows(&combined_types, candidates, residual.as_mut())?;
                buffer.append(&mut accepted);
                *types = Some(combined_types);
            }
        }

        _ => Err(Error::Internal(
            "operator state does not match operator tree".into(),
        )),
    }
}

/// Group keys hash NULL as its own group and floats by bit pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupKey(pub Vec<Value>);

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            match value {
                Value::Null => 0u8.hash(state),
                Value::Boolean(b) => (1u8, b).hash(state),
                Value::TinyInt(v) => (2u8, v).hash(state),
                Value::SmallInt(v) => (3u8, v).hash(state),
                Value::Integer(v) => (4u8, v).hash(state),
                Value::BigInt(v) => (5u8, v).hash(state),
                Value::Real(v) => (6u8, v.to_bits()).hash(state),
                Value::Double(v) => (7u8, v.to_bits()).hash(state),
                Value::Date(v) => (8u8, v).hash(state),
                Value::Timestamp(v) => (9u8, v).hash(state),
                Value::Varchar(s) => (10u8, s).hash(state),
                Value::Blob(b) => (11u8, b).hash(state),
            }
        }
    }
}

fn update_aggregates(
    chunk: &DataChunk,
    arguments: &mut [Option<ExpressionExecutor>],
    states: &mut [AggregateState],
) -> Result<()> {
    let vectors = argument_vectors(chunk, arguments)?;
    for k in 0..chunk.len() {
        for (slot, vector) in vectors.iter().enumerate() {
            states[slot].update(vector.as_ref().map(|v| v.value_at(k)).as_ref());
        }
    }
    Ok(())
}

fn argument_vectors(
    chunk: &DataChunk,
    arguments: &mut [Option<ExpressionExecutor>],
) -> Result<Vec<Option<Vector>>> {
    arguments
        .iter_mut()
        .map(|a| a.as_mut().map(|e| e.execute(chunk)).transpose())
        .collect()
}

fn aggregate_output_types(
    groups: &[crate::binder::BoundExpression],
    aggregates: &[BoundAggregate],
) -> Vec<LogicalType> {
    groups
        .iter()
        .map(|g| g.return_type().unwrap_or(LogicalType::Varchar(None)))
        .chain(aggregates.iter().map(|a| a.datatype.clone()))
        .collect()
}

fn finalize_group(
    key: GroupKey,
    states: &[AggregateState],
    aggregates: &[BoundAggregate],
) -> Result<Vec<Value>> {
    let mut row = key.0;
    for (state, aggregate) in states.iter().zip(aggregates) {
        row.push(state.finalize(&aggregate.datatype)?);
    }
    Ok(row)
}

fn emit_groups(
    order: &[GroupKey],
    table: &HashMap<GroupKey, Vec<AggregateState>>,
    groups: &[crate::binder::BoundExpression],
    group_exprs: &[ExpressionExecutor],
    aggregates: &[BoundAggregate],
) -> Result<Vec<DataChunk>> {
    debug_assert_eq!(groups.len(), group_exprs.len());
    let types = aggregate_output_types(groups, aggregates);
    let mut rows = Vec::with_capacity(order.len());
    for key in order {
        let states = table
            .get(key)
            .ok_or_else(|| Error::Internal("group vanished from hash table".into()))?;
        rows.push(finalize_group(key.clone(), states, aggregates)?);
    }
    chunks_from_rows(&types, rows)
}

fn chunks_from_rows(types: &[LogicalType], rows: Vec<Vec<Value>>) -> Result<Vec<DataChunk>> {
    let mut chunks = Vec::new();
    for window in rows.chunks(STANDARD_VECTOR_SIZE) {
        let mut chunk = DataChunk::with_types(types, window.len());
        for row in window {
            chunk.append_row(row)?;
        }
        chunks.push(chunk);
    }
    Ok(chunks)
}

fn next_buffered(output: &mut Option<Vec<DataChunk>>, cursor: &mut usize) -> Result<Option<DataChunk>> {
    let Some(chunks) = output else {
        return Ok(None);
    };
    if *cursor >= chunks.len() {
        return Ok(None);
    }
    let chunk = chunks[*cursor].clone();
    *cursor += 1;
    Ok(Some(chunk))
}

fn compare_rows(a: &[Value], b: &[Value], keys: &[(usize, Direction)]) -> Ordering {
    for (index, direction) in keys {
        let (x, y) = (&a[*index], &b[*index]);
        let ordering = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            // NULLs first ascending; the descending reversal below puts
            // them last.
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => x.compare(y),
        };
        let ordering = match direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn materialize(
    op: &PhysicalOperator,
    state: &mut OperatorState,
    ctx: &ExecutionContext<'_>,
) -> Result<(Vec<LogicalType>, Vec<Vec<Value>>)> {
    let mut types = Vec::new();
    let mut rows = Vec::new();
    while let Some(chunk) = get_chunk(op, state, ctx)? {
        ctx.check_interrupt()?;
        if types.is_empty() {
            types = chunk
                .columns()
                .iter()
                .map(|v| v.logical_type().clone())
                .collect();
        }
        for k in 0..chunk.len() {
            rows.push(chunk.row(k));
        }
    }
    Ok((types, rows))
}

fn filter_rows(
    types: &[LogicalType],
    candidates: Vec<Vec<Value>>,
    predicate: Option<&mut ExpressionExecutor>,
) -> Result<Vec<Vec<Value>>> {
    let Some(predicate) = predicate else {
        return Ok(candidates);
    };
    if candidates.is_empty() {
        return Ok(candidates);
    }
    let mut accepted = Vec::new();
    for window in candidates.chunks(STANDARD_VECTOR_SIZE) {
        let mut chunk = DataChunk::with_types(types, window.len());
        for row in window {
            chunk.append_row(row)?;
        }
        let sel = predicate.select(&chunk)?;
        for k in sel.iter() {
            accepted.push(window[k as usize].clone());
        }
    }
    Ok(accepted)
}

fn flush_buffer(types: &[LogicalType], buffer: &mut Vec<Vec<Value>>) -> Result<Option<DataChunk>> {
    let take = buffer.len().min(STANDARD_VECTOR_SIZE);
    let mut chunk = DataChunk::with_types(types, take);
    for row in buffer.drain(..take) {
        chunk.append_row(&row)?;
    }
    Ok(Some(chunk))
}
