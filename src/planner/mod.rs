//! Query planner and optimizer
//!
//! Lowers bound statements into physical operator trees, applying the rule
//! pipeline in order: constant folding, predicate pushdown into scans,
//! projection pruning, and physical algorithm selection (hash vs. sorted
//! aggregation, hash vs. nested-loop join). Uncorrelated scalar subqueries
//! are kept in the expression tree and evaluated once at execution start.

use crate::binder::{
    transform_statement, BoundAggregate, BoundExpression, BoundSelect, BoundStatement, BoundUpdate,
    ComparisonOp,
};
use crate::catalog::TableCatalogEntry;
use crate::error::{Error, Result};
use crate::execution::fold_constant;
use crate::parsing::ast::Direction;
use crate::types::{LogicalType, Value};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone)]
pub enum PhysicalOperator {
    /// Scan a table's visible rows under the current snapshot. Emits the
    /// listed columns, plus a trailing BIGINT row-id column when
    /// `emit_row_ids` is set.
    Scan {
        table: String,
        column_ids: Vec<usize>,
        types: Vec<LogicalType>,
        emit_row_ids: bool,
    },
    /// Produces a single zero-column row; used for FROM-less selects.
    SingleRow,
    Filter {
        child: Box<PhysicalOperator>,
        predicate: BoundExpression,
    },
    Projection {
        child: Box<PhysicalOperator>,
        expressions: Vec<BoundExpression>,
    },
    HashAggregate {
        child: Box<PhysicalOperator>,
        groups: Vec<BoundExpression>,
        aggregates: Vec<BoundAggregate>,
    },
    /// Group-by over an input already ordered on the group keys.
    SortedAggregate {
        child: Box<PhysicalOperator>,
        groups: Vec<BoundExpression>,
        aggregates: Vec<BoundAggregate>,
    },
    /// Ungrouped aggregation producing exactly one row.
    SimpleAggregate {
        child: Box<PhysicalOperator>,
        aggregates: Vec<BoundAggregate>,
    },
    Sort {
        child: Box<PhysicalOperator>,
        keys: Vec<(usize, Direction)>,
    },
    Limit {
        child: Box<PhysicalOperator>,
        limit: Option<usize>,
        offset: usize,
    },
    NestedLoopJoin {
        left: Box<PhysicalOperator>,
        right: Box<PhysicalOperator>,
        predicate: Option<BoundExpression>,
    },
    HashJoin {
        left: Box<PhysicalOperator>,
        right: Box<PhysicalOperator>,
        left_keys: Vec<BoundExpression>,
        right_keys: Vec<BoundExpression>,
        residual: Option<BoundExpression>,
    },
}

#[derive(Debug, Clone)]
pub enum PhysicalPlan {
    Query {
        root: PhysicalOperator,
        names: Vec<String>,
    },
    Insert {
        table: String,
        rows: Vec<Vec<BoundExpression>>,
    },
    Update {
        table: String,
        child: PhysicalOperator,
        assignments: Vec<(usize, BoundExpression)>,
    },
    Delete {
        table: String,
        child: PhysicalOperator,
    },
    CreateTable(TableCatalogEntry),
    DropTable {
        name: String,
        if_exists: bool,
        cascade: bool,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    Begin,
    Commit,
    Rollback,
    Checkpoint,
    Explain(String),
}

/// Plan a bound statement.
pub fn plan(statement: BoundStatement) -> Result<PhysicalPlan> {
    // Constant folding runs over every expression in the statement before
    // lowering.
    let statement = transform_statement(statement, &mut fold_expression)?;
    match statement {
        BoundStatement::Select(select) => {
            let names = select.output_names();
            let root = plan_select(select)?;
            Ok(PhysicalPlan::Query { root, names })
        }
        BoundStatement::Insert(insert) => Ok(PhysicalPlan::Insert {
            table: insert.table,
            rows: insert.rows,
        }),
        BoundStatement::Update(update) => plan_update(update),
        BoundStatement::Delete { table, predicate } => {
            let child = dml_scan(&table, predicate)?;
            Ok(PhysicalPlan::Delete { table, child })
        }
        BoundStatement::CreateTable(entry) => Ok(PhysicalPlan::CreateTable(entry)),
        BoundStatement::DropTable {
            name,
            if_exists,
            cascade,
        } => Ok(PhysicalPlan::DropTable {
            name,
            if_exists,
            cascade,
        }),
        BoundStatement::RenameColumn { table, from, to } => {
            Ok(PhysicalPlan::RenameColumn { table, from, to })
        }
        BoundStatement::Begin => Ok(PhysicalPlan::Begin),
        BoundStatement::Commit => Ok(PhysicalPlan::Commit),
        BoundStatement::Rollback => Ok(PhysicalPlan::Rollback),
        BoundStatement::Checkpoint => Ok(PhysicalPlan::Checkpoint),
        BoundStatement::Explain(inner) => {
            let planned = plan(*inner)?;
            Ok(PhysicalPlan::Explain(planned.to_string()))
        }
    }
}

/// Fold a foldable non-constant expression into a constant, bottom-up.
pub fn fold_expression(expr: BoundExpression) -> Result<BoundExpression> {
    if matches!(expr, BoundExpression::Constant { .. }) || !expr.is_foldable() {
        return Ok(expr);
    }
    let datatype = expr.return_type();
    let value = fold_constant(&expr)?;
    Ok(BoundExpression::Constant {
        datatype: datatype.or_else(|| value.data_type()),
        value,
    })
}

/// Plan the scan + filter pipeline feeding UPDATE and DELETE. The scan
/// emits every table column plus row ids; predicates keep their bind-time
/// flat indices.
fn dml_scan(table: &str, predicate: Option<BoundExpression>) -> Result<PhysicalOperator> {
    let mut child = PhysicalOperator::Scan {
        table: table.to_string(),
        column_ids: Vec::new(), // filled by the executor from the catalog
        types: Vec::new(),
        emit_row_ids: true,
    };
    if let Some(predicate) = predicate {
        child = PhysicalOperator::Filter {
            child: Box::new(child),
            predicate,
        };
    }
    Ok(child)
}

fn plan_update(update: BoundUpdate) -> Result<PhysicalPlan> {
    let child = dml_scan(&update.table, update.predicate)?;
    Ok(PhysicalPlan::Update {
        table: update.table,
        child,
        assignments: update.assignments,
    })
}

/// Split a conjunction into its AND-ed conjuncts.
fn split_conjuncts(expr: BoundExpression, into: &mut Vec<BoundExpression>) {
    match expr {
        BoundExpression::Conjunction { and: true, left, right } => {
            split_conjuncts(*left, into);
            split_conjuncts(*right, into);
        }
        other => into.push(other),
    }
}

fn conjoin(mut conjuncts: Vec<BoundExpression>) -> Option<BoundExpression> {
    let mut result = conjuncts.pop()?;
    while let Some(next) = conjuncts.pop() {
        result = BoundExpression::Conjunction {
            and: true,
            left: Box::new(next),
            right: Box::new(result),
        };
    }
    Some(result)
}

/// The set of tables an expression references.
fn referenced_tables(expr: &BoundExpression) -> BTreeSet<usize> {
    let mut tables = BTreeSet::new();
    expr.walk(&mut |e| {
        if let BoundExpression::ColumnRef { table, .. } = e {
            tables.insert(*table);
        }
    });
    tables
}

/// Rewrite every column reference through `map(table, column) -> flat`.
fn rewrite_columns(
    expr: BoundExpression,
    map: &impl Fn(usize, usize) -> usize,
) -> Result<BoundExpression> {
    expr.transform(&mut |e| {
        Ok(match e {
            BoundExpression::ColumnRef {
                table,
                column,
                datatype,
                name,
                ..
            } => BoundExpression::ColumnRef {
                table,
                column,
                flat: map(table, column),
                datatype,
                name,
            },
            other => other,
        })
    })
}

fn extract_limit(expr: Option<BoundExpression>) -> Result<Option<usize>> {
    match expr {
        None => Ok(None),
        Some(BoundExpression::Constant { value, .. }) => match value {
            Value::Null => Ok(None),
            Value::BigInt(n) if n >= 0 => Ok(Some(n as usize)),
            other => Err(Error::TypeMismatch {
                expected: "a non-negative LIMIT".into(),
                found: other.to_string(),
            }),
        },
        Some(_) => Err(Error::TypeMismatch {
            expected: "a constant LIMIT".into(),
            found: "a non-constant expression".into(),
        }),
    }
}

/// Lower a bound SELECT into a physical operator tree.
pub fn plan_select(select: BoundSelect) -> Result<PhysicalOperator> {
    let BoundSelect {
        tables,
        predicate,
        groups,
        aggregates,
        projections,
        names: _,
        hidden,
        order_by,
        limit,
        offset,
    } = select;

    let limit = extract_limit(limit)?;
    let offset = extract_limit(offset)?.unwrap_or(0);

    // FROM-less queries evaluate projections over a single carrier row.
    if tables.is_empty() {
        let mut root = PhysicalOperator::Projection {
            child: Box::new(PhysicalOperator::SingleRow),
            expressions: projections,
        };
        if !order_by.is_empty() {
            root = PhysicalOperator::Sort {
                child: Box::new(root),
                keys: order_by,
            };
        }
        root = trim_hidden(root, hidden);
        if limit.is_some() || offset > 0 {
            root = PhysicalOperator::Limit {
                child: Box::new(root),
                limit,
                offset,
            };
        }
        return Ok(root);
    }

    // Projection pruning: every expression that executes above the scans
    // decides which columns each scan emits.
    let mut used: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); tables.len()];
    {
        let mut collect = |expr: &BoundExpression| {
            expr.walk(&mut |e| {
                if let BoundExpression::ColumnRef { table, column, .. } = e {
                    used[*table].insert(*column);
                }
            });
        };
        if let Some(p) = &predicate {
            collect(p);
        }
        for g in &groups {
            collect(g);
        }
        for a in &aggregates {
            if let Some(arg) = &a.arg {
                collect(arg);
            }
        }
        for p in &projections {
            collect(p);
        }
    }

    // Flat index maps. `local` indexes into a single table's pruned scan
    // output, `global` into the concatenation of all pruned scans.
    let pruned: Vec<Vec<usize>> = used.iter().map(|set| set.iter().copied().collect()).collect();
    let mut offsets = Vec::with_capacity(tables.len());
    let mut offset_acc = 0;
    for columns in &pruned {
        offsets.push(offset_acc);
        offset_acc += columns.len();
    }
    let rank = |table: usize, column: usize| -> usize {
        pruned[table]
            .iter()
            .position(|&c| c == column)
            .unwrap_or_default()
    };
    let global = |table: usize, column: usize| offsets[table] + rank(table, column);
    let local = |table: usize, column: usize| rank(table, column);

    // Predicate pushdown: single-table conjuncts filter directly above
    // their scan, the rest apply after the joins.
    let mut conjuncts = Vec::new();
    if let Some(p) = predicate {
        split_conjuncts(p, &mut conjuncts);
    }
    let mut scan_filters: Vec<Vec<BoundExpression>> = vec![Vec::new(); tables.len()];
    let mut post_join = Vec::new();
    for conjunct in conjuncts {
        let refs = referenced_tables(&conjunct);
        if refs.len() <= 1 {
            let table = refs.into_iter().next().unwrap_or(0);
            scan_filters[table].push(rewrite_columns(conjunct, &local)?);
        } else {
            post_join.push(conjunct);
        }
    }

    // Build the scans and join them left-deep.
    let mut root: Option<PhysicalOperator> = None;
    for (t, table) in tables.iter().enumerate() {
        let mut scan = PhysicalOperator::Scan {
            table: table.table.clone(),
            column_ids: pruned[t].clone(),
            types: pruned[t]
                .iter()
                .map(|&c| table.column_types[c].clone())
                .collect(),
            emit_row_ids: false,
        };
        if let Some(filter) = conjoin(std::mem::take(&mut scan_filters[t])) {
            scan = PhysicalOperator::Filter {
                child: Box::new(scan),
                predicate: filter,
            };
        }
        root = Some(match root {
            None => scan,
            Some(left) => plan_join(left, scan, t, &mut post_join, &global, &local)?,
        });
    }
    let mut root = root.unwrap_or(PhysicalOperator::SingleRow);

    // Any remaining multi-table conjuncts filter above the joins.
    let post_join: Vec<BoundExpression> = post_join
        .into_iter()
        .map(|c| rewrite_columns(c, &global))
        .collect::<Result<Vec<_>>>()?;
    if let Some(filter) = conjoin(post_join) {
        root = PhysicalOperator::Filter {
            child: Box::new(root),
            predicate: filter,
        };
    }

    let groups: Vec<BoundExpression> = groups
        .into_iter()
        .map(|g| rewrite_columns(g, &global))
        .collect::<Result<Vec<_>>>()?;
    let aggregates: Vec<BoundAggregate> = aggregates
        .into_iter()
        .map(|a| {
            Ok(BoundAggregate {
                kind: a.kind,
                arg: a.arg.map(|e| rewrite_columns(e, &global)).transpose()?,
                datatype: a.datatype,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let projections: Vec<BoundExpression> = projections
        .into_iter()
        .map(|p| rewrite_columns(p, &global))
        .collect::<Result<Vec<_>>>()?;

    // Aggregation: sorted grouping when the requested output order is the
    // group keys themselves (the sort then happens below the aggregate);
    // hash grouping otherwise.
    let has_aggregation = !groups.is_empty() || !aggregates.is_empty();
    let mut sorted_grouping = false;
    if has_aggregation {
        if groups.is_empty() {
            root = PhysicalOperator::SimpleAggregate {
                child: Box::new(root),
                aggregates,
            };
        } else {
            sorted_grouping = !order_by.is_empty()
                && order_by.iter().all(|(index, direction)| {
                    *direction == Direction::Ascending
                        && matches!(
                            projections.get(*index),
                            Some(BoundExpression::Reference { index, .. }) if *index < groups.len()
                        )
                })
                && groups
                    .iter()
                    .all(|g| matches!(g, BoundExpression::ColumnRef { .. }));
            if sorted_grouping {
                let keys = groups
                    .iter()
                    .map(|g| match g {
                        BoundExpression::ColumnRef { flat, .. } => (*flat, Direction::Ascending),
                        _ => unreachable!(),
                    })
                    .collect();
                root = PhysicalOperator::SortedAggregate {
                    child: Box::new(PhysicalOperator::Sort {
                        child: Box::new(root),
                        keys,
                    }),
                    groups,
                    aggregates,
                };
            } else {
                root = PhysicalOperator::HashAggregate {
                    child: Box::new(root),
                    groups,
                    aggregates,
                };
            }
        }
    }

    root = PhysicalOperator::Projection {
        child: Box::new(root),
        expressions: projections,
    };

    if !order_by.is_empty() && !sorted_grouping {
        root = PhysicalOperator::Sort {
            child: Box::new(root),
            keys: order_by,
        };
    }
    root = trim_hidden(root, hidden);
    if limit.is_some() || offset > 0 {
        root = PhysicalOperator::Limit {
            child: Box::new(root),
            limit,
            offset,
        };
    }
    Ok(root)
}

/// Drop trailing hidden ORDER BY columns with a final narrow projection.
fn trim_hidden(root: PhysicalOperator, hidden: usize) -> PhysicalOperator {
    if hidden == 0 {
        return root;
    }
    let width = output_width(&root);
    let expressions = (0..width - hidden)
        .map(|i| BoundExpression::Reference {
            index: i,
            datatype: LogicalType::Varchar(None),
        })
        .collect();
    PhysicalOperator::Projection {
        child: Box::new(root),
        expressions,
    }
}

fn output_width(op: &PhysicalOperator) -> usize {
    match op {
        PhysicalOperator::Scan {
            column_ids,
            emit_row_ids,
            ..
        } => column_ids.len() + usize::from(*emit_row_ids),
        PhysicalOperator::SingleRow => 0,
        PhysicalOperator::Filter { child, .. } | PhysicalOperator::Limit { child, .. } => {
            output_width(child)
        }
        PhysicalOperator::Projection { expressions, .. } => expressions.len(),
        PhysicalOperator::HashAggregate {
            groups, aggregates, ..
        }
        | PhysicalOperator::SortedAggregate {
            groups, aggregates, ..
        } => groups.len() + aggregates.len(),
        PhysicalOperator::SimpleAggregate { aggregates, .. } => aggregates.len(),
        PhysicalOperator::Sort { child, .. } => output_width(child),
        PhysicalOperator::NestedLoopJoin { left, right, .. }
        | PhysicalOperator::HashJoin { left, right, .. } => {
            output_width(left) + output_width(right)
        }
    }
}

/// Join the accumulated left side with the scan of table `t`. Equi-conjuncts
/// between the two sides select a hash join; everything else falls back to
/// a nested loop.
fn plan_join(
    left: PhysicalOperator,
    right: PhysicalOperator,
    right_table: usize,
    pending: &mut Vec<BoundExpression>,
    global: &impl Fn(usize, usize) -> usize,
    local: &impl Fn(usize, usize) -> usize,
) -> Result<PhysicalOperator> {
    // Conjuncts that only mention tables joined so far can run here.
    let applicable: Vec<BoundExpression> = {
        let mut applicable = Vec::new();
        let mut rest = Vec::new();
        for conjunct in pending.drain(..) {
            let refs = referenced_tables(&conjunct);
            if refs.iter().all(|&t| t <= right_table) {
                applicable.push(conjunct);
            } else {
                rest.push(conjunct);
            }
        }
        *pending = rest;
        applicable
    };

    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    let mut residual = Vec::new();
    for conjunct in applicable {
        if let BoundExpression::Comparison {
            op: ComparisonOp::Equal,
            left: l,
            right: r,
        } = &conjunct
        {
            let lrefs = referenced_tables(l);
            let rrefs = referenced_tables(r);
            let l_on_left = !lrefs.is_empty() && lrefs.iter().all(|&t| t < right_table);
            let r_on_right = rrefs.iter().all(|&t| t == right_table) && !rrefs.is_empty();
            let l_on_right = lrefs.iter().all(|&t| t == right_table) && !lrefs.is_empty();
            let r_on_left = !rrefs.is_empty() && rrefs.iter().all(|&t| t < right_table);
            // Join keys evaluate against each side's own chunk: the left
            // side already sits at its global offsets, the right side is a
            // bare scan and uses scan-local indices.
            if l_on_left && r_on_right {
                left_keys.push(rewrite_columns((**l).clone(), global)?);
                right_keys.push(rewrite_columns((**r).clone(), local)?);
                continue;
            }
            if l_on_right && r_on_left {
                left_keys.push(rewrite_columns((**r).clone(), global)?);
                right_keys.push(rewrite_columns((**l).clone(), local)?);
                continue;
            }
        }
        residual.push(rewrite_columns(conjunct, global)?);
    }

    let residual = conjoin(residual);
    if left_keys.is_empty() {
        Ok(PhysicalOperator::NestedLoopJoin {
            left: Box::new(left),
            right: Box::new(right),
            predicate: residual,
        })
    } else {
        Ok(PhysicalOperator::HashJoin {
            left: Box::new(left),
            right: Box::new(right),
            left_keys,
            right_keys,
            residual,
        })
    }
}

impl PhysicalOperator {
    /// Rewrite every expression in the tree, bottom-up. Used for prepared
    /// statement parameter substitution and subquery resolution.
    pub fn transform_expressions(
        self,
        f: &mut impl FnMut(BoundExpression) -> Result<BoundExpression>,
    ) -> Result<Self> {
        Ok(match self {
            PhysicalOperator::Scan { .. } | PhysicalOperator::SingleRow => self,
            PhysicalOperator::Filter { child, predicate } => PhysicalOperator::Filter {
                child: Box::new(child.transform_expressions(f)?),
                predicate: predicate.transform(f)?,
            },
            PhysicalOperator::Projection { child, expressions } => PhysicalOperator::Projection {
                child: Box::new(child.transform_expressions(f)?),
                expressions: expressions
                    .into_iter()
                    .map(|e| e.transform(f))
                    .collect::<Result<Vec<_>>>()?,
            },
            PhysicalOperator::HashAggregate {
                child,
                groups,
                aggregates,
            } => PhysicalOperator::HashAggregate {
                child: Box::new(child.transform_expressions(f)?),
                groups: groups
                    .into_iter()
                    .map(|g| g.transform(f))
                    .collect::<Result<Vec<_>>>()?,
                aggregates: transform_aggregates(aggregates, f)?,
            },
            PhysicalOperator::SortedAggregate {
                child,
                groups,
                aggregates,
            } => PhysicalOperator::SortedAggregate {
                child: Box::new(child.transform_expressions(f)?),
                groups: groups
                    .into_iter()
                    .map(|g| g.transform(f))
                    .collect::<Result<Vec<_>>>()?,
                aggregates: transform_aggregates(aggregates, f)?,
            },
            PhysicalOperator::SimpleAggregate { child, aggregates } => {
                PhysicalOperator::SimpleAggregate {
                    child: Box::new(child.transform_expressions(f)?),
                    aggregates: transform_aggregates(aggregates, f)?,
                }
            }
            PhysicalOperator::Sort { child, keys } => PhysicalOperator::Sort {
                child: Box::new(child.transform_expressions(f)?),
                keys,
            },
            PhysicalOperator::Limit {
                child,
                limit,
                offset,
            } => PhysicalOperator::Limit {
                child: Box::new(child.transform_expressions(f)?),
                limit,
                offset,
            },
            PhysicalOperator::NestedLoopJoin {
                left,
                right,
                predicate,
            } => PhysicalOperator::NestedLoopJoin {
                left: Box::new(left.transform_expressions(f)?),
                right: Box::new(right.transform_expressions(f)?),
                predicate: predicate.map(|p| p.transform(f)).transpose()?,
            },
            PhysicalOperator::HashJoin {
                left,
                right,
                left_keys,
                right_keys,
                residual,
            } => PhysicalOperator::HashJoin {
                left: Box::new(left.transform_expressions(f)?),
                right: Box::new(right.transform_expressions(f)?),
                left_keys: left_keys
                    .into_iter()
                    .map(|k| k.transform(f))
                    .collect::<Result<Vec<_>>>()?,
                right_keys: right_keys
                    .into_iter()
                    .map(|k| k.transform(f))
                    .collect::<Result<Vec<_>>>()?,
                residual: residual.map(|r| r.transform(f)).transpose()?,
            },
        })
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            PhysicalOperator::Scan {
                table, column_ids, ..
            } => writeln!(f, "{}SCAN {} {:?}", pad, table, column_ids),
            PhysicalOperator::SingleRow => writeln!(f, "{}SINGLE_ROW", pad),
            PhysicalOperator::Filter { child, .. } => {
                writeln!(f, "{}FILTER", pad)?;
                child.fmt_tree(f, indent + 1)
            }
            PhysicalOperator::Projection { child, expressions } => {
                writeln!(f, "{}PROJECTION [{}]", pad, expressions.len())?;
                child.fmt_tree(f, indent + 1)
            }
            PhysicalOperator::HashAggregate { child, groups, aggregates } => {
                writeln!(
                    f,
                    "{}HASH_GROUP_BY [{} groups, {} aggregates]",
                    pad,
                    groups.len(),
                    aggregates.len()
                )?;
                child.fmt_tree(f, indent + 1)
            }
            PhysicalOperator::SortedAggregate { child, groups, aggregates } => {
                writeln!(
                    f,
                    "{}SORTED_GROUP_BY [{} groups, {} aggregates]",
                    pad,
                    groups.len(),
                    aggregates.len()
                )?;
                child.fmt_tree(f, indent + 1)
            }
            PhysicalOperator::SimpleAggregate { child, aggregates } => {
                writeln!(f, "{}SIMPLE_AGGREGATE [{}]", pad, aggregates.len())?;
                child.fmt_tree(f, indent + 1)
            }
            PhysicalOperator::Sort { child, keys } => {
                writeln!(f, "{}ORDER_BY {:?}", pad, keys)?;
                child.fmt_tree(f, indent + 1)
            }
            PhysicalOperator::Limit { child, limit, offset } => {
                writeln!(f, "{}LIMIT {:?} OFFSET {}", pad, limit, offset)?;
                child.fmt_tree(f, indent + 1)
            }
            PhysicalOperator::NestedLoopJoin { left, right, .. } => {
                writeln!(f, "{}NESTED_LOOP_JOIN", pad)?;
                left.fmt_tree(f, indent + 1)?;
                right.fmt_tree(f, indent + 1)
            }
            PhysicalOperator::HashJoin { left, right, left_keys, .. } => {
                writeln!(f, "{}HASH_JOIN [{} keys]", pad, left_keys.len())?;
                left.fmt_tree(f, indent + 1)?;
                right.fmt_tree(f, indent + 1)
            }
        }
    }
}

fn transform_aggregates(
    aggregates: Vec<BoundAggregate>,
    f: &mut impl FnMut(BoundExpression) -> Result<BoundExpression>,
) -> Result<Vec<BoundAggregate>> {
    aggregates
        .into_iter()
        .map(|a| {
            Ok(BoundAggregate {
                kind: a.kind,
                arg: a.arg.map(|e| e.transform(f)).transpose()?,
                datatype: a.datatype,
            })
        })
        .collect()
}

impl PhysicalPlan {
    /// Rewrite every expression in the plan; see
    /// [`PhysicalOperator::transform_expressions`].
    pub fn transform_expressions(
        self,
        f: &mut impl FnMut(BoundExpression) -> Result<BoundExpression>,
    ) -> Result<Self> {
        Ok(match self {
            PhysicalPlan::Query { root, names } => PhysicalPlan::Query {
                root: root.transform_expressions(f)?,
                names,
            },
            PhysicalPlan::Insert { table, rows } => PhysicalPlan::Insert {
                table,
                rows: rows
                    .into_iter()
                    .map(|row| row.into_iter().map(|e| e.transform(f)).collect())
                    .collect::<Result<Vec<_>>>()?,
            },
            PhysicalPlan::Update {
                table,
                child,
                assignments,
            } => PhysicalPlan::Update {
                table,
                child: child.transform_expressions(f)?,
                assignments: assignments
                    .into_iter()
                    .map(|(i, e)| Ok((i, e.transform(f)?)))
                    .collect::<Result<Vec<_>>>()?,
            },
            PhysicalPlan::Delete { table, child } => PhysicalPlan::Delete {
                table,
                child: child.transform_expressions(f)?,
            },
            other => other,
        })
    }
}

impl fmt::Display for PhysicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalPlan::Query { root, .. } => write!(f, "{}", root),
            PhysicalPlan::Insert { table, rows } => {
                writeln!(f, "INSERT INTO {} [{} rows]", table, rows.len())
            }
            PhysicalPlan::Update { table, child, .. } => {
                writeln!(f, "UPDATE {}", table)?;
                child.fmt_tree(f, 1)
            }
            PhysicalPlan::Delete { table, child } => {
                writeln!(f, "DELETE FROM {}", table)?;
                child.fmt_tree(f, 1)
            }
            PhysicalPlan::CreateTable(entry) => writeln!(f, "CREATE TABLE {}", entry.name),
            PhysicalPlan::DropTable { name, .. } => writeln!(f, "DROP TABLE {}", name),
            PhysicalPlan::RenameColumn { table, from, to } => {
                writeln!(f, "ALTER TABLE {} RENAME COLUMN {} TO {}", table, from, to)
            }
            PhysicalPlan::Begin => writeln!(f, "BEGIN"),
            PhysicalPlan::Commit => writeln!(f, "COMMIT"),
            PhysicalPlan::Rollback => writeln!(f, "ROLLBACK"),
            PhysicalPlan::Checkpoint => writeln!(f, "CHECKPOINT"),
            PhysicalPlan::Explain(text) => write!(f, "{}", text),
        }
    }
}
