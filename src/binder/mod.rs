//! The binder resolves parse trees against the catalog into typed bound
//! statements
//!
//! Parameters (`$N`) are typed strictly from context: the other side of a
//! comparison, an explicit CAST, IN-list siblings, an INSERT target column
//! or an aggregate argument. A statement whose parameters cannot all be
//! resolved fails with `UnresolvedParameterType`.

pub mod expression;

pub use expression::{ArithmeticOp, BoundExpression, ComparisonOp};

use crate::catalog::{Catalog, ColumnDefinition, TableCatalogEntry};
use crate::error::{Error, Result};
use crate::functions::{self, AggregateKind};
use crate::parsing::ast::{
    self, Direction, Expression, FromItem, Literal, Operator, SelectStatement, Statement,
};
use crate::types::{LogicalType, Value};
use expression::join_operand_types;

#[derive(Debug, Clone)]
pub struct BoundTableRef {
    pub table: String,
    pub alias: String,
    pub column_names: Vec<String>,
    pub column_types: Vec<LogicalType>,
}

#[derive(Debug, Clone)]
pub struct BoundAggregate {
    pub kind: AggregateKind,
    pub arg: Option<BoundExpression>,
    pub datatype: LogicalType,
}

#[derive(Debug, Clone)]
pub struct BoundSelect {
    pub tables: Vec<BoundTableRef>,
    pub predicate: Option<BoundExpression>,
    pub groups: Vec<BoundExpression>,
    pub aggregates: Vec<BoundAggregate>,
    /// Projection expressions; over scan columns, or over aggregate output
    /// references when the query aggregates.
    pub projections: Vec<BoundExpression>,
    pub names: Vec<String>,
    /// Number of trailing hidden projections added for ORDER BY keys.
    pub hidden: usize,
    /// Sort keys as projection indices.
    pub order_by: Vec<(usize, Direction)>,
    pub limit: Option<BoundExpression>,
    pub offset: Option<BoundExpression>,
}

impl BoundSelect {
    pub fn output_types(&self) -> Vec<LogicalType> {
        self.projections[..self.projections.len() - self.hidden]
            .iter()
            .map(|p| p.return_type().unwrap_or(LogicalType::Varchar(None)))
            .collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.names[..self.names.len() - self.hidden].to_vec()
    }
}

#[derive(Debug, Clone)]
pub struct BoundInsert {
    pub table: String,
    /// One expression per table column per row, defaults filled in and
    /// casts to the column types applied.
    pub rows: Vec<Vec<BoundExpression>>,
}

#[derive(Debug, Clone)]
pub struct BoundUpdate {
    pub table: String,
    pub assignments: Vec<(usize, BoundExpression)>,
    pub predicate: Option<BoundExpression>,
}

#[derive(Debug, Clone)]
pub enum BoundStatement {
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
    Insert(BoundInsert),
    Update(BoundUpdate),
    Delete {
        table: String,
        predicate: Option<BoundExpression>,
    },
    Select(BoundSelect),
    Begin,
    Commit,
    Rollback,
    Checkpoint,
    Explain(Box<BoundStatement>),
}

impl BoundStatement {
    /// Tables this statement reads or writes; prepared statements register
    /// dependency edges on them.
    pub fn referenced_tables(&self) -> Vec<String> {
        match self {
            BoundStatement::Select(select) => {
                select.tables.iter().map(|t| t.table.clone()).collect()
            }
            BoundStatement::Insert(insert) => vec![insert.table.clone()],
            BoundStatement::Update(update) => vec![update.table.clone()],
            BoundStatement::Delete { table, .. } => vec![table.clone()],
            _ => Vec::new(),
        }
    }
}

/// Result of binding: the statement plus the resolved parameter types, in
/// order.
#[derive(Debug, Clone)]
pub struct BindResult {
    pub statement: BoundStatement,
    pub parameter_types: Vec<LogicalType>,
}

#[derive(Default)]
struct SelectContext {
    tables: Vec<BoundTableRef>,
    /// Flat chunk offset of each table's first column.
    offsets: Vec<usize>,
    /// Group expressions by source AST, for matching projection
    /// subexpressions against GROUP BY entries.
    group_asts: Vec<Expression>,
    groups: Vec<BoundExpression>,
    aggregates: Vec<BoundAggregate>,
}

impl SelectContext {
    fn has_aggregation(&self) -> bool {
        !self.groups.is_empty() || !self.aggregates.is_empty()
    }
}

pub struct Binder<'a> {
    catalog: &'a Catalog,
    parameters: Vec<Option<LogicalType>>,
}

impl<'a> Binder<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            parameters: Vec::new(),
        }
    }

    pub fn bind(mut self, statement: &Statement) -> Result<BindResult> {
        let bound = self.bind_statement(statement)?;
        // Every parameter must have been reached by a typing context.
        let mut parameter_types = Vec::with_capacity(self.parameters.len());
        for (index, ty) in self.parameters.iter().enumerate() {
            match ty {
                Some(ty) => parameter_types.push(ty.clone()),
                None => return Err(Error::UnresolvedParameterType(index + 1)),
            }
        }
        // Stamp resolved types into the parameter nodes.
        let resolved = parameter_types.clone();
        let bound = transform_statement(bound, &mut |expr| match expr {
            BoundExpression::Parameter { index, .. } => Ok(BoundExpression::Parameter {
                index,
                datatype: Some(resolved[index].clone()),
            }),
            other => Ok(other),
        })?;
        Ok(BindResult {
            statement: bound,
            parameter_types,
        })
    }

    fn bind_statement(&mut self, statement: &Statement) -> Result<BoundStatement> {
        match statement {
            Statement::CreateTable { name, columns } => self.bind_create_table(name, columns),
            Statement::DropTable {
                name,
                if_exists,
                cascade,
            } => {
                if !self.catalog.table_exists(name) && !if_exists {
                    return Err(Error::NotFound(format!("table {}", name)));
                }
                Ok(BoundStatement::DropTable {
                    name: name.clone(),
                    if_exists: *if_exists,
                    cascade: *cascade,
                })
            }
            Statement::RenameColumn { table, from, to } => {
                let entry = self.catalog.lookup(table)?;
                if entry.column_index(from).is_none() {
                    return Err(Error::UnknownColumn(from.clone()));
                }
                Ok(BoundStatement::RenameColumn {
                    table: table.clone(),
                    from: from.clone(),
                    to: to.clone(),
                })
            }
            Statement::Insert {
                table,
                columns,
                values,
            } => self.bind_insert(table, columns.as_deref(), values),
            Statement::Update {
                table,
                set,
                predicate,
            } => self.bind_update(table, set, predicate.as_ref()),
            Statement::Delete { table, predicate } => {
                let mut ctx = self.table_context(table, None)?;
                let predicate = predicate
                    .as_ref()
                    .map(|p| self.bind_boolean(p, &mut ctx))
                    .transpose()?;
                Ok(BoundStatement::Delete {
                    table: ctx.tables[0].table.clone(),
                    predicate,
                })
            }
            Statement::Select(select) => Ok(BoundStatement::Select(self.bind_select(select)?)),
            Statement::Begin => Ok(BoundStatement::Begin),
            Statement::Commit => Ok(BoundStatement::Commit),
            Statement::Rollback => Ok(BoundStatement::Rollback),
            Statement::Checkpoint => Ok(BoundStatement::Checkpoint),
            Statement::Explain(inner) => Ok(BoundStatement::Explain(Box::new(
                self.bind_statement(inner)?,
            ))),
            Statement::Prepare { .. } | Statement::Execute { .. } | Statement::Deallocate { .. } => {
                Err(Error::Internal(
                    "prepared statement control is handled by the connection".into(),
                ))
            }
        }
    }

    fn bind_create_table(&mut self, name: &str, columns: &[ast::ColumnSpec]) -> Result<BoundStatement> {
        if self.catalog.table_exists(name) {
            return Err(Error::DuplicateName(format!("table {}", name)));
        }
        let mut defs: Vec<ColumnDefinition> = Vec::with_capacity(columns.len());
        for spec in columns {
            if defs.iter().any(|d| d.name == spec.name) {
                return Err(Error::DuplicateName(format!("column {}", spec.name)));
            }
            let default = spec
                .default
                .as_ref()
                .map(|expr| {
                    let mut ctx = SelectContext::default();
                    let bound = self
                        .bind_expression(expr, &mut ctx, false)?
                        .cast_to(&spec.datatype);
                    if !bound.is_foldable() {
                        return Err(Error::TypeMismatch {
                            expected: "a constant DEFAULT expression".into(),
                            found: format!("column {}", spec.name),
                        });
                    }
                    crate::execution::fold_constant(&bound)
                })
                .transpose()?;
            defs.push(ColumnDefinition {
                name: spec.name.clone(),
                datatype: spec.datatype.clone(),
                nullable: spec.nullable,
                default,
            });
        }
        Ok(BoundStatement::CreateTable(TableCatalogEntry {
            name: name.to_string(),
            columns: defs,
        }))
    }

    fn bind_insert(
        &mut self,
        table: &str,
        columns: Option<&[String]>,
        values: &[Vec<Expression>],
    ) -> Result<BoundStatement> {
        let entry = self.catalog.lookup(table)?.clone();
        let targets: Vec<usize> = match columns {
            Some(names) => names
                .iter()
                .map(|n| {
                    entry
                        .column_index(n)
                        .ok_or_else(|| Error::UnknownColumn(n.clone()))
                })
                .collect::<Result<Vec<_>>>()?,
            None => (0..entry.columns.len()).collect(),
        };

        let mut rows = Vec::with_capacity(values.len());
        for row in values {
            if row.len() != targets.len() {
                return Err(Error::TypeMismatch {
                    expected: format!("{} values", targets.len()),
                    found: format!("{} values", row.len()),
                });
            }
            // Start every row from the column defaults.
            let mut bound_row: Vec<BoundExpression> = entry
                .columns
                .iter()
                .map(|c| BoundExpression::Constant {
                    value: c.default.clone().unwrap_or(Value::Null),
                    datatype: Some(c.datatype.clone()),
                })
                .collect();
            for (expr, &target) in row.iter().zip(&targets) {
                let column = &entry.columns[target];
                let mut ctx = SelectContext::default();
                let bound = self.bind_expression(expr, &mut ctx, false)?;
                self.resolve_parameter(&bound, &column.datatype);
                bound_row[target] = bound.cast_to(&column.datatype);
            }
            rows.push(bound_row);
        }
        Ok(BoundStatement::Insert(BoundInsert {
            table: entry.name.clone(),
            rows,
        }))
    }

    fn bind_update(
        &mut self,
        table: &str,
        set: &[(String, Expression)],
        predicate: Option<&Expression>,
    ) -> Result<BoundStatement> {
        let entry = self.catalog.lookup(table)?.clone();
        let mut ctx = self.table_context(table, None)?;
        let mut assignments = Vec::with_capacity(set.len());
        for (column, expr) in set {
            let index = entry
                .column_index(column)
                .ok_or_else(|| Error::UnknownColumn(column.clone()))?;
            let datatype = entry.columns[index].datatype.clone();
            let bound = self.bind_expression(expr, &mut ctx, false)?;
            self.resolve_parameter(&bound, &datatype);
            assignments.push((index, bound.cast_to(&datatype)));
        }
        let predicate = predicate
            .map(|p| self.bind_boolean(p, &mut ctx))
            .transpose()?;
        Ok(BoundStatement::Update(BoundUpdate {
            table: entry.name.clone(),
            assignments,
            predicate,
        }))
    }

    fn bind_select(&mut self, select: &SelectStatement) -> Result<BoundSelect> {
        let mut ctx = SelectContext::default();
        let mut join_predicates = Vec::new();
        for item in &select.from {
            self.flatten_from(item, &mut ctx, &mut join_predicates)?;
        }

        // WHERE plus any JOIN ... ON conditions, conjoined.
        let mut predicate = select
            .predicate
            .as_ref()
            .map(|p| self.bind_boolean(p, &mut ctx))
            .transpose()?;
        for join_pred in &join_predicates {
            let bound = self.bind_boolean(join_pred, &mut ctx)?;
            predicate = Some(match predicate {
                Some(existing) => BoundExpression::Conjunction {
                    and: true,
                    left: Box::new(existing),
                    right: Box::new(bound),
                },
                None => bound,
            });
        }

        for group in &select.group_by {
            let bound = self.bind_expression(group, &mut ctx, false)?;
            ctx.group_asts.push(group.clone());
            ctx.groups.push(bound);
        }

        // Projections; `*` expands to every column of every table.
        let mut projections = Vec::new();
        let mut names = Vec::new();
        for (expr, alias) in &select.projection {
            if matches!(expr, Expression::Star) {
                if ctx.tables.is_empty() {
                    return Err(Error::Syntax("SELECT * requires a FROM clause".into()));
                }
                for t in 0..ctx.tables.len() {
                    for c in 0..ctx.tables[t].column_names.len() {
                        projections.push(self.bind_column_at(&ctx, t, c));
                        names.push(ctx.tables[t].column_names[c].clone());
                    }
                }
                continue;
            }
            let bound = self.bind_expression(expr, &mut ctx, true)?;
            names.push(alias.clone().unwrap_or_else(|| derive_name(expr, names.len())));
            projections.push(bound);
        }

        // Aggregated queries may only project group keys, aggregates and
        // expressions over them.
        if ctx.has_aggregation() {
            for projection in &projections {
                let mut plain_column = None;
                projection.walk(&mut |e| {
                    if let BoundExpression::ColumnRef { name, .. } = e {
                        plain_column.get_or_insert_with(|| name.clone());
                    }
                });
                if let Some(name) = plain_column {
                    return Err(Error::TypeMismatch {
                        expected: "an expression over GROUP BY keys or aggregates".into(),
                        found: format!("column {}", name),
                    });
                }
            }
        }

        // ORDER BY resolves against output columns by name, or binds a
        // hidden projection for arbitrary expressions.
        let mut order_by = Vec::new();
        let mut hidden = 0;
        for (expr, direction) in &select.order_by {
            let index = match expr {
                Expression::Column(None, name) if names.contains(name) => {
                    names.iter().position(|n| n == name).unwrap_or_default()
                }
                _ if !ctx.has_aggregation() => {
                    let bound = self.bind_expression(expr, &mut ctx, false)?;
                    projections.push(bound);
                    names.push(format!("__order_{}", hidden));
                    hidden += 1;
                    projections.len() - 1
                }
                _ => {
                    return Err(Error::UnknownColumn(
                        "ORDER BY expression is not in the select list".into(),
                    ))
                }
            };
            order_by.push((index, *direction));
        }

        let limit = self.bind_limit(select.limit.as_ref(), &mut ctx)?;
        let offset = self.bind_limit(select.offset.as_ref(), &mut ctx)?;

        Ok(BoundSelect {
            tables: std::mem::take(&mut ctx.tables),
            predicate,
            groups: ctx.groups,
            aggregates: ctx.aggregates,
            projections,
            names,
            hidden,
            order_by,
            limit,
            offset,
        })
    }

    fn bind_limit(
        &mut self,
        expr: Option<&Expression>,
        ctx: &mut SelectContext,
    ) -> Result<Option<BoundExpression>> {
        expr.map(|e| {
            let bound = self.bind_expression(e, ctx, false)?;
            self.resolve_parameter(&bound, &LogicalType::BigInt);
            Ok(bound.cast_to(&LogicalType::BigInt))
        })
        .transpose()
    }

    fn flatten_from(
        &mut self,
        item: &FromItem,
        ctx: &mut SelectContext,
        join_predicates: &mut Vec<Expression>,
    ) -> Result<()> {
        match item {
            FromItem::Table { name, alias } => {
                let entry = self.catalog.lookup(name)?;
                let offset = ctx
                    .tables
                    .iter()
                    .map(|t| t.column_names.len())
                    .sum::<usize>();
                ctx.offsets.push(offset);
                ctx.tables.push(BoundTableRef {
                    table: entry.name.clone(),
                    alias: alias.clone().unwrap_or_else(|| name.clone()),
                    column_names: entry.columns.iter().map(|c| c.name.clone()).collect(),
                    column_types: entry.column_types(),
                });
                Ok(())
            }
            FromItem::Join {
                left,
                right,
                predicate,
            } => {
                self.flatten_from(left, ctx, join_predicates)?;
                self.flatten_from(right, ctx, join_predicates)?;
                if let Some(predicate) = predicate {
                    join_predicates.push(predicate.clone());
                }
                Ok(())
            }
        }
    }

    fn table_context(&mut self, table: &str, alias: Option<&str>) -> Result<SelectContext> {
        let mut ctx = SelectContext::default();
        let entry = self.catalog.lookup(table)?;
        ctx.offsets.push(0);
        ctx.tables.push(BoundTableRef {
            table: entry.name.clone(),
            alias: alias.unwrap_or(table).to_string(),
            column_names: entry.columns.iter().map(|c| c.name.clone()).collect(),
            column_types: entry.column_types(),
        });
        Ok(ctx)
    }

    fn bind_column_at(&self, ctx: &SelectContext, table: usize, column: usize) -> BoundExpression {
        BoundExpression::ColumnRef {
            table,
            column,
            flat: ctx.offsets[table] + column,
            datatype: ctx.tables[table].column_types[column].clone(),
            name: ctx.tables[table].column_names[column].clone(),
        }
    }

    fn resolve_column(
        &self,
        ctx: &SelectContext,
        qualifier: Option<&str>,
        name: &str,
    ) -> Result<BoundExpression> {
        let mut found = None;
        for (t, table) in ctx.tables.iter().enumerate() {
            if let Some(q) = qualifier {
                if q != table.alias && q != table.table {
                    continue;
                }
            }
            if let Some(c) = table.column_names.iter().position(|n| n == name) {
                if found.is_some() {
                    return Err(Error::UnknownColumn(format!("ambiguous column {}", name)));
                }
                found = Some((t, c));
            }
        }
        let (t, c) = found.ok_or_else(|| Error::UnknownColumn(name.to_string()))?;
        Ok(self.bind_column_at(ctx, t, c))
    }

    /// If `expr` is a parameter without a resolved type, resolve it to `ty`.
    fn resolve_parameter(&mut self, expr: &BoundExpression, ty: &LogicalType) {
        if let BoundExpression::Parameter { index, .. } = expr {
            if self.parameters[*index].is_none() {
                self.parameters[*index] = Some(ty.clone());
            }
        }
    }

    fn parameter_type(&self, expr: &BoundExpression) -> Option<LogicalType> {
        match expr {
            BoundExpression::Parameter { index, .. } => self.parameters[*index].clone(),
            _ => expr.return_type(),
        }
    }

    fn bind_boolean(&mut self, expr: &Expression, ctx: &mut SelectContext) -> Result<BoundExpression> {
        let bound = self.bind_expression(expr, ctx, false)?;
        self.resolve_parameter(&bound, &LogicalType::Boolean);
        match self.parameter_type(&bound) {
            Some(LogicalType::Boolean) | None => Ok(bound),
            Some(other) => Err(Error::TypeMismatch {
                expected: LogicalType::Boolean.to_string(),
                found: other.to_string(),
            }),
        }
    }

    /// Promote two comparison or IN-list operands to a common type,
    /// resolving parameters and typing NULL constants from the other side.
    fn unify_operands(
        &mut self,
        left: BoundExpression,
        right: BoundExpression,
    ) -> Result<(BoundExpression, BoundExpression)> {
        let lt = self.parameter_type(&left);
        let rt = self.parameter_type(&right);
        match (lt, rt) {
            (Some(a), Some(b)) => {
                let joined = join_operand_types(&a, &b)?;
                Ok((left.cast_to(&joined), right.cast_to(&joined)))
            }
            (None, Some(b)) => {
                self.resolve_parameter(&left, &b);
                Ok((left.cast_to(&b), right))
            }
            (Some(a), None) => {
                self.resolve_parameter(&right, &a);
                Ok((left, right.cast_to(&a)))
            }
            // Two untyped operands: nothing to resolve against. Parameters
            // stay unresolved and fail the final check.
            (None, None) => Ok((left, right)),
        }
    }

    fn bind_expression(
        &mut self,
        expr: &Expression,
        ctx: &mut SelectContext,
        allow_aggregates: bool,
    ) -> Result<BoundExpression> {
        // A projection subexpression that matches a GROUP BY entry reads the
        // group key from the aggregate output.
        if allow_aggregates {
            if let Some(g) = ctx.group_asts.iter().position(|ast| ast == expr) {
                let datatype = ctx.groups[g]
                    .return_type()
                    .unwrap_or(LogicalType::Varchar(None));
                return Ok(BoundExpression::Reference { index: g, datatype });
            }
        }

        match expr {
            Expression::Literal(literal) => Ok(BoundExpression::constant(match literal {
                Literal::Null => Value::Null,
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Integer(i) => match i32::try_from(*i) {
                    Ok(small) => Value::Integer(small),
                    Err(_) => Value::BigInt(*i),
                },
                Literal::Float(f) => Value::Double(*f),
                Literal::String(s) => Value::Varchar(s.clone()),
            })),

            Expression::Column(qualifier, name) => {
                self.resolve_column(ctx, qualifier.as_deref(), name)
            }

            Expression::Parameter(index) => {
                if self.parameters.len() <= *index {
                    self.parameters.resize(*index + 1, None);
                }
                Ok(BoundExpression::Parameter {
                    index: *index,
                    datatype: self.parameters[*index].clone(),
                })
            }

            Expression::Star => Err(Error::Syntax("* is only valid in COUNT(*)".into())),

            Expression::Cast { expr, datatype } => {
                let bound = self.bind_expression(expr, ctx, allow_aggregates)?;
                self.resolve_parameter(&bound, datatype);
                Ok(BoundExpression::Cast {
                    expr: Box::new(bound),
                    datatype: datatype.clone(),
                })
            }

            Expression::Function(name, args) => {
                self.bind_function(name, args, ctx, allow_aggregates)
            }

            Expression::Subquery(select) => {
                let bound = self.bind_select(select)?;
                let output = bound.output_types();
                if output.len() != 1 {
                    return Err(Error::TypeMismatch {
                        expected: "a single-column scalar subquery".into(),
                        found: format!("{} columns", output.len()),
                    });
                }
                Ok(BoundExpression::Subquery {
                    datatype: output[0].clone(),
                    select: Box::new(bound),
                })
            }

            Expression::Operator(op) => self.bind_operator(op, ctx, allow_aggregates),
        }
    }

    fn bind_function(
        &mut self,
        name: &str,
        args: &[Expression],
        ctx: &mut SelectContext,
        allow_aggregates: bool,
    ) -> Result<BoundExpression> {
        let star = matches!(args, [Expression::Star]);
        if let Some(kind) = AggregateKind::from_name(name, star) {
            if !allow_aggregates {
                return Err(Error::TypeMismatch {
                    expected: "a non-aggregate expression".into(),
                    found: format!("{}()", name),
                });
            }
            let arg = match kind {
                AggregateKind::CountStar => None,
                _ => {
                    if args.len() != 1 {
                        return Err(Error::TypeMismatch {
                            expected: "one argument".into(),
                            found: format!("{} arguments", args.len()),
                        });
                    }
                    let bound = self.bind_expression(&args[0], ctx, false)?;
                    // Aggregate arguments type parameters where the
                    // aggregate fixes the argument domain.
                    match kind {
                        AggregateKind::Sum | AggregateKind::Avg => {
                            self.resolve_parameter(&bound, &LogicalType::Double)
                        }
                        AggregateKind::Count => {
                            self.resolve_parameter(&bound, &LogicalType::Varchar(None))
                        }
                        _ => {}
                    }
                    Some(bound)
                }
            };
            let arg_type = arg.as_ref().and_then(|a| self.parameter_type(a));
            let datatype = kind.bind(arg_type.as_ref())?;
            let index = ctx.groups.len() + ctx.aggregates.len();
            ctx.aggregates.push(BoundAggregate {
                kind,
                arg,
                datatype: datatype.clone(),
            });
            return Ok(BoundExpression::Reference { index, datatype });
        }

        let function = functions::resolve_scalar(name)?;
        let mut bound_args = Vec::with_capacity(args.len());
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args {
            let bound = self.bind_expression(arg, ctx, allow_aggregates)?;
            match self.parameter_type(&bound) {
                Some(ty) => arg_types.push(ty),
                None => {
                    let index = match &bound {
                        BoundExpression::Parameter { index, .. } => *index + 1,
                        _ => 1,
                    };
                    return Err(Error::UnresolvedParameterType(index));
                }
            }
            bound_args.push(bound);
        }
        let datatype = function.bind(&arg_types)?;
        Ok(BoundExpression::Function {
            function,
            args: bound_args,
            datatype,
        })
    }

    fn bind_operator(
        &mut self,
        op: &Operator,
        ctx: &mut SelectContext,
        allow_aggregates: bool,
    ) -> Result<BoundExpression> {
        use Operator::*;
        match op {
            And(l, r) | Or(l, r) => {
                let left = self.bind_expression(l, ctx, allow_aggregates)?;
                let right = self.bind_expression(r, ctx, allow_aggregates)?;
                for side in [&left, &right] {
                    self.resolve_parameter(side, &LogicalType::Boolean);
                    if let Some(ty) = self.parameter_type(side) {
                        if ty != LogicalType::Boolean {
                            return Err(Error::TypeMismatch {
                                expected: LogicalType::Boolean.to_string(),
                                found: ty.to_string(),
                            });
                        }
                    }
                }
                Ok(BoundExpression::Conjunction {
                    and: matches!(op, And(_, _)),
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            Not(e) => {
                let bound = self.bind_expression(e, ctx, allow_aggregates)?;
                self.resolve_parameter(&bound, &LogicalType::Boolean);
                Ok(BoundExpression::Not(Box::new(bound)))
            }
            Equal(l, r)
            | NotEqual(l, r)
            | GreaterThan(l, r)
            | GreaterThanOrEqual(l, r)
            | LessThan(l, r)
            | LessThanOrEqual(l, r) => {
                let left = self.bind_expression(l, ctx, allow_aggregates)?;
                let right = self.bind_expression(r, ctx, allow_aggregates)?;
                let (left, right) = self.unify_operands(left, right)?;
                let cmp = match op {
                    Equal(_, _) => ComparisonOp::Equal,
                    NotEqual(_, _) => ComparisonOp::NotEqual,
                    GreaterThan(_, _) => ComparisonOp::GreaterThan,
                    GreaterThanOrEqual(_, _) => ComparisonOp::GreaterThanOrEqual,
                    LessThan(_, _) => ComparisonOp::LessThan,
                    _ => ComparisonOp::LessThanOrEqual,
                };
                Ok(BoundExpression::Comparison {
                    op: cmp,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            IsNull { expr, negated } => {
                let bound = self.bind_expression(expr, ctx, allow_aggregates)?;
                Ok(BoundExpression::IsNull {
                    expr: Box::new(bound),
                    negated: *negated,
                })
            }
            InList {
                expr,
                list,
                negated,
            } => {
                let bound = self.bind_expression(expr, ctx, allow_aggregates)?;
                let mut bound_list = list
                    .iter()
                    .map(|e| self.bind_expression(e, ctx, allow_aggregates))
                    .collect::<Result<Vec<_>>>()?;
                // The element type is the join of every typed member.
                let mut element = self.parameter_type(&bound);
                for item in &bound_list {
                    if let Some(ty) = self.parameter_type(item) {
                        element = Some(match element {
                            Some(existing) => join_operand_types(&existing, &ty)?,
                            None => ty,
                        });
                    }
                }
                let Some(element) = element else {
                    return Ok(BoundExpression::InList {
                        expr: Box::new(bound),
                        list: bound_list,
                        negated: *negated,
                    });
                };
                self.resolve_parameter(&bound, &element);
                for item in &bound_list {
                    self.resolve_parameter(item, &element);
                }
                let bound = bound.cast_to(&element);
                bound_list = bound_list
                    .into_iter()
                    .map(|e| e.cast_to(&element))
                    .collect();
                Ok(BoundExpression::InList {
                    expr: Box::new(bound),
                    list: bound_list,
                    negated: *negated,
                })
            }
            Add(l, r) | Subtract(l, r) | Multiply(l, r) | Divide(l, r) | Remainder(l, r) => {
                let left = self.bind_expression(l, ctx, allow_aggregates)?;
                let right = self.bind_expression(r, ctx, allow_aggregates)?;
                let (left, right) = self.unify_numeric(left, right, op)?;
                let datatype = left
                    .return_type()
                    .or_else(|| right.return_type())
                    .unwrap_or(LogicalType::Double);
                let arith = match op {
                    Add(_, _) => ArithmeticOp::Add,
                    Subtract(_, _) => ArithmeticOp::Subtract,
                    Multiply(_, _) => ArithmeticOp::Multiply,
                    Divide(_, _) => ArithmeticOp::Divide,
                    _ => ArithmeticOp::Remainder,
                };
                Ok(BoundExpression::Arithmetic {
                    op: arith,
                    left: Box::new(left),
                    right: Box::new(right),
                    datatype,
                })
            }
            Negate(e) => {
                let bound = self.bind_expression(e, ctx, allow_aggregates)?;
                let datatype = match self.parameter_type(&bound) {
                    Some(ty) if ty.is_numeric() => ty,
                    Some(ty) => {
                        return Err(Error::TypeMismatch {
                            expected: "a numeric operand".into(),
                            found: ty.to_string(),
                        })
                    }
                    None => {
                        self.resolve_parameter(&bound, &LogicalType::Double);
                        LogicalType::Double
                    }
                };
                Ok(BoundExpression::Negate {
                    expr: Box::new(bound),
                    datatype,
                })
            }
            Identity(e) => self.bind_expression(e, ctx, allow_aggregates),
        }
    }

    /// Arithmetic promotion. Timestamps and dates reject every arithmetic
    /// operator; subtraction-to-interval is reserved, not implemented.
    fn unify_numeric(
        &mut self,
        left: BoundExpression,
        right: BoundExpression,
        op: &Operator,
    ) -> Result<(BoundExpression, BoundExpression)> {
        let reject = |ty: &LogicalType| -> Result<()> {
            if !ty.is_numeric() {
                return Err(Error::TypeMismatch {
                    expected: "a numeric operand".into(),
                    found: format!("{} for operator {:?}", ty, op_symbol(op)),
                });
            }
            Ok(())
        };
        let lt = self.parameter_type(&left);
        let rt = self.parameter_type(&right);
        match (lt, rt) {
            (Some(a), Some(b)) => {
                reject(&a)?;
                reject(&b)?;
                let joined = join_operand_types(&a, &b)?;
                Ok((left.cast_to(&joined), right.cast_to(&joined)))
            }
            (None, Some(b)) => {
                reject(&b)?;
                self.resolve_parameter(&left, &b);
                Ok((left.cast_to(&b), right))
            }
            (Some(a), None) => {
                reject(&a)?;
                self.resolve_parameter(&right, &a);
                Ok((left, right.cast_to(&a)))
            }
            (None, None) => Ok((left, right)),
        }
    }
}

fn op_symbol(op: &Operator) -> &'static str {
    match op {
        Operator::Add(_, _) => "+",
        Operator::Subtract(_, _) => "-",
        Operator::Multiply(_, _) => "*",
        Operator::Divide(_, _) => "/",
        Operator::Remainder(_, _) => "%",
        _ => "?",
    }
}

fn derive_name(expr: &Expression, index: usize) -> String {
    match expr {
        Expression::Column(_, name) => name.clone(),
        Expression::Function(name, _) => name.clone(),
        Expression::Cast { expr, .. } => derive_name(expr, index),
        _ => format!("col{}", index),
    }
}

/// Apply `f` to every expression in the statement, bottom-up.
pub fn transform_statement(
    statement: BoundStatement,
    f: &mut impl FnMut(BoundExpression) -> Result<BoundExpression>,
) -> Result<BoundStatement> {
    Ok(match statement {
        BoundStatement::Select(select) => BoundStatement::Select(transform_select(select, f)?),
        BoundStatement::Insert(insert) => BoundStatement::Insert(BoundInsert {
            table: insert.table,
            rows: insert
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(|e| e.transform(f)).collect())
                .collect::<Result<Vec<_>>>()?,
        }),
        BoundStatement::Update(update) => BoundStatement::Update(BoundUpdate {
            table: update.table,
            assignments: update
                .assignments
                .into_iter()
                .map(|(i, e)| Ok((i, e.transform(f)?)))
                .collect::<Result<Vec<_>>>()?,
            predicate: update.predicate.map(|p| p.transform(f)).transpose()?,
        }),
        BoundStatement::Delete { table, predicate } => BoundStatement::Delete {
            table,
            predicate: predicate.map(|p| p.transform(f)).transpose()?,
        },
        BoundStatement::Explain(inner) => {
            BoundStatement::Explain(Box::new(transform_statement(*inner, f)?))
        }
        other => other,
    })
}

pub fn transform_select(
    select: BoundSelect,
    f: &mut impl FnMut(BoundExpression) -> Result<BoundExpression>,
) -> Result<BoundSelect> {
    Ok(BoundSelect {
        tables: select.tables,
        predicate: select.predicate.map(|p| p.transform(f)).transpose()?,
        groups: select
            .groups
            .into_iter()
            .map(|g| g.transform(f))
            .collect::<Result<Vec<_>>>()?,
        aggregates: select
            .aggregates
            .into_iter()
            .map(|a| {
                Ok(BoundAggregate {
                    kind: a.kind,
                    arg: a.arg.map(|e| e.transform(f)).transpose()?,
                    datatype: a.datatype,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        projections: select
            .projections
            .into_iter()
            .map(|p| p.transform(f))
            .collect::<Result<Vec<_>>>()?,
        names: select.names,
        hidden: select.hidden,
        order_by: select.order_by,
        limit: select.limit.map(|l| l.transform(f)).transpose()?,
        offset: select.offset.map(|o| o.transform(f)).transpose()?,
    })
}
