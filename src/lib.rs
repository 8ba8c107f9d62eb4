//! An embeddable analytical SQL database
//!
//! A single-process library: SQL statements are parsed, bound against the
//! catalog, planned into a vectorized operator pipeline and executed over
//! an MVCC storage layer with a write-ahead log. Databases are in-memory
//! or file-backed; a file-backed database keeps a `<path>` snapshot plus a
//! `<path>.wal` append-only log, replayed on open.
//!
//! ```no_run
//! use vexdb::Database;
//!
//! let db = Database::open("my.db")?;
//! let conn = db.connect();
//! conn.query("CREATE TABLE t(a INTEGER)")?;
//! conn.query("INSERT INTO t VALUES (11),(13),(12)")?;
//! let result = conn.query("SELECT a FROM t ORDER BY a")?;
//! assert_eq!(result.rows.len(), 3);
//! # vexdb::Result::Ok(())
//! ```

pub mod binder;
pub mod catalog;
pub mod error;
pub mod execution;
pub mod functions;
pub mod parsing;
pub mod planner;
pub mod storage;
pub mod transaction;
pub mod types;
pub mod vector;

pub use error::{Error, Result};
pub use types::{LogicalType, Value};

use binder::{Binder, BoundExpression};
use catalog::{Catalog, Dependent, TableCatalogEntry};
use execution::{
    execute_to_completion, resolve_expression_subqueries, resolve_subqueries, ExecutionContext,
    ExpressionExecutor,
};
use parking_lot::{Mutex, RwLock};
use parsing::ast::{Expression, Literal, Operator, Statement};
use planner::{PhysicalOperator, PhysicalPlan};
use storage::table::RowVersion;
use storage::wal::{replay, WalRecord, WalWriter};
use storage::StorageManager;
use transaction::{Transaction, TransactionManager, UndoEntry, CHECKPOINT_READER_ID};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use vector::DataChunk;

/// A materialized statement result. DML statements report the number of
/// rows they changed; queries report columns and rows.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub rows_changed: usize,
}

impl QueryResult {
    fn changed(count: usize) -> Self {
        Self {
            rows_changed: count,
            ..Default::default()
        }
    }

    /// Convenience accessor for single-column results.
    pub fn column_values(&self, index: usize) -> Vec<Value> {
        self.rows.iter().map(|r| r[index].clone()).collect()
    }
}

/// A named, bound and planned statement owned by a connection. Parameter
/// substitution happens on the cached plan template without re-binding.
struct PreparedStatement {
    plan: PhysicalPlan,
    parameter_types: Vec<LogicalType>,
    tables: Vec<String>,
}

/// Handle returned by [`Connection::prepare`].
#[derive(Debug, Clone)]
pub struct PreparedHandle {
    name: String,
}

struct DatabaseInner {
    path: Option<PathBuf>,
    catalog: RwLock<Catalog>,
    storage: RwLock<StorageManager>,
    transactions: TransactionManager,
    wal: Option<Mutex<WalWriter>>,
    prepared: Mutex<HashMap<(u64, String), PreparedStatement>>,
    next_connection_id: AtomicU64,
}

/// A database instance. Cheap to clone handles into connections; dropped
/// cleanly it checkpoints file-backed state.
pub struct Database {
    inner: Arc<DatabaseInner>,
}

fn wal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".wal");
    PathBuf::from(name)
}

impl Database {
    /// Open or create a file-backed database at `path`. Any snapshot is
    /// loaded, the WAL replayed on top, and a fresh checkpoint written.
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        Database::open_internal(Some(path.as_ref().to_path_buf()))
    }

    /// A transient in-memory database with no on-disk footprint.
    pub fn in_memory() -> Result<Database> {
        Database::open_internal(None)
    }

    fn open_internal(path: Option<PathBuf>) -> Result<Database> {
        let mut catalog = Catalog::new();
        let mut storage = StorageManager::new();
        let transactions = TransactionManager::new();
        let mut wal = None;

        if let Some(path) = &path {
            if let Some(snapshot) = storage::read_snapshot(path)? {
                transactions.restore_commit_counter(snapshot.commit_counter);
                for table in snapshot.tables {
                    catalog.create_table(table.entry.clone())?;
                    storage.create_table(&table.entry);
                    let data = storage.table_mut(&table.entry.name)?;
                    for (row_id, values) in &table.rows {
                        data.place(*row_id, values, RowVersion::committed(1))?;
                    }
                    data.pad_to(table.row_count)?;
                }
            }
            let log = wal_path(path);
            let batches = replay(&log)?;
            let replayed = !batches.is_empty();
            for batch in batches {
                let commit_id = transactions.next_commit();
                apply_replay_batch(&mut catalog, &mut storage, batch, commit_id)?;
            }
            if replayed {
                tracing::debug!("replayed WAL into {}", path.display());
            }
            wal = Some(Mutex::new(WalWriter::open(&log)?));
        }

        let db = Database {
            inner: Arc::new(DatabaseInner {
                path,
                catalog: RwLock::new(catalog),
                storage: RwLock::new(storage),
                transactions,
                wal,
                prepared: Mutex::new(HashMap::new()),
                next_connection_id: AtomicU64::new(1),
            }),
        };
        // Fold the replayed log into the snapshot so the next open starts
        // from a clean pair.
        db.checkpoint()?;
        Ok(db)
    }

    pub fn connect(&self) -> Connection {
        Connection {
            id: self
                .inner
                .next_connection_id
                .fetch_add(1, Ordering::SeqCst),
            inner: Arc::clone(&self.inner),
            transaction: Mutex::new(None),
            interrupt: Arc::new(AtomicBool::new(false)),
            next_handle: AtomicU64::new(0),
        }
    }

    /// Materialize committed state into the main file and truncate the
    /// WAL. A no-op for in-memory databases.
    pub fn checkpoint(&self) -> Result<()> {
        self.inner.checkpoint()
    }
}

impl DatabaseInner {
    fn checkpoint(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        // Lock order everywhere: WAL, then catalog, then storage.
        let mut wal_guard = self.wal.as_ref().map(|w| w.lock());
        let catalog = self.catalog.read();
        let storage = self.storage.read();
        let commit_counter = self.transactions.current_commit();
        let tables = catalog
            .export_tables()
            .into_iter()
            .map(|entry| {
                let data = storage.table(&entry.name)?;
                Ok(storage::SnapshotTable {
                    rows: data.visible_rows(CHECKPOINT_READER_ID, commit_counter),
                    row_count: data.total_rows(),
                    entry,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        storage::write_snapshot(
            path,
            &storage::Snapshot {
                commit_counter,
                tables,
            },
        )?;
        if let Some(wal) = wal_guard.as_mut() {
            wal.truncate()?;
        }
        Ok(())
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        // Clean shutdown checkpoints; failures leave the WAL in place for
        // replay on the next open.
        if let Err(err) = self.checkpoint() {
            tracing::debug!("checkpoint on close failed: {}", err);
        }
    }
}

/// Re-apply one committed WAL batch during recovery. Row ids repeat their
/// original assignment because records replay in append order.
fn apply_replay_batch(
    catalog: &mut Catalog,
    storage: &mut StorageManager,
    batch: Vec<WalRecord>,
    commit_id: u64,
) -> Result<()> {
    for record in batch {
        match record {
            WalRecord::CreateTable { entry } => {
                catalog.create_table(entry.clone())?;
                storage.create_table(&entry);
            }
            WalRecord::DropTable { name } => {
                catalog.drop_table(&name, true)?;
                storage.drop_table(&name)?;
            }
            WalRecord::RenameColumn { table, from, to } => {
                catalog.rename_column(&table, &from, &to)?;
            }
            WalRecord::Insert { table, rows } => {
                storage
                    .table_mut(&table)?
                    .append(&rows, RowVersion::committed(commit_id))?;
            }
            WalRecord::Delete { table, row_ids } => {
                let data = storage.table_mut(&table)?;
                for row_id in row_ids {
                    data.version_mut(row_id)?.deleted_commit = commit_id;
                }
            }
            WalRecord::Update {
                table,
                row_ids,
                column,
                values,
            } => {
                let data = storage.table_mut(&table)?;
                let mut new_rows = Vec::with_capacity(row_ids.len());
                for (row_id, value) in row_ids.iter().zip(&values) {
                    let mut row = data.row_values(*row_id)?;
                    row[column] = value.clone();
                    data.version_mut(*row_id)?.deleted_commit = commit_id;
                    new_rows.push(row);
                }
                data.append(&new_rows, RowVersion::committed(commit_id))?;
            }
            WalRecord::Commit | WalRecord::Checkpoint => {}
        }
    }
    Ok(())
}

/// A session against a database. Statements run in implicit per-statement
/// transactions unless BEGIN opened an explicit one.
pub struct Connection {
    id: u64,
    inner: Arc<DatabaseInner>,
    transaction: Mutex<Option<Transaction>>,
    interrupt: Arc<AtomicBool>,
    next_handle: AtomicU64,
}

impl Connection {
    /// Run one SQL statement to completion.
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        let statement = parsing::parse_sql(sql)?;
        self.run_statement(statement)
    }

    /// Bind and plan a statement for later execution. The plan is cached
    /// on this connection; `execute` substitutes parameters without
    /// re-binding.
    pub fn prepare(&self, sql: &str) -> Result<PreparedHandle> {
        let statement = parsing::parse_sql(sql)?;
        match statement {
            Statement::Prepare { name, statement } => {
                self.install_prepared(name.clone(), *statement)?;
                Ok(PreparedHandle { name })
            }
            other => {
                let name = format!(
                    "__handle_{}",
                    self.next_handle.fetch_add(1, Ordering::SeqCst)
                );
                self.install_prepared(name.clone(), other)?;
                Ok(PreparedHandle { name })
            }
        }
    }

    /// Execute a prepared statement with positional arguments.
    pub fn execute(&self, handle: &PreparedHandle, params: &[Value]) -> Result<QueryResult> {
        self.execute_prepared(&handle.name, params.to_vec())
    }

    /// Remove a prepared statement. Unknown names succeed silently.
    pub fn deallocate(&self, name: &str) {
        let removed = self
            .inner
            .prepared
            .lock()
            .remove(&(self.id, name.to_string()));
        if removed.is_some() {
            self.inner.catalog.write().remove_dependent(&Dependent {
                connection_id: self.id,
                statement: name.to_string(),
            });
        }
    }

    /// The statement interrupt flag. Setting it makes the running
    /// statement unwind with [`Error::Interrupted`] at the next chunk
    /// boundary and rolls its transaction back. The flag stays set until
    /// the caller clears it; an interrupted statement is never retried.
    pub fn interrupt_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    fn run_statement(&self, statement: Statement) -> Result<QueryResult> {
        match statement {
            Statement::Begin => {
                let mut session = self.transaction.lock();
                if session.is_some() {
                    return Err(Error::Syntax("transaction already in progress".into()));
                }
                *session = Some(self.inner.transactions.begin(true));
                Ok(QueryResult::default())
            }
            Statement::Commit => {
                let mut session = self.transaction.lock();
                let txn = session
                    .take()
                    .ok_or_else(|| Error::Syntax("no transaction in progress".into()))?;
                if txn.aborted {
                    self.inner.rollback_transaction(txn);
                    return Err(Error::TransactionAborted);
                }
                self.inner.commit_transaction(txn)?;
                Ok(QueryResult::default())
            }
            Statement::Rollback => {
                let mut session = self.transaction.lock();
                let txn = session
                    .take()
                    .ok_or_else(|| Error::Syntax("no transaction in progress".into()))?;
                self.inner.rollback_transaction(txn);
                Ok(QueryResult::default())
            }
            Statement::Prepare { name, statement } => {
                self.install_prepared(name, *statement)?;
                Ok(QueryResult::default())
            }
            Statement::Execute { name, arguments } => {
                let values = arguments
                    .into_iter()
                    .map(argument_value)
                    .collect::<Result<Vec<_>>>()?;
                self.execute_prepared(&name, values)
            }
            Statement::Deallocate { name } => {
                self.deallocate(&name);
                Ok(QueryResult::default())
            }
            other => self.run_direct(other),
        }
    }

    /// Bind, plan and execute a plain statement inside the proper
    /// transaction scope.
    fn run_direct(&self, statement: Statement) -> Result<QueryResult> {
        let plan = {
            let catalog = self.inner.catalog.read();
            let bound = Binder::new(&catalog).bind(&statement)?;
            if !bound.parameter_types.is_empty() {
                return Err(Error::Syntax(
                    "parameters are only valid in prepared statements".into(),
                ));
            }
            planner::plan(bound.statement)?
        };
        self.run_plan(plan)
    }

    fn run_plan(&self, plan: PhysicalPlan) -> Result<QueryResult> {
        let mut session = self.transaction.lock();
        match session.as_mut() {
            Some(txn) => {
                if txn.aborted {
                    return Err(Error::TransactionAborted);
                }
                let result = self.inner.execute_plan(txn, plan, &self.interrupt);
                match result {
                    Err(Error::Interrupted) => {
                        // Cancellation releases the transaction entirely.
                        if let Some(txn) = session.take() {
                            self.inner.rollback_transaction(txn);
                        }
                        Err(Error::Interrupted)
                    }
                    Err(err) => {
                        if let Some(txn) = session.as_mut() {
                            txn.aborted = true;
                        }
                        Err(err)
                    }
                    Ok(result) => Ok(result),
                }
            }
            None => {
                let mut txn = self.inner.transactions.begin(false);
                match self.inner.execute_plan(&mut txn, plan, &self.interrupt) {
                    Ok(result) => {
                        self.inner.commit_transaction(txn)?;
                        Ok(result)
                    }
                    Err(err) => {
                        self.inner.rollback_transaction(txn);
                        Err(err)
                    }
                }
            }
        }
    }

    fn install_prepared(&self, name: String, statement: Statement) -> Result<()> {
        if !matches!(
            statement,
            Statement::Select(_)
                | Statement::Insert { .. }
                | Statement::Update { .. }
                | Statement::Delete { .. }
        ) {
            return Err(Error::Syntax(
                "only queries and DML statements can be prepared".into(),
            ));
        }
        let (plan, parameter_types, tables) = {
            let catalog = self.inner.catalog.read();
            let bound = Binder::new(&catalog).bind(&statement)?;
            let tables = bound.statement.referenced_tables();
            let plan = planner::plan(bound.statement)?;
            (plan, bound.parameter_types, tables)
        };

        // Replacing an existing statement drops its dependency edges
        // first.
        self.deallocate(&name);
        {
            let mut catalog = self.inner.catalog.write();
            for table in &tables {
                catalog.add_dependency(
                    Dependent {
                        connection_id: self.id,
                        statement: name.clone(),
                    },
                    table,
                );
            }
        }
        self.inner.prepared.lock().insert(
            (self.id, name),
            PreparedStatement {
                plan,
                parameter_types,
                tables,
            },
        );
        Ok(())
    }

    fn execute_prepared(&self, name: &str, params: Vec<Value>) -> Result<QueryResult> {
        let plan = {
            let prepared = self.inner.prepared.lock();
            let statement = prepared
                .get(&(self.id, name.to_string()))
                .ok_or_else(|| Error::NotFound(format!("prepared statement {}", name)))?;
            if params.len() != statement.parameter_types.len() {
                return Err(Error::TypeMismatch {
                    expected: format!("{} parameters", statement.parameter_types.len()),
                    found: format!("{} parameters", params.len()),
                });
            }
            // Substitute Parameter(i) -> Constant(v_i); arguments must cast
            // to the declared types.
            let mut values = Vec::with_capacity(params.len());
            for (value, datatype) in params.iter().zip(&statement.parameter_types) {
                values.push(value.try_cast(datatype)?);
            }
            let types = statement.parameter_types.clone();
            statement
                .plan
                .clone()
                .transform_expressions(&mut |expr| match expr {
                    BoundExpression::Parameter { index, .. } => Ok(BoundExpression::Constant {
                        value: values[index].clone(),
                        datatype: Some(types[index].clone()),
                    }),
                    other => Ok(other),
                })?
        };
        self.run_plan(plan)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Abandon any open transaction and this connection's prepared
        // statements. Lock order matches DROP TABLE: never hold the
        // prepared map while taking the catalog lock.
        if let Some(txn) = self.transaction.get_mut().take() {
            self.inner.rollback_transaction(txn);
        }
        let names: Vec<String> = {
            let prepared = self.inner.prepared.lock();
            prepared
                .keys()
                .filter(|(conn, _)| *conn == self.id)
                .map(|(_, name)| name.clone())
                .collect()
        };
        for name in names {
            self.deallocate(&name);
        }
    }
}

/// EXECUTE arguments are literal expressions; evaluate them without a
/// binder context.
fn argument_value(expr: Expression) -> Result<Value> {
    match expr {
        Expression::Literal(Literal::Null) => Ok(Value::Null),
        Expression::Literal(Literal::Boolean(b)) => Ok(Value::Boolean(b)),
        Expression::Literal(Literal::Integer(i)) => Ok(match i32::try_from(i) {
            Ok(v) => Value::Integer(v),
            Err(_) => Value::BigInt(i),
        }),
        Expression::Literal(Literal::Float(f)) => Ok(Value::Double(f)),
        Expression::Literal(Literal::String(s)) => Ok(Value::Varchar(s)),
        Expression::Operator(Operator::Negate(inner)) => match argument_value(*inner)? {
            Value::Integer(v) => Ok(Value::Integer(-v)),
            Value::BigInt(v) => Ok(Value::BigInt(-v)),
            Value::Double(v) => Ok(Value::Double(-v)),
            other => Err(Error::TypeMismatch {
                expected: "a numeric argument".into(),
                found: other.to_string(),
            }),
        },
        Expression::Cast { expr, datatype } => argument_value(*expr)?.try_cast(&datatype),
        other => Err(Error::Syntax(format!(
            "EXECUTE arguments must be literals, found {:?}",
            other
        ))),
    }
}

impl DatabaseInner {
    fn execute_plan(
        &self,
        txn: &mut Transaction,
        plan: PhysicalPlan,
        interrupt: &AtomicBool,
    ) -> Result<QueryResult> {
        match plan {
            PhysicalPlan::Query { root, names } => self.execute_query(txn, root, names, interrupt),
            PhysicalPlan::Insert { table, rows } => {
                self.execute_insert(txn, &table, rows, interrupt)
            }
            PhysicalPlan::Update {
                table,
                child,
                assignments,
            } => self.execute_update(txn, &table, child, assignments, interrupt),
            PhysicalPlan::Delete { table, child } => {
                self.execute_delete(txn, &table, child, interrupt)
            }
            PhysicalPlan::CreateTable(entry) => self.execute_create_table(txn, entry),
            PhysicalPlan::DropTable {
                name,
                if_exists,
                cascade,
            } => self.execute_drop_table(txn, &name, if_exists, cascade),
            PhysicalPlan::RenameColumn { table, from, to } => {
                self.execute_rename(txn, &table, &from, &to)
            }
            PhysicalPlan::Checkpoint => {
                self.checkpoint()?;
                Ok(QueryResult::default())
            }
            PhysicalPlan::Explain(text) => Ok(QueryResult {
                columns: vec!["explain".to_string()],
                rows: text
                    .lines()
                    .map(|l| vec![Value::Varchar(l.to_string())])
                    .collect(),
                rows_changed: 0,
            }),
            // Transaction control is interpreted by the connection.
            PhysicalPlan::Begin | PhysicalPlan::Commit | PhysicalPlan::Rollback => Err(
                Error::Internal("transaction control reached the executor".into()),
            ),
        }
    }

    fn execute_query(
        &self,
        txn: &Transaction,
        root: PhysicalOperator,
        names: Vec<String>,
        interrupt: &AtomicBool,
    ) -> Result<QueryResult> {
        let storage = self.storage.read();
        let ctx = ExecutionContext {
            storage: &storage,
            txn_id: txn.id,
            start_time: txn.start_time,
            interrupt,
        };
        let root = resolve_subqueries(root, &ctx)?;
        let chunks = execute_to_completion(&root, &ctx)?;
        let mut rows = Vec::new();
        for chunk in &chunks {
            for k in 0..chunk.len() {
                rows.push(chunk.row(k));
            }
        }
        Ok(QueryResult {
            columns: names,
            rows,
            rows_changed: 0,
        })
    }

    fn execute_insert(
        &self,
        txn: &mut Transaction,
        table: &str,
        row_exprs: Vec<Vec<BoundExpression>>,
        interrupt: &AtomicBool,
    ) -> Result<QueryResult> {
        let entry = self.catalog.read().lookup(table)?.clone();
        let rows = {
            let storage = self.storage.read();
            let ctx = ExecutionContext {
                storage: &storage,
                txn_id: txn.id,
                start_time: txn.start_time,
                interrupt,
            };
            let carrier = DataChunk::carrier(1);
            let mut rows = Vec::with_capacity(row_exprs.len());
            for exprs in row_exprs {
                let mut row = Vec::with_capacity(exprs.len());
                for (expr, column) in exprs.into_iter().zip(&entry.columns) {
                    let expr = resolve_expression_subqueries(expr, &ctx)?;
                    let mut executor = ExpressionExecutor::new(expr);
                    let value = executor.execute(&carrier)?.value_at(0);
                    check_column_value(&value, column)?;
                    row.push(value);
                }
                rows.push(row);
            }
            rows
        };

        let mut storage = self.storage.write();
        let row_ids = storage.table_mut(table)?.append_for(&rows, txn)?;
        let count = row_ids.len();
        for row_id in row_ids {
            txn.undo.push(UndoEntry::Insert {
                table: table.to_string(),
                row_id,
            });
        }
        txn.modified_tables.insert(table.to_string());
        txn.record_wal(WalRecord::Insert {
            table: table.to_string(),
            rows,
        });
        Ok(QueryResult::changed(count))
    }

    fn execute_update(
        &self,
        txn: &mut Transaction,
        table: &str,
        child: PhysicalOperator,
        assignments: Vec<(usize, BoundExpression)>,
        interrupt: &AtomicBool,
    ) -> Result<QueryResult> {
        let entry = self.catalog.read().lookup(table)?.clone();
        let assigned_columns: Vec<usize> = assignments.iter().map(|(i, _)| *i).collect();
        // Write-guard the whole statement; the read phase reborrows the
        // guard immutably.
        let mut storage = self.storage.write();
        let (row_ids, new_rows) = {
            let ctx = ExecutionContext {
                storage: &storage,
                txn_id: txn.id,
                start_time: txn.start_time,
                interrupt,
            };
            let child = resolve_subqueries(child, &ctx)?;
            let mut executors: Vec<(usize, ExpressionExecutor)> = assignments
                .into_iter()
                .map(|(i, e)| {
                    Ok((
                        i,
                        ExpressionExecutor::new(resolve_expression_subqueries(e, &ctx)?),
                    ))
                })
                .collect::<Result<Vec<_>>>()?;

            let mut state = execution::init_state(&child);
            let mut row_ids = Vec::new();
            let mut new_rows = Vec::new();
            while let Some(chunk) = execution::get_chunk(&child, &mut state, &ctx)? {
                let width = chunk.column_count();
                let id_column = chunk.column(width - 1);
                let assigned = executors
                    .iter_mut()
                    .map(|(i, e)| Ok((*i, e.execute(&chunk)?)))
                    .collect::<Result<Vec<_>>>()?;
                for k in 0..chunk.len() {
                    let Value::BigInt(row_id) = id_column.value_at(k) else {
                        return Err(Error::Internal("scan did not produce row ids".into()));
                    };
                    let mut row: Vec<Value> = (0..width - 1)
                        .map(|c| chunk.column(c).value_at(k))
                        .collect();
                    for (index, vector) in &assigned {
                        let value = vector.value_at(k);
                        check_column_value(&value, &entry.columns[*index])?;
                        row[*index] = value;
                    }
                    row_ids.push(row_id as u64);
                    new_rows.push(row);
                }
            }
            (row_ids, new_rows)
        };

        let pairs = storage.update(table, &row_ids, &new_rows, txn)?;
        let count = pairs.len();
        for (old_row, new_row) in &pairs {
            txn.undo.push(UndoEntry::Update {
                table: table.to_string(),
                old_row: *old_row,
                new_row: *new_row,
            });
        }
        txn.modified_tables.insert(table.to_string());

        if count > 0 {
            let updated_ids: Vec<u64> = pairs.iter().map(|(old, _)| *old).collect();
            let updated_rows: Vec<Vec<Value>> = row_ids
                .iter()
                .zip(&new_rows)
                .filter(|(id, _)| updated_ids.contains(id))
                .map(|(_, row)| row.clone())
                .collect();
            // Narrow single-column updates log one UPDATE record; wide
            // updates log their delete + insert halves.
            if let [column] = assigned_columns[..] {
                txn.record_wal(WalRecord::Update {
                    table: table.to_string(),
                    row_ids: updated_ids,
                    column,
                    values: updated_rows.iter().map(|r| r[column].clone()).collect(),
                });
            } else {
                txn.record_wal(WalRecord::Delete {
                    table: table.to_string(),
                    row_ids: updated_ids,
                });
                txn.record_wal(WalRecord::Insert {
                    table: table.to_string(),
                    rows: updated_rows,
                });
            }
        }
        Ok(QueryResult::changed(count))
    }

    fn execute_delete(
        &self,
        txn: &mut Transaction,
        table: &str,
        child: PhysicalOperator,
        interrupt: &AtomicBool,
    ) -> Result<QueryResult> {
        let mut storage = self.storage.write();
        let row_ids = {
            let ctx = ExecutionContext {
                storage: &storage,
                txn_id: txn.id,
                start_time: txn.start_time,
                interrupt,
            };
            let child = resolve_subqueries(child, &ctx)?;
            let mut state = execution::init_state(&child);
            let mut row_ids = Vec::new();
            while let Some(chunk) = execution::get_chunk(&child, &mut state, &ctx)? {
                let id_column = chunk.column(chunk.column_count() - 1);
                for k in 0..chunk.len() {
                    let Value::BigInt(row_id) = id_column.value_at(k) else {
                        return Err(Error::Internal("scan did not produce row ids".into()));
                    };
                    row_ids.push(row_id as u64);
                }
            }
            row_ids
        };

        let deleted = storage.table_mut(table)?.delete(&row_ids, txn)?;
        let count = deleted.len();
        for row_id in &deleted {
            txn.undo.push(UndoEntry::Delete {
                table: table.to_string(),
                row_id: *row_id,
            });
        }
        txn.modified_tables.insert(table.to_string());
        if !deleted.is_empty() {
            txn.record_wal(WalRecord::Delete {
                table: table.to_string(),
                row_ids: deleted,
            });
        }
        Ok(QueryResult::changed(count))
    }

    fn execute_create_table(
        &self,
        txn: &mut Transaction,
        entry: TableCatalogEntry,
    ) -> Result<QueryResult> {
        self.catalog.write().create_table(entry.clone())?;
        self.storage.write().create_table(&entry);
        txn.undo.push(UndoEntry::CreateTable {
            name: entry.name.clone(),
        });
        txn.record_wal(WalRecord::CreateTable { entry });
        Ok(QueryResult::default())
    }

    fn execute_drop_table(
        &self,
        txn: &mut Transaction,
        name: &str,
        if_exists: bool,
        cascade: bool,
    ) -> Result<QueryResult> {
        let mut catalog = self.catalog.write();
        let entry = match catalog.lookup(name) {
            Ok(entry) => entry.clone(),
            Err(Error::NotFound(_)) if if_exists => return Ok(QueryResult::default()),
            Err(err) => return Err(err),
        };
        let dependents = catalog.drop_table(name, cascade)?;
        // CASCADE removes dependent prepared statements from their owning
        // connections through the weak back-references.
        let mut prepared = self.prepared.lock();
        for dependent in dependents {
            prepared.remove(&(dependent.connection_id, dependent.statement.clone()));
            catalog.remove_dependent(&dependent);
        }
        drop(prepared);
        drop(catalog);

        let data = self.storage.write().drop_table(name)?;
        txn.undo.push(UndoEntry::DropTable { entry, data });
        txn.record_wal(WalRecord::DropTable {
            name: name.to_string(),
        });
        Ok(QueryResult::default())
    }

    fn execute_rename(
        &self,
        txn: &mut Transaction,
        table: &str,
        from: &str,
        to: &str,
    ) -> Result<QueryResult> {
        self.catalog.write().rename_column(table, from, to)?;
        txn.undo.push(UndoEntry::RenameColumn {
            table: table.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        txn.record_wal(WalRecord::RenameColumn {
            table: table.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(QueryResult::default())
    }

    /// Commit: WAL first (append + fsync), then the commit id, then stamp
    /// the undo entries. A WAL failure aborts; the counter never advances.
    /// The commit id is assigned while the WAL lock is held, so commit
    /// order always matches append order.
    fn commit_transaction(&self, txn: Transaction) -> Result<()> {
        if txn.undo.is_empty() && txn.wal_buffer.is_empty() {
            return Ok(());
        }
        let mut wal_guard = self.wal.as_ref().map(|w| w.lock());
        if let Some(wal) = wal_guard.as_mut() {
            if !txn.wal_buffer.is_empty() {
                if let Err(err) = wal.commit(&txn.wal_buffer) {
                    drop(wal_guard);
                    let id = txn.id;
                    self.rollback_transaction(txn);
                    tracing::debug!("commit of {} failed at WAL append: {}", id, err);
                    return Err(err);
                }
            }
        }
        let commit_id = self.transactions.next_commit();
        self.storage.write().stamp_commit(&txn.undo, commit_id)?;
        tracing::trace!(commit_id, tables = txn.modified_tables.len(), "committed");
        Ok(())
    }

    /// Walk the undo buffer in reverse, reverting every in-memory change.
    /// The per-transaction WAL buffer is discarded unflushed.
    fn rollback_transaction(&self, mut txn: Transaction) {
        for entry in txn.undo.drain(..).rev() {
            match entry {
                UndoEntry::Insert { .. } | UndoEntry::Delete { .. } | UndoEntry::Update { .. } => {
                    if let Err(err) = self.storage.write().revert(&entry) {
                        tracing::debug!("rollback revert failed: {}", err);
                    }
                }
                UndoEntry::CreateTable { ref name } => {
                    let _ = self.catalog.write().drop_table(name, true);
                    let _ = self.storage.write().drop_table(name);
                }
                UndoEntry::DropTable { entry, data } => {
                    // The data moves back wholesale; its versions were
                    // untouched by the drop.
                    let _ = self.catalog.write().create_table(entry);
                    self.storage.write().restore_table(data);
                }
                UndoEntry::RenameColumn {
                    ref table,
                    ref from,
                    ref to,
                } => {
                    let _ = self.catalog.write().rename_column(table, to, from);
                }
            }
        }
    }
}

fn check_column_value(value: &Value, column: &catalog::ColumnDefinition) -> Result<()> {
    if value.is_null() {
        if !column.nullable {
            return Err(Error::NotNull(column.name.clone()));
        }
        return Ok(());
    }
    if let (Value::Varchar(s), LogicalType::Varchar(Some(width))) = (value, &column.datatype) {
        if s.chars().count() > *width {
            return Err(Error::TypeOverflow {
                column: column.name.clone(),
                width: *width,
            });
        }
    }
    Ok(())
}
