//! DML strategy: INSERT / UPDATE / DELETE / SELECT and set operations.
//!
//! The correctness contract for writes, per statement: constraint
//! validation first, then the data-page mutation, then synchronous
//! index maintenance - all inside one WAL-bounded transaction. When a
//! row fails mid-statement, the rows already applied are compensated
//! so a failed statement leaves the pre-state behind.
//!
//! Index lookups are a filter, not an authority: every candidate row
//! handle coming out of an index is refetched and re-checked against
//! the WHERE clause before the statement acts on it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::auth::PrivilegeKind;
use crate::catalog::schema::{ColumnDef, TableConstraint, TableSchema};
use crate::catalog::Database;
use crate::common::{Error, ErrorCode, Result, RowHandle, TxnId, Value};
use crate::concurrency::IsolationLevel;
use crate::recovery::WalRecordKind;
use crate::sql::{
    AggregateFunc, Expression, Projection, SelectItem, SelectStatement, SetOpKind, Statement,
    WhereClause,
};
use crate::storage::record::StorageClass;

use super::context::ExecutionContext;
use super::result::{ColumnMeta, ExecutionResult, ResultSet, Row};
use super::strategy::{require_table_permission, ExecutionStrategy};

pub struct DmlStrategy;

/// One applied row change, tracked for compensation.
enum Applied {
    Inserted {
        handle: RowHandle,
        values: Vec<Value>,
    },
    Updated {
        new_handle: RowHandle,
        old_values: Vec<Value>,
        new_values: Vec<Value>,
    },
    Deleted {
        values: Vec<Value>,
    },
}

struct StatementTxn {
    txn: TxnId,
    auto: bool,
}

impl ExecutionStrategy for DmlStrategy {
    fn check_permission(&self, stmt: &Statement, ctx: &ExecutionContext) -> Result<()> {
        match stmt {
            Statement::Select(select) => {
                require_table_permission(ctx, &select.table, PrivilegeKind::Select)?;
                if let Some(join) = &select.join {
                    require_table_permission(ctx, &join.table, PrivilegeKind::Select)?;
                }
                Ok(())
            }
            Statement::SetOperation { left, right, .. } => {
                require_table_permission(ctx, &left.table, PrivilegeKind::Select)?;
                require_table_permission(ctx, &right.table, PrivilegeKind::Select)
            }
            Statement::Insert { table, .. } => {
                require_table_permission(ctx, table, PrivilegeKind::Insert)
            }
            Statement::Update { table, .. } => {
                require_table_permission(ctx, table, PrivilegeKind::Update)
            }
            Statement::Delete { table, .. } => {
                require_table_permission(ctx, table, PrivilegeKind::Delete)
            }
            other => Err(Error::new(
                ErrorCode::InvalidParameter,
                "dml",
                format!("{:?} is not a DML statement", other.kind()),
            )),
        }
    }

    fn validate(&self, stmt: &Statement, ctx: &ExecutionContext) -> Result<()> {
        let db = ctx.current_db()?;
        match stmt {
            Statement::Select(select) => validate_select(&db, select),
            Statement::SetOperation { left, right, .. } => {
                validate_select(&db, left)?;
                validate_select(&db, right)
            }
            Statement::Insert { table, columns, rows } => {
                let schema = db.require_schema(table)?;
                let arity = match columns {
                    Some(names) => {
                        for name in names {
                            require_column(&schema, name)?;
                        }
                        names.len()
                    }
                    None => schema.columns.len(),
                };
                for row in rows {
                    if row.len() != arity {
                        return Err(Error::new(
                            ErrorCode::SqlSemanticError,
                            "dml",
                            format!("expected {} values, got {}", arity, row.len()),
                        ));
                    }
                }
                Ok(())
            }
            Statement::Update {
                table,
                assignments,
                where_clause,
            } => {
                let schema = db.require_schema(table)?;
                for (column, _) in assignments {
                    require_column(&schema, column)?;
                }
                if let Some(clause) = where_clause {
                    require_column(&schema, &clause.column)?;
                }
                Ok(())
            }
            Statement::Delete { table, where_clause } => {
                let schema = db.require_schema(table)?;
                if let Some(clause) = where_clause {
                    require_column(&schema, &clause.column)?;
                }
                Ok(())
            }
            other => Err(Error::new(
                ErrorCode::InvalidParameter,
                "dml",
                format!("{:?} is not a DML statement", other.kind()),
            )),
        }
    }

    fn execute(&self, stmt: Statement, ctx: &mut ExecutionContext) -> Result<ExecutionResult> {
        match stmt {
            Statement::Insert { table, columns, rows } => self.insert(&table, columns, rows, ctx),
            Statement::Update {
                table,
                assignments,
                where_clause,
            } => self.update(&table, assignments, where_clause, ctx),
            Statement::Delete { table, where_clause } => self.delete(&table, where_clause, ctx),
            Statement::Select(select) => {
                let result_set = self.run_select(&select, ctx)?;
                let count = result_set.row_count();
                ctx.rows_returned = count;
                ctx.result_set = Some(result_set);
                Ok(ExecutionResult::ok(format!("{} row(s) returned", count)))
            }
            Statement::SetOperation { op, all, left, right } => {
                let result_set = self.run_set_operation(op, all, &left, &right, ctx)?;
                let count = result_set.row_count();
                ctx.rows_returned = count;
                ctx.result_set = Some(result_set);
                Ok(ExecutionResult::ok(format!("{} row(s) returned", count)))
            }
            other => Err(Error::new(
                ErrorCode::InvalidParameter,
                "dml",
                format!("{:?} is not a DML statement", other.kind()),
            )),
        }
    }
}

// ============================================================================
// Writes
// ============================================================================

impl DmlStrategy {
    fn insert(
        &self,
        table: &str,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expression>>,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        let db = ctx.current_db()?;
        let schema = db.require_schema(table)?;
        let st = self.statement_txn(ctx, &db)?;

        let mut applied: Vec<Applied> = Vec::new();
        let outcome = (|| -> Result<usize> {
            for row_exprs in &rows {
                let values =
                    resolve_insert_values(&db, &schema, columns.as_deref(), row_exprs, st.txn)?;
                validate_row_constraints(&db, &schema, &values, None)?;

                let key = row_lock_key(db.name(), &schema, &values, None);
                ctx.services.txns.lock_manager().lock_for_write(st.txn, &key)?;

                let handle = db.storage().insert_record(st.txn, &schema, &values)?;
                if let Err(err) = db.indexes().on_insert(&schema, &values, handle) {
                    db.storage().delete_record(st.txn, handle)?;
                    return Err(err);
                }
                log_tuple(&db, st.txn, WalRecordKind::InsertTuple, table, handle)?;
                applied.push(Applied::Inserted {
                    handle,
                    values,
                });
            }
            Ok(applied.len())
        })();

        self.settle(ctx, &db, &schema, st, applied, outcome)
            .map(|count| {
                ctx.rows_affected = count;
                ExecutionResult::ok(format!("{} row(s) inserted", count))
            })
    }

    fn update(
        &self,
        table: &str,
        assignments: Vec<(String, Expression)>,
        where_clause: Option<WhereClause>,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        let db = ctx.current_db()?;
        let schema = db.require_schema(table)?;
        let st = self.statement_txn(ctx, &db)?;

        let mut applied: Vec<Applied> = Vec::new();
        let outcome = (|| -> Result<usize> {
            let (candidates, used_index, index_info) =
                fetch_candidates(&db, &schema, where_clause.as_ref())?;
            ctx.used_index = used_index;
            ctx.index_info = index_info;

            for (handle, old_values) in candidates {
                let mut new_values = old_values.clone();
                for (column, expr) in &assignments {
                    let ordinal = require_column(&schema, column)?;
                    new_values[ordinal] = expr.evaluate()?;
                }
                coerce_row_types(&schema, &new_values)?;
                validate_row_constraints(&db, &schema, &new_values, Some(handle))?;

                let lock_mgr = ctx.services.txns.lock_manager();
                lock_mgr.lock_for_write(
                    st.txn,
                    &row_lock_key(db.name(), &schema, &old_values, Some(handle)),
                )?;
                lock_mgr.lock_for_write(
                    st.txn,
                    &row_lock_key(db.name(), &schema, &new_values, Some(handle)),
                )?;

                let new_handle = db
                    .storage()
                    .update_record(st.txn, &schema, handle, &new_values)?;
                db.indexes()
                    .on_update(&schema, &old_values, &new_values, handle, new_handle)?;
                log_tuple(&db, st.txn, WalRecordKind::UpdateTuple, table, new_handle)?;

                applied.push(Applied::Updated {
                    new_handle,
                    old_values,
                    new_values,
                });
            }
            Ok(applied.len())
        })();

        self.settle(ctx, &db, &schema, st, applied, outcome)
            .map(|count| {
                ctx.rows_affected = count;
                ExecutionResult::ok(format!("{} row(s) updated", count))
            })
    }

    fn delete(
        &self,
        table: &str,
        where_clause: Option<WhereClause>,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        let db = ctx.current_db()?;
        let schema = db.require_schema(table)?;
        let st = self.statement_txn(ctx, &db)?;

        let mut applied: Vec<Applied> = Vec::new();
        let outcome = (|| -> Result<usize> {
            let (candidates, used_index, index_info) =
                fetch_candidates(&db, &schema, where_clause.as_ref())?;
            ctx.used_index = used_index;
            ctx.index_info = index_info;

            for (handle, values) in candidates {
                ctx.services.txns.lock_manager().lock_for_write(
                    st.txn,
                    &row_lock_key(db.name(), &schema, &values, Some(handle)),
                )?;

                db.storage().delete_record(st.txn, handle)?;
                db.indexes().on_delete(&schema, &values, handle);
                log_tuple(&db, st.txn, WalRecordKind::DeleteTuple, table, handle)?;

                applied.push(Applied::Deleted { values });
            }
            Ok(applied.len())
        })();

        self.settle(ctx, &db, &schema, st, applied, outcome)
            .map(|count| {
                ctx.rows_affected = count;
                ExecutionResult::ok(format!("{} row(s) deleted", count))
            })
    }

    /// Open (or adopt) the statement's transaction.
    fn statement_txn(&self, ctx: &ExecutionContext, db: &Arc<Database>) -> Result<StatementTxn> {
        if let Some(txn) = ctx.txn_id {
            if !ctx.services.txns.is_active(txn) {
                return Err(Error::new(
                    ErrorCode::TransactionError,
                    "dml",
                    format!("{} is no longer active", txn),
                ));
            }
            if let Some(bound) = ctx.services.txns.database_of(txn) {
                if !bound.eq_ignore_ascii_case(db.name()) {
                    return Err(Error::new(
                        ErrorCode::TransactionError,
                        "dml",
                        format!("{} is bound to database '{}'", txn, bound),
                    ));
                }
            }
            return Ok(StatementTxn { txn, auto: false });
        }
        let txn = ctx
            .services
            .txns
            .begin(ctx.isolation, db.name(), db.wal())?;
        Ok(StatementTxn { txn, auto: true })
    }

    /// Close out a write statement: commit the auto transaction on
    /// success; on failure compensate the applied changes (and roll an
    /// auto transaction back).
    fn settle(
        &self,
        ctx: &ExecutionContext,
        db: &Arc<Database>,
        schema: &TableSchema,
        st: StatementTxn,
        applied: Vec<Applied>,
        outcome: Result<usize>,
    ) -> Result<usize> {
        match outcome {
            Ok(count) => {
                if st.auto {
                    ctx.services.txns.commit(st.txn, db.wal())?;
                }
                Ok(count)
            }
            Err(err) => {
                debug!(error = %err, applied = applied.len(), "DML statement failed, compensating");
                self.compensate(db, schema, st.txn, applied);
                if st.auto {
                    let _ = ctx.services.txns.rollback(st.txn, db.wal(), db.pool());
                }
                Err(err)
            }
        }
    }

    /// Undo applied row changes, newest first. Storage undo is WAL
    /// logged like any mutation; index undo restores the in-memory
    /// entries.
    fn compensate(
        &self,
        db: &Arc<Database>,
        schema: &TableSchema,
        txn: TxnId,
        applied: Vec<Applied>,
    ) {
        for change in applied.into_iter().rev() {
            match change {
                Applied::Inserted { handle, values } => {
                    let _ = db.storage().delete_record(txn, handle);
                    db.indexes().on_delete(schema, &values, handle);
                }
                Applied::Updated {
                    new_handle,
                    old_values,
                    new_values,
                } => {
                    if let Ok(restored) =
                        db.storage()
                            .update_record(txn, schema, new_handle, &old_values)
                    {
                        let _ = db.indexes().on_update(
                            schema,
                            &new_values,
                            &old_values,
                            new_handle,
                            restored,
                        );
                    }
                }
                Applied::Deleted { values } => {
                    if let Ok(handle) = db.storage().insert_record(txn, schema, &values) {
                        let _ = db.indexes().on_insert(schema, &values, handle);
                    }
                }
            }
        }
    }
}

// ============================================================================
// SELECT
// ============================================================================

/// A column of the (possibly joined) row shape, with its table
/// qualifier.
#[derive(Clone)]
struct BoundColumn {
    table: String,
    def: ColumnDef,
}

impl DmlStrategy {
    fn run_select(
        &self,
        select: &SelectStatement,
        ctx: &mut ExecutionContext,
    ) -> Result<ResultSet> {
        let db = ctx.current_db()?;
        let schema = db.require_schema(&select.table)?;

        let (candidates, used_index, index_info) =
            fetch_candidates(&db, &schema, select.where_clause.as_ref())?;
        if used_index {
            ctx.used_index = true;
            ctx.index_info = index_info;
        }

        self.take_read_locks(ctx, &db, &schema, &candidates)?;

        // Bind the row shape: base table alone, or base joined right.
        let mut columns: Vec<BoundColumn> = schema
            .columns
            .iter()
            .map(|def| BoundColumn {
                table: schema.name.clone(),
                def: def.clone(),
            })
            .collect();
        let mut rows: Vec<Vec<Value>> = candidates.into_iter().map(|(_, values)| values).collect();

        if let Some(join) = &select.join {
            let right_schema = db.require_schema(&join.table)?;
            let right_rows = db.storage().scan(&right_schema)?;

            let left_ordinal = resolve_bound(&columns, &join.left_column)?;
            let right_ordinal = require_column(&right_schema, &join.right_column)?;

            let mut joined = Vec::new();
            for left in &rows {
                for (_, right) in &right_rows {
                    let l = &left[left_ordinal];
                    let r = &right[right_ordinal];
                    if !l.is_null() && l.matches(crate::common::CompareOp::Eq, r) {
                        let mut combined = left.clone();
                        combined.extend(right.iter().cloned());
                        joined.push(combined);
                    }
                }
            }
            columns.extend(right_schema.columns.iter().map(|def| BoundColumn {
                table: right_schema.name.clone(),
                def: def.clone(),
            }));
            rows = joined;
        }

        if select.has_aggregates() || select.group_by.is_some() {
            return aggregate_rows(select, &columns, rows);
        }

        // Sort on the pre-projection shape so ORDER BY can use any
        // column, then project, dedupe, and page.
        if let Some(order) = &select.order_by {
            let ordinal = resolve_bound(&columns, &order.column)?;
            rows.sort_by(|a, b| {
                let cmp = a[ordinal].sort_cmp(&b[ordinal]);
                if order.descending {
                    cmp.reverse()
                } else {
                    cmp
                }
            });
        }

        let (metadata, ordinals) = project_columns(select, &columns)?;
        let mut projected: Vec<Vec<Value>> = rows
            .into_iter()
            .map(|row| ordinals.iter().map(|&i| row[i].clone()).collect())
            .collect();

        if select.distinct {
            let mut seen = std::collections::HashSet::new();
            projected.retain(|row| seen.insert(row_key(row)));
        }

        let offset = select.offset.unwrap_or(0) as usize;
        let limit = select.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let mut result_set = ResultSet::new(metadata);
        for row in projected.into_iter().skip(offset).take(limit) {
            result_set.add_row(Row::new(row));
        }
        Ok(result_set)
    }

    /// Shared-lock policy for reads, applied only inside an explicit
    /// transaction: READ_COMMITTED releases each lock right after the
    /// read; REPEATABLE_READ and above hold them to commit;
    /// SERIALIZABLE adds the full table key as its predicate lock.
    fn take_read_locks(
        &self,
        ctx: &ExecutionContext,
        db: &Arc<Database>,
        schema: &TableSchema,
        candidates: &[(RowHandle, Vec<Value>)],
    ) -> Result<()> {
        let Some(txn) = ctx.txn_id else {
            return Ok(());
        };
        let isolation = ctx
            .services
            .txns
            .isolation(txn)
            .unwrap_or(IsolationLevel::default());
        if !isolation.takes_read_locks() {
            return Ok(());
        }

        let lock_mgr = ctx.services.txns.lock_manager();
        if isolation == IsolationLevel::Serializable {
            lock_mgr.lock_for_read(txn, &table_lock_key(db.name(), &schema.name))?;
        }
        for (handle, values) in candidates {
            let key = row_lock_key(db.name(), schema, values, Some(*handle));
            lock_mgr.lock_for_read(txn, &key)?;
            if !isolation.holds_read_locks() {
                lock_mgr.unlock(txn, &key);
            }
        }
        Ok(())
    }

    fn run_set_operation(
        &self,
        op: SetOpKind,
        all: bool,
        left: &SelectStatement,
        right: &SelectStatement,
        ctx: &mut ExecutionContext,
    ) -> Result<ResultSet> {
        let left_set = self.run_select(left, ctx)?;
        let right_set = self.run_select(right, ctx)?;

        if left_set.column_metadata.len() != right_set.column_metadata.len() {
            return Err(Error::new(
                ErrorCode::SqlSemanticError,
                "dml",
                format!(
                    "set operands have different arity: {} vs {}",
                    left_set.column_metadata.len(),
                    right_set.column_metadata.len()
                ),
            ));
        }

        let mut result_set = ResultSet::new(left_set.column_metadata.clone());
        let left_rows: Vec<Vec<Value>> = left_set.rows.into_iter().map(|r| r.values).collect();
        let right_rows: Vec<Vec<Value>> = right_set.rows.into_iter().map(|r| r.values).collect();

        let mut right_counts: HashMap<String, usize> = HashMap::new();
        for row in &right_rows {
            *right_counts.entry(row_key(row)).or_insert(0) += 1;
        }

        let combined: Vec<Vec<Value>> = match op {
            SetOpKind::Union => {
                let mut out = left_rows;
                out.extend(right_rows);
                if all {
                    out
                } else {
                    dedupe(out)
                }
            }
            SetOpKind::Intersect => {
                let mut out = Vec::new();
                let mut counts = right_counts;
                for row in left_rows {
                    let key = row_key(&row);
                    if let Some(count) = counts.get_mut(&key) {
                        if *count > 0 {
                            *count -= 1;
                            out.push(row);
                        }
                    }
                }
                if all {
                    out
                } else {
                    dedupe(out)
                }
            }
            SetOpKind::Except => {
                let mut out = Vec::new();
                let mut counts = right_counts;
                for row in left_rows {
                    let key = row_key(&row);
                    match counts.get_mut(&key) {
                        Some(count) if *count > 0 => *count -= 1,
                        _ => out.push(row),
                    }
                }
                if all {
                    out
                } else {
                    dedupe(out)
                }
            }
        };

        for row in combined {
            result_set.add_row(Row::new(row));
        }
        Ok(result_set)
    }
}

// ============================================================================
// Candidates and WHERE evaluation
// ============================================================================

/// Rows matching the WHERE clause, with whether an index supplied the
/// candidates. Index candidates are refetched and re-checked.
fn fetch_candidates(
    db: &Arc<Database>,
    schema: &TableSchema,
    where_clause: Option<&WhereClause>,
) -> Result<(Vec<(RowHandle, Vec<Value>)>, bool, String)> {
    let Some(clause) = where_clause else {
        return Ok((db.storage().scan(schema)?, false, String::new()));
    };
    let ordinal = require_column(schema, &clause.column)?;

    let accelerable = !matches!(
        clause.op,
        crate::common::CompareOp::NotEq | crate::common::CompareOp::Like
    );
    if accelerable {
        if let Some(index) = db.indexes().index_for(&schema.name, &clause.column) {
            let (handles, name) = {
                let index = index.read();
                (index.scan_op(clause.op, &clause.value), index.name().to_string())
            };
            let mut rows = Vec::with_capacity(handles.len());
            for handle in handles {
                // The index filters; the row decides.
                if let Some(values) = db.storage().get_record(schema, handle)? {
                    if values[ordinal].matches(clause.op, &clause.value) {
                        rows.push((handle, values));
                    }
                }
            }
            let info = format!("{} on {}.{}", name, schema.name, clause.column);
            return Ok((rows, true, info));
        }
    }

    let rows = db
        .storage()
        .scan(schema)?
        .into_iter()
        .filter(|(_, values)| values[ordinal].matches(clause.op, &clause.value))
        .collect();
    Ok((rows, false, String::new()))
}

// ============================================================================
// INSERT value resolution and constraint validation
// ============================================================================

fn resolve_insert_values(
    db: &Arc<Database>,
    schema: &TableSchema,
    columns: Option<&[String]>,
    row_exprs: &[Expression],
    txn: TxnId,
) -> Result<Vec<Value>> {
    let mut provided: HashMap<usize, Value> = HashMap::new();
    match columns {
        Some(names) => {
            for (name, expr) in names.iter().zip(row_exprs) {
                let ordinal = require_column(schema, name)?;
                provided.insert(ordinal, expr.evaluate()?);
            }
        }
        None => {
            for (ordinal, expr) in row_exprs.iter().enumerate() {
                provided.insert(ordinal, expr.evaluate()?);
            }
        }
    }

    let mut values = Vec::with_capacity(schema.columns.len());
    for (ordinal, column) in schema.columns.iter().enumerate() {
        let value = match provided.remove(&ordinal) {
            Some(value) => value,
            None => column.default.clone().unwrap_or(Value::Null),
        };
        let value = if column.auto_increment && value.is_null() {
            Value::Int(db.next_auto_value(txn, &schema.name)?)
        } else {
            if column.auto_increment {
                if let Some(seen) = value.as_int() {
                    db.observe_auto_value(txn, &schema.name, seen)?;
                }
            }
            value
        };
        values.push(value);
    }

    coerce_row_types(schema, &values)?;
    Ok(values)
}

/// Type-compatibility pass: every non-null value must fit its column's
/// storage class.
fn coerce_row_types(schema: &TableSchema, values: &[Value]) -> Result<()> {
    for (column, value) in schema.columns.iter().zip(values) {
        if value.is_null() {
            continue;
        }
        let ok = match column.data_type.storage_class() {
            StorageClass::Int => value.as_int().is_some(),
            StorageClass::Double => value.as_number().is_some(),
            StorageClass::Str => true,
        };
        if !ok {
            return Err(Error::new(
                ErrorCode::SqlTypeMismatch,
                "dml",
                format!(
                    "value '{}' is not compatible with column '{}' ({})",
                    value.render(),
                    column.name,
                    column.data_type
                ),
            ));
        }
    }
    Ok(())
}

/// The full constraint pass: NOT NULL, PRIMARY KEY / UNIQUE
/// uniqueness, CHECK, FOREIGN KEY. `exclude` skips the row itself
/// when validating an update.
fn validate_row_constraints(
    db: &Arc<Database>,
    schema: &TableSchema,
    values: &[Value],
    exclude: Option<RowHandle>,
) -> Result<()> {
    for (column, value) in schema.columns.iter().zip(values) {
        if !column.nullable && value.is_null() {
            return Err(Error::new(
                ErrorCode::NotNullViolation,
                "dml",
                format!("column '{}' must not be NULL", column.name),
            ));
        }
    }

    let pk_columns = schema.primary_key_columns();
    for column in schema.unique_columns() {
        let ordinal = require_column(schema, &column)?;
        let value = &values[ordinal];
        if value.is_null() {
            continue;
        }
        if has_duplicate(db, schema, &column, ordinal, value, exclude)? {
            let is_pk = pk_columns.iter().any(|c| c.eq_ignore_ascii_case(&column));
            return Err(if is_pk {
                Error::new(
                    ErrorCode::PrimaryKeyViolation,
                    "dml",
                    format!("duplicate primary key '{}' in column '{}'", value.render(), column),
                )
            } else {
                Error::new(
                    ErrorCode::UniqueViolation,
                    "dml",
                    format!("duplicate value '{}' in unique column '{}'", value.render(), column),
                )
            });
        }
    }

    for constraint in &schema.constraints {
        match constraint {
            TableConstraint::Check { column, op, value } => {
                let ordinal = require_column(schema, column)?;
                let actual = &values[ordinal];
                // NULL passes a CHECK (unknown is not a violation).
                if !actual.is_null() && !actual.matches(*op, value) {
                    return Err(Error::new(
                        ErrorCode::CheckViolation,
                        "dml",
                        format!("CHECK failed: {} {} {}", column, op, value.render()),
                    ));
                }
            }
            TableConstraint::ForeignKey {
                columns,
                ref_table,
                ref_columns,
            } => {
                for (column, ref_column) in columns.iter().zip(ref_columns) {
                    let ordinal = require_column(schema, column)?;
                    let value = &values[ordinal];
                    if value.is_null() {
                        continue;
                    }
                    if !referenced_exists(db, ref_table, ref_column, value)? {
                        return Err(Error::new(
                            ErrorCode::ForeignKeyViolation,
                            "dml",
                            format!(
                                "value '{}' has no match in {}.{}",
                                value.render(),
                                ref_table,
                                ref_column
                            ),
                        ));
                    }
                }
            }
            TableConstraint::PrimaryKey { .. } | TableConstraint::Unique { .. } => {
                // Single-column cases are folded into unique_columns();
                // composite keys validate as the tuple of renders.
            }
        }
    }

    // Composite PRIMARY KEY / UNIQUE tuples.
    for constraint in &schema.constraints {
        let (columns, is_pk) = match constraint {
            TableConstraint::PrimaryKey { columns } if columns.len() > 1 => (columns, true),
            TableConstraint::Unique { columns } if columns.len() > 1 => (columns, false),
            _ => continue,
        };
        let ordinals: Vec<usize> = columns
            .iter()
            .map(|c| require_column(schema, c))
            .collect::<Result<_>>()?;
        if ordinals.iter().any(|&i| values[i].is_null()) {
            continue;
        }
        let tuple: Vec<String> = ordinals.iter().map(|&i| values[i].render()).collect();
        for (handle, row) in db.storage().scan(schema)? {
            if Some(handle) == exclude {
                continue;
            }
            let other: Vec<String> = ordinals.iter().map(|&i| row[i].render()).collect();
            if other == tuple {
                let code = if is_pk {
                    ErrorCode::PrimaryKeyViolation
                } else {
                    ErrorCode::UniqueViolation
                };
                return Err(Error::new(
                    code,
                    "dml",
                    format!("duplicate key ({})", tuple.join(", ")),
                ));
            }
        }
    }

    Ok(())
}

fn has_duplicate(
    db: &Arc<Database>,
    schema: &TableSchema,
    column: &str,
    ordinal: usize,
    value: &Value,
    exclude: Option<RowHandle>,
) -> Result<bool> {
    if let Some(index) = db.indexes().index_for(&schema.name, column) {
        let handles = index.read().search(value);
        return Ok(handles.into_iter().any(|h| Some(h) != exclude));
    }
    for (handle, row) in db.storage().scan(schema)? {
        if Some(handle) == exclude {
            continue;
        }
        if row[ordinal].matches(crate::common::CompareOp::Eq, value) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn referenced_exists(
    db: &Arc<Database>,
    ref_table: &str,
    ref_column: &str,
    value: &Value,
) -> Result<bool> {
    let ref_schema = db.require_schema(ref_table)?;
    let ordinal = require_column(&ref_schema, ref_column)?;
    if let Some(index) = db.indexes().index_for(ref_table, ref_column) {
        return Ok(!index.read().search(value).is_empty());
    }
    Ok(db
        .storage()
        .scan(&ref_schema)?
        .iter()
        .any(|(_, row)| row[ordinal].matches(crate::common::CompareOp::Eq, value)))
}

// ============================================================================
// Projection and aggregation
// ============================================================================

fn validate_select(db: &Arc<Database>, select: &SelectStatement) -> Result<()> {
    let schema = db.require_schema(&select.table)?;
    if select.join.is_none() {
        if let Some(clause) = &select.where_clause {
            require_column(&schema, &clause.column)?;
        }
    }
    if let Some(join) = &select.join {
        db.require_schema(&join.table)?;
    }
    Ok(())
}

/// Resolve projected columns to ordinals over the bound row shape.
fn project_columns(
    select: &SelectStatement,
    columns: &[BoundColumn],
) -> Result<(Vec<ColumnMeta>, Vec<usize>)> {
    match &select.projection {
        Projection::All => Ok((
            columns
                .iter()
                .map(|bound| ColumnMeta::from_column(&bound.def))
                .collect(),
            (0..columns.len()).collect(),
        )),
        Projection::Items(items) => {
            let mut metadata = Vec::with_capacity(items.len());
            let mut ordinals = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    SelectItem::Column(name) => {
                        let ordinal = resolve_bound(columns, name)?;
                        metadata.push(ColumnMeta::from_column(&columns[ordinal].def));
                        ordinals.push(ordinal);
                    }
                    SelectItem::Aggregate { .. } => {
                        return Err(Error::new(
                            ErrorCode::SqlSemanticError,
                            "dml",
                            "aggregates cannot mix with a plain projection here",
                        ));
                    }
                }
            }
            Ok((metadata, ordinals))
        }
    }
}

/// Resolve a possibly table-qualified column name over the bound row
/// shape.
fn resolve_bound(columns: &[BoundColumn], name: &str) -> Result<usize> {
    let (qualifier, column) = match name.split_once('.') {
        Some((q, c)) => (Some(q), c),
        None => (None, name),
    };
    columns
        .iter()
        .position(|bound| {
            bound.def.name.eq_ignore_ascii_case(column)
                && qualifier
                    .map(|q| bound.table.eq_ignore_ascii_case(q))
                    .unwrap_or(true)
        })
        .ok_or_else(|| {
            Error::new(
                ErrorCode::ColumnNotExist,
                "dml",
                format!("column '{}' does not exist", name),
            )
        })
}

fn aggregate_rows(
    select: &SelectStatement,
    columns: &[BoundColumn],
    rows: Vec<Vec<Value>>,
) -> Result<ResultSet> {
    let Projection::Items(items) = &select.projection else {
        return Err(Error::new(
            ErrorCode::SqlSemanticError,
            "dml",
            "aggregate queries need an explicit select list",
        ));
    };

    // Group rows; without GROUP BY everything is one group.
    let group_ordinal = select
        .group_by
        .as_ref()
        .map(|column| resolve_bound(columns, column))
        .transpose()?;

    let mut groups: Vec<(Option<Value>, Vec<Vec<Value>>)> = Vec::new();
    match group_ordinal {
        Some(ordinal) => {
            let mut by_key: HashMap<String, usize> = HashMap::new();
            for row in rows {
                let key = row[ordinal].render();
                let slot = *by_key.entry(key).or_insert_with(|| {
                    groups.push((Some(row[ordinal].clone()), Vec::new()));
                    groups.len() - 1
                });
                groups[slot].1.push(row);
            }
        }
        None => groups.push((None, rows)),
    }

    if let Some(having) = &select.having {
        let ordinal = having
            .column
            .as_ref()
            .map(|column| resolve_bound(columns, column))
            .transpose()?;
        groups.retain(|(_, group_rows)| {
            compute_aggregate(having.func, ordinal, group_rows)
                .map(|v| v.matches(having.op, &having.value))
                .unwrap_or(false)
        });
    }

    let mut metadata = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SelectItem::Column(name) => {
                let ordinal = resolve_bound(columns, name)?;
                if group_ordinal != Some(ordinal) {
                    return Err(Error::new(
                        ErrorCode::SqlSemanticError,
                        "dml",
                        format!("column '{}' must appear in GROUP BY", name),
                    ));
                }
                metadata.push(ColumnMeta::from_column(&columns[ordinal].def));
            }
            SelectItem::Aggregate { func, column } => {
                let label = match column {
                    Some(c) => format!("{}({})", func.name(), c),
                    None => format!("{}(*)", func.name()),
                };
                let data_type = match func {
                    AggregateFunc::Count => "BIGINT",
                    AggregateFunc::Sum | AggregateFunc::Avg => "DOUBLE",
                    AggregateFunc::Min | AggregateFunc::Max => "TEXT",
                };
                metadata.push(ColumnMeta::computed(label, data_type));
            }
        }
    }

    let mut result_set = ResultSet::new(metadata);
    for (group_value, group_rows) in groups {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                SelectItem::Column(_) => {
                    out.push(group_value.clone().unwrap_or(Value::Null));
                }
                SelectItem::Aggregate { func, column } => {
                    let ordinal = column
                        .as_ref()
                        .map(|c| resolve_bound(columns, c))
                        .transpose()?;
                    out.push(compute_aggregate(*func, ordinal, &group_rows)?);
                }
            }
        }
        result_set.add_row(Row::new(out));
    }
    Ok(result_set)
}

fn compute_aggregate(
    func: AggregateFunc,
    ordinal: Option<usize>,
    rows: &[Vec<Value>],
) -> Result<Value> {
    let column_values = || -> Vec<&Value> {
        match ordinal {
            Some(i) => rows.iter().map(|r| &r[i]).filter(|v| !v.is_null()).collect(),
            None => Vec::new(),
        }
    };

    Ok(match func {
        AggregateFunc::Count => match ordinal {
            None => Value::Int(rows.len() as i64),
            Some(_) => Value::Int(column_values().len() as i64),
        },
        AggregateFunc::Sum => {
            let sum: f64 = column_values().iter().filter_map(|v| v.as_number()).sum();
            Value::Double(sum)
        }
        AggregateFunc::Avg => {
            let values = column_values();
            if values.is_empty() {
                Value::Null
            } else {
                let sum: f64 = values.iter().filter_map(|v| v.as_number()).sum();
                Value::Double(sum / values.len() as f64)
            }
        }
        AggregateFunc::Min => column_values()
            .into_iter()
            .min_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateFunc::Max => column_values()
            .into_iter()
            .max_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
    })
}

// ============================================================================
// Small shared helpers
// ============================================================================

fn require_column(schema: &TableSchema, column: &str) -> Result<usize> {
    // Accept a table-qualified spelling of the base table's columns.
    let bare = column
        .split_once('.')
        .map(|(_, c)| c)
        .unwrap_or(column);
    schema.ordinal_of(bare).ok_or_else(|| {
        Error::new(
            ErrorCode::ColumnNotExist,
            "dml",
            format!("column '{}' does not exist in '{}'", column, schema.name),
        )
    })
}

fn table_lock_key(database: &str, table: &str) -> String {
    format!("{}.{}", database, table)
}

/// Key-granular lock name: the primary key value when the table has
/// one, the physical handle otherwise.
fn row_lock_key(
    database: &str,
    schema: &TableSchema,
    values: &[Value],
    handle: Option<RowHandle>,
) -> String {
    let pk = schema.primary_key_columns();
    if !pk.is_empty() {
        let rendered: Vec<String> = pk
            .iter()
            .filter_map(|c| schema.ordinal_of(c))
            .map(|i| values[i].render())
            .collect();
        if rendered.len() == pk.len() {
            return format!("{}.{}.{}", database, schema.name, rendered.join("\u{1f}"));
        }
    }
    match handle {
        Some(h) => format!("{}.{}@{}:{}", database, schema.name, h.page_id.0, h.slot),
        None => table_lock_key(database, &schema.name),
    }
}

fn row_key(row: &[Value]) -> String {
    row.iter()
        .map(|v| v.render())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn dedupe(rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut seen = std::collections::HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row_key(row)))
        .collect()
}

fn log_tuple(
    db: &Arc<Database>,
    txn: TxnId,
    kind: WalRecordKind,
    table: &str,
    handle: RowHandle,
) -> Result<()> {
    let mut payload = Vec::with_capacity(2 + table.len() + 6);
    payload.extend_from_slice(&(table.len() as u16).to_le_bytes());
    payload.extend_from_slice(table.as_bytes());
    payload.extend_from_slice(&handle.page_id.0.to_le_bytes());
    payload.extend_from_slice(&handle.slot.to_le_bytes());
    db.wal().append(txn, kind, payload)?;
    Ok(())
}
