//! DDL strategy: CREATE/DROP/ALTER over databases, tables, and
//! indexes.
//!
//! Every DDL writes its catalog rows through the system catalog in the
//! same statement that mutates storage, so the catalog and the data
//! files never describe different worlds.

use std::collections::HashSet;

use tracing::info;

use crate::auth::PrivilegeKind;
use crate::catalog::schema::{ColumnDef, TableSchema};
use crate::catalog::Database;
use crate::common::config::SYSTEM_DATABASE;
use crate::common::{Error, ErrorCode, Result, Value};
use crate::sql::{AlterTableAction, Statement, StatementKind};

use super::context::ExecutionContext;
use super::result::ExecutionResult;
use super::strategy::{
    guard_system_database, permission_denied, require_table_permission, with_db_txn,
    with_system_txn, ExecutionStrategy,
};

pub struct DdlStrategy;

impl ExecutionStrategy for DdlStrategy {
    fn check_permission(&self, stmt: &Statement, ctx: &ExecutionContext) -> Result<()> {
        match stmt {
            // Database-level and index DDL passed the executor's
            // admin check already.
            Statement::CreateDatabase { .. }
            | Statement::DropDatabase { .. }
            | Statement::CreateIndex { .. }
            | Statement::DropIndex { .. } => Ok(()),
            Statement::CreateTable { name, .. } => {
                require_table_permission(ctx, name, PrivilegeKind::Create)
            }
            Statement::DropTable { name, .. } => {
                require_table_permission(ctx, name, PrivilegeKind::Drop)
            }
            Statement::AlterTable { name, .. } => {
                require_table_permission(ctx, name, PrivilegeKind::Alter)
            }
            other => Err(permission_denied(
                &ctx.current_user,
                &format!("execute {:?} as DDL", other.kind()),
            )),
        }
    }

    fn validate(&self, stmt: &Statement, ctx: &ExecutionContext) -> Result<()> {
        match stmt {
            Statement::CreateDatabase { name } | Statement::DropDatabase { name, .. } => {
                require_name(name, "database")?;
                guard_system_database(ctx, name)
            }
            Statement::CreateTable {
                name,
                columns,
                constraints,
            } => {
                require_name(name, "table")?;
                if columns.is_empty() {
                    return Err(Error::new(
                        ErrorCode::InvalidParameter,
                        "ddl",
                        format!("table '{}' needs at least one column", name),
                    ));
                }
                let mut seen = HashSet::new();
                for column in columns {
                    require_name(&column.name, "column")?;
                    if !seen.insert(column.name.to_ascii_lowercase()) {
                        return Err(Error::new(
                            ErrorCode::ColumnAlreadyExists,
                            "ddl",
                            format!("duplicate column '{}'", column.name),
                        ));
                    }
                }
                let probe = TableSchema {
                    table_id: crate::common::ObjectId::new(0),
                    database: String::new(),
                    name: name.clone(),
                    columns: columns.clone(),
                    constraints: constraints.clone(),
                    root_page: crate::common::PageId::INVALID,
                };
                if !probe.has_single_primary_key() {
                    return Err(Error::new(
                        ErrorCode::InvalidParameter,
                        "ddl",
                        format!("table '{}' declares more than one primary key", name),
                    ));
                }
                Ok(())
            }
            Statement::DropTable { name, .. } | Statement::AlterTable { name, .. } => {
                require_name(name, "table")
            }
            Statement::CreateIndex { name, table, column, .. } => {
                require_name(name, "index")?;
                require_name(table, "table")?;
                require_name(column, "column")
            }
            Statement::DropIndex { name } => require_name(name, "index"),
            _ => Ok(()),
        }
    }

    fn execute(&self, stmt: Statement, ctx: &mut ExecutionContext) -> Result<ExecutionResult> {
        match stmt {
            Statement::CreateDatabase { name } => self.create_database(&name, ctx),
            Statement::DropDatabase { name, if_exists } => {
                self.drop_database(&name, if_exists, ctx)
            }
            Statement::CreateTable {
                name,
                columns,
                constraints,
            } => self.create_table(&name, columns, constraints, ctx),
            Statement::DropTable { name, if_exists } => self.drop_table(&name, if_exists, ctx),
            Statement::AlterTable { name, action } => self.alter_table(&name, action, ctx),
            Statement::CreateIndex {
                name,
                table,
                column,
                unique,
            } => self.create_index(&name, &table, &column, unique, ctx),
            Statement::DropIndex { name } => self.drop_index(&name, ctx),
            other => Err(Error::new(
                ErrorCode::InvalidParameter,
                "ddl",
                format!("{:?} is not a DDL statement", other.kind()),
            )),
        }
    }
}

impl DdlStrategy {
    fn create_database(&self, name: &str, ctx: &mut ExecutionContext) -> Result<ExecutionResult> {
        if ctx.services.has_database(name) || ctx.services.catalog.database_exists(name)? {
            return Err(Error::new(
                ErrorCode::DatabaseAlreadyExists,
                "ddl",
                format!("database '{}' already exists", name),
            ));
        }

        let db = Database::create(&ctx.services.root, name)?;
        db.checkpoint()?;
        if let Err(err) = with_system_txn(ctx, |txn| {
            ctx.services
                .catalog
                .create_database_record(txn, name, &ctx.current_user, "")
                .map(|_| ())
        }) {
            let _ = Database::destroy(&ctx.services.root, name);
            return Err(err);
        }
        ctx.services.register_database(db);

        info!(database = name, "database created");
        Ok(ExecutionResult::ok(format!(
            "Database '{}' created successfully",
            name
        )))
    }

    fn drop_database(
        &self,
        name: &str,
        if_exists: bool,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        if !ctx.services.has_database(name) {
            if if_exists {
                return Ok(ExecutionResult::ok(format!(
                    "Database '{}' does not exist, skipped",
                    name
                )));
            }
            return Err(Error::new(
                ErrorCode::DatabaseNotExist,
                "ddl",
                format!("database '{}' does not exist", name),
            ));
        }

        with_system_txn(ctx, |txn| {
            ctx.services.catalog.drop_database_record(txn, name)
        })?;
        ctx.services.unregister_database(name);
        Database::destroy(&ctx.services.root, name)?;

        if ctx.current_database.eq_ignore_ascii_case(name) {
            ctx.current_database.clear();
        }
        info!(database = name, "database dropped");
        Ok(ExecutionResult::ok(format!(
            "Database '{}' dropped successfully",
            name
        )))
    }

    fn create_table(
        &self,
        name: &str,
        columns: Vec<ColumnDef>,
        constraints: Vec<crate::catalog::schema::TableConstraint>,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        let db = ctx.current_db()?;
        if db.has_table(name) {
            return Err(Error::new(
                ErrorCode::TableAlreadyExists,
                "ddl",
                format!("table '{}' already exists", name),
            ));
        }

        let table_id = ctx.services.catalog.generate_table_id();
        let root = with_db_txn(ctx, &db, |txn| db.create_table_storage(txn, table_id, name))?;

        let schema = TableSchema {
            table_id,
            database: db.name().to_string(),
            name: name.to_string(),
            columns,
            constraints,
            root_page: root,
        };

        if let Err(err) = with_system_txn(ctx, |txn| {
            ctx.services
                .catalog
                .create_table_record(txn, &schema, &ctx.current_user)
        }) {
            let _ = with_db_txn(ctx, &db, |txn| db.drop_table_storage(txn, name));
            return Err(err);
        }
        db.register_schema(schema.clone());

        // Every UNIQUE / PRIMARY KEY column gets its backing index in
        // the same statement.
        for column in schema.unique_columns() {
            let index_name = format!("uq_{}_{}", name, column.to_ascii_lowercase());
            self.register_index(ctx, &db, &schema, &index_name, &column, true)?;
        }

        ctx.rows_affected = 0;
        Ok(ExecutionResult::ok(format!(
            "Table '{}' created successfully",
            name
        )))
    }

    fn drop_table(
        &self,
        name: &str,
        if_exists: bool,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        let db = ctx.current_db()?;
        if !db.has_table(name) {
            if if_exists {
                return Ok(ExecutionResult::ok(format!(
                    "Table '{}' does not exist, skipped",
                    name
                )));
            }
            return Err(Error::new(
                ErrorCode::TableNotExist,
                "ddl",
                format!("table '{}' does not exist", name),
            ));
        }

        with_system_txn(ctx, |txn| {
            ctx.services.catalog.drop_table_record(txn, db.name(), name)
        })?;
        with_db_txn(ctx, &db, |txn| db.drop_table_storage(txn, name))?;
        db.indexes().drop_table_indexes(name);
        db.remove_schema(name);

        info!(table = name, "table dropped");
        Ok(ExecutionResult::ok(format!(
            "Table '{}' dropped successfully",
            name
        )))
    }

    fn alter_table(
        &self,
        name: &str,
        action: AlterTableAction,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        let db = ctx.current_db()?;
        let schema = db.require_schema(name)?;

        let new_schema = match action {
            AlterTableAction::AddColumn(column) => {
                self.add_column(ctx, &db, &schema, column)?
            }
            AlterTableAction::DropColumn(column) => {
                self.drop_column(ctx, &db, &schema, &column)?
            }
        };

        with_system_txn(ctx, |txn| {
            ctx.services.catalog.rewrite_column_records(txn, &new_schema)
        })?;
        db.register_schema(new_schema);
        // Rewriting every record can relocate rows; index handles must
        // follow.
        db.rebuild_all_indexes()?;

        Ok(ExecutionResult::ok(format!(
            "Table '{}' altered successfully",
            name
        )))
    }

    fn add_column(
        &self,
        ctx: &ExecutionContext,
        db: &std::sync::Arc<Database>,
        schema: &TableSchema,
        column: ColumnDef,
    ) -> Result<TableSchema> {
        if schema.ordinal_of(&column.name).is_some() {
            return Err(Error::new(
                ErrorCode::ColumnAlreadyExists,
                "ddl",
                format!("column '{}' already exists", column.name),
            ));
        }

        let fill = match &column.default {
            Some(value) => value.clone(),
            None => Value::Null,
        };
        if fill.is_null() && !column.nullable {
            let populated = db.storage().count(schema)? > 0;
            if populated {
                return Err(Error::new(
                    ErrorCode::NotNullViolation,
                    "ddl",
                    format!(
                        "cannot add NOT NULL column '{}' without a default to a populated table",
                        column.name
                    ),
                ));
            }
        }

        let mut new_schema = schema.clone();
        new_schema.columns.push(column);

        with_db_txn(ctx, db, |txn| {
            for (handle, mut values) in db.storage().scan(schema)? {
                values.push(fill.clone());
                db.storage().update_record(txn, &new_schema, handle, &values)?;
            }
            Ok(())
        })?;
        Ok(new_schema)
    }

    fn drop_column(
        &self,
        ctx: &ExecutionContext,
        db: &std::sync::Arc<Database>,
        schema: &TableSchema,
        column: &str,
    ) -> Result<TableSchema> {
        let ordinal = schema.ordinal_of(column).ok_or_else(|| {
            Error::new(
                ErrorCode::ColumnNotExist,
                "ddl",
                format!("column '{}' does not exist", column),
            )
        })?;
        if schema
            .primary_key_columns()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
        {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "ddl",
                format!("cannot drop primary key column '{}'", column),
            ));
        }

        // A backing index on the column goes with it.
        if let Some(index) = db.indexes().index_for(&schema.name, column) {
            let index_name = index.read().name().to_string();
            db.indexes().drop_index(&index_name)?;
            with_system_txn(ctx, |txn| {
                ctx.services.catalog.drop_index_record(txn, &index_name)
            })?;
        }

        let mut new_schema = schema.clone();
        new_schema.columns.remove(ordinal);

        with_db_txn(ctx, db, |txn| {
            for (handle, mut values) in db.storage().scan(schema)? {
                values.remove(ordinal);
                db.storage().update_record(txn, &new_schema, handle, &values)?;
            }
            Ok(())
        })?;
        Ok(new_schema)
    }

    fn create_index(
        &self,
        name: &str,
        table: &str,
        column: &str,
        unique: bool,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        let db = ctx.current_db()?;
        let schema = db.require_schema(table)?;
        if schema.ordinal_of(column).is_none() {
            return Err(Error::new(
                ErrorCode::ColumnNotExist,
                "ddl",
                format!("column '{}' does not exist in '{}'", column, table),
            ));
        }

        self.register_index(ctx, &db, &schema, name, column, unique)?;
        ctx.index_info = format!("{} on {}.{}", name, table, column);
        Ok(ExecutionResult::ok(format!(
            "Index '{}' created successfully",
            name
        )))
    }

    /// Create, build, and record one index. Rolls the in-memory index
    /// back out when the build or catalog write fails.
    fn register_index(
        &self,
        ctx: &ExecutionContext,
        db: &std::sync::Arc<Database>,
        schema: &TableSchema,
        name: &str,
        column: &str,
        unique: bool,
    ) -> Result<()> {
        let index = db.indexes().create_index(name, &schema.name, column, unique)?;

        let build = db
            .storage()
            .scan(schema)
            .and_then(|rows| db.indexes().build_from_rows(&index, schema, &rows));
        if let Err(err) = build {
            let _ = db.indexes().drop_index(name);
            return Err(err);
        }

        if let Err(err) = with_system_txn(ctx, |txn| {
            ctx.services
                .catalog
                .create_index_record(txn, schema.table_id, name, column, unique)
        }) {
            let _ = db.indexes().drop_index(name);
            return Err(err);
        }
        Ok(())
    }

    fn drop_index(&self, name: &str, ctx: &mut ExecutionContext) -> Result<ExecutionResult> {
        let db = ctx.current_db()?;
        let Some(index) = db.indexes().find_by_name(name) else {
            return Err(Error::new(
                ErrorCode::IndexNotExist,
                "ddl",
                format!("index '{}' does not exist", name),
            ));
        };

        // An index backing a PRIMARY KEY or UNIQUE column cannot go:
        // the uniqueness invariant depends on it.
        let (table, column) = {
            let index = index.read();
            (index.table().to_string(), index.column().to_string())
        };
        if let Some(schema) = db.schema(&table) {
            if schema
                .unique_columns()
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&column))
            {
                return Err(Error::new(
                    ErrorCode::InvalidParameter,
                    "ddl",
                    format!("index '{}' backs a uniqueness constraint on '{}'", name, column),
                ));
            }
        }

        db.indexes().drop_index(name)?;
        with_system_txn(ctx, |txn| {
            ctx.services.catalog.drop_index_record(txn, name)
        })?;
        Ok(ExecutionResult::ok(format!(
            "Index '{}' dropped successfully",
            name
        )))
    }
}

fn require_name(name: &str, what: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::new(
            ErrorCode::InvalidParameter,
            "ddl",
            format!("{} name must not be empty", what),
        ));
    }
    if name.eq_ignore_ascii_case(SYSTEM_DATABASE) && what == "database" {
        // Creating or dropping `system` is never valid through DDL;
        // the guard in validate() refines the error for non-superusers.
        return Err(Error::new(
            ErrorCode::InvalidParameter,
            "ddl",
            "the system database is reserved",
        ));
    }
    Ok(())
}
