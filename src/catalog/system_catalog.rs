//! The system catalog: meta-tables inside the reserved `system`
//! database.
//!
//! Catalog tables are regular tables read and written through the same
//! storage path as user data; the only asymmetry is that bootstrap runs
//! without permission checks, before any user-visible operation.
//! Every catalog table carries a surrogate `*_id` primary key whose
//! values are generated monotonically and stay stable for the object's
//! lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::auth::{GranteeType, Privilege, PrivilegeKind, User, ROLE_ADMIN, ROLE_SUPERUSER, ROLE_USER};
use crate::catalog::database::Database;
use crate::catalog::schema::{ColumnDef, DataType, TableConstraint, TableSchema};
use crate::common::{CompareOp, Error, ErrorCode, ObjectId, PageId, Result, TxnId, Value};

pub const SYS_DATABASES: &str = "sys_databases";
pub const SYS_USERS: &str = "sys_users";
pub const SYS_ROLES: &str = "sys_roles";
pub const SYS_TABLES: &str = "sys_tables";
pub const SYS_COLUMNS: &str = "sys_columns";
pub const SYS_INDEXES: &str = "sys_indexes";
pub const SYS_CONSTRAINTS: &str = "sys_constraints";
pub const SYS_VIEWS: &str = "sys_views";
pub const SYS_PRIVILEGES: &str = "sys_privileges";
pub const SYS_AUDIT_LOGS: &str = "sys_audit_logs";
pub const SYS_TRANSACTIONS: &str = "sys_transactions";
pub const SYS_SAVEPOINTS: &str = "sys_savepoints";
pub const SYS_CLUSTER_NODES: &str = "sys_cluster_nodes";
pub const SYS_DISTRIBUTED_TRANSACTIONS: &str = "sys_distributed_transactions";
pub const SYS_DISTRIBUTED_OBJECTS: &str = "sys_distributed_objects";
pub const SYS_TEMPORAL_TABLES: &str = "sys_temporal_tables";

/// All catalog tables, in bootstrap creation order.
pub const CATALOG_TABLES: &[&str] = &[
    SYS_DATABASES,
    SYS_USERS,
    SYS_ROLES,
    SYS_TABLES,
    SYS_COLUMNS,
    SYS_INDEXES,
    SYS_CONSTRAINTS,
    SYS_VIEWS,
    SYS_PRIVILEGES,
    SYS_AUDIT_LOGS,
    SYS_TRANSACTIONS,
    SYS_SAVEPOINTS,
    SYS_CLUSTER_NODES,
    SYS_DISTRIBUTED_TRANSACTIONS,
    SYS_DISTRIBUTED_OBJECTS,
    SYS_TEMPORAL_TABLES,
];

/// One index row, resolved against database and table names.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub name: String,
    pub database: String,
    pub table: String,
    pub column: String,
    pub unique: bool,
}

/// Everything the engine needs to rebuild its in-memory managers.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    /// User database names (the system database excluded).
    pub databases: Vec<String>,
    /// Table schemas with `root_page` left INVALID; the owning
    /// database's header directory supplies the roots.
    pub tables: Vec<TableSchema>,
    pub indexes: Vec<IndexRecord>,
    pub users: Vec<User>,
    pub privileges: Vec<Privilege>,
}

pub struct SystemCatalog {
    db: Arc<Database>,
    /// Per-table next surrogate id.
    next_ids: Mutex<HashMap<String, i64>>,
}

impl SystemCatalog {
    /// First-start bootstrap: create every catalog table, seed the
    /// built-in roles and the root superuser, and register the system
    /// database's own row.
    pub fn bootstrap(db: Arc<Database>, root_password_hash: &str) -> Result<Self> {
        let txn = TxnId::new(0);

        for (position, table) in CATALOG_TABLES.iter().enumerate() {
            let table_id = ObjectId::new(position as i64 + 1);
            let root = db.create_table_storage(txn, table_id, table)?;
            let schema = builtin_schema(table, table_id, root);
            register_pk_index(&db, &schema)?;
            db.register_schema(schema);
        }

        let catalog = Self {
            db,
            next_ids: Mutex::new(HashMap::new()),
        };

        for role in [ROLE_SUPERUSER, ROLE_ADMIN, ROLE_USER] {
            let id = catalog.generate_id(SYS_ROLES);
            catalog.insert_row(
                txn,
                SYS_ROLES,
                vec![Value::Int(id), Value::from(role), now()],
            )?;
        }

        let root_user = User {
            username: "root".to_string(),
            password_hash: root_password_hash.to_string(),
            role: ROLE_SUPERUSER.to_string(),
            active: true,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        catalog.create_user_record(txn, &root_user)?;
        catalog.create_database_record(txn, "system", "root", "system catalog")?;

        catalog.db.checkpoint()?;
        info!("system catalog bootstrapped");
        Ok(catalog)
    }

    /// Reattach to an existing system database: register the built-in
    /// schemas against the persisted roots and rebuild the primary key
    /// indexes.
    pub fn open(db: Arc<Database>) -> Result<Self> {
        let header = db.storage().read_header()?;
        for table in CATALOG_TABLES {
            let entry = header.find(table).ok_or_else(|| {
                Error::new(
                    ErrorCode::Unknown,
                    "catalog",
                    format!("system database is missing catalog table '{}'", table),
                )
            })?;
            let schema = builtin_schema(table, entry.table_id, entry.root_page);
            db.register_schema(schema);
        }

        let catalog = Self {
            db: db.clone(),
            next_ids: Mutex::new(HashMap::new()),
        };

        // Primary key indexes and id counters come from full scans.
        for table in CATALOG_TABLES {
            let schema = db.require_schema(table)?;
            let index = register_pk_index(&db, &schema)?;
            let rows = db.storage().scan(&schema)?;
            db.indexes().build_from_rows(&index, &schema, &rows)?;

            let max_id = rows
                .iter()
                .filter_map(|(_, values)| values.first().and_then(|v| v.as_int()))
                .max()
                .unwrap_or(0);
            catalog.next_ids.lock().insert(table.to_string(), max_id + 1);
        }

        debug!("system catalog opened");
        Ok(catalog)
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Monotone surrogate id for a catalog table.
    pub fn generate_id(&self, table: &str) -> i64 {
        let mut ids = self.next_ids.lock();
        let next = ids.entry(table.to_string()).or_insert(1);
        let id = *next;
        *next += 1;
        id
    }

    // ========================================================================
    // Generic row plumbing (C6/C5 directly; the bootstrap asymmetry)
    // ========================================================================

    fn insert_row(&self, txn: TxnId, table: &str, values: Vec<Value>) -> Result<()> {
        let schema = self.db.require_schema(table)?;
        let handle = self.db.storage().insert_record(txn, &schema, &values)?;
        self.db.indexes().on_insert(&schema, &values, handle)?;
        Ok(())
    }

    fn scan_rows(&self, table: &str) -> Result<Vec<Vec<Value>>> {
        let schema = self.db.require_schema(table)?;
        Ok(self
            .db
            .storage()
            .scan(&schema)?
            .into_iter()
            .map(|(_, values)| values)
            .collect())
    }

    fn delete_rows_where(
        &self,
        txn: TxnId,
        table: &str,
        predicate: impl Fn(&[Value]) -> bool,
    ) -> Result<usize> {
        let schema = self.db.require_schema(table)?;
        let rows = self.db.storage().scan(&schema)?;
        let mut removed = 0;
        for (handle, values) in rows {
            if predicate(&values) {
                self.db.storage().delete_record(txn, handle)?;
                self.db.indexes().on_delete(&schema, &values, handle);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn update_rows_where(
        &self,
        txn: TxnId,
        table: &str,
        predicate: impl Fn(&[Value]) -> bool,
        mutate: impl Fn(&mut Vec<Value>),
    ) -> Result<usize> {
        let schema = self.db.require_schema(table)?;
        let rows = self.db.storage().scan(&schema)?;
        let mut changed = 0;
        for (handle, values) in rows {
            if predicate(&values) {
                let mut new_values = values.clone();
                mutate(&mut new_values);
                let new_handle =
                    self.db
                        .storage()
                        .update_record(txn, &schema, handle, &new_values)?;
                self.db
                    .indexes()
                    .on_update(&schema, &values, &new_values, handle, new_handle)?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    // ========================================================================
    // Databases
    // ========================================================================

    pub fn create_database_record(
        &self,
        txn: TxnId,
        name: &str,
        owner: &str,
        description: &str,
    ) -> Result<i64> {
        let id = self.generate_id(SYS_DATABASES);
        self.insert_row(
            txn,
            SYS_DATABASES,
            vec![
                Value::Int(id),
                Value::from(name),
                Value::from(owner),
                now(),
                Value::from(description),
            ],
        )?;
        Ok(id)
    }

    pub fn drop_database_record(&self, txn: TxnId, name: &str) -> Result<()> {
        let Some(db_id) = self.database_id(name)? else {
            return Err(Error::new(
                ErrorCode::DatabaseNotExist,
                "catalog",
                format!("database '{}' is not in the catalog", name),
            ));
        };

        // Cascade to the tables that lived in it.
        let table_ids: Vec<i64> = self
            .scan_rows(SYS_TABLES)?
            .iter()
            .filter(|row| v_int(row, 1) == db_id)
            .map(|row| v_int(row, 0))
            .collect();
        for table_id in table_ids {
            self.drop_table_rows(txn, table_id)?;
        }

        self.delete_rows_where(txn, SYS_DATABASES, |row| v_int(row, 0) == db_id)?;
        Ok(())
    }

    pub fn database_id(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .scan_rows(SYS_DATABASES)?
            .iter()
            .find(|row| v_str(row, 1).eq_ignore_ascii_case(name))
            .map(|row| v_int(row, 0)))
    }

    pub fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.database_id(name)?.is_some())
    }

    /// All database names, the system database included.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .scan_rows(SYS_DATABASES)?
            .iter()
            .map(|row| v_str(row, 1))
            .collect();
        names.sort();
        Ok(names)
    }

    // ========================================================================
    // Tables, columns, constraints
    // ========================================================================

    pub fn generate_table_id(&self) -> ObjectId {
        ObjectId::new(self.generate_id(SYS_TABLES))
    }

    /// Write the catalog rows for a newly created table.
    pub fn create_table_record(&self, txn: TxnId, schema: &TableSchema, owner: &str) -> Result<()> {
        let Some(db_id) = self.database_id(&schema.database)? else {
            return Err(Error::new(
                ErrorCode::DatabaseNotExist,
                "catalog",
                format!("database '{}' is not in the catalog", schema.database),
            ));
        };

        self.insert_row(
            txn,
            SYS_TABLES,
            vec![
                Value::Int(schema.table_id.0),
                Value::Int(db_id),
                Value::from(schema.name.as_str()),
                Value::from(owner),
                Value::from("BASE TABLE"),
                now(),
            ],
        )?;

        for (ordinal, column) in schema.columns.iter().enumerate() {
            self.insert_column_row(txn, schema.table_id.0, ordinal, column)?;
        }

        for constraint in &schema.constraints {
            let id = self.generate_id(SYS_CONSTRAINTS);
            let name = format!("{}_{}", schema.name, id);
            self.insert_row(
                txn,
                SYS_CONSTRAINTS,
                constraint_row(id, schema.table_id.0, &name, constraint),
            )?;
        }
        Ok(())
    }

    fn insert_column_row(
        &self,
        txn: TxnId,
        table_id: i64,
        ordinal: usize,
        column: &ColumnDef,
    ) -> Result<()> {
        let id = self.generate_id(SYS_COLUMNS);
        self.insert_row(
            txn,
            SYS_COLUMNS,
            vec![
                Value::Int(id),
                Value::Int(table_id),
                Value::from(column.name.as_str()),
                Value::from(column.data_type.to_string()),
                bool_value(column.nullable),
                match &column.default {
                    Some(v) => Value::from(v.render()),
                    None => Value::from(""),
                },
                Value::Int(ordinal as i64),
                bool_value(column.primary_key),
                bool_value(column.unique),
                bool_value(column.auto_increment),
            ],
        )
    }

    /// Replace the column rows of a table (ALTER TABLE).
    pub fn rewrite_column_records(&self, txn: TxnId, schema: &TableSchema) -> Result<()> {
        let table_id = schema.table_id.0;
        self.delete_rows_where(txn, SYS_COLUMNS, |row| v_int(row, 1) == table_id)?;
        for (ordinal, column) in schema.columns.iter().enumerate() {
            self.insert_column_row(txn, table_id, ordinal, column)?;
        }
        Ok(())
    }

    pub fn drop_table_record(&self, txn: TxnId, database: &str, table: &str) -> Result<()> {
        let Some(db_id) = self.database_id(database)? else {
            return Err(Error::new(
                ErrorCode::DatabaseNotExist,
                "catalog",
                format!("database '{}' is not in the catalog", database),
            ));
        };
        let table_id = self
            .scan_rows(SYS_TABLES)?
            .iter()
            .find(|row| v_int(row, 1) == db_id && v_str(row, 2).eq_ignore_ascii_case(table))
            .map(|row| v_int(row, 0));
        let Some(table_id) = table_id else {
            return Err(Error::new(
                ErrorCode::TableNotExist,
                "catalog",
                format!("table '{}' is not in the catalog", table),
            ));
        };
        self.drop_table_rows(txn, table_id)
    }

    fn drop_table_rows(&self, txn: TxnId, table_id: i64) -> Result<()> {
        self.delete_rows_where(txn, SYS_TABLES, |row| v_int(row, 0) == table_id)?;
        self.delete_rows_where(txn, SYS_COLUMNS, |row| v_int(row, 1) == table_id)?;
        self.delete_rows_where(txn, SYS_CONSTRAINTS, |row| v_int(row, 1) == table_id)?;
        self.delete_rows_where(txn, SYS_INDEXES, |row| v_int(row, 1) == table_id)?;
        Ok(())
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    pub fn create_index_record(
        &self,
        txn: TxnId,
        table_id: ObjectId,
        index_name: &str,
        column: &str,
        unique: bool,
    ) -> Result<()> {
        let id = self.generate_id(SYS_INDEXES);
        self.insert_row(
            txn,
            SYS_INDEXES,
            vec![
                Value::Int(id),
                Value::Int(table_id.0),
                Value::from(index_name),
                Value::from(column),
                bool_value(unique),
                Value::from("BTREE"),
                now(),
            ],
        )
    }

    pub fn drop_index_record(&self, txn: TxnId, index_name: &str) -> Result<usize> {
        self.delete_rows_where(txn, SYS_INDEXES, |row| {
            v_str(row, 2).eq_ignore_ascii_case(index_name)
        })
    }

    // ========================================================================
    // Users and privileges
    // ========================================================================

    pub fn create_user_record(&self, txn: TxnId, user: &User) -> Result<()> {
        let id = self.generate_id(SYS_USERS);
        self.insert_row(
            txn,
            SYS_USERS,
            vec![
                Value::Int(id),
                Value::from(user.username.as_str()),
                Value::from(user.password_hash.as_str()),
                Value::from(user.role.as_str()),
                bool_value(user.active),
                Value::from(user.created_at.as_str()),
            ],
        )
    }

    pub fn drop_user_record(&self, txn: TxnId, username: &str) -> Result<usize> {
        let removed = self.delete_rows_where(txn, SYS_USERS, |row| {
            v_str(row, 1).eq_ignore_ascii_case(username)
        })?;
        self.delete_rows_where(txn, SYS_PRIVILEGES, |row| {
            v_str(row, 2).eq_ignore_ascii_case(username)
        })?;
        Ok(removed)
    }

    pub fn update_user_password(&self, txn: TxnId, username: &str, hash: &str) -> Result<usize> {
        self.update_rows_where(
            txn,
            SYS_USERS,
            |row| v_str(row, 1).eq_ignore_ascii_case(username),
            |row| row[2] = Value::from(hash),
        )
    }

    pub fn list_user_records(&self) -> Result<Vec<User>> {
        Ok(self
            .scan_rows(SYS_USERS)?
            .iter()
            .map(|row| User {
                username: v_str(row, 1),
                password_hash: v_str(row, 2),
                role: v_str(row, 3),
                active: v_int(row, 4) != 0,
                created_at: v_str(row, 5),
            })
            .collect())
    }

    pub fn grant_privilege_record(&self, txn: TxnId, privilege: &Privilege) -> Result<()> {
        // Idempotent: an identical grant is not duplicated.
        let exists = self.scan_rows(SYS_PRIVILEGES)?.iter().any(|row| {
            v_str(row, 2).eq_ignore_ascii_case(&privilege.grantee)
                && v_str(row, 3) == privilege.database
                && v_str(row, 4).eq_ignore_ascii_case(&privilege.table)
                && v_str(row, 5) == privilege.privilege.to_string()
        });
        if exists {
            return Ok(());
        }

        let id = self.generate_id(SYS_PRIVILEGES);
        self.insert_row(
            txn,
            SYS_PRIVILEGES,
            vec![
                Value::Int(id),
                Value::from(privilege.grantee_type.to_string()),
                Value::from(privilege.grantee.as_str()),
                Value::from(privilege.database.as_str()),
                Value::from(privilege.table.as_str()),
                Value::from(privilege.privilege.to_string()),
                Value::from(privilege.grantor.as_str()),
            ],
        )
    }

    pub fn revoke_privilege_record(
        &self,
        txn: TxnId,
        username: &str,
        database: &str,
        table: &str,
        kind: PrivilegeKind,
    ) -> Result<usize> {
        self.delete_rows_where(txn, SYS_PRIVILEGES, |row| {
            v_str(row, 2).eq_ignore_ascii_case(username)
                && v_str(row, 3).eq_ignore_ascii_case(database)
                && v_str(row, 4).eq_ignore_ascii_case(table)
                && (kind == PrivilegeKind::All || v_str(row, 5) == kind.to_string())
        })
    }

    pub fn privilege_records(&self) -> Result<Vec<Privilege>> {
        Ok(self
            .scan_rows(SYS_PRIVILEGES)?
            .iter()
            .filter_map(|row| {
                let kind = PrivilegeKind::parse(&v_str(row, 5))?;
                let grantee_type = if v_str(row, 1) == "ROLE" {
                    GranteeType::Role
                } else {
                    GranteeType::User
                };
                Some(Privilege {
                    grantee_type,
                    grantee: v_str(row, 2),
                    database: v_str(row, 3),
                    table: v_str(row, 4),
                    privilege: kind,
                    grantor: v_str(row, 6),
                })
            })
            .collect())
    }

    pub fn privilege_count_for(&self, username: &str) -> Result<usize> {
        Ok(self
            .scan_rows(SYS_PRIVILEGES)?
            .iter()
            .filter(|row| v_str(row, 2).eq_ignore_ascii_case(username))
            .count())
    }

    // ========================================================================
    // Transactions and savepoints
    // ========================================================================

    /// `txn` writes the row; `target` is the transaction being
    /// recorded (they differ: the writer is a short-lived system
    /// transaction so the row itself is recoverable).
    pub fn record_transaction_start(
        &self,
        txn: TxnId,
        target: TxnId,
        user: &str,
        isolation: &str,
    ) -> Result<()> {
        let id = self.generate_id(SYS_TRANSACTIONS);
        self.insert_row(
            txn,
            SYS_TRANSACTIONS,
            vec![
                Value::Int(id),
                Value::Int(target.0 as i64),
                Value::from(user),
                now(),
                Value::from(""),
                Value::from("ACTIVE"),
                Value::from(isolation),
            ],
        )
    }

    pub fn record_transaction_end(&self, txn: TxnId, target: TxnId, status: &str) -> Result<usize> {
        let target_id = target.0 as i64;
        self.update_rows_where(
            txn,
            SYS_TRANSACTIONS,
            |row| v_int(row, 1) == target_id && v_str(row, 5) == "ACTIVE",
            |row| {
                row[4] = now();
                row[5] = Value::from(status);
            },
        )
    }

    pub fn record_savepoint(&self, txn: TxnId, target: TxnId, name: &str) -> Result<()> {
        let id = self.generate_id(SYS_SAVEPOINTS);
        self.insert_row(
            txn,
            SYS_SAVEPOINTS,
            vec![
                Value::Int(id),
                Value::Int(target.0 as i64),
                Value::from(name),
                now(),
            ],
        )
    }

    // ========================================================================
    // Startup snapshot
    // ========================================================================

    /// Rebuild the in-memory view of every user-visible object.
    pub fn load_snapshot(&self) -> Result<CatalogSnapshot> {
        let db_rows = self.scan_rows(SYS_DATABASES)?;
        let mut db_names: HashMap<i64, String> = HashMap::new();
        let mut databases = Vec::new();
        for row in &db_rows {
            let id = v_int(row, 0);
            let name = v_str(row, 1);
            db_names.insert(id, name.clone());
            if !name.eq_ignore_ascii_case("system") {
                databases.push(name);
            }
        }
        databases.sort();

        // Constraints and columns grouped by table id.
        let mut columns_by_table: HashMap<i64, Vec<(i64, ColumnDef)>> = HashMap::new();
        for row in self.scan_rows(SYS_COLUMNS)? {
            let table_id = v_int(&row, 1);
            let data_type = DataType::parse(&v_str(&row, 3)).ok_or_else(|| {
                Error::new(
                    ErrorCode::SqlTypeMismatch,
                    "catalog",
                    format!("unknown data type '{}' in sys_columns", v_str(&row, 3)),
                )
            })?;
            let default_text = v_str(&row, 5);
            let column = ColumnDef {
                name: v_str(&row, 2),
                data_type,
                nullable: v_int(&row, 4) != 0,
                default: decode_default(&default_text),
                primary_key: v_int(&row, 7) != 0,
                unique: v_int(&row, 8) != 0,
                auto_increment: v_int(&row, 9) != 0,
            };
            columns_by_table
                .entry(table_id)
                .or_default()
                .push((v_int(&row, 6), column));
        }

        let mut constraints_by_table: HashMap<i64, Vec<TableConstraint>> = HashMap::new();
        for row in self.scan_rows(SYS_CONSTRAINTS)? {
            if let Some(constraint) = decode_constraint(&row) {
                constraints_by_table
                    .entry(v_int(&row, 1))
                    .or_default()
                    .push(constraint);
            }
        }

        let mut tables = Vec::new();
        let mut table_names: HashMap<i64, (String, String)> = HashMap::new();
        for row in self.scan_rows(SYS_TABLES)? {
            let table_id = v_int(&row, 0);
            let Some(db_name) = db_names.get(&v_int(&row, 1)) else {
                continue;
            };
            if db_name.eq_ignore_ascii_case("system") {
                continue;
            }
            let name = v_str(&row, 2);
            table_names.insert(table_id, (db_name.clone(), name.clone()));

            let mut columns = columns_by_table.remove(&table_id).unwrap_or_default();
            columns.sort_by_key(|(ordinal, _)| *ordinal);

            tables.push(TableSchema {
                table_id: ObjectId::new(table_id),
                database: db_name.clone(),
                name,
                columns: columns.into_iter().map(|(_, c)| c).collect(),
                constraints: constraints_by_table.remove(&table_id).unwrap_or_default(),
                root_page: PageId::INVALID,
            });
        }

        let mut indexes = Vec::new();
        for row in self.scan_rows(SYS_INDEXES)? {
            let Some((database, table)) = table_names.get(&v_int(&row, 1)).cloned() else {
                continue;
            };
            indexes.push(IndexRecord {
                name: v_str(&row, 2),
                database,
                table,
                column: v_str(&row, 3),
                unique: v_int(&row, 4) != 0,
            });
        }

        Ok(CatalogSnapshot {
            databases,
            tables,
            indexes,
            users: self.list_user_records()?,
            privileges: self.privilege_records()?,
        })
    }
}

// ============================================================================
// Builtin catalog table schemas
// ============================================================================

fn col(name: &str, data_type: DataType) -> ColumnDef {
    ColumnDef::new(name, data_type)
}

/// Schema of a catalog table. The first column is always the surrogate
/// primary key.
fn builtin_schema(table: &str, table_id: ObjectId, root: PageId) -> TableSchema {
    let columns = match table {
        SYS_DATABASES => vec![
            col("db_id", DataType::BigInt).primary_key(),
            col("db_name", DataType::VarChar(128)).not_null(),
            col("owner", DataType::VarChar(64)),
            col("created_at", DataType::Timestamp),
            col("description", DataType::Text),
        ],
        SYS_USERS => vec![
            col("user_id", DataType::BigInt).primary_key(),
            col("username", DataType::VarChar(64)).not_null().unique(),
            col("password_hash", DataType::VarChar(128)),
            col("role", DataType::VarChar(32)),
            col("is_active", DataType::Boolean),
            col("created_at", DataType::Timestamp),
        ],
        SYS_ROLES => vec![
            col("role_id", DataType::BigInt).primary_key(),
            col("role_name", DataType::VarChar(32)).not_null(),
            col("created_at", DataType::Timestamp),
        ],
        SYS_TABLES => vec![
            col("table_id", DataType::BigInt).primary_key(),
            col("db_id", DataType::BigInt).not_null(),
            col("table_name", DataType::VarChar(128)).not_null(),
            col("owner", DataType::VarChar(64)),
            col("table_type", DataType::VarChar(32)),
            col("created_at", DataType::Timestamp),
        ],
        SYS_COLUMNS => vec![
            col("column_id", DataType::BigInt).primary_key(),
            col("table_id", DataType::BigInt).not_null(),
            col("column_name", DataType::VarChar(128)).not_null(),
            col("data_type", DataType::VarChar(64)),
            col("is_nullable", DataType::Boolean),
            col("default_value", DataType::Text),
            col("ordinal_position", DataType::Int),
            col("is_primary_key", DataType::Boolean),
            col("is_unique", DataType::Boolean),
            col("is_auto_increment", DataType::Boolean),
        ],
        SYS_INDEXES => vec![
            col("index_id", DataType::BigInt).primary_key(),
            col("table_id", DataType::BigInt).not_null(),
            col("index_name", DataType::VarChar(128)).not_null(),
            col("column_name", DataType::VarChar(128)),
            col("is_unique", DataType::Boolean),
            col("index_type", DataType::VarChar(32)),
            col("created_at", DataType::Timestamp),
        ],
        SYS_CONSTRAINTS => vec![
            col("constraint_id", DataType::BigInt).primary_key(),
            col("table_id", DataType::BigInt).not_null(),
            col("constraint_name", DataType::VarChar(128)),
            col("constraint_type", DataType::VarChar(32)),
            col("columns", DataType::Text),
            col("check_expression", DataType::Text),
            col("referenced_table", DataType::VarChar(128)),
            col("referenced_columns", DataType::Text),
        ],
        SYS_VIEWS => vec![
            col("view_id", DataType::BigInt).primary_key(),
            col("db_id", DataType::BigInt),
            col("view_name", DataType::VarChar(128)),
            col("definition", DataType::Text),
            col("owner", DataType::VarChar(64)),
            col("created_at", DataType::Timestamp),
        ],
        SYS_PRIVILEGES => vec![
            col("privilege_id", DataType::BigInt).primary_key(),
            col("grantee_type", DataType::VarChar(8)),
            col("grantee_name", DataType::VarChar(64)).not_null(),
            col("db_name", DataType::VarChar(128)),
            col("table_name", DataType::VarChar(128)),
            col("privilege", DataType::VarChar(16)),
            col("grantor", DataType::VarChar(64)),
        ],
        SYS_AUDIT_LOGS => vec![
            col("log_id", DataType::BigInt).primary_key(),
            col("user_name", DataType::VarChar(64)),
            col("operation_type", DataType::VarChar(32)),
            col("object_type", DataType::VarChar(32)),
            col("object_name", DataType::VarChar(128)),
            col("operation_time", DataType::Timestamp),
            col("affected_rows", DataType::Int),
            col("execution_result", DataType::Text),
        ],
        SYS_TRANSACTIONS => vec![
            col("record_id", DataType::BigInt).primary_key(),
            col("txn_id", DataType::BigInt).not_null(),
            col("user_name", DataType::VarChar(64)),
            col("start_time", DataType::Timestamp),
            col("end_time", DataType::Timestamp),
            col("status", DataType::VarChar(16)),
            col("isolation_level", DataType::VarChar(32)),
        ],
        SYS_SAVEPOINTS => vec![
            col("savepoint_id", DataType::BigInt).primary_key(),
            col("txn_id", DataType::BigInt).not_null(),
            col("savepoint_name", DataType::VarChar(128)),
            col("created_at", DataType::Timestamp),
        ],
        SYS_CLUSTER_NODES => vec![
            col("node_id", DataType::BigInt).primary_key(),
            col("node_name", DataType::VarChar(128)),
            col("host_address", DataType::VarChar(128)),
            col("port", DataType::Int),
            col("status", DataType::VarChar(16)),
            col("role", DataType::VarChar(16)),
            col("joined_at", DataType::Timestamp),
        ],
        SYS_DISTRIBUTED_TRANSACTIONS => vec![
            col("dt_id", DataType::BigInt).primary_key(),
            col("coordinator_node", DataType::VarChar(128)),
            col("status", DataType::VarChar(16)),
            col("created_at", DataType::Timestamp),
            col("timeout_seconds", DataType::Int),
        ],
        SYS_DISTRIBUTED_OBJECTS => vec![
            col("object_id", DataType::BigInt).primary_key(),
            col("object_type", DataType::VarChar(32)),
            col("object_name", DataType::VarChar(128)),
            col("database_name", DataType::VarChar(128)),
            col("shard_key", DataType::VarChar(128)),
            col("replication_factor", DataType::Int),
            col("created_at", DataType::Timestamp),
        ],
        SYS_TEMPORAL_TABLES => vec![
            col("temporal_id", DataType::BigInt).primary_key(),
            col("table_id", DataType::BigInt),
            col("period_start", DataType::VarChar(64)),
            col("period_end", DataType::VarChar(64)),
            col("retention_days", DataType::Int),
            col("created_at", DataType::Timestamp),
        ],
        other => unreachable!("unknown catalog table {}", other),
    };

    TableSchema {
        table_id,
        database: "system".to_string(),
        name: table.to_string(),
        columns,
        constraints: Vec::new(),
        root_page: root,
    }
}

fn register_pk_index(
    db: &Arc<Database>,
    schema: &TableSchema,
) -> Result<Arc<parking_lot::RwLock<crate::index::BTreeIndex>>> {
    let pk = &schema.columns[0].name;
    db.indexes()
        .create_index(&format!("pk_{}", schema.name), &schema.name, pk, true)
}

fn constraint_row(
    id: i64,
    table_id: i64,
    name: &str,
    constraint: &TableConstraint,
) -> Vec<Value> {
    let (columns, check, ref_table, ref_columns) = match constraint {
        TableConstraint::PrimaryKey { columns } | TableConstraint::Unique { columns } => {
            (columns.join(","), String::new(), String::new(), String::new())
        }
        TableConstraint::ForeignKey {
            columns,
            ref_table,
            ref_columns,
        } => (
            columns.join(","),
            String::new(),
            ref_table.clone(),
            ref_columns.join(","),
        ),
        TableConstraint::Check { column, op, value } => (
            String::new(),
            format!("{}|{}|{}", column, op, value.render()),
            String::new(),
            String::new(),
        ),
    };
    vec![
        Value::Int(id),
        Value::Int(table_id),
        Value::from(name),
        Value::from(constraint.kind_name()),
        Value::from(columns),
        Value::from(check),
        Value::from(ref_table),
        Value::from(ref_columns),
    ]
}

fn decode_constraint(row: &[Value]) -> Option<TableConstraint> {
    let kind = v_str(row, 3);
    let split = |s: String| -> Vec<String> {
        s.split(',')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };
    match kind.as_str() {
        "PRIMARY KEY" => Some(TableConstraint::PrimaryKey {
            columns: split(v_str(row, 4)),
        }),
        "UNIQUE" => Some(TableConstraint::Unique {
            columns: split(v_str(row, 4)),
        }),
        "FOREIGN KEY" => Some(TableConstraint::ForeignKey {
            columns: split(v_str(row, 4)),
            ref_table: v_str(row, 6),
            ref_columns: split(v_str(row, 7)),
        }),
        "CHECK" => {
            let expression = v_str(row, 5);
            let mut parts = expression.splitn(3, '|');
            let column = parts.next()?.to_string();
            let op = CompareOp::parse(parts.next()?)?;
            let value = Value::from(parts.next()?.to_string());
            Some(TableConstraint::Check { column, op, value })
        }
        _ => None,
    }
}

fn decode_default(text: &str) -> Option<Value> {
    match text {
        "" => None,
        "NULL" => Some(Value::Null),
        other => Some(Value::from(other)),
    }
}

fn bool_value(b: bool) -> Value {
    Value::Int(if b { 1 } else { 0 })
}

fn now() -> Value {
    Value::from(chrono::Utc::now().to_rfc3339())
}

fn v_str(row: &[Value], index: usize) -> String {
    row.get(index).map(|v| v.render()).unwrap_or_default()
}

fn v_int(row: &[Value], index: usize) -> i64 {
    row.get(index).and_then(|v| v.as_int()).unwrap_or(0)
}
