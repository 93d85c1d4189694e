//! Runtime handle for one database: its paged file, WAL, buffer pool,
//! table storage, schema cache, and index manager.
//!
//! Opening a database replays its WAL before the buffer pool comes up,
//! so the pool only ever caches recovered pages.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::buffer::ShardedBufferPool;
use crate::catalog::schema::TableSchema;
use crate::common::config::{
    BUFFER_POOL_SHARDS, DATA_FILE_NAME, FRAMES_PER_SHARD, WAL_FILE_NAME,
};
use crate::common::{Error, ErrorCode, Lsn, ObjectId, PageId, Result, TxnId};
use crate::index::IndexManager;
use crate::recovery::WalManager;
use crate::storage::{DiskManager, TableDirEntry, TableStorage};

pub struct Database {
    name: String,
    dir: PathBuf,
    pool: Arc<ShardedBufferPool>,
    wal: Arc<WalManager>,
    storage: TableStorage,
    /// Lowercased table name -> schema.
    schemas: RwLock<HashMap<String, TableSchema>>,
    indexes: IndexManager,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Create a new database directory with an empty paged file and WAL.
    pub fn create(root: &Path, name: &str) -> Result<Arc<Database>> {
        let dir = root.join(name);
        if dir.exists() {
            return Err(Error::new(
                ErrorCode::DatabaseAlreadyExists,
                "catalog",
                format!("database '{}' already exists", name),
            ));
        }
        fs::create_dir_all(&dir)?;

        let disk = DiskManager::create(dir.join(DATA_FILE_NAME))?;
        let wal = Arc::new(WalManager::open(dir.join(WAL_FILE_NAME))?);
        let pool = Arc::new(ShardedBufferPool::new(
            BUFFER_POOL_SHARDS,
            FRAMES_PER_SHARD,
            disk,
            wal.clone(),
        ));
        let storage = TableStorage::new(pool.clone(), wal.clone());
        storage.init_header(TxnId::new(0))?;

        info!(database = name, "database created");
        Ok(Arc::new(Self {
            name: name.to_string(),
            dir,
            pool,
            wal,
            storage,
            schemas: RwLock::new(HashMap::new()),
            indexes: IndexManager::new(),
        }))
    }

    /// Open an existing database, replaying its WAL first.
    pub fn open(root: &Path, name: &str) -> Result<Arc<Database>> {
        let dir = root.join(name);
        if !dir.exists() {
            return Err(Error::new(
                ErrorCode::DatabaseNotExist,
                "catalog",
                format!("database '{}' does not exist", name),
            ));
        }

        let mut disk = DiskManager::open(dir.join(DATA_FILE_NAME))?;
        let wal = Arc::new(WalManager::open(dir.join(WAL_FILE_NAME))?);
        let summary = wal.recover(&mut disk)?;
        debug!(database = name, ?summary, "database opened");

        let pool = Arc::new(ShardedBufferPool::new(
            BUFFER_POOL_SHARDS,
            FRAMES_PER_SHARD,
            disk,
            wal.clone(),
        ));
        let storage = TableStorage::new(pool.clone(), wal.clone());

        Ok(Arc::new(Self {
            name: name.to_string(),
            dir,
            pool,
            wal,
            storage,
            schemas: RwLock::new(HashMap::new()),
            indexes: IndexManager::new(),
        }))
    }

    /// Remove the database directory from disk. The handle must be the
    /// last reference.
    pub fn destroy(root: &Path, name: &str) -> Result<()> {
        let dir = root.join(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pool(&self) -> &Arc<ShardedBufferPool> {
        &self.pool
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    pub fn storage(&self) -> &TableStorage {
        &self.storage
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    // ========================================================================
    // Schema cache
    // ========================================================================

    pub fn register_schema(&self, schema: TableSchema) {
        self.schemas
            .write()
            .insert(schema.name.to_ascii_lowercase(), schema);
    }

    pub fn remove_schema(&self, table: &str) -> Option<TableSchema> {
        self.schemas.write().remove(&table.to_ascii_lowercase())
    }

    pub fn schema(&self, table: &str) -> Option<TableSchema> {
        self.schemas.read().get(&table.to_ascii_lowercase()).cloned()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.schemas.read().contains_key(&table.to_ascii_lowercase())
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .schemas
            .read()
            .values()
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Look up a schema or fail with a table-existence error.
    pub fn require_schema(&self, table: &str) -> Result<TableSchema> {
        self.schema(table).ok_or_else(|| {
            Error::new(
                ErrorCode::TableNotExist,
                "catalog",
                format!("table '{}' does not exist in database '{}'", table, self.name),
            )
        })
    }

    // ========================================================================
    // Physical table lifecycle
    // ========================================================================

    /// Allocate the storage chain for a new table and record it in the
    /// header directory.
    pub fn create_table_storage(
        &self,
        txn_id: TxnId,
        table_id: ObjectId,
        table: &str,
    ) -> Result<PageId> {
        let root = self.storage.create_chain(txn_id)?;
        self.storage.update_header(txn_id, |header| {
            header.add_table(TableDirEntry {
                table_id,
                root_page: root,
                next_auto: 1,
                name: table.to_string(),
            });
        })?;
        Ok(root)
    }

    /// Remove a table's storage chain and directory entry.
    pub fn drop_table_storage(&self, txn_id: TxnId, table: &str) -> Result<()> {
        if let Some(schema) = self.schema(table) {
            self.storage.drop_chain(schema.root_page)?;
        }
        self.storage.update_header(txn_id, |header| {
            header.remove_table(table);
        })?;
        Ok(())
    }

    /// Root page recorded in the header directory.
    pub fn root_page_of(&self, table: &str) -> Result<Option<PageId>> {
        Ok(self.storage.read_header()?.find(table).map(|e| e.root_page))
    }

    // ========================================================================
    // Auto-increment counters
    // ========================================================================

    /// Hand out the next AUTO_INCREMENT value for a table.
    pub fn next_auto_value(&self, txn_id: TxnId, table: &str) -> Result<i64> {
        let mut value = 0;
        self.storage.update_header(txn_id, |header| {
            if let Some(entry) = header.find_mut(table) {
                value = entry.next_auto;
                entry.next_auto += 1;
            }
        })?;
        Ok(value)
    }

    /// Keep the counter ahead of explicitly inserted values.
    pub fn observe_auto_value(&self, txn_id: TxnId, table: &str, seen: i64) -> Result<()> {
        self.storage.update_header(txn_id, |header| {
            if let Some(entry) = header.find_mut(table) {
                if seen >= entry.next_auto {
                    entry.next_auto = seen + 1;
                }
            }
        })?;
        Ok(())
    }

    /// Rebuild every index of this database from table scans. Used
    /// after a transaction rollback restores pages underneath the
    /// in-memory indexes.
    pub fn rebuild_all_indexes(&self) -> Result<()> {
        let schemas: Vec<TableSchema> = self.schemas.read().values().cloned().collect();
        for schema in schemas {
            for index in self.indexes.indexes_for_table(&schema.name) {
                let rows = self.storage.scan(&schema)?;
                self.indexes.build_from_rows(&index, &schema, &rows)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Durability
    // ========================================================================

    /// Flush all dirty pages and cut a checkpoint record.
    pub fn checkpoint(&self) -> Result<Lsn> {
        self.wal.flush()?;
        self.pool.flush_all()?;
        self.wal.checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{ColumnDef, DataType};
    use crate::common::Value;
    use tempfile::tempdir;

    fn make_schema(db: &Database, name: &str, table_id: i64, root: PageId) -> TableSchema {
        let schema = TableSchema {
            table_id: ObjectId::new(table_id),
            database: db.name().to_string(),
            name: name.to_string(),
            columns: vec![
                ColumnDef::new("id", DataType::Int).primary_key(),
                ColumnDef::new("name", DataType::Text),
            ],
            constraints: vec![],
            root_page: root,
        };
        db.register_schema(schema.clone());
        schema
    }

    #[test]
    fn test_create_then_open() {
        let dir = tempdir().unwrap();
        let txn = TxnId::new(1);

        {
            let db = Database::create(dir.path(), "testdb").unwrap();
            let root = db
                .create_table_storage(txn, ObjectId::new(1), "users")
                .unwrap();
            let schema = make_schema(&db, "users", 1, root);
            db.storage()
                .insert_record(txn, &schema, &[Value::Int(1), Value::Str("a".into())])
                .unwrap();
            db.checkpoint().unwrap();
        }

        {
            let db = Database::open(dir.path(), "testdb").unwrap();
            let root = db.root_page_of("users").unwrap().unwrap();
            let schema = make_schema(&db, "users", 1, root);
            let rows = db.storage().scan(&schema).unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].1[0], Value::Int(1));
        }
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let _db = Database::create(dir.path(), "testdb").unwrap();
        assert!(Database::create(dir.path(), "testdb").is_err());
    }

    #[test]
    fn test_open_missing_fails() {
        let dir = tempdir().unwrap();
        let err = Database::open(dir.path(), "ghost").unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseNotExist);
    }

    #[test]
    fn test_auto_increment_counter_persists() {
        let dir = tempdir().unwrap();
        let txn = TxnId::new(1);

        {
            let db = Database::create(dir.path(), "testdb").unwrap();
            db.create_table_storage(txn, ObjectId::new(1), "t").unwrap();
            assert_eq!(db.next_auto_value(txn, "t").unwrap(), 1);
            assert_eq!(db.next_auto_value(txn, "t").unwrap(), 2);
            db.observe_auto_value(txn, "t", 10).unwrap();
            assert_eq!(db.next_auto_value(txn, "t").unwrap(), 11);
            db.checkpoint().unwrap();
        }

        {
            let db = Database::open(dir.path(), "testdb").unwrap();
            assert_eq!(db.next_auto_value(txn, "t").unwrap(), 12);
        }
    }

    #[test]
    fn test_drop_table_storage() {
        let dir = tempdir().unwrap();
        let txn = TxnId::new(1);

        let db = Database::create(dir.path(), "testdb").unwrap();
        let root = db
            .create_table_storage(txn, ObjectId::new(1), "users")
            .unwrap();
        make_schema(&db, "users", 1, root);

        db.drop_table_storage(txn, "users").unwrap();
        db.remove_schema("users");
        assert!(db.root_page_of("users").unwrap().is_none());
        assert!(!db.has_table("users"));
    }

    #[test]
    fn test_schema_cache_lookup() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path(), "testdb").unwrap();
        let root = db
            .create_table_storage(TxnId::new(1), ObjectId::new(1), "users")
            .unwrap();
        make_schema(&db, "users", 1, root);

        assert!(db.has_table("USERS"));
        assert!(db.schema("users").is_some());
        assert!(db.require_schema("missing").is_err());
        assert_eq!(db.table_names(), vec!["users".to_string()]);
    }
}
