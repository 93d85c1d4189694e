//! Index manager: owns every secondary index of one database and
//! applies synchronous index maintenance for DML.
//!
//! The map is `table name -> column name -> index`; names are matched
//! case-insensitively by normalizing to lowercase on the way in.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::catalog::schema::TableSchema;
use crate::common::{Error, ErrorCode, Result, RowHandle, Value};

use super::btree::BTreeIndex;

pub struct IndexManager {
    /// table -> column -> index
    indexes: RwLock<HashMap<String, HashMap<String, Arc<RwLock<BTreeIndex>>>>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
        }
    }

    fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    /// Register a new index. Fails if the column already has one or the
    /// index name is taken.
    pub fn create_index(
        &self,
        name: &str,
        table: &str,
        column: &str,
        unique: bool,
    ) -> Result<Arc<RwLock<BTreeIndex>>> {
        let mut map = self.indexes.write();

        if self.find_by_name_locked(&map, name).is_some() {
            return Err(Error::new(
                ErrorCode::IndexAlreadyExists,
                "index",
                format!("index '{}' already exists", name),
            ));
        }

        let columns = map.entry(Self::key(table)).or_default();
        if columns.contains_key(&Self::key(column)) {
            return Err(Error::new(
                ErrorCode::IndexAlreadyExists,
                "index",
                format!("column '{}.{}' is already indexed", table, column),
            ));
        }

        let index = Arc::new(RwLock::new(BTreeIndex::new(name, table, column, unique)));
        columns.insert(Self::key(column), index.clone());
        debug!(index = name, table, column, unique, "index registered");
        Ok(index)
    }

    /// Drop an index by name. Returns the dropped index's table/column.
    pub fn drop_index(&self, name: &str) -> Result<(String, String)> {
        let mut map = self.indexes.write();
        let Some((table_key, column_key)) = self.find_by_name_locked(&map, name) else {
            return Err(Error::new(
                ErrorCode::IndexNotExist,
                "index",
                format!("index '{}' does not exist", name),
            ));
        };
        if let Some(columns) = map.get_mut(&table_key) {
            columns.remove(&column_key);
            if columns.is_empty() {
                map.remove(&table_key);
            }
        }
        Ok((table_key, column_key))
    }

    /// Drop every index of a table (DROP TABLE).
    pub fn drop_table_indexes(&self, table: &str) {
        self.indexes.write().remove(&Self::key(table));
    }

    pub fn index_for(&self, table: &str, column: &str) -> Option<Arc<RwLock<BTreeIndex>>> {
        self.indexes
            .read()
            .get(&Self::key(table))
            .and_then(|columns| columns.get(&Self::key(column)))
            .cloned()
    }

    pub fn has_index(&self, table: &str, column: &str) -> bool {
        self.index_for(table, column).is_some()
    }

    pub fn indexes_for_table(&self, table: &str) -> Vec<Arc<RwLock<BTreeIndex>>> {
        self.indexes
            .read()
            .get(&Self::key(table))
            .map(|columns| columns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<RwLock<BTreeIndex>>> {
        let map = self.indexes.read();
        let (table_key, column_key) = self.find_by_name_locked(&map, name)?;
        map.get(&table_key)
            .and_then(|columns| columns.get(&column_key))
            .cloned()
    }

    fn find_by_name_locked(
        &self,
        map: &HashMap<String, HashMap<String, Arc<RwLock<BTreeIndex>>>>,
        name: &str,
    ) -> Option<(String, String)> {
        for (table_key, columns) in map.iter() {
            for (column_key, index) in columns.iter() {
                if index.read().name().eq_ignore_ascii_case(name) {
                    return Some((table_key.clone(), column_key.clone()));
                }
            }
        }
        None
    }

    // ========================================================================
    // Synchronous DML maintenance
    // ========================================================================

    /// Add entries to every applicable index after a row insert.
    pub fn on_insert(
        &self,
        schema: &TableSchema,
        values: &[Value],
        handle: RowHandle,
    ) -> Result<()> {
        for index in self.indexes_for_table(&schema.name) {
            let mut index = index.write();
            if let Some(ordinal) = schema.ordinal_of(index.column()) {
                index.insert(&values[ordinal], handle)?;
            }
        }
        Ok(())
    }

    /// Rewrite entries after a row update: old entries out, new entries
    /// in, under the row's (possibly moved) handle.
    pub fn on_update(
        &self,
        schema: &TableSchema,
        old_values: &[Value],
        new_values: &[Value],
        old_handle: RowHandle,
        new_handle: RowHandle,
    ) -> Result<()> {
        for index in self.indexes_for_table(&schema.name) {
            let mut index = index.write();
            if let Some(ordinal) = schema.ordinal_of(index.column()) {
                index.delete(&old_values[ordinal], old_handle);
                index.insert(&new_values[ordinal], new_handle)?;
            }
        }
        Ok(())
    }

    /// Remove entries after a row delete.
    pub fn on_delete(&self, schema: &TableSchema, values: &[Value], handle: RowHandle) {
        for index in self.indexes_for_table(&schema.name) {
            let mut index = index.write();
            if let Some(ordinal) = schema.ordinal_of(index.column()) {
                index.delete(&values[ordinal], handle);
            }
        }
    }

    /// Rebuild one index from a full table scan (startup, CREATE INDEX
    /// on a populated table).
    pub fn build_from_rows(
        &self,
        index: &Arc<RwLock<BTreeIndex>>,
        schema: &TableSchema,
        rows: &[(RowHandle, Vec<Value>)],
    ) -> Result<()> {
        let mut index = index.write();
        index.clear();
        let Some(ordinal) = schema.ordinal_of(index.column()) else {
            return Err(Error::new(
                ErrorCode::ColumnNotExist,
                "index",
                format!("indexed column '{}' not in table", index.column()),
            ));
        };
        for (handle, values) in rows {
            index.insert(&values[ordinal], *handle)?;
        }
        Ok(())
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}
