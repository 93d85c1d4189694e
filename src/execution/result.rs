//! Execution result surfaces.
//!
//! Every `execute` returns an [`ExecutionResult`]; SELECT additionally
//! leaves a [`ResultSet`] on the execution context. Column metadata
//! order is authoritative for row decoding.

use crate::catalog::schema::ColumnDef;
use crate::common::Value;

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Metadata for one projected column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<String>,
}

impl ColumnMeta {
    pub fn from_column(column: &ColumnDef) -> Self {
        Self {
            name: column.name.clone(),
            data_type: column.data_type.to_string(),
            nullable: column.nullable,
            primary_key: column.primary_key,
            unique: column.unique,
            default: column.default.as_ref().map(|v| v.render()),
        }
    }

    /// A computed column (aggregate output, SHOW results).
    pub fn computed(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
        }
    }
}

/// An ordered list of typed values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// Rows plus the metadata that describes how to decode them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
    pub column_metadata: Vec<ColumnMeta>,
}

impl ResultSet {
    pub fn new(column_metadata: Vec<ColumnMeta>) -> Self {
        Self {
            rows: Vec::new(),
            column_metadata,
        }
    }

    pub fn add_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::DataType;

    #[test]
    fn test_result_constructors() {
        assert!(ExecutionResult::ok("done").success);
        assert!(!ExecutionResult::fail("nope").success);
    }

    #[test]
    fn test_column_meta_from_def() {
        let def = ColumnDef::new("id", DataType::Int).primary_key();
        let meta = ColumnMeta::from_column(&def);
        assert_eq!(meta.name, "id");
        assert_eq!(meta.data_type, "INT");
        assert!(meta.primary_key);
        assert!(!meta.nullable);
    }

    #[test]
    fn test_result_set_accumulates() {
        let mut rs = ResultSet::new(vec![ColumnMeta::computed("n", "INT")]);
        assert!(rs.is_empty());
        rs.add_row(Row::new(vec![Value::Int(1)]));
        assert_eq!(rs.row_count(), 1);
    }
}
