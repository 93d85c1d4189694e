//! Plan generation for SELECT statements.
//!
//! The cost figures are a coarse bias by plan kind, not a statistics
//! model; the optimizer interface keeps a real model pluggable without
//! touching the strategies.

use crate::catalog::Database;
use crate::common::CompareOp;
use crate::sql::{Projection, SelectItem, SelectStatement};

/// Kinds of execution plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    FullTableScan,
    IndexScan,
    IndexSeek,
    Join,
    Aggregate,
    Sort,
}

impl PlanKind {
    /// Coarse cost bias for the kind.
    pub fn base_cost(&self) -> f64 {
        match self {
            PlanKind::IndexSeek => 10.0,
            PlanKind::IndexScan => 50.0,
            PlanKind::Aggregate => 80.0,
            PlanKind::FullTableScan => 100.0,
            PlanKind::Sort => 120.0,
            PlanKind::Join => 200.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlanKind::FullTableScan => "FULL_TABLE_SCAN",
            PlanKind::IndexScan => "INDEX_SCAN",
            PlanKind::IndexSeek => "INDEX_SEEK",
            PlanKind::Join => "JOIN",
            PlanKind::Aggregate => "AGGREGATE",
            PlanKind::Sort => "SORT",
        }
    }
}

/// A generated plan for one SELECT.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub kind: PlanKind,
    pub table: String,
    pub index_name: Option<String>,
    pub columns: Vec<String>,
    pub where_description: String,
    pub cost_estimate: f64,
    pub is_optimized: bool,
}

impl ExecutionPlan {
    pub fn describe(&self) -> String {
        let mut out = format!("{} on {}", self.kind.name(), self.table);
        if let Some(index) = &self.index_name {
            out.push_str(&format!(" using {}", index));
        }
        if !self.where_description.is_empty() {
            out.push_str(&format!(" where {}", self.where_description));
        }
        out.push_str(&format!(" (cost {:.1})", self.cost_estimate));
        out
    }
}

/// Generate a plan for a SELECT against the current database.
///
/// JOIN and aggregation dominate the kind; otherwise an indexed WHERE
/// triple picks seek (`=`) or scan (`<`, `>`, `<=`, `>=`), then ORDER
/// BY yields a sort, and everything else is a full scan.
pub fn generate_plan(select: &SelectStatement, db: &Database) -> ExecutionPlan {
    let columns = match &select.projection {
        Projection::All => vec!["*".to_string()],
        Projection::Items(items) => items
            .iter()
            .map(|item| match item {
                SelectItem::Column(name) => name.clone(),
                SelectItem::Aggregate { func, column } => match column {
                    Some(c) => format!("{}({})", func.name(), c),
                    None => format!("{}(*)", func.name()),
                },
            })
            .collect(),
    };
    let where_description = select
        .where_clause
        .as_ref()
        .map(|w| w.describe())
        .unwrap_or_default();

    let mut index_name = None;
    let kind = if select.join.is_some() {
        PlanKind::Join
    } else if select.has_aggregates() || select.group_by.is_some() {
        PlanKind::Aggregate
    } else if let Some(where_clause) = &select.where_clause {
        match db.indexes().index_for(&select.table, &where_clause.column) {
            Some(index) => {
                index_name = Some(index.read().name().to_string());
                match where_clause.op {
                    CompareOp::Eq => PlanKind::IndexSeek,
                    CompareOp::Lt | CompareOp::Gt | CompareOp::Le | CompareOp::Ge => {
                        PlanKind::IndexScan
                    }
                    CompareOp::NotEq | CompareOp::Like => PlanKind::FullTableScan,
                }
            }
            None => PlanKind::FullTableScan,
        }
    } else if select.order_by.is_some() {
        PlanKind::Sort
    } else {
        PlanKind::FullTableScan
    };

    ExecutionPlan {
        cost_estimate: kind.base_cost(),
        kind,
        table: select.table.clone(),
        index_name,
        columns,
        where_description,
        is_optimized: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{CompareOp, TxnId, Value};
    use crate::common::ObjectId;
    use crate::sql::WhereClause;
    use tempfile::tempdir;

    fn test_db() -> (std::sync::Arc<Database>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path(), "testdb").unwrap();
        db.create_table_storage(TxnId::new(1), ObjectId::new(1), "users")
            .unwrap();
        (db, dir)
    }

    #[test]
    fn test_full_scan_without_index() {
        let (db, _dir) = test_db();
        let select =
            SelectStatement::star("users").with_where(WhereClause::new("id", CompareOp::Eq, Value::Int(1)));
        let plan = generate_plan(&select, &db);
        assert_eq!(plan.kind, PlanKind::FullTableScan);
        assert_eq!(plan.cost_estimate, 100.0);
    }

    #[test]
    fn test_index_seek_on_equality() {
        let (db, _dir) = test_db();
        db.indexes().create_index("idx_id", "users", "id", true).unwrap();

        let select =
            SelectStatement::star("users").with_where(WhereClause::new("id", CompareOp::Eq, Value::Int(1)));
        let plan = generate_plan(&select, &db);
        assert_eq!(plan.kind, PlanKind::IndexSeek);
        assert_eq!(plan.index_name.as_deref(), Some("idx_id"));
        assert_eq!(plan.cost_estimate, 10.0);
    }

    #[test]
    fn test_index_scan_on_range() {
        let (db, _dir) = test_db();
        db.indexes().create_index("idx_id", "users", "id", true).unwrap();

        let select =
            SelectStatement::star("users").with_where(WhereClause::new("id", CompareOp::Gt, Value::Int(1)));
        let plan = generate_plan(&select, &db);
        assert_eq!(plan.kind, PlanKind::IndexScan);
    }

    #[test]
    fn test_like_never_uses_index() {
        let (db, _dir) = test_db();
        db.indexes().create_index("idx_id", "users", "id", true).unwrap();

        let select = SelectStatement::star("users")
            .with_where(WhereClause::new("id", CompareOp::Like, Value::from("1")));
        let plan = generate_plan(&select, &db);
        assert_eq!(plan.kind, PlanKind::FullTableScan);
    }

    #[test]
    fn test_join_and_aggregate_kinds() {
        let (db, _dir) = test_db();

        let mut select = SelectStatement::star("users");
        select.join = Some(crate::sql::JoinClause {
            table: "orders".to_string(),
            left_column: "id".to_string(),
            right_column: "user_id".to_string(),
        });
        assert_eq!(generate_plan(&select, &db).kind, PlanKind::Join);

        let mut select = SelectStatement::star("users");
        select.projection = Projection::Items(vec![SelectItem::Aggregate {
            func: crate::sql::AggregateFunc::Count,
            column: None,
        }]);
        assert_eq!(generate_plan(&select, &db).kind, PlanKind::Aggregate);
    }

    #[test]
    fn test_sort_kind() {
        let (db, _dir) = test_db();
        let mut select = SelectStatement::star("users");
        select.order_by = Some(crate::sql::OrderBy {
            column: "id".to_string(),
            descending: false,
        });
        let plan = generate_plan(&select, &db);
        assert_eq!(plan.kind, PlanKind::Sort);
        assert_eq!(plan.cost_estimate, 120.0);
    }

    #[test]
    fn test_describe_mentions_index() {
        let (db, _dir) = test_db();
        db.indexes().create_index("idx_id", "users", "id", true).unwrap();
        let select =
            SelectStatement::star("users").with_where(WhereClause::new("id", CompareOp::Eq, Value::Int(2)));
        let description = generate_plan(&select, &db).describe();
        assert!(description.contains("INDEX_SEEK"));
        assert!(description.contains("idx_id"));
        assert!(description.contains("id = 2"));
    }
}
