//! End-to-end scenarios against the assembled engine.

use petradb::auth::PrivilegeKind;
use petradb::catalog::schema::{ColumnDef, DataType};
use petradb::common::{CompareOp, Value};
use petradb::execution::PlanKind;
use petradb::sql::{
    AggregateFunc, Expression, Projection, SelectItem, SelectStatement, ShowKind, Statement,
    WhereClause,
};
use petradb::Engine;
use tempfile::tempdir;

fn num(n: i64) -> Expression {
    Expression::NumericLiteral(n.to_string())
}

fn text(s: &str) -> Expression {
    Expression::StringLiteral(s.to_string())
}

fn create_users_table() -> Statement {
    Statement::CreateTable {
        name: "users".to_string(),
        columns: vec![
            ColumnDef::new("id", DataType::Int).primary_key(),
            ColumnDef::new("name", DataType::VarChar(50)),
        ],
        constraints: vec![],
    }
}

fn insert_users(rows: Vec<(i64, &str)>) -> Statement {
    Statement::Insert {
        table: "users".to_string(),
        columns: None,
        rows: rows
            .into_iter()
            .map(|(id, name)| vec![num(id), text(name)])
            .collect(),
    }
}

fn select_star_where(table: &str, clause: WhereClause) -> Statement {
    Statement::Select(SelectStatement::star(table).with_where(clause))
}

fn count_star(table: &str) -> Statement {
    let mut select = SelectStatement::star(table);
    select.projection = Projection::Items(vec![SelectItem::Aggregate {
        func: AggregateFunc::Count,
        column: None,
    }]);
    Statement::Select(select)
}

fn run(engine: &Engine, ctx: &mut petradb::ExecutionContext, stmt: Statement) {
    let result = engine.execute(stmt, ctx);
    assert!(result.success, "statement failed: {}", result.message);
}

/// Scenario A: catalog bootstrap survives a restart.
#[test]
fn test_catalog_bootstrap_and_restart() {
    let dir = tempdir().unwrap();

    {
        let engine = Engine::open(dir.path()).unwrap();
        let mut ctx = engine.create_context();

        run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
        run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
        run(&engine, &mut ctx, create_users_table());
        engine.shutdown().unwrap();
    }

    {
        let engine = Engine::open(dir.path()).unwrap();
        let mut ctx = engine.create_context();

        run(&engine, &mut ctx, Statement::Show(ShowKind::Databases));
        let names: Vec<String> = ctx
            .result_set
            .take()
            .unwrap()
            .rows
            .into_iter()
            .map(|row| row.values[0].render())
            .collect();
        assert!(names.contains(&"system".to_string()), "{:?}", names);
        assert!(names.contains(&"testdb".to_string()), "{:?}", names);

        run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
        run(&engine, &mut ctx, Statement::Show(ShowKind::Tables));
        let tables: Vec<String> = ctx
            .result_set
            .take()
            .unwrap()
            .rows
            .into_iter()
            .map(|row| row.values[0].render())
            .collect();
        assert_eq!(tables, vec!["users".to_string()]);
    }
}

/// Scenario B: INSERT/SELECT round trip through the primary key index.
#[test]
fn test_insert_select_uses_index_seek() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(&engine, &mut ctx, create_users_table());
    run(&engine, &mut ctx, insert_users(vec![(1, "Alice"), (2, "Bob")]));

    run(
        &engine,
        &mut ctx,
        select_star_where("users", WhereClause::new("id", CompareOp::Eq, Value::Int(2))),
    );

    assert!(ctx.used_index, "index should supply the candidates");
    assert_eq!(ctx.plan_kind, Some(PlanKind::IndexSeek));

    let result_set = ctx.result_set.take().unwrap();
    assert_eq!(result_set.row_count(), 1);
    assert_eq!(result_set.rows[0].values, vec![Value::Int(2), Value::Str("Bob".into())]);
    assert_eq!(result_set.column_metadata[0].name, "id");
    assert_eq!(result_set.column_metadata[1].name, "name");
}

/// Scenario C: a primary key collision fails the statement and leaves
/// data and index untouched.
#[test]
fn test_primary_key_violation_rolls_back() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(&engine, &mut ctx, create_users_table());
    run(&engine, &mut ctx, insert_users(vec![(1, "Alice"), (2, "Bob")]));

    let result = engine.execute(insert_users(vec![(1, "Carol")]), &mut ctx);
    assert!(!result.success);
    assert!(
        result.message.contains("PrimaryKeyViolation"),
        "unexpected message: {}",
        result.message
    );

    run(&engine, &mut ctx, count_star("users"));
    let result_set = ctx.result_set.take().unwrap();
    assert_eq!(result_set.rows[0].values[0], Value::Int(2));

    // The index holds exactly the two surviving keys.
    let db = engine.services().database("testdb").unwrap();
    let index = db.indexes().index_for("users", "id").unwrap();
    let index = index.read();
    assert_eq!(index.entry_count(), 2);
    let keys: Vec<Value> = index.entries().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![Value::Int(1), Value::Int(2)]);
}

/// Scenario D: GRANT/REVOKE persist across a restart, in both the
/// cache and sys_privileges.
#[test]
fn test_grant_revoke_persistence() {
    let dir = tempdir().unwrap();

    {
        let engine = Engine::open(dir.path()).unwrap();
        let mut ctx = engine.create_context();

        run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
        run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
        run(&engine, &mut ctx, create_users_table());
        run(
            &engine,
            &mut ctx,
            Statement::CreateUser {
                username: "alice".into(),
                password: "pw".into(),
            },
        );
        run(
            &engine,
            &mut ctx,
            Statement::Grant {
                privileges: vec![PrivilegeKind::Select, PrivilegeKind::Insert],
                table: "users".into(),
                user: "alice".into(),
            },
        );
        run(
            &engine,
            &mut ctx,
            Statement::Revoke {
                privileges: vec![PrivilegeKind::Insert],
                table: "users".into(),
                user: "alice".into(),
            },
        );
        engine.shutdown().unwrap();
    }

    {
        let engine = Engine::open(dir.path()).unwrap();
        assert!(engine.check_permission("alice", "testdb", "users", PrivilegeKind::Select));
        assert!(!engine.check_permission("alice", "testdb", "users", PrivilegeKind::Insert));
        assert!(engine.authenticate("alice", "pw"));

        let count = engine
            .services()
            .catalog
            .privilege_count_for("alice")
            .unwrap();
        assert_eq!(count, 1);
    }
}

/// Scenario E: a committed transaction survives a crash with no
/// explicit flush.
#[test]
fn test_crash_recovery_of_committed_transaction() {
    let dir = tempdir().unwrap();

    {
        let engine = Engine::open(dir.path()).unwrap();
        let mut ctx = engine.create_context();

        run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
        run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
        run(
            &engine,
            &mut ctx,
            Statement::CreateTable {
                name: "t".into(),
                columns: vec![ColumnDef::new("id", DataType::Int).primary_key()],
                constraints: vec![],
            },
        );

        run(&engine, &mut ctx, Statement::Begin);
        for i in 0..100 {
            run(
                &engine,
                &mut ctx,
                Statement::Insert {
                    table: "t".into(),
                    columns: None,
                    rows: vec![vec![num(i)]],
                },
            );
        }
        run(&engine, &mut ctx, Statement::Commit);

        // No shutdown, no checkpoint: the engine is dropped as if the
        // process died before any background flush.
    }

    {
        let engine = Engine::open(dir.path()).unwrap();
        let mut ctx = engine.create_context();
        run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
        run(&engine, &mut ctx, count_star("t"));
        let result_set = ctx.result_set.take().unwrap();
        assert_eq!(result_set.rows[0].values[0], Value::Int(100));
    }
}

/// An uncommitted transaction disappears at restart.
#[test]
fn test_crash_discards_uncommitted_transaction() {
    let dir = tempdir().unwrap();

    {
        let engine = Engine::open(dir.path()).unwrap();
        let mut ctx = engine.create_context();

        run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
        run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
        run(
            &engine,
            &mut ctx,
            Statement::CreateTable {
                name: "t".into(),
                columns: vec![ColumnDef::new("id", DataType::Int).primary_key()],
                constraints: vec![],
            },
        );
        run(
            &engine,
            &mut ctx,
            Statement::Insert {
                table: "t".into(),
                columns: None,
                rows: vec![vec![num(1)]],
            },
        );

        run(&engine, &mut ctx, Statement::Begin);
        run(
            &engine,
            &mut ctx,
            Statement::Insert {
                table: "t".into(),
                columns: None,
                rows: vec![vec![num(2)]],
            },
        );
        // Crash with the transaction still open. Force the WAL down so
        // the uncommitted records are even on disk.
        engine
            .services()
            .database("testdb")
            .unwrap()
            .wal()
            .flush()
            .unwrap();
    }

    {
        let engine = Engine::open(dir.path()).unwrap();
        let mut ctx = engine.create_context();
        run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
        run(&engine, &mut ctx, count_star("t"));
        let result_set = ctx.result_set.take().unwrap();
        assert_eq!(result_set.rows[0].values[0], Value::Int(1));
    }
}

/// Round trip: INSERT then DELETE restores the row count; UPDATE there
/// and back restores the row.
#[test]
fn test_dml_round_trips() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(&engine, &mut ctx, create_users_table());
    run(&engine, &mut ctx, insert_users(vec![(1, "Alice")]));

    // INSERT then DELETE.
    run(&engine, &mut ctx, insert_users(vec![(2, "Bob")]));
    run(
        &engine,
        &mut ctx,
        Statement::Delete {
            table: "users".into(),
            where_clause: Some(WhereClause::new("id", CompareOp::Eq, Value::Int(2))),
        },
    );
    run(&engine, &mut ctx, count_star("users"));
    assert_eq!(ctx.result_set.take().unwrap().rows[0].values[0], Value::Int(1));

    // UPDATE there and back.
    run(
        &engine,
        &mut ctx,
        Statement::Update {
            table: "users".into(),
            assignments: vec![("name".into(), text("Alicia"))],
            where_clause: Some(WhereClause::new("id", CompareOp::Eq, Value::Int(1))),
        },
    );
    run(
        &engine,
        &mut ctx,
        Statement::Update {
            table: "users".into(),
            assignments: vec![("name".into(), text("Alice"))],
            where_clause: Some(WhereClause::new("id", CompareOp::Eq, Value::Int(1))),
        },
    );
    run(
        &engine,
        &mut ctx,
        select_star_where("users", WhereClause::new("id", CompareOp::Eq, Value::Int(1))),
    );
    let result_set = ctx.result_set.take().unwrap();
    assert_eq!(
        result_set.rows[0].values,
        vec![Value::Int(1), Value::Str("Alice".into())]
    );
}

/// NOT NULL and UNIQUE boundary behaviors.
#[test]
fn test_constraint_boundaries() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(
        &engine,
        &mut ctx,
        Statement::CreateTable {
            name: "accounts".into(),
            columns: vec![
                ColumnDef::new("id", DataType::Int).primary_key(),
                ColumnDef::new("email", DataType::Text).not_null().unique(),
            ],
            constraints: vec![],
        },
    );

    run(
        &engine,
        &mut ctx,
        Statement::Insert {
            table: "accounts".into(),
            columns: None,
            rows: vec![vec![num(1), text("a@example.com")]],
        },
    );

    // NULL into NOT NULL.
    let result = engine.execute(
        Statement::Insert {
            table: "accounts".into(),
            columns: Some(vec!["id".into()]),
            rows: vec![vec![num(2)]],
        },
        &mut ctx,
    );
    assert!(!result.success);
    assert!(result.message.contains("NotNullViolation"), "{}", result.message);

    // Duplicate into UNIQUE.
    let result = engine.execute(
        Statement::Insert {
            table: "accounts".into(),
            columns: None,
            rows: vec![vec![num(2), text("a@example.com")]],
        },
        &mut ctx,
    );
    assert!(!result.success);
    assert!(result.message.contains("UniqueViolation"), "{}", result.message);

    // UPDATE causing a primary key collision leaves the row unchanged.
    run(
        &engine,
        &mut ctx,
        Statement::Insert {
            table: "accounts".into(),
            columns: None,
            rows: vec![vec![num(2), text("b@example.com")]],
        },
    );
    let result = engine.execute(
        Statement::Update {
            table: "accounts".into(),
            assignments: vec![("id".into(), num(1))],
            where_clause: Some(WhereClause::new("id", CompareOp::Eq, Value::Int(2))),
        },
        &mut ctx,
    );
    assert!(!result.success);
    assert!(result.message.contains("PrimaryKeyViolation"), "{}", result.message);

    run(
        &engine,
        &mut ctx,
        select_star_where("accounts", WhereClause::new("id", CompareOp::Eq, Value::Int(2))),
    );
    let result_set = ctx.result_set.take().unwrap();
    assert_eq!(result_set.row_count(), 1);
    assert_eq!(result_set.rows[0].values[1], Value::Str("b@example.com".into()));
}

/// Index-vs-scan equivalence: the same WHERE returns the same rows
/// before and after CREATE INDEX.
#[test]
fn test_index_scan_equivalence() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(&engine, &mut ctx, create_users_table());
    run(
        &engine,
        &mut ctx,
        insert_users(vec![(1, "ann"), (2, "bob"), (3, "ann"), (4, "cid")]),
    );

    let clause = WhereClause::new("name", CompareOp::Eq, Value::from("ann"));

    run(&engine, &mut ctx, select_star_where("users", clause.clone()));
    assert!(!ctx.used_index);
    let scanned: Vec<Vec<Value>> = ctx
        .result_set
        .take()
        .unwrap()
        .rows
        .into_iter()
        .map(|r| r.values)
        .collect();
    assert_eq!(scanned.len(), 2);

    run(
        &engine,
        &mut ctx,
        Statement::CreateIndex {
            name: "idx_users_name".into(),
            table: "users".into(),
            column: "name".into(),
            unique: false,
        },
    );

    run(&engine, &mut ctx, select_star_where("users", clause));
    assert!(ctx.used_index);
    let indexed: Vec<Vec<Value>> = ctx
        .result_set
        .take()
        .unwrap()
        .rows
        .into_iter()
        .map(|r| r.values)
        .collect();

    let mut scanned_sorted = scanned;
    let mut indexed_sorted = indexed;
    scanned_sorted.sort_by_key(|r| r[0].as_int());
    indexed_sorted.sort_by_key(|r| r[0].as_int());
    assert_eq!(scanned_sorted, indexed_sorted);
}

/// Invariant: after mixed DML, the index entries equal the projection
/// of the live rows.
#[test]
fn test_index_data_consistency_invariant() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(&engine, &mut ctx, create_users_table());

    run(
        &engine,
        &mut ctx,
        insert_users(vec![(1, "a"), (2, "b"), (3, "c"), (4, "d")]),
    );
    run(
        &engine,
        &mut ctx,
        Statement::Delete {
            table: "users".into(),
            where_clause: Some(WhereClause::new("id", CompareOp::Eq, Value::Int(2))),
        },
    );
    run(
        &engine,
        &mut ctx,
        Statement::Update {
            table: "users".into(),
            assignments: vec![("id".into(), num(9))],
            where_clause: Some(WhereClause::new("id", CompareOp::Eq, Value::Int(3))),
        },
    );

    let db = engine.services().database("testdb").unwrap();
    let schema = db.schema("users").unwrap();
    let ordinal = schema.ordinal_of("id").unwrap();

    let mut from_table: Vec<(String, petradb::RowHandle)> = db
        .storage()
        .scan(&schema)
        .unwrap()
        .into_iter()
        .map(|(handle, values)| (values[ordinal].render(), handle))
        .collect();

    let index = db.indexes().index_for("users", "id").unwrap();
    let mut from_index: Vec<(String, petradb::RowHandle)> = index
        .read()
        .entries()
        .into_iter()
        .map(|(key, handle)| (key.render(), handle))
        .collect();

    from_table.sort();
    from_index.sort();
    assert_eq!(from_table, from_index);
}

/// ORDER BY, LIMIT/OFFSET, DISTINCT, and aggregation paths.
#[test]
fn test_select_shaping() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(&engine, &mut ctx, create_users_table());
    run(
        &engine,
        &mut ctx,
        insert_users(vec![(3, "c"), (1, "a"), (2, "b"), (4, "a")]),
    );

    // ORDER BY DESC + LIMIT/OFFSET.
    let mut select = SelectStatement::star("users");
    select.order_by = Some(petradb::sql::OrderBy {
        column: "id".into(),
        descending: true,
    });
    select.limit = Some(2);
    select.offset = Some(1);
    run(&engine, &mut ctx, Statement::Select(select));
    let ids: Vec<i64> = ctx
        .result_set
        .take()
        .unwrap()
        .rows
        .iter()
        .map(|r| r.values[0].as_int().unwrap())
        .collect();
    assert_eq!(ids, vec![3, 2]);

    // DISTINCT on a projected column.
    let mut select = SelectStatement::star("users");
    select.projection = Projection::Items(vec![SelectItem::Column("name".into())]);
    select.distinct = true;
    run(&engine, &mut ctx, Statement::Select(select));
    assert_eq!(ctx.result_set.take().unwrap().row_count(), 3);

    // GROUP BY with COUNT and HAVING.
    let mut select = SelectStatement::star("users");
    select.projection = Projection::Items(vec![
        SelectItem::Column("name".into()),
        SelectItem::Aggregate {
            func: AggregateFunc::Count,
            column: None,
        },
    ]);
    select.group_by = Some("name".into());
    select.having = Some(petradb::sql::HavingClause {
        func: AggregateFunc::Count,
        column: None,
        op: CompareOp::Gt,
        value: Value::Int(1),
    });
    run(&engine, &mut ctx, Statement::Select(select));
    let result_set = ctx.result_set.take().unwrap();
    assert_eq!(result_set.row_count(), 1);
    assert_eq!(result_set.rows[0].values[0], Value::Str("a".into()));
    assert_eq!(result_set.rows[0].values[1], Value::Int(2));
}

/// Inner join on an equality ON clause.
#[test]
fn test_join() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(&engine, &mut ctx, create_users_table());
    run(
        &engine,
        &mut ctx,
        Statement::CreateTable {
            name: "orders".into(),
            columns: vec![
                ColumnDef::new("order_id", DataType::Int).primary_key(),
                ColumnDef::new("user_id", DataType::Int),
                ColumnDef::new("amount", DataType::Double),
            ],
            constraints: vec![],
        },
    );
    run(&engine, &mut ctx, insert_users(vec![(1, "Alice"), (2, "Bob")]));
    run(
        &engine,
        &mut ctx,
        Statement::Insert {
            table: "orders".into(),
            columns: None,
            rows: vec![
                vec![num(10), num(1), Expression::NumericLiteral("5.5".into())],
                vec![num(11), num(1), Expression::NumericLiteral("2.0".into())],
                vec![num(12), num(2), Expression::NumericLiteral("9.0".into())],
            ],
        },
    );

    let mut select = SelectStatement::star("users");
    select.join = Some(petradb::sql::JoinClause {
        table: "orders".into(),
        left_column: "users.id".into(),
        right_column: "user_id".into(),
    });
    select.where_clause = Some(WhereClause::new("id", CompareOp::Eq, Value::Int(1)));
    run(&engine, &mut ctx, Statement::Select(select));

    let result_set = ctx.result_set.take().unwrap();
    assert_eq!(ctx.plan_kind, Some(PlanKind::Join));
    assert_eq!(result_set.row_count(), 2);
    // Left columns then right columns.
    assert_eq!(result_set.column_metadata.len(), 5);
    assert_eq!(result_set.column_metadata[2].name, "order_id");
    for row in &result_set.rows {
        assert_eq!(row.values[0], Value::Int(1));
    }
}

/// UNION / INTERSECT / EXCEPT over two selects.
#[test]
fn test_set_operations() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(&engine, &mut ctx, create_users_table());
    run(
        &engine,
        &mut ctx,
        insert_users(vec![(1, "a"), (2, "b"), (3, "c")]),
    );

    let low = SelectStatement::star("users").with_where(WhereClause::new(
        "id",
        CompareOp::Le,
        Value::Int(2),
    ));
    let high = SelectStatement::star("users").with_where(WhereClause::new(
        "id",
        CompareOp::Ge,
        Value::Int(2),
    ));

    for (op, all, expected) in [
        (petradb::sql::SetOpKind::Union, false, 3),
        (petradb::sql::SetOpKind::Union, true, 4),
        (petradb::sql::SetOpKind::Intersect, false, 1),
        (petradb::sql::SetOpKind::Except, false, 1),
    ] {
        run(
            &engine,
            &mut ctx,
            Statement::SetOperation {
                op,
                all,
                left: Box::new(low.clone()),
                right: Box::new(high.clone()),
            },
        );
        assert_eq!(
            ctx.result_set.take().unwrap().row_count(),
            expected,
            "{:?} all={}",
            op,
            all
        );
    }
}

/// Explicit transaction rollback restores rows and indexes.
#[test]
fn test_transaction_rollback() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(&engine, &mut ctx, create_users_table());
    run(&engine, &mut ctx, insert_users(vec![(1, "Alice")]));

    run(&engine, &mut ctx, Statement::Begin);
    run(&engine, &mut ctx, insert_users(vec![(2, "Bob"), (3, "Cid")]));
    run(&engine, &mut ctx, Statement::Rollback);

    run(&engine, &mut ctx, count_star("users"));
    assert_eq!(ctx.result_set.take().unwrap().rows[0].values[0], Value::Int(1));
}

/// Permission gate: a plain user cannot read without a grant.
#[test]
fn test_permission_denied_for_ungranted_user() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut root_ctx = engine.create_context();

    run(&engine, &mut root_ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut root_ctx, Statement::Use { database: "testdb".into() });
    run(&engine, &mut root_ctx, create_users_table());
    run(
        &engine,
        &mut root_ctx,
        Statement::CreateUser {
            username: "bob".into(),
            password: "pw".into(),
        },
    );

    let mut bob_ctx = engine.context_for("bob");
    bob_ctx.current_database = "testdb".to_string();

    let result = engine.execute(
        Statement::Select(SelectStatement::star("users")),
        &mut bob_ctx,
    );
    assert!(!result.success);
    assert!(result.message.contains("PermissionDenied"), "{}", result.message);

    // DCL from a non-admin is refused at the global gate.
    let result = engine.execute(
        Statement::Grant {
            privileges: vec![PrivilegeKind::Select],
            table: "users".into(),
            user: "bob".into(),
        },
        &mut bob_ctx,
    );
    assert!(!result.success);
}

/// AUTO_INCREMENT and DEFAULT fills.
#[test]
fn test_auto_increment_and_defaults() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();
    let mut ctx = engine.create_context();

    run(&engine, &mut ctx, Statement::CreateDatabase { name: "testdb".into() });
    run(&engine, &mut ctx, Statement::Use { database: "testdb".into() });
    run(
        &engine,
        &mut ctx,
        Statement::CreateTable {
            name: "events".into(),
            columns: vec![
                ColumnDef::new("id", DataType::Int).primary_key().auto_increment(),
                ColumnDef::new("kind", DataType::Text).with_default(Value::from("generic")),
            ],
            constraints: vec![],
        },
    );

    for _ in 0..3 {
        run(
            &engine,
            &mut ctx,
            Statement::Insert {
                table: "events".into(),
                columns: Some(vec!["kind".into()]),
                rows: vec![vec![text("click")]],
            },
        );
    }
    // Omitting every column list entry fills the default.
    run(
        &engine,
        &mut ctx,
        Statement::Insert {
            table: "events".into(),
            columns: Some(vec!["id".into()]),
            rows: vec![vec![num(100)]],
        },
    );
    run(
        &engine,
        &mut ctx,
        Statement::Insert {
            table: "events".into(),
            columns: Some(vec!["kind".into()]),
            rows: vec![vec![text("late")]],
        },
    );

    let mut select = SelectStatement::star("events");
    select.order_by = Some(petradb::sql::OrderBy {
        column: "id".into(),
        descending: false,
    });
    run(&engine, &mut ctx, Statement::Select(select));
    let rows = ctx.result_set.take().unwrap().rows;
    let ids: Vec<i64> = rows.iter().map(|r| r.values[0].as_int().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3, 100, 101]);
    assert_eq!(rows[3].values[1], Value::Str("generic".into()));
}
