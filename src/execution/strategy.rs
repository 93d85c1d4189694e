//! The execution strategy seam and helpers shared by the strategies.
//!
//! One strategy per statement family; the dispatcher in the unified
//! executor is a single match over [`StatementFamily`]. Strategies are
//! stateless: everything they need arrives through the context.

use std::sync::Arc;

use crate::auth::PrivilegeKind;
use crate::catalog::Database;
use crate::common::config::SYSTEM_DATABASE;
use crate::common::{Error, ErrorCode, Result, TxnId};
use crate::concurrency::IsolationLevel;
use crate::sql::Statement;

use super::context::ExecutionContext;
use super::result::ExecutionResult;

/// A strategy for one statement family.
pub trait ExecutionStrategy: Send + Sync {
    /// Family-specific permission rules, after the executor's global
    /// check has passed.
    fn check_permission(&self, stmt: &Statement, ctx: &ExecutionContext) -> Result<()>;

    /// Statement/context validation before execution.
    fn validate(&self, stmt: &Statement, ctx: &ExecutionContext) -> Result<()>;

    /// Run the statement. The strategy consumes it.
    fn execute(&self, stmt: Statement, ctx: &mut ExecutionContext) -> Result<ExecutionResult>;
}

pub(crate) fn permission_denied(user: &str, action: &str) -> Error {
    Error::new(
        ErrorCode::PermissionDenied,
        "executor",
        format!("user '{}' is not allowed to {}", user, action),
    )
}

/// Check a table-scoped privilege of the current user in the current
/// database.
pub(crate) fn require_table_permission(
    ctx: &ExecutionContext,
    table: &str,
    privilege: PrivilegeKind,
) -> Result<()> {
    let allowed = ctx.services.users.check_permission(
        &ctx.current_user,
        &ctx.current_database,
        table,
        privilege,
    );
    if allowed {
        Ok(())
    } else {
        Err(permission_denied(
            &ctx.current_user,
            &format!("{} on {}.{}", privilege, ctx.current_database, table),
        ))
    }
}

/// Superuser, or a member of the admin role.
pub(crate) fn is_admin(ctx: &ExecutionContext) -> bool {
    ctx.services
        .users
        .user(&ctx.current_user)
        .map(|u| u.role == crate::auth::ROLE_SUPERUSER || u.role == crate::auth::ROLE_ADMIN)
        .unwrap_or(false)
}

/// Run `f` under a short-lived transaction on the system database's
/// WAL, committing on success and rolling back on failure. Catalog
/// rows stay crash-consistent this way.
pub(crate) fn with_system_txn<T>(
    ctx: &ExecutionContext,
    f: impl FnOnce(TxnId) -> Result<T>,
) -> Result<T> {
    let system = ctx.services.catalog.database().clone();
    with_db_txn(ctx, &system, f)
}

/// Run `f` under a short-lived transaction on `db`'s WAL.
pub(crate) fn with_db_txn<T>(
    ctx: &ExecutionContext,
    db: &Arc<Database>,
    f: impl FnOnce(TxnId) -> Result<T>,
) -> Result<T> {
    let txns = &ctx.services.txns;
    let txn = txns.begin(IsolationLevel::default(), db.name(), db.wal())?;
    match f(txn) {
        Ok(value) => {
            txns.commit(txn, db.wal())?;
            Ok(value)
        }
        Err(err) => {
            // Best effort: the statement error wins over rollback noise.
            // Pages roll back from before-images; indexes rebuild from
            // the restored rows.
            let _ = txns.rollback(txn, db.wal(), db.pool());
            let _ = db.rebuild_all_indexes();
            Err(err)
        }
    }
}

/// Refuse DDL against the reserved system database for non-superusers.
pub(crate) fn guard_system_database(ctx: &ExecutionContext, database: &str) -> Result<()> {
    if database.eq_ignore_ascii_case(SYSTEM_DATABASE)
        && !ctx.services.users.is_superuser(&ctx.current_user)
    {
        return Err(permission_denied(
            &ctx.current_user,
            "modify the system database",
        ));
    }
    Ok(())
}

/// Build an `ExecutionResult` out of a strategy error, mirroring the
/// error onto the context.
pub(crate) fn fail_context(ctx: &mut ExecutionContext, err: &Error) -> ExecutionResult {
    ctx.set_error(err.to_string());
    ExecutionResult::fail(err.to_string())
}
