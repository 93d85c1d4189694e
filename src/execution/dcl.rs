//! DCL strategy: CREATE USER / DROP USER / GRANT / REVOKE.
//!
//! Every change lands in three places within the statement: the
//! in-memory cache, the `sys_users` / `sys_privileges` rows, and the
//! bootstrap files at the engine root.

use tracing::info;

use crate::auth::{hash_password, Privilege, PrivilegeKind, ROLE_USER};
use crate::common::{Error, ErrorCode, Result};
use crate::sql::Statement;

use super::context::ExecutionContext;
use super::result::ExecutionResult;
use super::strategy::{with_system_txn, ExecutionStrategy};

pub struct DclStrategy;

impl ExecutionStrategy for DclStrategy {
    fn check_permission(&self, _stmt: &Statement, _ctx: &ExecutionContext) -> Result<()> {
        // The executor's global check already required admin for DCL.
        Ok(())
    }

    fn validate(&self, stmt: &Statement, _ctx: &ExecutionContext) -> Result<()> {
        match stmt {
            Statement::CreateUser { username, password } => {
                if username.trim().is_empty() {
                    return Err(invalid("user name must not be empty"));
                }
                if password.is_empty() {
                    return Err(invalid("password must not be empty"));
                }
                Ok(())
            }
            Statement::DropUser { username, .. } => {
                if username.eq_ignore_ascii_case("root") {
                    return Err(invalid("the root superuser cannot be dropped"));
                }
                Ok(())
            }
            Statement::Grant { privileges, user, .. }
            | Statement::Revoke { privileges, user, .. } => {
                if privileges.is_empty() {
                    return Err(invalid("no privileges listed"));
                }
                if user.trim().is_empty() {
                    return Err(invalid("grantee must not be empty"));
                }
                Ok(())
            }
            other => Err(invalid(&format!("{:?} is not a DCL statement", other.kind()))),
        }
    }

    fn execute(&self, stmt: Statement, ctx: &mut ExecutionContext) -> Result<ExecutionResult> {
        match stmt {
            Statement::CreateUser { username, password } => self.create_user(&username, &password, ctx),
            Statement::DropUser { username, if_exists } => {
                self.drop_user(&username, if_exists, ctx)
            }
            Statement::Grant {
                privileges,
                table,
                user,
            } => self.grant(&privileges, &table, &user, ctx),
            Statement::Revoke {
                privileges,
                table,
                user,
            } => self.revoke(&privileges, &table, &user, ctx),
            other => Err(invalid(&format!("{:?} is not a DCL statement", other.kind()))),
        }
    }
}

impl DclStrategy {
    fn create_user(
        &self,
        username: &str,
        password: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        let hash = hash_password(password);
        let user = ctx.services.users.create_user(username, &hash, ROLE_USER)?;

        if let Err(err) = with_system_txn(ctx, |txn| {
            ctx.services.catalog.create_user_record(txn, &user)
        }) {
            let _ = ctx.services.users.drop_user(username);
            return Err(err);
        }
        ctx.services.bootstrap.append_user(&user)?;

        info!(username, "user created");
        Ok(ExecutionResult::ok(format!(
            "User '{}' created successfully",
            username
        )))
    }

    fn drop_user(
        &self,
        username: &str,
        if_exists: bool,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        if !ctx.services.users.user_exists(username) {
            if if_exists {
                return Ok(ExecutionResult::ok(format!(
                    "User '{}' does not exist, skipped",
                    username
                )));
            }
            return Err(Error::new(
                ErrorCode::UserNotExist,
                "dcl",
                format!("user '{}' does not exist", username),
            ));
        }

        ctx.services.users.drop_user(username)?;
        with_system_txn(ctx, |txn| {
            ctx.services.catalog.drop_user_record(txn, username).map(|_| ())
        })?;
        self.rewrite_bootstrap(ctx)?;

        info!(username, "user dropped");
        Ok(ExecutionResult::ok(format!(
            "User '{}' dropped successfully",
            username
        )))
    }

    fn grant(
        &self,
        privileges: &[PrivilegeKind],
        table: &str,
        user: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        if !ctx.services.users.user_exists(user) {
            return Err(Error::new(
                ErrorCode::UserNotExist,
                "dcl",
                format!("user '{}' does not exist", user),
            ));
        }

        let database = self.scope_database(ctx);
        for kind in privileges {
            let privilege =
                Privilege::for_user(user, database.clone(), table, *kind, ctx.current_user.clone());
            ctx.services.users.grant(privilege.clone());
            with_system_txn(ctx, |txn| {
                ctx.services.catalog.grant_privilege_record(txn, &privilege)
            })?;
            ctx.services.bootstrap.append_privilege(&privilege)?;
        }

        Ok(ExecutionResult::ok(format!(
            "Granted {} on {} to '{}'",
            join_kinds(privileges),
            table,
            user
        )))
    }

    fn revoke(
        &self,
        privileges: &[PrivilegeKind],
        table: &str,
        user: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult> {
        let database = self.scope_database(ctx);
        let mut removed = 0;
        for kind in privileges {
            removed += ctx.services.users.revoke(user, &database, table, *kind);
            with_system_txn(ctx, |txn| {
                ctx.services
                    .catalog
                    .revoke_privilege_record(txn, user, &database, table, *kind)
                    .map(|_| ())
            })?;
        }
        self.rewrite_bootstrap(ctx)?;

        Ok(ExecutionResult::ok(format!(
            "Revoked {} on {} from '{}' ({} grant(s) removed)",
            join_kinds(privileges),
            table,
            user,
            removed
        )))
    }

    /// Grants are scoped to the current database; with none selected
    /// the scope is the wildcard.
    fn scope_database(&self, ctx: &ExecutionContext) -> String {
        if ctx.current_database.is_empty() {
            "*".to_string()
        } else {
            ctx.current_database.clone()
        }
    }

    fn rewrite_bootstrap(&self, ctx: &ExecutionContext) -> Result<()> {
        let users = ctx.services.users.list_users();
        let privileges = ctx.services.users.all_privileges();
        ctx.services.bootstrap.rewrite(&users, &privileges)
    }
}

fn invalid(message: &str) -> Error {
    Error::new(ErrorCode::InvalidParameter, "dcl", message)
}

fn join_kinds(kinds: &[PrivilegeKind]) -> String {
    kinds
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
