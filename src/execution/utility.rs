//! Utility strategy: USE and SHOW.

use crate::common::{Error, ErrorCode, Result, Value};
use crate::sql::{ShowKind, Statement};

use super::context::ExecutionContext;
use super::result::{ColumnMeta, ExecutionResult, ResultSet, Row};
use super::strategy::{is_admin, permission_denied, ExecutionStrategy};

pub struct UtilityStrategy;

impl ExecutionStrategy for UtilityStrategy {
    fn check_permission(&self, stmt: &Statement, ctx: &ExecutionContext) -> Result<()> {
        match stmt {
            // Reading the user list is an administrative view.
            Statement::Show(ShowKind::Users) if !is_admin(ctx) => Err(permission_denied(
                &ctx.current_user,
                "show users",
            )),
            _ => Ok(()),
        }
    }

    fn validate(&self, stmt: &Statement, ctx: &ExecutionContext) -> Result<()> {
        match stmt {
            Statement::Use { database } => {
                if !ctx.services.has_database(database) {
                    return Err(Error::new(
                        ErrorCode::DatabaseNotExist,
                        "utility",
                        format!("database '{}' does not exist", database),
                    ));
                }
                Ok(())
            }
            Statement::Show(_) => Ok(()),
            other => Err(Error::new(
                ErrorCode::InvalidParameter,
                "utility",
                format!("{:?} is not a utility statement", other.kind()),
            )),
        }
    }

    fn execute(&self, stmt: Statement, ctx: &mut ExecutionContext) -> Result<ExecutionResult> {
        match stmt {
            Statement::Use { database } => {
                ctx.current_database = database.clone();
                Ok(ExecutionResult::ok(format!("Database changed to '{}'", database)))
            }
            Statement::Show(kind) => self.show(kind, ctx),
            other => Err(Error::new(
                ErrorCode::InvalidParameter,
                "utility",
                format!("{:?} is not a utility statement", other.kind()),
            )),
        }
    }
}

impl UtilityStrategy {
    fn show(&self, kind: ShowKind, ctx: &mut ExecutionContext) -> Result<ExecutionResult> {
        let result_set = match kind {
            ShowKind::Databases => {
                let mut rs = ResultSet::new(vec![ColumnMeta::computed("Database", "TEXT")]);
                for name in ctx.services.catalog.list_databases()? {
                    rs.add_row(Row::new(vec![Value::from(name)]));
                }
                rs
            }
            ShowKind::Tables => {
                let db = ctx.current_db()?;
                let mut rs = ResultSet::new(vec![ColumnMeta::computed(
                    format!("Tables_in_{}", db.name()),
                    "TEXT",
                )]);
                for name in db.table_names() {
                    rs.add_row(Row::new(vec![Value::from(name)]));
                }
                rs
            }
            ShowKind::Users => {
                let mut rs = ResultSet::new(vec![
                    ColumnMeta::computed("User", "TEXT"),
                    ColumnMeta::computed("Role", "TEXT"),
                    ColumnMeta::computed("Active", "BOOLEAN"),
                ]);
                for user in ctx.services.users.list_users() {
                    rs.add_row(Row::new(vec![
                        Value::from(user.username),
                        Value::from(user.role),
                        Value::Int(if user.active { 1 } else { 0 }),
                    ]));
                }
                rs
            }
        };

        let count = result_set.row_count();
        ctx.rows_returned = count;
        ctx.result_set = Some(result_set);
        Ok(ExecutionResult::ok(format!("{} row(s)", count)))
    }
}
