//! The engine: explicit construction of every manager, bootstrap on
//! first start, and reconstruction from the catalog on every start
//! after that.
//!
//! There are no global singletons; an [`Engine`] owns its collaborators
//! and hands them to execution contexts, so multiple engine instances
//! coexist in one process (and in tests).

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{hash_password, BootstrapFiles, PrivilegeKind, UserManager};
use crate::catalog::{Database, SystemCatalog};
use crate::common::config::SYSTEM_DATABASE;
use crate::common::Result;
use crate::concurrency::{LockManager, TransactionManager};
use crate::execution::{EngineServices, ExecutionContext, ExecutionResult, UnifiedExecutor};
use crate::sql::Statement;

pub struct Engine {
    services: Arc<EngineServices>,
    executor: UnifiedExecutor,
}

impl Engine {
    /// Open the engine at a directory, bootstrapping the system
    /// database on first start and replaying WALs on every start.
    pub fn open(root: impl AsRef<Path>) -> Result<Engine> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let bootstrap = BootstrapFiles::at_root(&root);

        let system_exists = root.join(SYSTEM_DATABASE).exists();
        let catalog = if system_exists {
            let db = Database::open(&root, SYSTEM_DATABASE)?;
            SystemCatalog::open(db)?
        } else {
            info!(root = %root.display(), "first start, bootstrapping system database");
            let db = Database::create(&root, SYSTEM_DATABASE)?;
            SystemCatalog::bootstrap(db, &hash_password("root"))?
        };
        let catalog = Arc::new(catalog);

        // The bootstrap text files let authentication work before the
        // catalog loads; catalog rows are authoritative when present.
        let users = Arc::new(UserManager::new());
        let (file_users, file_privileges) = bootstrap.load()?;
        users.load(file_users, file_privileges);

        let snapshot = catalog.load_snapshot()?;
        if !snapshot.users.is_empty() {
            users.load(snapshot.users.clone(), snapshot.privileges.clone());
        }
        if !system_exists {
            // Seed the bootstrap copy with the fresh root account.
            bootstrap.rewrite(&users.list_users(), &users.all_privileges())?;
        }

        let txns = Arc::new(TransactionManager::new(Arc::new(LockManager::new())));
        let services = Arc::new(EngineServices::new(
            root.clone(),
            catalog,
            users,
            txns,
            bootstrap,
        ));

        // Reattach user databases: schemas from the catalog, root
        // pages from each database's header, indexes rebuilt by scan.
        for name in &snapshot.databases {
            let db = match Database::open(&root, name) {
                Ok(db) => db,
                Err(err) => {
                    warn!(database = %name, error = %err, "skipping unopenable database");
                    continue;
                }
            };

            for schema in snapshot.tables.iter().filter(|s| &s.database == name) {
                let mut schema = schema.clone();
                match db.root_page_of(&schema.name)? {
                    Some(root_page) => {
                        schema.root_page = root_page;
                        db.register_schema(schema);
                    }
                    None => {
                        warn!(
                            database = %name,
                            table = %schema.name,
                            "catalog table has no storage; skipping"
                        );
                    }
                }
            }

            for record in snapshot.indexes.iter().filter(|i| &i.database == name) {
                let schema = match db.schema(&record.table) {
                    Some(schema) => schema,
                    None => continue,
                };
                let index = db.indexes().create_index(
                    &record.name,
                    &record.table,
                    &record.column,
                    record.unique,
                )?;
                let rows = db.storage().scan(&schema)?;
                db.indexes().build_from_rows(&index, &schema, &rows)?;
            }

            services.register_database(db);
        }

        Ok(Engine {
            services,
            executor: UnifiedExecutor::new(),
        })
    }

    /// A fresh session context for the root superuser.
    pub fn create_context(&self) -> ExecutionContext {
        self.context_for("root")
    }

    /// A fresh session context for a named user.
    pub fn context_for(&self, user: &str) -> ExecutionContext {
        ExecutionContext::new(self.services.clone(), user)
    }

    /// Execute one statement under a session context.
    pub fn execute(&self, stmt: Statement, ctx: &mut ExecutionContext) -> ExecutionResult {
        self.executor.execute(stmt, ctx)
    }

    /// Verify a user's password.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        self.services.users.authenticate(username, password)
    }

    /// The permission check, exposed for callers that gate work
    /// outside SQL.
    pub fn check_permission(
        &self,
        username: &str,
        database: &str,
        table: &str,
        privilege: PrivilegeKind,
    ) -> bool {
        self.services
            .users
            .check_permission(username, database, table, privilege)
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }

    pub fn optimizer(&self) -> &Arc<crate::execution::RuleBasedOptimizer> {
        self.executor.optimizer()
    }

    /// Flush every database and cut checkpoints, so a subsequent start
    /// replays nothing.
    pub fn checkpoint(&self) -> Result<()> {
        self.services.catalog.database().checkpoint()?;
        for db in self.services.user_databases() {
            db.checkpoint()?;
        }
        Ok(())
    }

    /// Graceful shutdown: checkpoint everything.
    pub fn shutdown(&self) -> Result<()> {
        self.checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_bootstraps_then_reopens() {
        let dir = tempdir().unwrap();

        {
            let engine = Engine::open(dir.path()).unwrap();
            assert!(engine.authenticate("root", "root"));
            engine.shutdown().unwrap();
        }

        {
            let engine = Engine::open(dir.path()).unwrap();
            assert!(engine.authenticate("root", "root"));
            assert!(!engine.authenticate("root", "wrong"));
        }
    }

    #[test]
    fn test_two_engines_in_one_process() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();

        let a = Engine::open(dir_a.path()).unwrap();
        let b = Engine::open(dir_b.path()).unwrap();

        let mut ctx_a = a.create_context();
        let result = a.execute(
            Statement::CreateDatabase {
                name: "only_in_a".to_string(),
            },
            &mut ctx_a,
        );
        assert!(result.success, "{}", result.message);

        assert!(a.services().has_database("only_in_a"));
        assert!(!b.services().has_database("only_in_a"));
    }

    #[test]
    fn test_context_identity() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path()).unwrap();

        let root_ctx = engine.create_context();
        assert_eq!(root_ctx.current_user, "root");

        let alice_ctx = engine.context_for("alice");
        assert_eq!(alice_ctx.current_user, "alice");
    }
}
