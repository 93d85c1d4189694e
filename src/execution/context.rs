//! Per-call execution context and the shared service handles.
//!
//! An [`ExecutionContext`] is fresh at each top-level `execute`;
//! `reset` clears the per-call counters but preserves the session state
//! (user, database, transaction) and the collaborator handles.
//! Components store ids and names, not references; the context is the
//! one place that resolves them to live objects.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::auth::{BootstrapFiles, UserManager};
use crate::catalog::{Database, SystemCatalog};
use crate::common::config::SYSTEM_DATABASE;
use crate::common::{Error, ErrorCode, Result, TxnId};
use crate::concurrency::{IsolationLevel, TransactionManager};

use super::result::ResultSet;

/// Shared handles to every manager, owned by the engine and threaded
/// through contexts.
pub struct EngineServices {
    pub root: PathBuf,
    databases: RwLock<HashMap<String, Arc<Database>>>,
    pub catalog: Arc<SystemCatalog>,
    pub users: Arc<UserManager>,
    pub txns: Arc<TransactionManager>,
    pub bootstrap: BootstrapFiles,
}

impl EngineServices {
    pub fn new(
        root: PathBuf,
        catalog: Arc<SystemCatalog>,
        users: Arc<UserManager>,
        txns: Arc<TransactionManager>,
        bootstrap: BootstrapFiles,
    ) -> Self {
        Self {
            root,
            databases: RwLock::new(HashMap::new()),
            catalog,
            users,
            txns,
            bootstrap,
        }
    }

    /// Resolve a database by name, the system database included.
    pub fn database(&self, name: &str) -> Result<Arc<Database>> {
        if name.eq_ignore_ascii_case(SYSTEM_DATABASE) {
            return Ok(self.catalog.database().clone());
        }
        self.databases
            .read()
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    ErrorCode::DatabaseNotExist,
                    "engine",
                    format!("database '{}' does not exist", name),
                )
            })
    }

    pub fn has_database(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(SYSTEM_DATABASE)
            || self.databases.read().contains_key(&name.to_ascii_lowercase())
    }

    pub fn register_database(&self, db: Arc<Database>) {
        self.databases
            .write()
            .insert(db.name().to_ascii_lowercase(), db);
    }

    pub fn unregister_database(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.write().remove(&name.to_ascii_lowercase())
    }

    /// User database handles, for checkpoint/shutdown sweeps.
    pub fn user_databases(&self) -> Vec<Arc<Database>> {
        self.databases.read().values().cloned().collect()
    }
}

/// Per-call state threaded through the executor.
pub struct ExecutionContext {
    pub services: Arc<EngineServices>,

    // Session state, preserved across reset.
    pub current_user: String,
    pub current_database: String,
    pub is_transactional: bool,
    pub txn_id: Option<TxnId>,
    pub read_only: bool,
    pub isolation: IsolationLevel,

    // Per-call statistics.
    pub rows_affected: usize,
    pub rows_returned: usize,
    pub execution_time: Duration,

    // Plan info.
    pub used_index: bool,
    pub plan: String,
    pub plan_kind: Option<super::plan::PlanKind>,
    pub plan_details: String,
    pub optimized_plan: String,
    pub query_optimized: bool,
    pub optimization_rules: Vec<String>,
    pub index_info: String,
    pub cost_estimate: f64,

    // Error state.
    pub has_error: bool,
    pub error_message: String,

    /// SELECT output, retrievable by the caller.
    pub result_set: Option<ResultSet>,
}

impl ExecutionContext {
    pub fn new(services: Arc<EngineServices>, user: impl Into<String>) -> Self {
        Self {
            services,
            current_user: user.into(),
            current_database: String::new(),
            is_transactional: false,
            txn_id: None,
            read_only: false,
            isolation: IsolationLevel::default(),
            rows_affected: 0,
            rows_returned: 0,
            execution_time: Duration::ZERO,
            used_index: false,
            plan: String::new(),
            plan_kind: None,
            plan_details: String::new(),
            optimized_plan: String::new(),
            query_optimized: false,
            optimization_rules: Vec::new(),
            index_info: String::new(),
            cost_estimate: 0.0,
            has_error: false,
            error_message: String::new(),
            result_set: None,
        }
    }

    /// Clear per-call counters; session identity and handles stay.
    pub fn reset(&mut self) {
        self.rows_affected = 0;
        self.rows_returned = 0;
        self.execution_time = Duration::ZERO;
        self.used_index = false;
        self.plan.clear();
        self.plan_kind = None;
        self.plan_details.clear();
        self.optimized_plan.clear();
        self.query_optimized = false;
        self.optimization_rules.clear();
        self.index_info.clear();
        self.cost_estimate = 0.0;
        self.has_error = false;
        self.error_message.clear();
        self.result_set = None;
    }

    /// Snapshot for subquery execution: same session, fresh counters.
    pub fn clone_for_subquery(&self) -> Self {
        let mut clone = Self::new(self.services.clone(), self.current_user.clone());
        clone.current_database = self.current_database.clone();
        clone.is_transactional = self.is_transactional;
        clone.txn_id = self.txn_id;
        clone.read_only = self.read_only;
        clone.isolation = self.isolation;
        clone
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.has_error = true;
        self.error_message = message.into();
    }

    /// The current database handle, or a database-existence error.
    pub fn current_db(&self) -> Result<Arc<Database>> {
        if self.current_database.is_empty() {
            return Err(Error::new(
                ErrorCode::DatabaseNotExist,
                "executor",
                "no database selected",
            ));
        }
        self.services.database(&self.current_database)
    }
}
