//! Metadata and catalog subsystem.
//!
//! - [`schema`] - data types, columns, constraints, table metadata
//! - [`Database`] - runtime handle for one database directory
//! - [`SystemCatalog`] - the self-describing `system` database

mod database;
pub mod schema;
mod system_catalog;

pub use database::Database;
pub use system_catalog::{
    CatalogSnapshot, IndexRecord, SystemCatalog, CATALOG_TABLES, SYS_AUDIT_LOGS,
    SYS_CLUSTER_NODES, SYS_COLUMNS, SYS_CONSTRAINTS, SYS_DATABASES,
    SYS_DISTRIBUTED_OBJECTS, SYS_DISTRIBUTED_TRANSACTIONS, SYS_INDEXES, SYS_PRIVILEGES,
    SYS_ROLES, SYS_SAVEPOINTS, SYS_TABLES, SYS_TEMPORAL_TABLES, SYS_TRANSACTIONS, SYS_USERS,
    SYS_VIEWS,
};
