//! PetraDB - an embeddable relational database engine with a sharded
//! buffer pool and write-ahead logging.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            PetraDB                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │               Execution Core (execution/)                │   │
//! │  │   UnifiedExecutor → Strategy (DDL|DML|DCL|Utility)       │   │
//! │  │         Planner + Rule-Based Optimizer                   │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌──────────────────────────┐  ┌──────────────────────────┐    │
//! │  │  Catalog (catalog/)      │  │  Access (auth/)          │    │
//! │  │  system db, schemas      │  │  users, privileges       │    │
//! │  └──────────────────────────┘  └──────────────────────────┘    │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │       Transactions (concurrency/)                        │   │
//! │  │   TransactionManager + striped key LockManager           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌──────────────────────────┐  ┌──────────────────────────┐    │
//! │  │  Indexes (index/)        │  │  WAL (recovery/)         │    │
//! │  │  B-tree per column       │  │  LSN, checksum, replay   │    │
//! │  └──────────────────────────┘  └──────────────────────────┘    │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │        Buffer Pool (buffer/)  [Sharded by page id]      │   │
//! │  │   N shards × (frames + replacer + dirty tracking)        │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Storage (storage/)                             │   │
//! │  │   DiskManager + slotted pages + record codec             │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - shared primitives (ids, values, errors, config)
//! - [`storage`] - paged files, slotted pages, table heaps
//! - [`buffer`] - the sharded buffer pool
//! - [`recovery`] - write-ahead logging and crash recovery
//! - [`concurrency`] - transactions and striped key locks
//! - [`index`] - B-tree secondary indexes
//! - [`catalog`] - schemas and the `system` database
//! - [`auth`] - users, roles, privileges
//! - [`sql`] - the typed AST the executor consumes
//! - [`execution`] - strategies, planner, optimizer, executor
//! - [`engine`] - the assembled engine
//!
//! # Quick Start
//! ```no_run
//! use petradb::{Engine, Statement};
//!
//! let engine = Engine::open("./data").unwrap();
//! let mut ctx = engine.create_context();
//!
//! let result = engine.execute(
//!     Statement::CreateDatabase { name: "appdb".into() },
//!     &mut ctx,
//! );
//! assert!(result.success);
//! ```

pub mod auth;
pub mod buffer;
pub mod catalog;
pub mod common;
pub mod concurrency;
pub mod engine;
pub mod execution;
pub mod index;
pub mod recovery;
pub mod sql;
pub mod storage;

pub use common::config::PAGE_SIZE;
pub use common::{CompareOp, Error, ErrorCode, ErrorLevel, Lsn, PageId, Result, RowHandle, TxnId, Value};

pub use buffer::{BufferPoolStats, ShardedBufferPool, StatsSnapshot};
pub use catalog::{Database, SystemCatalog};
pub use concurrency::{IsolationLevel, LockManager, TransactionManager};
pub use engine::Engine;
pub use execution::{ExecutionContext, ExecutionResult, PlanKind, ResultSet};
pub use index::BTreeIndex;
pub use recovery::WalManager;
pub use sql::Statement;
pub use storage::DiskManager;
