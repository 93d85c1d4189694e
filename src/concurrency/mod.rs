//! Transaction management and key-level locking.
//!
//! - [`TransactionManager`] - transaction table and terminal transitions
//! - [`LockManager`] - striped RW key locks with deadlock detection
//! - [`Transaction`] / [`IsolationLevel`] / [`TxnStatus`]

mod lock_manager;
mod transaction;
mod transaction_manager;

pub use lock_manager::{LockManager, LockMode};
pub use transaction::{IsolationLevel, Transaction, TxnStatus};
pub use transaction_manager::TransactionManager;
