//! Transaction state.

use std::fmt;

use crate::common::{Lsn, TxnId};

/// SQL isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

impl IsolationLevel {
    pub fn parse(s: &str) -> Option<IsolationLevel> {
        let normalized = s.trim().to_ascii_uppercase().replace('_', " ");
        Some(match normalized.as_str() {
            "READ UNCOMMITTED" => IsolationLevel::ReadUncommitted,
            "READ COMMITTED" => IsolationLevel::ReadCommitted,
            "REPEATABLE READ" => IsolationLevel::RepeatableRead,
            "SNAPSHOT" => IsolationLevel::Snapshot,
            "SERIALIZABLE" => IsolationLevel::Serializable,
            _ => return None,
        })
    }

    /// Whether reads acquire shared key locks at all.
    pub fn takes_read_locks(&self) -> bool {
        !matches!(
            self,
            IsolationLevel::ReadUncommitted | IsolationLevel::Snapshot
        )
    }

    /// Whether shared locks are held until commit rather than released
    /// right after the read.
    pub fn holds_read_locks(&self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::Serializable => "SERIALIZABLE",
        };
        f.write_str(s)
    }
}

/// Lifecycle status. Terminal states are permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

/// One transaction's bookkeeping.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TxnId,
    pub status: TxnStatus,
    pub isolation: IsolationLevel,
    /// Last WAL record this transaction wrote.
    pub last_lsn: Lsn,
    /// Snapshot identifier, captured at begin for SNAPSHOT isolation.
    pub snapshot_id: Option<u64>,
    /// Database the transaction is bound to.
    pub database: String,
    /// Named savepoints in creation order.
    pub savepoints: Vec<String>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation: IsolationLevel, database: String) -> Self {
        Self {
            id,
            status: TxnStatus::Active,
            isolation,
            last_lsn: Lsn::ZERO,
            snapshot_id: None,
            database,
            savepoints: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TxnStatus::Active
    }
}
