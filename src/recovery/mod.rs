//! Write-ahead logging and crash recovery.
//!
//! - [`WalManager`] - append-only log with LSN assignment and fsync barriers
//! - [`WalRecord`] / [`WalRecordKind`] - typed, checksummed records
//! - [`RecoverySummary`] - what a replay did

mod wal_manager;
mod wal_record;

pub use wal_manager::{RecoverySummary, WalManager};
pub use wal_record::{ModifyPagePayload, WalRecord, WalRecordKind};
