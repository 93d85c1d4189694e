//! Transaction manager: the transaction table and terminal transitions.
//!
//! Commit writes COMMIT to the WAL and flushes before releasing locks;
//! rollback writes ABORT, restores the transaction's pages from WAL
//! before-images, then releases locks. Terminal states are permanent:
//! further operations on the id fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::buffer::ShardedBufferPool;
use crate::common::{Error, ErrorCode, Result, TxnId};
use crate::recovery::WalManager;

use super::lock_manager::LockManager;
use super::transaction::{IsolationLevel, Transaction, TxnStatus};

pub struct TransactionManager {
    txns: RwLock<HashMap<TxnId, Arc<Mutex<Transaction>>>>,
    next_txn_id: AtomicU64,
    next_snapshot_id: AtomicU64,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            txns: RwLock::new(HashMap::new()),
            next_txn_id: AtomicU64::new(1),
            next_snapshot_id: AtomicU64::new(1),
            lock_manager,
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Start a transaction bound to `database`, writing BEGIN to its
    /// WAL.
    pub fn begin(
        &self,
        isolation: IsolationLevel,
        database: &str,
        wal: &WalManager,
    ) -> Result<TxnId> {
        let id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::Relaxed));
        let mut txn = Transaction::new(id, isolation, database.to_string());
        if isolation == IsolationLevel::Snapshot {
            txn.snapshot_id = Some(self.next_snapshot_id.fetch_add(1, Ordering::Relaxed));
        }
        txn.last_lsn = wal.begin(id)?;

        self.txns.write().insert(id, Arc::new(Mutex::new(txn)));
        debug!(txn = %id, %isolation, database, "transaction started");
        Ok(id)
    }

    /// Commit: COMMIT record durable, then locks released.
    pub fn commit(&self, id: TxnId, wal: &WalManager) -> Result<()> {
        let txn = self.active_txn(id)?;
        let lsn = wal.commit(id)?;
        {
            let mut txn = txn.lock();
            txn.last_lsn = lsn;
            txn.status = TxnStatus::Committed;
        }
        self.lock_manager.release_all(id);
        debug!(txn = %id, "committed");
        Ok(())
    }

    /// Rollback: ABORT record, page restoration from before-images,
    /// then locks released.
    pub fn rollback(&self, id: TxnId, wal: &WalManager, pool: &ShardedBufferPool) -> Result<()> {
        let txn = self.active_txn(id)?;
        let lsn = wal.abort(id)?;

        // Newest-first restoration walks the transaction's effects
        // backwards.
        for image in wal.before_images(id)? {
            let mut guard = pool.fetch_page_write(image.page_id)?;
            guard.as_mut_slice().copy_from_slice(&image.before);
            guard.set_lsn(lsn);
        }

        {
            let mut txn = txn.lock();
            txn.last_lsn = lsn;
            txn.status = TxnStatus::Aborted;
        }
        self.lock_manager.release_all(id);
        info!(txn = %id, "rolled back");
        Ok(())
    }

    /// Record a savepoint name on an active transaction.
    pub fn savepoint(&self, id: TxnId, name: &str) -> Result<()> {
        let txn = self.active_txn(id)?;
        txn.lock().savepoints.push(name.to_string());
        Ok(())
    }

    pub fn status(&self, id: TxnId) -> Option<TxnStatus> {
        self.txns.read().get(&id).map(|t| t.lock().status)
    }

    pub fn isolation(&self, id: TxnId) -> Option<IsolationLevel> {
        self.txns.read().get(&id).map(|t| t.lock().isolation)
    }

    pub fn snapshot_id(&self, id: TxnId) -> Option<u64> {
        self.txns.read().get(&id).and_then(|t| t.lock().snapshot_id)
    }

    pub fn database_of(&self, id: TxnId) -> Option<String> {
        self.txns.read().get(&id).map(|t| t.lock().database.clone())
    }

    pub fn is_active(&self, id: TxnId) -> bool {
        self.status(id) == Some(TxnStatus::Active)
    }

    fn active_txn(&self, id: TxnId) -> Result<Arc<Mutex<Transaction>>> {
        let txn = self
            .txns
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| self.unknown_txn(id))?;
        if !txn.lock().is_active() {
            return Err(Error::new(
                ErrorCode::TransactionError,
                "txn",
                format!("{} is no longer active", id),
            ));
        }
        Ok(txn)
    }

    fn unknown_txn(&self, id: TxnId) -> Error {
        Error::new(
            ErrorCode::TransactionError,
            "txn",
            format!("unknown transaction {}", id),
        )
    }
}
