//! WAL manager: append-only log with LSN assignment, fsync barriers,
//! and crash recovery.
//!
//! `commit` returns only after the commit record and everything before
//! it is durable. Dirty page eviction calls [`WalManager::flush_upto`]
//! first, so a no-force/steal buffer pool stays safe.
//!
//! # Failure semantics
//! An I/O failure in `flush` poisons the manager: every subsequent call
//! fails with a FATAL error. A checksum mismatch during recovery
//! terminates replay at the offending record; prior records stand.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::common::{Error, ErrorCode, Lsn, PageId, Result, TxnId};
use crate::storage::page::Page;
use crate::storage::DiskManager;

use super::wal_record::{ModifyPagePayload, WalRecord, WalRecordKind};

/// What recovery did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoverySummary {
    pub records_scanned: usize,
    pub pages_redone: usize,
    pub pages_undone: usize,
}

pub struct WalManager {
    path: PathBuf,
    /// Append handle, positioned at the end of the valid prefix.
    file: Mutex<File>,
    /// Last assigned LSN. Assigned under the file lock so LSN order
    /// matches append order; atomic only for cheap reads.
    current_lsn: AtomicU64,
    /// All records with LSN <= this are durable.
    durable_lsn: AtomicU64,
    txn_last_lsn: Mutex<HashMap<TxnId, Lsn>>,
    poisoned: AtomicBool,
}

impl WalManager {
    /// Open (or create) the WAL at `path`.
    ///
    /// Scans the existing log and truncates any corrupt or half-written
    /// tail so new appends extend a valid prefix.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut pos = 0;
        let mut last_lsn = Lsn::ZERO;
        let mut txn_last_lsn = HashMap::new();
        while let Some((record, consumed)) = WalRecord::decode(&bytes[pos..]) {
            last_lsn = record.lsn;
            txn_last_lsn.insert(record.txn_id, record.lsn);
            pos += consumed;
        }
        if pos < bytes.len() {
            info!(
                valid = pos,
                total = bytes.len(),
                "truncating invalid WAL tail"
            );
            file.set_len(pos as u64)?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            current_lsn: AtomicU64::new(last_lsn.0),
            durable_lsn: AtomicU64::new(last_lsn.0),
            txn_last_lsn: Mutex::new(txn_last_lsn),
            poisoned: AtomicBool::new(false),
        })
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned.load(Ordering::Relaxed) {
            return Err(Error::new(
                ErrorCode::DiskIoError,
                "wal",
                "WAL manager is poisoned by an earlier I/O failure",
            ));
        }
        Ok(())
    }

    fn poison(&self, err: Error) -> Error {
        self.poisoned.store(true, Ordering::Relaxed);
        error!(error = %err, "WAL I/O failure, poisoning manager");
        err
    }

    /// Append a record, returning its LSN. Does not flush.
    pub fn append(&self, txn_id: TxnId, kind: WalRecordKind, payload: Vec<u8>) -> Result<Lsn> {
        self.check_poisoned()?;

        let mut file = self.file.lock();
        let lsn = Lsn::new(self.current_lsn.load(Ordering::Relaxed) + 1);
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;
        let record = WalRecord::new(lsn, txn_id, kind, timestamp, payload);

        file.write_all(&record.encode())
            .map_err(|e| self.poison(e.into()))?;

        self.current_lsn.store(lsn.0, Ordering::Relaxed);
        drop(file);

        self.txn_last_lsn.lock().insert(txn_id, lsn);
        Ok(lsn)
    }

    /// Write a BEGIN record.
    pub fn begin(&self, txn_id: TxnId) -> Result<Lsn> {
        self.append(txn_id, WalRecordKind::Begin, Vec::new())
    }

    /// Write a COMMIT record and flush through it. Returns only after
    /// the commit record is durable.
    pub fn commit(&self, txn_id: TxnId) -> Result<Lsn> {
        let lsn = self.append(txn_id, WalRecordKind::Commit, Vec::new())?;
        self.flush_upto(lsn)?;
        Ok(lsn)
    }

    /// Write an ABORT record and flush through it.
    pub fn abort(&self, txn_id: TxnId) -> Result<Lsn> {
        let lsn = self.append(txn_id, WalRecordKind::Abort, Vec::new())?;
        self.flush_upto(lsn)?;
        Ok(lsn)
    }

    /// Log a page modification with full before and after images.
    pub fn modify_page(
        &self,
        txn_id: TxnId,
        page_id: PageId,
        before: &[u8],
        after: &[u8],
    ) -> Result<Lsn> {
        let payload = ModifyPagePayload {
            page_id,
            before: before.to_vec(),
            after: after.to_vec(),
        };
        self.append(txn_id, WalRecordKind::ModifyPage, payload.encode())
    }

    /// fsync the log. All records appended so far become durable.
    pub fn flush(&self) -> Result<()> {
        self.check_poisoned()?;
        let file = self.file.lock();
        let upto = self.current_lsn.load(Ordering::Relaxed);
        file.sync_data().map_err(|e| self.poison(e.into()))?;
        drop(file);
        self.durable_lsn.fetch_max(upto, Ordering::Relaxed);
        Ok(())
    }

    /// Make all records with LSN <= `lsn` durable before returning.
    pub fn flush_upto(&self, lsn: Lsn) -> Result<()> {
        if self.durable_lsn.load(Ordering::Relaxed) >= lsn.0 {
            return Ok(());
        }
        self.flush()
    }

    /// Append a CHECKPOINT record and flush. The caller is responsible
    /// for flushing dirty pages first.
    pub fn checkpoint(&self) -> Result<Lsn> {
        let lsn = self.append(TxnId::new(0), WalRecordKind::Checkpoint, Vec::new())?;
        self.flush_upto(lsn)?;
        debug!(lsn = lsn.0, "checkpoint");
        Ok(lsn)
    }

    /// Last LSN assigned.
    pub fn current_lsn(&self) -> Lsn {
        Lsn::new(self.current_lsn.load(Ordering::Relaxed))
    }

    /// Highest LSN known to be durable.
    pub fn durable_lsn(&self) -> Lsn {
        Lsn::new(self.durable_lsn.load(Ordering::Relaxed))
    }

    /// Last LSN written by a transaction, if any.
    pub fn last_lsn(&self, txn_id: TxnId) -> Option<Lsn> {
        self.txn_last_lsn.lock().get(&txn_id).copied()
    }

    /// Read every valid record from the start of the log. The scan
    /// stops at the first corrupt or truncated frame.
    pub fn read_all(&self) -> Result<Vec<WalRecord>> {
        // Fresh read handle; the append handle keeps its position.
        let mut file = File::open(&self.path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut records = Vec::new();
        let mut pos = 0;
        while let Some((record, consumed)) = WalRecord::decode(&bytes[pos..]) {
            records.push(record);
            pos += consumed;
        }
        Ok(records)
    }

    /// Before-images of a transaction's page modifications, newest
    /// first, for rollback.
    pub fn before_images(&self, txn_id: TxnId) -> Result<Vec<ModifyPagePayload>> {
        let records = self.read_all()?;
        let mut images: Vec<ModifyPagePayload> = records
            .iter()
            .filter(|r| r.txn_id == txn_id && r.kind == WalRecordKind::ModifyPage)
            .filter_map(|r| ModifyPagePayload::decode(&r.payload))
            .collect();
        images.reverse();
        Ok(images)
    }

    /// Replay the log against the data file.
    ///
    /// Starting from the last checkpoint, MODIFY_PAGE after-images of
    /// committed transactions are redone in LSN order; then before-images
    /// of transactions that never committed are applied in reverse.
    pub fn recover(&self, disk: &mut DiskManager) -> Result<RecoverySummary> {
        let records = self.read_all()?;
        let start = records
            .iter()
            .rposition(|r| r.kind == WalRecordKind::Checkpoint)
            .map(|i| i + 1)
            .unwrap_or(0);

        let committed: HashSet<TxnId> = records
            .iter()
            .filter(|r| r.kind == WalRecordKind::Commit)
            .map(|r| r.txn_id)
            .collect();

        let mut summary = RecoverySummary {
            records_scanned: records.len(),
            ..Default::default()
        };

        for record in &records[start..] {
            if record.kind != WalRecordKind::ModifyPage || !committed.contains(&record.txn_id) {
                continue;
            }
            let Some(mp) = ModifyPagePayload::decode(&record.payload) else {
                continue;
            };
            disk.ensure_allocated(mp.page_id)?;
            let mut page = Page::new();
            page.as_mut_slice().copy_from_slice(&mp.after);
            page.set_lsn(record.lsn);
            disk.write_page(mp.page_id, &page)?;
            summary.pages_redone += 1;
        }

        for record in records[start..].iter().rev() {
            if record.kind != WalRecordKind::ModifyPage || committed.contains(&record.txn_id) {
                continue;
            }
            let Some(mp) = ModifyPagePayload::decode(&record.payload) else {
                continue;
            };
            if mp.page_id.0 >= disk.page_count() {
                // Page never reached disk; nothing to roll back.
                continue;
            }
            let mut page = Page::new();
            page.as_mut_slice().copy_from_slice(&mp.before);
            disk.write_page(mp.page_id, &page)?;
            summary.pages_undone += 1;
        }

        disk.flush()?;
        if summary.pages_redone > 0 || summary.pages_undone > 0 {
            info!(
                scanned = summary.records_scanned,
                redone = summary.pages_redone,
                undone = summary.pages_undone,
                "WAL recovery applied"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PAGE_SIZE;
    use tempfile::tempdir;

    #[test]
    fn test_lsn_strictly_increases() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path().join("wal.log")).unwrap();

        let a = wal.begin(TxnId::new(1)).unwrap();
        let b = wal.append(TxnId::new(1), WalRecordKind::InsertTuple, vec![1]).unwrap();
        let c = wal.commit(TxnId::new(1)).unwrap();
        assert!(a < b && b < c);
        assert_eq!(wal.current_lsn(), c);
        assert_eq!(wal.last_lsn(TxnId::new(1)), Some(c));
    }

    #[test]
    fn test_reopen_resumes_lsn_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");

        let last = {
            let wal = WalManager::open(&path).unwrap();
            wal.begin(TxnId::new(1)).unwrap();
            wal.commit(TxnId::new(1)).unwrap()
        };

        let wal = WalManager::open(&path).unwrap();
        assert_eq!(wal.current_lsn(), last);
        let next = wal.begin(TxnId::new(2)).unwrap();
        assert_eq!(next.0, last.0 + 1);
    }

    #[test]
    fn test_corrupt_tail_truncated_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");

        {
            let wal = WalManager::open(&path).unwrap();
            wal.begin(TxnId::new(1)).unwrap();
            wal.commit(TxnId::new(1)).unwrap();
        }

        // Append garbage to simulate a torn write.
        {
            use std::fs::OpenOptions;
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xDE, 0xAD, 0xBE]).unwrap();
        }

        let wal = WalManager::open(&path).unwrap();
        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(wal.current_lsn(), Lsn::new(2));
    }

    #[test]
    fn test_recover_redoes_committed_modify() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path().join("wal.log")).unwrap();
        let mut disk = DiskManager::create(dir.path().join("data.pdb")).unwrap();
        let page_id = disk.allocate_page().unwrap();

        let txn = TxnId::new(1);
        let before = vec![0u8; PAGE_SIZE];
        let mut after = vec![0u8; PAGE_SIZE];
        after[100] = 0x42;

        wal.begin(txn).unwrap();
        wal.modify_page(txn, page_id, &before, &after).unwrap();
        wal.commit(txn).unwrap();

        // Page content never reached the data file before the "crash".
        let summary = wal.recover(&mut disk).unwrap();
        assert_eq!(summary.pages_redone, 1);
        let page = disk.read_page(page_id).unwrap();
        assert_eq!(page.as_slice()[100], 0x42);
    }

    #[test]
    fn test_recover_undoes_uncommitted_modify() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path().join("wal.log")).unwrap();
        let mut disk = DiskManager::create(dir.path().join("data.pdb")).unwrap();
        let page_id = disk.allocate_page().unwrap();

        let txn = TxnId::new(1);
        let mut before = vec![0u8; PAGE_SIZE];
        before[50] = 0x11;
        let mut after = before.clone();
        after[50] = 0x99;

        // Simulate a stolen page: the uncommitted change reached disk.
        let mut page = Page::new();
        page.as_mut_slice().copy_from_slice(&after);
        disk.write_page(page_id, &page).unwrap();

        wal.begin(txn).unwrap();
        wal.modify_page(txn, page_id, &before, &after).unwrap();
        wal.flush().unwrap();
        // No commit: the transaction was in flight at the crash.

        let summary = wal.recover(&mut disk).unwrap();
        assert_eq!(summary.pages_undone, 1);
        let page = disk.read_page(page_id).unwrap();
        assert_eq!(page.as_slice()[50], 0x11);
    }

    #[test]
    fn test_recover_starts_at_last_checkpoint() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path().join("wal.log")).unwrap();
        let mut disk = DiskManager::create(dir.path().join("data.pdb")).unwrap();
        let page_id = disk.allocate_page().unwrap();

        let txn = TxnId::new(1);
        let before = vec![0u8; PAGE_SIZE];
        let mut after = vec![0u8; PAGE_SIZE];
        after[0] = 1;

        wal.begin(txn).unwrap();
        wal.modify_page(txn, page_id, &before, &after).unwrap();
        wal.commit(txn).unwrap();
        wal.checkpoint().unwrap();

        // Nothing after the checkpoint: replay applies no pages.
        let summary = wal.recover(&mut disk).unwrap();
        assert_eq!(summary.pages_redone, 0);
        assert_eq!(summary.pages_undone, 0);
    }

    #[test]
    fn test_before_images_newest_first() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path().join("wal.log")).unwrap();

        let txn = TxnId::new(5);
        let a = vec![1u8; PAGE_SIZE];
        let b = vec![2u8; PAGE_SIZE];
        let c = vec![3u8; PAGE_SIZE];

        wal.begin(txn).unwrap();
        wal.modify_page(txn, PageId::new(1), &a, &b).unwrap();
        wal.modify_page(txn, PageId::new(1), &b, &c).unwrap();

        let images = wal.before_images(txn).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].before, b);
        assert_eq!(images[1].before, a);
    }
}
