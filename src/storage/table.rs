//! Table storage: slotted-page heaps with WAL-logged mutations.
//!
//! Each table is a chain of data pages linked through the slotted page
//! header, rooted at the page recorded in the table's metadata. Every
//! mutation captures the page's before and after images and appends a
//! `MODIFY_PAGE` record before stamping the new LSN on the page, so a
//! transaction can be rolled back (and a crash recovered) from the log
//! alone.

use std::sync::Arc;

use crate::buffer::ShardedBufferPool;
use crate::catalog::schema::TableSchema;
use crate::common::{Error, ErrorCode, PageId, Result, RowHandle, TxnId, Value};
use crate::recovery::WalManager;
use crate::storage::db_header::DatabaseHeader;
use crate::storage::page::{PageHeader, PageType};
use crate::storage::record::{decode_record, encode_record};
use crate::storage::slotted::{SlottedPage, SlottedView, MAX_RECORD_SIZE};

pub struct TableStorage {
    pool: Arc<ShardedBufferPool>,
    wal: Arc<WalManager>,
}

impl TableStorage {
    pub fn new(pool: Arc<ShardedBufferPool>, wal: Arc<WalManager>) -> Self {
        Self { pool, wal }
    }

    pub fn pool(&self) -> &Arc<ShardedBufferPool> {
        &self.pool
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    /// Allocate and initialize the first page of a new table chain.
    pub fn create_chain(&self, txn_id: TxnId) -> Result<PageId> {
        let mut guard = self.pool.new_page()?;
        let page_id = guard.page_id();
        let before = guard.as_slice().to_vec();

        let header = PageHeader::new(PageType::Data);
        guard.set_header(&header);
        SlottedPage::new(guard.as_mut_slice()).init();

        let lsn = self
            .wal
            .modify_page(txn_id, page_id, &before, guard.as_slice())?;
        guard.set_lsn(lsn);
        Ok(page_id)
    }

    /// Drop every cached page of a chain. The on-disk pages are left
    /// behind as garbage; space is not reclaimed.
    pub fn drop_chain(&self, root: PageId) -> Result<()> {
        let mut page_id = root;
        while page_id.is_valid() {
            let next = {
                let guard = self.pool.fetch_page_read(page_id)?;
                SlottedView::new(guard.as_slice()).next_page()
            };
            self.pool.delete_page(page_id)?;
            page_id = next;
        }
        Ok(())
    }

    /// Insert a record, returning its row handle.
    pub fn insert_record(
        &self,
        txn_id: TxnId,
        schema: &TableSchema,
        values: &[Value],
    ) -> Result<RowHandle> {
        let record = encode_record(&schema.storage_classes(), values)?;
        if record.len() > MAX_RECORD_SIZE {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "storage",
                format!("record of {} bytes exceeds page capacity", record.len()),
            ));
        }
        self.insert_bytes(txn_id, schema.root_page, &record)
    }

    fn insert_bytes(&self, txn_id: TxnId, root: PageId, record: &[u8]) -> Result<RowHandle> {
        let mut page_id = root;
        loop {
            let mut guard = self.pool.fetch_page_write(page_id)?;
            let before = guard.as_slice().to_vec();

            let mut slotted = SlottedPage::new(guard.as_mut_slice());
            if let Some(slot) = slotted.insert(record) {
                let lsn = self
                    .wal
                    .modify_page(txn_id, page_id, &before, guard.as_slice())?;
                guard.set_lsn(lsn);
                return Ok(RowHandle::new(page_id, slot));
            }

            let next = slotted.next_page();
            if next.is_valid() {
                page_id = next;
                continue;
            }

            // Tail is full: extend the chain while still holding the
            // tail guard so racing inserts cannot double-extend.
            let mut new_guard = self.pool.new_page()?;
            let new_page_id = new_guard.page_id();
            let new_before = new_guard.as_slice().to_vec();

            let header = PageHeader::new(PageType::Data);
            new_guard.set_header(&header);
            let mut new_slotted = SlottedPage::new(new_guard.as_mut_slice());
            new_slotted.init();
            let slot = new_slotted.insert(record).ok_or_else(|| {
                Error::new(
                    ErrorCode::InvalidParameter,
                    "storage",
                    "record does not fit in an empty page",
                )
            })?;
            let lsn = self
                .wal
                .modify_page(txn_id, new_page_id, &new_before, new_guard.as_slice())?;
            new_guard.set_lsn(lsn);
            drop(new_guard);

            SlottedPage::new(guard.as_mut_slice()).set_next_page(new_page_id);
            let lsn = self
                .wal
                .modify_page(txn_id, page_id, &before, guard.as_slice())?;
            guard.set_lsn(lsn);

            return Ok(RowHandle::new(new_page_id, slot));
        }
    }

    /// Rewrite a record. Returns the (possibly new) row handle: a record
    /// that no longer fits its page moves to a new slot, and the caller
    /// must rewrite every index entry pointing at the old handle.
    pub fn update_record(
        &self,
        txn_id: TxnId,
        schema: &TableSchema,
        handle: RowHandle,
        new_values: &[Value],
    ) -> Result<RowHandle> {
        let record = encode_record(&schema.storage_classes(), new_values)?;
        if record.len() > MAX_RECORD_SIZE {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "storage",
                format!("record of {} bytes exceeds page capacity", record.len()),
            ));
        }

        {
            let mut guard = self.pool.fetch_page_write(handle.page_id)?;
            let before = guard.as_slice().to_vec();

            let mut slotted = SlottedPage::new(guard.as_mut_slice());
            if slotted.get(handle.slot).is_none() {
                return Err(self.no_such_row(handle));
            }
            let updated = slotted.update(handle.slot, &record);
            let lsn = self
                .wal
                .modify_page(txn_id, handle.page_id, &before, guard.as_slice())?;
            guard.set_lsn(lsn);

            if updated {
                return Ok(handle);
            }
            // The old image is gone from this page; fall through to
            // re-insert elsewhere in the chain.
        }

        self.insert_bytes(txn_id, schema.root_page, &record)
    }

    /// Delete a record by handle.
    pub fn delete_record(&self, txn_id: TxnId, handle: RowHandle) -> Result<()> {
        let mut guard = self.pool.fetch_page_write(handle.page_id)?;
        let before = guard.as_slice().to_vec();

        let mut slotted = SlottedPage::new(guard.as_mut_slice());
        if !slotted.delete(handle.slot) {
            return Err(self.no_such_row(handle));
        }

        let lsn = self
            .wal
            .modify_page(txn_id, handle.page_id, &before, guard.as_slice())?;
        guard.set_lsn(lsn);
        Ok(())
    }

    /// Fetch a record by handle. `None` when the slot is dead.
    pub fn get_record(&self, schema: &TableSchema, handle: RowHandle) -> Result<Option<Vec<Value>>> {
        let guard = self.pool.fetch_page_read(handle.page_id)?;
        let view = SlottedView::new(guard.as_slice());
        match view.get(handle.slot) {
            Some(bytes) => Ok(Some(decode_record(&schema.storage_classes(), bytes)?)),
            None => Ok(None),
        }
    }

    /// Scan every live record in the table. Order is the physical chain
    /// order; callers requiring an order must sort or use an index.
    pub fn scan(&self, schema: &TableSchema) -> Result<Vec<(RowHandle, Vec<Value>)>> {
        let classes = schema.storage_classes();
        let mut rows = Vec::new();
        let mut page_id = schema.root_page;

        while page_id.is_valid() {
            let guard = self.pool.fetch_page_read(page_id)?;
            let view = SlottedView::new(guard.as_slice());
            for (slot, bytes) in view.live_slots() {
                rows.push((
                    RowHandle::new(page_id, slot),
                    decode_record(&classes, bytes)?,
                ));
            }
            page_id = view.next_page();
        }
        Ok(rows)
    }

    /// Number of live records in the table.
    pub fn count(&self, schema: &TableSchema) -> Result<usize> {
        let mut count = 0;
        let mut page_id = schema.root_page;
        while page_id.is_valid() {
            let guard = self.pool.fetch_page_read(page_id)?;
            let view = SlottedView::new(guard.as_slice());
            count += view.live_slots().count();
            page_id = view.next_page();
        }
        Ok(count)
    }

    // ========================================================================
    // Database header page access
    // ========================================================================

    /// Read the table directory from page 0.
    pub fn read_header(&self) -> Result<DatabaseHeader> {
        let guard = self.pool.fetch_page_read(PageId::new(0))?;
        DatabaseHeader::from_page(&guard)
    }

    /// Mutate the table directory on page 0, WAL-logged.
    pub fn update_header(
        &self,
        txn_id: TxnId,
        mutate: impl FnOnce(&mut DatabaseHeader),
    ) -> Result<DatabaseHeader> {
        let mut guard = self.pool.fetch_page_write(PageId::new(0))?;
        let before = guard.as_slice().to_vec();

        let mut header = DatabaseHeader::from_page(&guard)?;
        mutate(&mut header);
        header.write_to(&mut guard)?;

        let lsn = self
            .wal
            .modify_page(txn_id, PageId::new(0), &before, guard.as_slice())?;
        guard.set_lsn(lsn);
        Ok(header)
    }

    /// Initialize page 0 of a brand-new database file.
    pub fn init_header(&self, txn_id: TxnId) -> Result<()> {
        let mut guard = self.pool.new_page()?;
        debug_assert_eq!(guard.page_id(), PageId::new(0));
        let before = guard.as_slice().to_vec();

        DatabaseHeader::new().write_to(&mut guard)?;

        let lsn = self
            .wal
            .modify_page(txn_id, PageId::new(0), &before, guard.as_slice())?;
        guard.set_lsn(lsn);
        Ok(())
    }

    fn no_such_row(&self, handle: RowHandle) -> Error {
        Error::new(
            ErrorCode::NotFound,
            "storage",
            format!("no live record at {}", handle),
        )
    }
}
