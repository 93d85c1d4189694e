//! Disk Manager - low-level paged I/O for one database file.
//!
//! Pages are laid out sequentially; page N lives at file offset
//! `N * PAGE_SIZE`. Page 0 is the database header page and is written by
//! [`crate::storage::DatabaseHeader`] at creation time.
//!
//! # Durability
//! `write_page` does NOT fsync. Durability is the write-ahead log's job:
//! the buffer pool flushes the WAL up to a page's LSN before the page
//! itself reaches disk, and [`DiskManager::flush`] syncs the file when a
//! checkpoint needs everything down.
//!
//! # Thread Safety
//! `DiskManager` is single-threaded; the buffer pool serializes access
//! behind a mutex.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, ErrorCode, PageId, Result};
use crate::storage::page::Page;

pub struct DiskManager {
    file: File,
    /// Number of pages in the file.
    page_count: u32,
}

impl DiskManager {
    /// Create a new database file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            page_count: 0,
        })
    }

    /// Open an existing database file.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let metadata = file.metadata()?;
        let page_count = (metadata.len() / PAGE_SIZE as u64) as u32;

        Ok(Self { file, page_count })
    }

    /// Open an existing database file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Read a page from disk.
    ///
    /// # Errors
    /// Returns a `NotFound` error if the page doesn't exist.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        if page_id.0 >= self.page_count {
            return Err(Error::new(
                ErrorCode::NotFound,
                "storage",
                format!("page {} not found", page_id.0),
            ));
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        self.file.seek(SeekFrom::Start(offset))?;

        let mut page = Page::new();
        self.file.read_exact(page.as_mut_slice())?;

        Ok(page)
    }

    /// Write a page to disk. The page must have been allocated first.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        if page_id.0 >= self.page_count {
            return Err(Error::new(
                ErrorCode::NotFound,
                "storage",
                format!("page {} not allocated", page_id.0),
            ));
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(page.as_slice())?;

        Ok(())
    }

    /// Allocate a new zeroed page at the end of the file.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = PageId::new(self.page_count);

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        self.file.seek(SeekFrom::Start(offset))?;

        let zeros = [0u8; PAGE_SIZE];
        self.file.write_all(&zeros)?;

        self.page_count += 1;
        Ok(page_id)
    }

    /// Extend the file until `page_id` exists. Used by WAL replay when
    /// a crash lost an allocation that the log knows about.
    pub fn ensure_allocated(&mut self, page_id: PageId) -> Result<()> {
        while self.page_count <= page_id.0 {
            self.allocate_page()?;
        }
        Ok(())
    }

    /// fsync the file.
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Number of pages in the database file.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Total size of the database file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        (self.page_count as u64) * (PAGE_SIZE as u64)
    }
}
