//! One shard of the buffer pool.
//!
//! A shard is a self-contained page cache: its own frame table, hash
//! map, replacement policy, and statistics. Shards share only the disk
//! manager handle (serialized behind a mutex) and the WAL manager.
//!
//! # WAL coupling
//! A dirty frame reaches disk only after `WalManager::flush_upto` has
//! made the page's controlling LSN durable. That single rule is what
//! lets the pool steal (evict uncommitted dirty pages) and skip forcing
//! data pages at commit.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::buffer::replacer::Replacer;
use crate::buffer::{BufferPoolStats, Frame, PageReadGuard, PageWriteGuard};
use crate::common::{Error, ErrorCode, FrameId, PageId, Result};
use crate::recovery::WalManager;
use crate::storage::DiskManager;

pub struct PoolShard {
    /// Fixed pool of frames allocated at startup.
    frames: Vec<Frame>,
    /// Maps page IDs to frame IDs.
    page_table: RwLock<HashMap<PageId, FrameId>>,
    /// Stack of free frame IDs (LIFO for cache locality).
    free_list: Mutex<Vec<FrameId>>,
    /// Eviction policy for selecting victim frames.
    replacer: Mutex<Box<dyn Replacer>>,
    /// Disk manager shared with the other shards.
    disk: Arc<Mutex<DiskManager>>,
    /// WAL manager for the flush-before-evict rule.
    wal: Arc<WalManager>,
    stats: BufferPoolStats,
}

impl PoolShard {
    pub fn new(
        pool_size: usize,
        replacer: Box<dyn Replacer>,
        disk: Arc<Mutex<DiskManager>>,
        wal: Arc<WalManager>,
    ) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list: Vec<FrameId> = (0..pool_size).map(FrameId::new).collect();

        Self {
            frames,
            page_table: RwLock::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: Mutex::new(replacer),
            disk,
            wal,
            stats: BufferPoolStats::new(),
        }
    }

    // ========================================================================
    // Public API: fetch and install
    // ========================================================================

    /// Fetch a page for reading (shared access).
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page();
        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a page for writing (exclusive access).
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Install a freshly allocated page into this shard and return a
    /// write guard over its zeroed content. The caller must have
    /// allocated `page_id` through the disk manager and this shard must
    /// be the page's owner.
    pub fn install_new(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.get_free_frame()?;
        let frame = &self.frames[frame_id.0];

        frame.page_mut().reset();
        frame.set_page_id(Some(page_id));
        frame.pin();

        {
            let mut pt = self.page_table.write();
            pt.insert(page_id, frame_id);
        }
        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        let lock = frame.page_mut();
        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Drop a page from the shard without touching disk. Fails while
    /// the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut pt = self.page_table.write();

        let frame_id = match pt.get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id.0];
        if frame.is_pinned() {
            return Err(Error::new(
                ErrorCode::ConcurrencyConflict,
                "buffer",
                format!("page {} is pinned and cannot be dropped", page_id),
            ));
        }

        pt.remove(&page_id);
        drop(pt);

        frame.set_page_id(None);
        frame.clear_dirty();

        self.replacer.lock().remove(frame_id);
        self.free_list.lock().push(frame_id);

        Ok(())
    }

    // ========================================================================
    // Public API: flush
    // ========================================================================

    /// Flush a page to disk if it is present and dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = {
            let pt = self.page_table.read();
            match pt.get(&page_id) {
                Some(&fid) => fid,
                None => return Ok(()),
            }
        };
        self.flush_frame(frame_id, page_id)
    }

    /// Flush every dirty page in the shard.
    pub fn flush_all(&self) -> Result<()> {
        let pages: Vec<(PageId, FrameId)> = {
            let pt = self.page_table.read();
            pt.iter().map(|(&pid, &fid)| (pid, fid)).collect()
        };
        for (page_id, frame_id) in pages {
            self.flush_frame(frame_id, page_id)?;
        }
        Ok(())
    }

    // ========================================================================
    // Public API: stats and info
    // ========================================================================

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    pub fn page_count(&self) -> usize {
        self.page_table.read().len()
    }

    // ========================================================================
    // Internal: called by guards on drop
    // ========================================================================

    pub(crate) fn unpin_page_internal(&self, frame_id: FrameId, is_dirty: bool) {
        let frame = &self.frames[frame_id.0];

        if is_dirty {
            frame.mark_dirty();
        }

        let new_pin_count = frame.unpin();
        if new_pin_count == 0 {
            self.replacer.lock().set_evictable(frame_id, true);
        }
    }

    // ========================================================================
    // Internal: core fetch logic
    // ========================================================================

    fn fetch_page_internal(&self, page_id: PageId) -> Result<FrameId> {
        // Fast path: read lock only.
        {
            let pt = self.page_table.read();
            if let Some(&frame_id) = pt.get(&page_id) {
                self.pin_existing(frame_id);
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(frame_id);
            }
        }

        self.handle_cache_miss(page_id)
    }

    fn pin_existing(&self, frame_id: FrameId) {
        let frame = &self.frames[frame_id.0];
        frame.pin();

        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id);
        replacer.set_evictable(frame_id, false);
    }

    fn handle_cache_miss(&self, page_id: PageId) -> Result<FrameId> {
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let frame_id = self.get_free_frame()?;

        // Read the page while holding no shard locks.
        let page_data = {
            let mut disk = self.disk.lock();
            disk.read_page(page_id)
        };
        let page_data = match page_data {
            Ok(p) => p,
            Err(e) => {
                self.free_list.lock().push(frame_id);
                return Err(e);
            }
        };
        self.stats.pages_read.fetch_add(1, Ordering::Relaxed);

        // Another thread may have installed the page while we read it.
        {
            let mut pt = self.page_table.write();
            if let Some(&existing) = pt.get(&page_id) {
                self.free_list.lock().push(frame_id);
                self.pin_existing(existing);
                return Ok(existing);
            }
            pt.insert(page_id, frame_id);
        }

        let frame = &self.frames[frame_id.0];
        frame
            .page_mut()
            .as_mut_slice()
            .copy_from_slice(page_data.as_slice());
        frame.set_page_id(Some(page_id));
        frame.pin();

        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        Ok(frame_id)
    }

    // ========================================================================
    // Internal: frame allocation and eviction
    // ========================================================================

    fn get_free_frame(&self) -> Result<FrameId> {
        {
            let mut fl = self.free_list.lock();
            if let Some(frame_id) = fl.pop() {
                return Ok(frame_id);
            }
        }
        self.evict_page()
    }

    fn evict_page(&self) -> Result<FrameId> {
        // Prefer a clean victim; otherwise the oldest dirty one.
        let frame_id = {
            let mut replacer = self.replacer.lock();
            replacer
                .evict_preferring(&|fid| !self.frames[fid.0].is_dirty())
                .ok_or_else(|| {
                    Error::new(
                        ErrorCode::OutOfMemory,
                        "buffer",
                        "no evictable frames: all pages pinned",
                    )
                    .with_level(crate::common::ErrorLevel::Error)
                })?
        };

        self.stats.evictions.fetch_add(1, Ordering::Relaxed);

        let frame = &self.frames[frame_id.0];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            if let Some(pid) = old_page_id {
                trace!(page = %pid, "evicting dirty page");
                self.flush_frame(frame_id, pid)?;
            }
        }

        if let Some(pid) = old_page_id {
            self.page_table.write().remove(&pid);
        }

        frame.clear_dirty();
        frame.set_page_id(None);

        Ok(frame_id)
    }

    /// Flush a frame to disk if dirty. The WAL is flushed through the
    /// page's LSN first.
    fn flush_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id.0];
        if !frame.is_dirty() {
            return Ok(());
        }

        // Write lock: the checksum must cover the final content.
        let mut page = frame.page_mut();

        let lsn = page.lsn();
        if lsn.0 > 0 {
            if self.wal.durable_lsn() < lsn {
                self.stats.wal_flushes.fetch_add(1, Ordering::Relaxed);
            }
            self.wal.flush_upto(lsn)?;
        }

        page.update_checksum();
        {
            let mut disk = self.disk.lock();
            disk.write_page(page_id, &page)?;
        }
        drop(page);

        frame.clear_dirty();
        self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::replacer::LruReplacer;
    use tempfile::tempdir;

    fn create_shard(pool_size: usize) -> (PoolShard, Arc<Mutex<DiskManager>>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(Mutex::new(
            DiskManager::create(dir.path().join("test.pdb")).unwrap(),
        ));
        let wal = Arc::new(WalManager::open(dir.path().join("wal.log")).unwrap());
        let shard = PoolShard::new(pool_size, Box::new(LruReplacer::new()), disk.clone(), wal);
        (shard, disk, dir)
    }

    fn allocate(disk: &Arc<Mutex<DiskManager>>) -> PageId {
        disk.lock().allocate_page().unwrap()
    }

    #[test]
    fn test_install_and_fetch() {
        let (shard, disk, _dir) = create_shard(4);
        let pid = allocate(&disk);

        {
            let mut guard = shard.install_new(pid).unwrap();
            guard.as_mut_slice()[0] = 0xAB;
        }

        let guard = shard.fetch_page_read(pid).unwrap();
        assert_eq!(guard.as_slice()[0], 0xAB);
    }

    #[test]
    fn test_cache_hit_stats() {
        let (shard, disk, _dir) = create_shard(4);
        let pid = allocate(&disk);
        drop(shard.install_new(pid).unwrap());

        for _ in 0..3 {
            let _ = shard.fetch_page_read(pid).unwrap();
        }
        assert!(shard.stats().snapshot().cache_hits >= 3);
    }

    #[test]
    fn test_eviction_flushes_dirty_page() {
        let (shard, disk, _dir) = create_shard(1);

        let p0 = allocate(&disk);
        {
            let mut guard = shard.install_new(p0).unwrap();
            guard.as_mut_slice()[100] = 0x42;
        }

        // Installing a second page evicts the first, which must be
        // flushed so a refetch sees the data.
        let p1 = allocate(&disk);
        drop(shard.install_new(p1).unwrap());

        let guard = shard.fetch_page_read(p0).unwrap();
        assert_eq!(guard.as_slice()[100], 0x42);
        assert!(shard.stats().snapshot().evictions >= 1);
    }

    #[test]
    fn test_all_pinned_fails() {
        let (shard, disk, _dir) = create_shard(2);

        let p0 = allocate(&disk);
        let p1 = allocate(&disk);
        let p2 = allocate(&disk);

        let _g0 = shard.install_new(p0).unwrap();
        let _g1 = shard.install_new(p1).unwrap();
        assert!(shard.install_new(p2).is_err());
    }

    #[test]
    fn test_delete_page_frees_frame() {
        let (shard, disk, _dir) = create_shard(4);
        let pid = allocate(&disk);
        drop(shard.install_new(pid).unwrap());

        assert_eq!(shard.page_count(), 1);
        shard.delete_page(pid).unwrap();
        assert_eq!(shard.page_count(), 0);
        assert_eq!(shard.free_frame_count(), 4);
    }

    #[test]
    fn test_delete_pinned_page_fails() {
        let (shard, disk, _dir) = create_shard(4);
        let pid = allocate(&disk);
        let _guard = shard.install_new(pid).unwrap();
        assert!(shard.delete_page(pid).is_err());
    }

    #[test]
    fn test_concurrent_readers() {
        use std::thread;

        let (shard, disk, _dir) = create_shard(4);
        let pid = allocate(&disk);
        {
            let mut guard = shard.install_new(pid).unwrap();
            guard.as_mut_slice()[0] = 0x42;
        }

        let shard = Arc::new(shard);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shard = Arc::clone(&shard);
                thread::spawn(move || {
                    let guard = shard.fetch_page_read(pid).unwrap();
                    assert_eq!(guard.as_slice()[0], 0x42);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
