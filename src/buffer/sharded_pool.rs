//! Sharded buffer pool: N independent shards selected by page id.
//!
//! Shard selection is `page_id & (N - 1)`, so N must be a power of two.
//! Shards share no mutable state beyond the disk manager handle and the
//! WAL; operations on different shards proceed without mutual
//! exclusion, and contention tracks keyspace skew across shards.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::replacer::{LruReplacer, Replacer};
use crate::buffer::{PageReadGuard, PageWriteGuard, PoolShard, StatsSnapshot};
use crate::common::{PageId, Result};
use crate::recovery::WalManager;
use crate::storage::DiskManager;

pub struct ShardedBufferPool {
    shards: Vec<PoolShard>,
    shard_mask: u32,
    disk: Arc<Mutex<DiskManager>>,
}

impl ShardedBufferPool {
    /// Create a pool with LRU replacement in every shard.
    ///
    /// # Panics
    /// Panics if `shard_count` is not a power of two.
    pub fn new(
        shard_count: usize,
        frames_per_shard: usize,
        disk_manager: DiskManager,
        wal: Arc<WalManager>,
    ) -> Self {
        Self::with_replacer_factory(shard_count, frames_per_shard, disk_manager, wal, || {
            Box::new(LruReplacer::new())
        })
    }

    /// Create a pool with a caller-chosen replacement policy per shard.
    pub fn with_replacer_factory(
        shard_count: usize,
        frames_per_shard: usize,
        disk_manager: DiskManager,
        wal: Arc<WalManager>,
        mut factory: impl FnMut() -> Box<dyn Replacer>,
    ) -> Self {
        assert!(
            shard_count.is_power_of_two(),
            "shard_count must be a power of two"
        );

        let disk = Arc::new(Mutex::new(disk_manager));
        let shards = (0..shard_count)
            .map(|_| PoolShard::new(frames_per_shard, factory(), disk.clone(), wal.clone()))
            .collect();

        Self {
            shards,
            shard_mask: (shard_count - 1) as u32,
            disk,
        }
    }

    /// The shard that owns a page. Stable for the pool's lifetime.
    #[inline]
    pub fn shard_of(&self, page_id: PageId) -> usize {
        (page_id.0 & self.shard_mask) as usize
    }

    /// Fetch a page for reading.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        self.shards[self.shard_of(page_id)].fetch_page_read(page_id)
    }

    /// Fetch a page for writing.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        self.shards[self.shard_of(page_id)].fetch_page_write(page_id)
    }

    /// Allocate a new page on disk and install it in its owning shard.
    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let page_id = {
            let mut disk = self.disk.lock();
            disk.allocate_page()?
        };
        self.shards[self.shard_of(page_id)].install_new(page_id)
    }

    /// Drop a page from its shard (not from disk).
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        self.shards[self.shard_of(page_id)].delete_page(page_id)
    }

    /// Flush one page if cached and dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        self.shards[self.shard_of(page_id)].flush_page(page_id)
    }

    /// Flush every dirty page in every shard, then fsync the data file.
    pub fn flush_all(&self) -> Result<()> {
        for shard in &self.shards {
            shard.flush_all()?;
        }
        self.disk.lock().flush()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Aggregated statistics across all shards.
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.shards
            .iter()
            .fold(StatsSnapshot::default(), |acc, shard| {
                acc.merge(&shard.stats().snapshot())
            })
    }

    /// Per-shard statistics, for skew inspection.
    pub fn shard_stats(&self) -> Vec<StatsSnapshot> {
        self.shards.iter().map(|s| s.stats().snapshot()).collect()
    }
}
