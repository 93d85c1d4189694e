//! Integration tests for the sharded buffer pool: cross-component
//! behavior with the WAL that unit tests don't cover.

use std::sync::Arc;
use std::thread;

use petradb::recovery::WalManager;
use petradb::storage::DiskManager;
use petradb::{Lsn, PageId, ShardedBufferPool, TxnId};
use tempfile::tempdir;

fn create_pool(
    shards: usize,
    frames: usize,
) -> (ShardedBufferPool, Arc<WalManager>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let disk = DiskManager::create(dir.path().join("test.pdb")).unwrap();
    let wal = Arc::new(WalManager::open(dir.path().join("wal.log")).unwrap());
    (
        ShardedBufferPool::new(shards, frames, disk, wal.clone()),
        wal,
        dir,
    )
}

/// Data written through the pool survives eviction cycles.
#[test]
fn test_data_persistence_across_evictions() {
    let (pool, _wal, _dir) = create_pool(2, 2);

    let mut page_ids = vec![];
    for i in 0u8..10 {
        let mut guard = pool.new_page().unwrap();
        guard.as_mut_slice()[0] = i;
        guard.as_mut_slice()[1] = i.wrapping_mul(3);
        page_ids.push(guard.page_id());
    }

    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = pool.fetch_page_read(pid).unwrap();
        assert_eq!(guard.as_slice()[0], i as u8);
        assert_eq!(guard.as_slice()[1], (i as u8).wrapping_mul(3));
    }
    assert!(pool.stats_snapshot().evictions > 0);
}

/// Evicting the last dirty page in a shard forces a WAL flush before
/// the page reaches disk.
#[test]
fn test_eviction_forces_wal_flush() {
    let (pool, wal, _dir) = create_pool(1, 1);

    // Dirty a page whose LSN is beyond the durable horizon.
    let pid = {
        let mut guard = pool.new_page().unwrap();
        let before = guard.as_slice().to_vec();
        guard.as_mut_slice()[64] = 0x5A;
        let lsn = wal
            .modify_page(TxnId::new(1), guard.page_id(), &before, guard.as_slice())
            .unwrap();
        guard.set_lsn(lsn);
        guard.page_id()
    };
    assert!(wal.durable_lsn() < wal.current_lsn());

    // The single frame means the next page evicts the dirty one.
    let _second = pool.new_page().unwrap();

    let stats = pool.stats_snapshot();
    assert!(stats.evictions >= 1);
    assert!(stats.wal_flushes >= 1, "eviction must flush the WAL first");
    assert!(wal.durable_lsn() >= Lsn::new(1));

    // And the data still reads back.
    drop(_second);
    let guard = pool.fetch_page_read(pid).unwrap();
    assert_eq!(guard.as_slice()[64], 0x5A);
}

/// Pages stay in their owning shard for the engine's lifetime.
#[test]
fn test_shard_ownership_is_stable() {
    let (pool, _wal, _dir) = create_pool(8, 2);

    let page_ids: Vec<PageId> = (0..16).map(|_| pool.new_page().unwrap().page_id()).collect();
    let owners: Vec<usize> = page_ids.iter().map(|&pid| pool.shard_of(pid)).collect();

    // Re-fetching never migrates a page.
    for _ in 0..3 {
        for (i, &pid) in page_ids.iter().enumerate() {
            let _ = pool.fetch_page_read(pid).unwrap();
            assert_eq!(pool.shard_of(pid), owners[i]);
        }
    }
}

/// Flush and reload across pool instances.
#[test]
fn test_flush_and_reload() {
    let dir = tempdir().unwrap();
    let data = b"persistent!";
    let pid;

    {
        let disk = DiskManager::create(dir.path().join("test.pdb")).unwrap();
        let wal = Arc::new(WalManager::open(dir.path().join("wal.log")).unwrap());
        let pool = ShardedBufferPool::new(4, 4, disk, wal);

        let mut guard = pool.new_page().unwrap();
        pid = guard.page_id();
        guard.as_mut_slice()[..data.len()].copy_from_slice(data);
        drop(guard);

        pool.flush_all().unwrap();
    }

    {
        let disk = DiskManager::open(dir.path().join("test.pdb")).unwrap();
        let wal = Arc::new(WalManager::open(dir.path().join("wal.log")).unwrap());
        let pool = ShardedBufferPool::new(4, 4, disk, wal);

        let guard = pool.fetch_page_read(pid).unwrap();
        assert_eq!(&guard.as_slice()[..data.len()], data);
    }
}

/// Concurrent writers on pages spread across shards.
#[test]
fn test_concurrent_writers() {
    let (pool, _wal, _dir) = create_pool(4, 4);
    let pool = Arc::new(pool);

    let page_ids: Vec<PageId> = (0..8).map(|_| pool.new_page().unwrap().page_id()).collect();

    let mut handles = vec![];
    for (i, pid) in page_ids.iter().enumerate() {
        let pool = Arc::clone(&pool);
        let pid = *pid;
        handles.push(thread::spawn(move || {
            for j in 0..50 {
                let mut guard = pool.fetch_page_write(pid).unwrap();
                guard.as_mut_slice()[0] = ((i * 50 + j) % 256) as u8;
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = pool.fetch_page_read(pid).unwrap();
        assert_eq!(guard.as_slice()[0], ((i * 50 + 49) % 256) as u8);
    }
}
