//! Configuration constants for PetraDB.

use std::time::Duration;

/// Size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems and keeps a page a single
/// unit of aligned I/O.
pub const PAGE_SIZE: usize = 4096;

/// Number of buffer pool shards. Must be a power of two so the owning
/// shard can be computed with a mask instead of a modulo.
pub const BUFFER_POOL_SHARDS: usize = 16;

/// Frames per buffer pool shard.
pub const FRAMES_PER_SHARD: usize = 64;

/// Number of key-lock stripes in the lock manager. Power of two.
pub const LOCK_STRIPES: usize = 64;

/// How long a lock request waits before running deadlock detection.
pub const DEADLOCK_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// File name of the paged data file inside a database directory.
pub const DATA_FILE_NAME: &str = "data.pdb";

/// File name of the write-ahead log inside a database directory.
pub const WAL_FILE_NAME: &str = "wal.log";

/// Bootstrap copy of users at the engine root.
pub const USERS_FILE_NAME: &str = "users.dat";

/// Bootstrap copy of privileges at the engine root.
pub const PERMISSIONS_FILE_NAME: &str = "permissions.dat";

/// Name of the reserved catalog database.
pub const SYSTEM_DATABASE: &str = "system";

/// Magic number stored in the database header page.
pub const DATABASE_MAGIC: u32 = 0x5045_5442; // "PETB"

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_shard_and_stripe_counts_are_powers_of_two() {
        assert!(BUFFER_POOL_SHARDS.is_power_of_two());
        assert!(LOCK_STRIPES.is_power_of_two());
    }
}
