//! Striped key-lock manager with deadlock detection.
//!
//! The key space is partitioned into S stripes by hash; each stripe is
//! one reader/writer lock with a wait queue. A lock request blocks
//! until granted, except that a transaction already holding a stripe in
//! write mode is granted any further request on that stripe without
//! waiting.
//!
//! # Deadlock
//! A waiter that exceeds [`DEADLOCK_CHECK_INTERVAL`] rebuilds its edges
//! in the wait-for graph and runs a cycle check. When a cycle exists,
//! the youngest transaction in it (largest txn id) is marked victim and
//! its wait fails with `DeadlockDetected`.

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::common::config::{DEADLOCK_CHECK_INTERVAL, LOCK_STRIPES};
use crate::common::{Error, ErrorCode, Result, TxnId};

/// Lock mode for a key request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Default)]
struct StripeState {
    writer: Option<TxnId>,
    write_count: u32,
    /// Reader -> grant count.
    readers: HashMap<TxnId, u32>,
}

impl StripeState {
    fn holders_blocking(&self, requester: TxnId, mode: LockMode) -> HashSet<TxnId> {
        let mut blockers = HashSet::new();
        if let Some(writer) = self.writer {
            if writer != requester {
                blockers.insert(writer);
            }
        }
        if mode == LockMode::Exclusive {
            for &reader in self.readers.keys() {
                if reader != requester {
                    blockers.insert(reader);
                }
            }
        }
        blockers
    }

    fn grantable(&self, requester: TxnId, mode: LockMode) -> bool {
        // Re-entrant: a stripe held in write mode grants anything to
        // its owner.
        if self.writer == Some(requester) {
            return true;
        }
        match mode {
            LockMode::Shared => self.writer.is_none(),
            LockMode::Exclusive => {
                self.writer.is_none()
                    && self.readers.keys().all(|&reader| reader == requester)
            }
        }
    }
}

struct Stripe {
    state: Mutex<StripeState>,
    cond: Condvar,
}

pub struct LockManager {
    stripes: Vec<Stripe>,
    stripe_mask: u64,
    /// Waiter -> transactions it currently waits on.
    waits_for: Mutex<HashMap<TxnId, HashSet<TxnId>>>,
    /// Transactions chosen as deadlock victims; their waits fail.
    victims: Mutex<HashSet<TxnId>>,
    /// Txn -> stripes it holds (with grant counts), for release_all.
    held: Mutex<HashMap<TxnId, HashMap<usize, (u32, u32)>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_stripes(LOCK_STRIPES)
    }

    /// # Panics
    /// Panics if `stripe_count` is not a power of two.
    pub fn with_stripes(stripe_count: usize) -> Self {
        assert!(
            stripe_count.is_power_of_two(),
            "stripe_count must be a power of two"
        );
        Self {
            stripes: (0..stripe_count)
                .map(|_| Stripe {
                    state: Mutex::new(StripeState::default()),
                    cond: Condvar::new(),
                })
                .collect(),
            stripe_mask: (stripe_count - 1) as u64,
            waits_for: Mutex::new(HashMap::new()),
            victims: Mutex::new(HashSet::new()),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// The stripe guarding a key. Stable for the manager's lifetime.
    pub fn stripe_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() & self.stripe_mask) as usize
    }

    /// Acquire a shared lock on a key's stripe for `txn`.
    pub fn lock_for_read(&self, txn: TxnId, key: &str) -> Result<()> {
        self.acquire(txn, key, LockMode::Shared)
    }

    /// Acquire an exclusive lock on a key's stripe for `txn`.
    pub fn lock_for_write(&self, txn: TxnId, key: &str) -> Result<()> {
        self.acquire(txn, key, LockMode::Exclusive)
    }

    fn acquire(&self, txn: TxnId, key: &str, mode: LockMode) -> Result<()> {
        let stripe_id = self.stripe_of(key);
        let stripe = &self.stripes[stripe_id];

        let mut state = stripe.state.lock();
        while !state.grantable(txn, mode) {
            // Publish the wait edges, then block with a timeout that
            // doubles as the deadlock check trigger.
            let blockers = state.holders_blocking(txn, mode);
            self.waits_for.lock().insert(txn, blockers);

            let timed_out = stripe
                .cond
                .wait_for(&mut state, DEADLOCK_CHECK_INTERVAL)
                .timed_out();

            if self.victims.lock().remove(&txn) {
                self.waits_for.lock().remove(&txn);
                return Err(Error::new(
                    ErrorCode::DeadlockDetected,
                    "lock",
                    format!("{} aborted by deadlock detection", txn),
                ));
            }

            if timed_out {
                // Refresh edges and look for a cycle through us.
                let blockers = state.holders_blocking(txn, mode);
                self.waits_for.lock().insert(txn, blockers);
                if let Some(victim) = self.detect_cycle(txn) {
                    warn!(victim = %victim, waiter = %txn, "deadlock detected");
                    if victim == txn {
                        self.waits_for.lock().remove(&txn);
                        return Err(Error::new(
                            ErrorCode::DeadlockDetected,
                            "lock",
                            format!("{} aborted by deadlock detection", txn),
                        ));
                    }
                    self.victims.lock().insert(victim);
                    self.notify_all_stripes();
                }
            }
        }
        self.waits_for.lock().remove(&txn);

        match mode {
            LockMode::Shared => {
                if state.writer != Some(txn) {
                    *state.readers.entry(txn).or_insert(0) += 1;
                } else {
                    // Re-entrant grant under an exclusive hold.
                    state.write_count += 1;
                }
            }
            LockMode::Exclusive => {
                state.readers.remove(&txn);
                state.writer = Some(txn);
                state.write_count += 1;
            }
        }
        drop(state);

        let mut held = self.held.lock();
        let counts = held.entry(txn).or_default().entry(stripe_id).or_insert((0, 0));
        match mode {
            LockMode::Shared => counts.0 += 1,
            LockMode::Exclusive => counts.1 += 1,
        }
        Ok(())
    }

    /// Release one grant on a key's stripe. Normally locks are released
    /// wholesale on commit/rollback; this exists for READ_COMMITTED,
    /// which drops read locks right after the read.
    pub fn unlock(&self, txn: TxnId, key: &str) {
        let stripe_id = self.stripe_of(key);
        self.unlock_stripe(txn, stripe_id);
    }

    fn unlock_stripe(&self, txn: TxnId, stripe_id: usize) {
        let stripe = &self.stripes[stripe_id];
        let mut state = stripe.state.lock();

        if state.writer == Some(txn) {
            state.write_count = state.write_count.saturating_sub(1);
            if state.write_count == 0 {
                state.writer = None;
            }
        } else if let Some(count) = state.readers.get_mut(&txn) {
            *count -= 1;
            if *count == 0 {
                state.readers.remove(&txn);
            }
        }
        drop(state);
        stripe.cond.notify_all();

        let mut held = self.held.lock();
        if let Some(stripes) = held.get_mut(&txn) {
            if let Some(counts) = stripes.get_mut(&stripe_id) {
                if counts.1 > 0 {
                    counts.1 -= 1;
                } else if counts.0 > 0 {
                    counts.0 -= 1;
                }
                if *counts == (0, 0) {
                    stripes.remove(&stripe_id);
                }
            }
            if stripes.is_empty() {
                held.remove(&txn);
            }
        }
    }

    /// Release every lock a transaction holds (terminal transition).
    pub fn release_all(&self, txn: TxnId) {
        let stripes: Vec<usize> = self
            .held
            .lock()
            .remove(&txn)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();

        for stripe_id in stripes {
            let stripe = &self.stripes[stripe_id];
            let mut state = stripe.state.lock();
            if state.writer == Some(txn) {
                state.writer = None;
                state.write_count = 0;
            }
            state.readers.remove(&txn);
            drop(state);
            stripe.cond.notify_all();
        }

        self.waits_for.lock().remove(&txn);
        self.victims.lock().remove(&txn);
    }

    /// Stripes a transaction currently holds, for diagnostics.
    pub fn held_stripes(&self, txn: TxnId) -> Vec<usize> {
        self.held
            .lock()
            .get(&txn)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Walk the wait-for graph from `start`. When a cycle through
    /// `start` exists, returns the youngest (largest id) transaction on
    /// it.
    fn detect_cycle(&self, start: TxnId) -> Option<TxnId> {
        let graph = self.waits_for.lock();
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        if Self::dfs(&graph, start, start, &mut path, &mut visited) {
            path.iter().copied().max()
        } else {
            None
        }
    }

    fn dfs(
        graph: &HashMap<TxnId, HashSet<TxnId>>,
        node: TxnId,
        target: TxnId,
        path: &mut Vec<TxnId>,
        visited: &mut HashSet<TxnId>,
    ) -> bool {
        path.push(node);
        if let Some(edges) = graph.get(&node) {
            for &next in edges {
                if next == target {
                    return true;
                }
                if visited.insert(next) && Self::dfs(graph, next, target, path, visited) {
                    return true;
                }
            }
        }
        path.pop();
        false
    }

    fn notify_all_stripes(&self) {
        for stripe in &self.stripes {
            stripe.cond.notify_all();
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_shared_locks_coexist() {
        let mgr = LockManager::new();
        mgr.lock_for_read(TxnId::new(1), "key").unwrap();
        mgr.lock_for_read(TxnId::new(2), "key").unwrap();
        mgr.release_all(TxnId::new(1));
        mgr.release_all(TxnId::new(2));
    }

    #[test]
    fn test_write_lock_reentrant_for_owner() {
        let mgr = LockManager::new();
        let txn = TxnId::new(1);
        mgr.lock_for_write(txn, "key").unwrap();
        mgr.lock_for_write(txn, "key").unwrap();
        mgr.lock_for_read(txn, "key").unwrap();
        mgr.release_all(txn);

        // Another transaction can take it afterwards.
        mgr.lock_for_write(TxnId::new(2), "key").unwrap();
    }

    #[test]
    fn test_writer_blocks_reader_until_release() {
        let mgr = Arc::new(LockManager::new());
        mgr.lock_for_write(TxnId::new(1), "key").unwrap();

        let mgr2 = Arc::clone(&mgr);
        let reader = thread::spawn(move || {
            mgr2.lock_for_read(TxnId::new(2), "key").unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!reader.is_finished());

        mgr.release_all(TxnId::new(1));
        reader.join().unwrap();
    }

    #[test]
    fn test_read_then_upgrade_by_sole_reader() {
        let mgr = LockManager::new();
        let txn = TxnId::new(1);
        mgr.lock_for_read(txn, "key").unwrap();
        mgr.lock_for_write(txn, "key").unwrap();
        mgr.release_all(txn);
    }

    #[test]
    fn test_unlock_releases_single_grant() {
        let mgr = Arc::new(LockManager::new());
        mgr.lock_for_read(TxnId::new(1), "key").unwrap();
        mgr.unlock(TxnId::new(1), "key");

        // Writer proceeds immediately.
        mgr.lock_for_write(TxnId::new(2), "key").unwrap();
        mgr.release_all(TxnId::new(2));
    }

    #[test]
    fn test_deadlock_aborts_youngest() {
        let mgr = Arc::new(LockManager::new());

        // Pick two keys guaranteed to live in distinct stripes.
        let key_a = "alpha".to_string();
        let key_b = (0..)
            .map(|i| format!("bravo{}", i))
            .find(|k| mgr.stripe_of(k) != mgr.stripe_of(&key_a))
            .unwrap();

        let t1 = TxnId::new(1);
        let t2 = TxnId::new(2);
        mgr.lock_for_write(t1, &key_a).unwrap();
        mgr.lock_for_write(t2, &key_b).unwrap();

        // T1 requests b while T2 requests a: a cycle. The loser must
        // release its locks (as rollback would) so the winner proceeds.
        let mgr1 = Arc::clone(&mgr);
        let kb = key_b.clone();
        let h1 = thread::spawn(move || {
            let result = mgr1.lock_for_write(t1, &kb);
            if result.is_err() {
                mgr1.release_all(t1);
            }
            result
        });
        let mgr2 = Arc::clone(&mgr);
        let ka = key_a.clone();
        let h2 = thread::spawn(move || {
            let result = mgr2.lock_for_write(t2, &ka);
            if result.is_err() {
                mgr2.release_all(t2);
            }
            result
        });

        let r1 = h1.join().unwrap();
        let r2 = h2.join().unwrap();

        // Exactly one of the two fails, and it is the youngest (t2).
        assert!(r1.is_ok());
        let err = r2.unwrap_err();
        assert_eq!(err.code, ErrorCode::DeadlockDetected);

        mgr.release_all(t1);
    }

    #[test]
    fn test_stripe_of_is_stable() {
        let mgr = LockManager::new();
        for key in ["a", "b", "users.1", "orders.42"] {
            assert_eq!(mgr.stripe_of(key), mgr.stripe_of(key));
        }
    }
}
