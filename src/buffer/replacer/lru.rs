//! LRU (Least-Recently-Used) page replacement policy.

use std::collections::{HashSet, VecDeque};

use crate::common::FrameId;

use super::Replacer;

/// LRU replacement: every access moves the frame to the back of the
/// queue; eviction takes the least recently used evictable frame.
pub struct LruReplacer {
    /// Frames in recency order (front = least recently used).
    queue: VecDeque<FrameId>,
    in_queue: HashSet<FrameId>,
    evictable: HashSet<FrameId>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            in_queue: HashSet::new(),
            evictable: HashSet::new(),
        }
    }

    fn take(&mut self, position: usize) -> Option<FrameId> {
        let frame_id = self.queue.remove(position)?;
        self.in_queue.remove(&frame_id);
        self.evictable.remove(&frame_id);
        Some(frame_id)
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, frame_id: FrameId) {
        if self.in_queue.contains(&frame_id) {
            self.queue.retain(|&fid| fid != frame_id);
        } else {
            self.in_queue.insert(frame_id);
        }
        self.queue.push_back(frame_id);
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if evictable {
            self.evictable.insert(frame_id);
        } else {
            self.evictable.remove(&frame_id);
        }
    }

    fn evict(&mut self) -> Option<FrameId> {
        let position = self
            .queue
            .iter()
            .position(|fid| self.evictable.contains(fid))?;
        self.take(position)
    }

    fn evict_preferring(&mut self, prefer: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        if let Some(position) = self
            .queue
            .iter()
            .position(|fid| self.evictable.contains(fid) && prefer(*fid))
        {
            return self.take(position);
        }
        self.evict()
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.evictable.remove(&frame_id);
        if self.in_queue.remove(&frame_id) {
            self.queue.retain(|&fid| fid != frame_id);
        }
    }

    fn len(&self) -> usize {
        self.evictable.len()
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_reaccess_reorders() {
        let mut replacer = LruReplacer::new();
        for i in 0..3 {
            replacer.record_access(FrameId::new(i));
            replacer.set_evictable(FrameId::new(i), true);
        }

        // Re-access frame 0: it becomes most recently used.
        replacer.record_access(FrameId::new(0));

        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(2)));
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_skips_pinned() {
        let mut replacer = LruReplacer::new();
        replacer.record_access(FrameId::new(0));
        replacer.record_access(FrameId::new(1));
        replacer.set_evictable(FrameId::new(1), true);

        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_evict_preferring_clean() {
        let mut replacer = LruReplacer::new();
        for i in 0..3 {
            replacer.record_access(FrameId::new(i));
            replacer.set_evictable(FrameId::new(i), true);
        }

        // Frames 0 and 1 "dirty": prefer the clean one even though it
        // is the most recently used.
        let clean = FrameId::new(2);
        assert_eq!(replacer.evict_preferring(&|fid| fid == clean), Some(clean));
    }

    #[test]
    fn test_lru_remove() {
        let mut replacer = LruReplacer::new();
        replacer.record_access(FrameId::new(0));
        replacer.set_evictable(FrameId::new(0), true);
        replacer.remove(FrameId::new(0));
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.len(), 0);
    }
}
