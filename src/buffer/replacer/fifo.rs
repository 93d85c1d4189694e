//! FIFO (First-In-First-Out) page replacement policy.
//!
//! Frames are evicted in the order they were first brought into the
//! shard. Re-accessing a frame does NOT move it to the back.

use std::collections::{HashSet, VecDeque};

use crate::common::FrameId;

use super::Replacer;

pub struct FifoReplacer {
    /// Queue of frame IDs in first-access order (front = oldest).
    queue: VecDeque<FrameId>,
    /// Frames currently in the queue, for O(1) membership checks.
    in_queue: HashSet<FrameId>,
    /// Frames that are evictable (pin_count == 0).
    evictable: HashSet<FrameId>,
}

impl FifoReplacer {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            in_queue: HashSet::new(),
            evictable: HashSet::new(),
        }
    }

    /// Remove only the chosen frame; non-evictable frames keep their
    /// queue position for later.
    fn take(&mut self, position: usize) -> Option<FrameId> {
        let frame_id = self.queue.remove(position)?;
        self.in_queue.remove(&frame_id);
        self.evictable.remove(&frame_id);
        Some(frame_id)
    }
}

impl Replacer for FifoReplacer {
    fn record_access(&mut self, frame_id: FrameId) {
        if !self.in_queue.contains(&frame_id) {
            self.queue.push_back(frame_id);
            self.in_queue.insert(frame_id);
        }
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

impl Default for FifoReplacer {
    fn default() -> Self {
        Self::new()
    }
}
