use std::collections::{HashMap, VecDeque};

use crate::common::types::FrameId;

/// Per-frame access record. The history keeps at most the `k` most recent
/// access timestamps, oldest first, so `history.front()` is the k-th most
/// recent access once the frame has been touched `k` times.
#[derive(Debug)]
struct FrameRecord {
    history: VecDeque<u64>,
    evictable: bool,
}

impl FrameRecord {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            evictable: false,
        }
    }
}

/// LRU-K page replacement policy.
///
/// The victim is the evictable frame with the greatest backward k-distance:
/// frames with fewer than `k` recorded accesses count as +infinity and are
/// preferred, tie-broken by their oldest access (classical LRU). Among
/// frames with a full history the one whose k-th most recent access is
/// oldest loses.
pub struct LruKReplacer {
    records: HashMap<FrameId, FrameRecord>,
    current_timestamp: u64,
    evictable_count: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        assert!(k > 0, "history depth k must be positive");
        Self {
            records: HashMap::new(),
            current_timestamp: 0,
            evictable_count: 0,
            k,
        }
    }

    /// Record an access to a frame at the current timestamp. Creates the
    /// frame's record (non-evictable) on first access.
    pub fn record_access(&mut self, frame_id: FrameId) {
        self.current_timestamp += 1;
        let record = self.records.entry(frame_id).or_insert_with(FrameRecord::new);
        record.history.push_back(self.current_timestamp);
        if record.history.len() > self.k {
            record.history.pop_front();
        }
    }

    /// Flip a frame's evictable flag. Idempotent.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(record) = self.records.get_mut(&frame_id) {
            if record.evictable == evictable {
                return;
            }
            record.evictable = evictable;
            if evictable {
                self.evictable_count += 1;
            } else {
                self.evictable_count -= 1;
            }
        }
    }

    /// Select and remove a victim per the LRU-K policy, or `None` when no
    /// frame is evictable.
    pub fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<(FrameId, bool, u64)> = None;

        for (&frame_id, record) in &self.records {
            if !record.evictable {
                continue;
            }
            let infinite = record.history.len() < self.k;
            // With the history capped at k, the front is the oldest overall
            // access for the +inf partition and the k-th most recent access
            // for frames with a full history.
            let rank = *record.history.front().expect("recorded frame has history");
            let better = match victim {
                None => true,
                Some((_, best_inf, best_rank)) => {
                    if infinite != best_inf {
                        infinite
                    } else {
                        rank < best_rank
                    }
                }
            };
            if better {
                victim = Some((frame_id, infinite, rank));
            }
        }

        let (frame_id, _, _) = victim?;
        self.records.remove(&frame_id);
        self.evictable_count -= 1;
        Some(frame_id)
    }

    /// Forcibly drop a frame's record, e.g. when its page is deleted. The
    /// frame must be evictable; removing a pinned frame is a bug.
    pub fn remove(&mut self, frame_id: FrameId) {
        let Some(record) = self.records.get(&frame_id) else {
            return;
        };
        assert!(record.evictable, "removing a non-evictable frame {frame_id}");
        self.records.remove(&frame_id);
        self.evictable_count -= 1;
    }

    /// Number of currently evictable frames.
    pub fn size(&self) -> usize {
        self.evictable_count
    }
}
