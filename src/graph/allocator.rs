//! Identity and sequence allocation.
//!
//! `IdAllocator` hands out ids, draining an optional seed pool (used when a
//! graph is restored from a dump) before generating fresh UUIDs.
//! `SequenceAllocator` records the creation-order number of every id ever seen
//! by the graph; records survive destruction so numbers are never reused.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::constants::MAX_SEQUENCE;
use crate::types::{AssocId, GraphError};

/// Issues association ids
#[derive(Debug, Default)]
pub struct IdAllocator {
    seeds: VecDeque<AssocId>,
    seeded: HashSet<AssocId>,
}

impl IdAllocator {
    /// Allocator drawing from `seeds` in order before generating fresh ids
    pub fn with_seeds(seeds: impl IntoIterator<Item = AssocId>) -> Self {
        let mut seen = HashSet::new();
        let seeds: VecDeque<AssocId> = seeds
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let seeded = seeds.iter().cloned().collect();
        Self { seeds, seeded }
    }

    /// Next id: first remaining seed, else a fresh UUID
    pub fn next_id(&mut self) -> AssocId {
        while let Some(id) = self.seeds.pop_front() {
            if self.seeded.remove(&id) {
                return id;
            }
        }
        AssocId::generate()
    }

    /// Remove `id` from the seed pool if present.
    ///
    /// Called when an id is materialized explicitly (system ids, synced links)
    /// so the pool never hands it out a second time.
    pub fn claim(&mut self, id: &AssocId) -> bool {
        // The deque entry is skipped lazily by `next_id`.
        self.seeded.remove(id)
    }

    /// Number of seeds not yet handed out
    pub fn remaining_seeds(&self) -> usize {
        self.seeded.len()
    }
}

/// Records creation-order numbers (`_i`)
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    recorded: HashMap<AssocId, u64>,
    max: Option<u64>,
}

impl SequenceAllocator {
    /// Empty allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a sequence number to `id`.
    ///
    /// Without `explicit`, an already recorded number is returned unchanged and a
    /// new id gets `max(seen) + 1`. With `explicit`, the number is recorded; a
    /// disagreement with an earlier record or a number above [`MAX_SEQUENCE`]
    /// is a hard error.
    pub fn assign(&mut self, id: &AssocId, explicit: Option<u64>) -> Result<u64, GraphError> {
        if let Some(received) = explicit.filter(|&n| n > MAX_SEQUENCE) {
            return Err(GraphError::SequenceOutOfRange { id: id.clone(), received });
        }
        if let Some(&recorded) = self.recorded.get(id) {
            return match explicit {
                Some(received) if received != recorded => Err(GraphError::SequenceMismatch {
                    id: id.clone(),
                    recorded,
                    received,
                }),
                _ => Ok(recorded),
            };
        }

        let number = explicit.unwrap_or_else(|| self.next_free());
        self.record(id, number);
        Ok(number)
    }

    /// Number for `id` without an explicit request: the recorded one, else the next free
    pub fn allocate(&mut self, id: &AssocId) -> u64 {
        if let Some(&recorded) = self.recorded.get(id) {
            return recorded;
        }
        let number = self.next_free();
        self.record(id, number);
        number
    }

    fn next_free(&self) -> u64 {
        // Explicit numbers stop at MAX_SEQUENCE, far below u64::MAX.
        self.max.map_or(0, |m| m.saturating_add(1))
    }

    fn record(&mut self, id: &AssocId, number: u64) {
        self.max = Some(self.max.map_or(number, |m| m.max(number)));
        self.recorded.insert(id.clone(), number);
    }

    /// Recorded number for `id`
    pub fn get(&self, id: &AssocId) -> Option<u64> {
        self.recorded.get(id).copied()
    }

    /// Highest number seen so far
    pub fn max(&self) -> Option<u64> {
        self.max
    }
}
