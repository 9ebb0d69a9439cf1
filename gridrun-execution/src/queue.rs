//! Three-tier priority queue, FIFO within a tier

use gridrun_core::Priority;
use std::collections::VecDeque;

/// Pending items ordered by priority, then by arrival
#[derive(Debug)]
pub struct PriorityQueue<T> {
    // Indexed by `tier_index`: high, normal, low
    tiers: [VecDeque<T>; 3],
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            tiers: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }
}

fn tier_index(priority: Priority) -> usize {
    2 - priority.as_u8() as usize
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the back of a tier
    pub fn push(&mut self, priority: Priority, item: T) {
        self.tiers[tier_index(priority)].push_back(item);
    }

    /// Put an item back at the front of its tier
    pub fn push_front(&mut self, priority: Priority, item: T) {
        self.tiers[tier_index(priority)].push_front(item);
    }

    /// Oldest item of the highest non-empty tier
    pub fn pop(&mut self) -> Option<T> {
        self.tiers.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Withdraw the first item matching `predicate`
    pub fn remove_first<F>(&mut self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        for tier in self.tiers.iter_mut() {
            if let Some(pos) = tier.iter().position(&mut predicate) {
                return tier.remove(pos);
            }
        }
        None
    }

    /// Take everything, highest priority first
    pub fn drain(&mut self) -> Vec<T> {
        self.tiers.iter_mut().flat_map(|tier| tier.drain(..)).collect()
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }
}
