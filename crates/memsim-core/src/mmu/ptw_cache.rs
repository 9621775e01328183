//! Small per-level page-table-walker caches: a fully-associative LRU set
//! of recently-walked table entries, one instance per non-leaf level.

use std::collections::VecDeque;

/// Entries per level cache.
const PTWC_CAPACITY: usize = 16;

/// A tiny fully-associative LRU cache over `(level, vpn-prefix)` keys,
/// used to skip already-resolved levels of a page walk.
#[derive(Debug)]
pub struct PtwCache {
    capacity: usize,
    // Most-recently-used at the back.
    entries: VecDeque<u64>,
}

impl PtwCache {
    /// Creates an empty cache with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(PTWC_CAPACITY)
    }

    /// Creates an empty cache with an explicit capacity, for tests.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, entries: VecDeque::with_capacity(capacity) }
    }

    /// Probes for `key`. A hit moves the entry to MRU position; a miss
    /// always inserts `key`, evicting the LRU entry if full.
    pub fn access(&mut self, key: u64) -> bool {
        if let Some(pos) = self.entries.iter().position(|&k| k == key) {
            let _ = self.entries.remove(pos);
            self.entries.push_back(key);
            return true;
        }
        if self.entries.len() >= self.capacity {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(key);
        false
    }
}

impl Default for PtwCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_after_insert_promotes_to_mru() {
        let mut c = PtwCache::with_capacity(2);
        assert!(!c.access(1));
        assert!(!c.access(2));
        assert!(c.access(1));
        // 2 is now LRU; inserting 3 evicts it, not 1.
        assert!(!c.access(3));
        assert!(c.access(1));
        assert!(!c.access(2));
    }
}
