//! Resident page pool
//!
//! Tracks which pages of a paged sequence are held in memory and in what recency
//! order. The pool never drops a page on its own: when it is full the engine asks for
//! the least-recently-used page, saves it if dirty, and only then admits the next one.

use lru::LruCache;

/// Resident pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidentPoolStats {
    /// Page opens served from memory
    pub hits: u64,
    /// Page opens that required a load
    pub misses: u64,
    /// Pages pushed out to make room
    pub evictions: u64,
    /// Pages currently resident
    pub resident: usize,
    /// Maximum resident pages (`usize::MAX` when unbounded)
    pub capacity: usize,
}

impl ResidentPoolStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// LRU-ordered set of resident page numbers
pub struct ResidentPool {
    /// Page numbers (most recently used first)
    order: LruCache<usize, ()>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ResidentPool {
    /// Create a pool holding at most `capacity` pages (minimum 1)
    pub fn new(capacity: usize) -> Self {
        ResidentPool {
            order: LruCache::unbounded(),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Create a pool that never asks for evictions
    pub fn unbounded() -> Self {
        ResidentPool {
            order: LruCache::unbounded(),
            capacity: usize::MAX,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Mark a page as just used. Returns false if the page is not resident.
    pub fn touch(&mut self, page: usize) -> bool {
        if self.order.get(&page).is_some() {
            self.hits += 1;
            true
        } else {
            self.misses += 1;
            false
        }
    }

    /// Admit a page (caller must have made room first)
    pub fn admit(&mut self, page: usize) {
        self.order.put(page, ());
    }

    /// True if admitting another page requires an eviction
    pub fn is_full(&self) -> bool {
        self.order.len() >= self.capacity
    }

    /// Least-recently-used resident page, removed from the pool
    pub fn pop_lru(&mut self) -> Option<usize> {
        let evicted = self.order.pop_lru().map(|(page, _)| page);
        if evicted.is_some() {
            self.evictions += 1;
        }
        evicted
    }

    /// Forget a page without counting it as an eviction
    pub fn remove(&mut self, page: usize) -> bool {
        self.order.pop(&page).is_some()
    }

    pub fn contains(&self, page: usize) -> bool {
        self.order.contains(&page)
    }

    /// Resident page numbers, most recently used first
    pub fn pages(&self) -> Vec<usize> {
        self.order.iter().map(|(page, _)| *page).collect()
    }

    pub fn stats(&self) -> ResidentPoolStats {
        ResidentPoolStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            resident: self.order.len(),
            capacity: self.capacity,
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
