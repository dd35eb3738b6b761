use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result};
use crate::storage::node::{Node, NodeRef};

/// Callback invoked with a dirty node as it leaves the cache. Typically this
/// writes the node back through the disk manager.
pub type FlushFn = Box<dyn Fn(&mut Node) -> Result<()> + Send + Sync>;

struct CacheSlot {
    node: NodeRef,
    /// Logical time of the most recent `get` or `put` touching this entry.
    last_used: u64,
}

/// Capacity-bounded LRU cache of B+Tree nodes keyed by page id.
///
/// Recency follows access order: a successful `get` and any `put` promote the
/// entry to most-recently-used. When a fresh insert would exceed capacity,
/// the least recently touched entry is evicted first, and a dirty evictee is
/// handed to the flush callback before it leaves the cache.
///
/// Hits, misses and evictions are counted for observability; the counters
/// survive `flush_all`.
pub struct NodeCache {
    /// Maximum number of entries the cache may hold.
    capacity: usize,
    slots: Mutex<HashMap<PageId, CacheSlot>>,
    /// Monotonically increasing logical clock backing the recency stamps.
    clock: AtomicU64,
    on_evict: FlushFn,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl NodeCache {
    /// Creates a cache holding at most `capacity` nodes (at least 1).
    pub fn new(capacity: usize, on_evict: FlushFn) -> Self {
        assert!(capacity >= 1, "cache capacity must be at least 1");

        Self {
            capacity,
            slots: Mutex::new(HashMap::with_capacity(capacity)),
            clock: AtomicU64::new(0),
            on_evict,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Looks up a node by page id, promoting it to most-recently-used and
    /// recording a hit; absent entries record a miss.
    pub fn get(&self, page_id: PageId) -> Option<NodeRef> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&page_id) {
            Some(slot) => {
                slot.last_used = self.clock.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(NodeRef::clone(&slot.node))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or refreshes an entry, evicting the least-recently-used entry
    /// first when a fresh insert finds the cache full. A dirty evictee is
    /// flushed; a flush failure surfaces here and leaves the cache without
    /// the victim.
    pub fn put(&self, page_id: PageId, node: NodeRef) -> Result<()> {
        let mut slots = self.slots.lock();

        if slots.len() >= self.capacity && !slots.contains_key(&page_id) {
            let victim_id = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(id, _)| *id);

            if let Some(victim_id) = victim_id {
                if let Some(victim) = slots.remove(&victim_id) {
                    self.evictions.fetch_add(1, Ordering::Relaxed);

                    let mut evicted = victim.node.lock();
                    if evicted.is_dirty() {
                        (self.on_evict)(&mut evicted)?;
                    }
                }
            }
        }

        let last_used = self.clock.fetch_add(1, Ordering::Relaxed);
        slots.insert(page_id, CacheSlot { node, last_used });
        Ok(())
    }

    /// Flushes every dirty resident node through the callback, then drops all
    /// entries. Counters are preserved.
    pub fn flush_all(&self) -> Result<()> {
        let mut slots = self.slots.lock();

        for slot in slots.values() {
            let mut node = slot.node.lock();
            if node.is_dirty() {
                (self.on_evict)(&mut node)?;
            }
        }
        slots.clear();
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of nodes currently resident.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Fraction of lookups served from memory, or 0.0 before any access.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    const ORDER: usize = 4;

    fn leaf(id: u64) -> NodeRef {
        Arc::new(Mutex::new(Node::new_leaf(PageId::new(id), ORDER)))
    }

    fn dirty_leaf(id: u64) -> NodeRef {
        let node = leaf(id);
        node.lock().mark_dirty();
        node
    }

    fn no_flush() -> FlushFn {
        Box::new(|_| Ok(()))
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let cache = NodeCache::new(2, no_flush());
        cache.put(PageId::new(1), leaf(1)).unwrap();

        assert!(cache.get(PageId::new(1)).is_some());
        assert!(cache.get(PageId::new(2)).is_none());

        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hit_rate(), 0.5);
    }

    #[test]
    fn test_hit_rate_zero_without_accesses() {
        let cache = NodeCache::new(2, no_flush());
        assert_eq!(cache.hit_rate(), 0.0);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = NodeCache::new(2, no_flush());
        cache.put(PageId::new(1), leaf(1)).unwrap();
        cache.put(PageId::new(2), leaf(2)).unwrap();

        // Touch page 1 so page 2 becomes the LRU victim.
        assert!(cache.get(PageId::new(1)).is_some());
        cache.put(PageId::new(3), leaf(3)).unwrap();

        assert_eq!(cache.evictions(), 1);
        assert!(cache.get(PageId::new(1)).is_some());
        assert!(cache.get(PageId::new(2)).is_none());
        assert!(cache.get(PageId::new(3)).is_some());
    }

    #[test]
    fn test_put_existing_key_never_evicts() {
        let cache = NodeCache::new(2, no_flush());
        cache.put(PageId::new(1), leaf(1)).unwrap();
        cache.put(PageId::new(2), leaf(2)).unwrap();

        cache.put(PageId::new(1), leaf(1)).unwrap();

        assert_eq!(cache.evictions(), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_eviction_flushes_only_dirty_nodes() {
        let flushed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&flushed);
        let cache = NodeCache::new(1, Box::new(move |node| {
            counter.fetch_add(1, Ordering::SeqCst);
            node.clear_dirty();
            Ok(())
        }));

        cache.put(PageId::new(1), leaf(1)).unwrap();
        cache.put(PageId::new(2), dirty_leaf(2)).unwrap();
        assert_eq!(flushed.load(Ordering::SeqCst), 0); // clean victim, no flush

        cache.put(PageId::new(3), leaf(3)).unwrap();
        assert_eq!(flushed.load(Ordering::SeqCst), 1); // dirty victim flushed
        assert_eq!(cache.evictions(), 2);
    }

    #[test]
    fn test_flush_all_clears_entries_and_keeps_counters() {
        let flushed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&flushed);
        let cache = NodeCache::new(4, Box::new(move |node| {
            counter.fetch_add(1, Ordering::SeqCst);
            node.clear_dirty();
            Ok(())
        }));

        cache.put(PageId::new(1), dirty_leaf(1)).unwrap();
        cache.put(PageId::new(2), leaf(2)).unwrap();
        cache.put(PageId::new(3), dirty_leaf(3)).unwrap();
        assert!(cache.get(PageId::new(1)).is_some());
        assert!(cache.get(PageId::new(9)).is_none());

        cache.flush_all().unwrap();

        assert_eq!(flushed.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert!(cache.get(PageId::new(1)).is_none());
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_capacity_one_alternating_loads_always_miss() {
        let cache = NodeCache::new(1, no_flush());

        for round in 0..3 {
            for id in [1u64, 2u64] {
                if cache.get(PageId::new(id)).is_none() {
                    cache.put(PageId::new(id), leaf(id)).unwrap();
                }
            }
            assert_eq!(cache.misses(), (round + 1) * 2);
        }
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.evictions(), 5);
    }
}
