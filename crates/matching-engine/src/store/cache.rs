//! Short-lived book snapshot cache
//!
//! Snapshots are keyed by `(pair, depth)` and live for a sub-second TTL.
//! Any mutation of a pair bumps its generation and drops its entries; a
//! snapshot computed before the bump is never stored afterwards.

use common::Pair;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::domain::BookSnapshot;

struct Entry {
    stored_at: Instant,
    snapshot: BookSnapshot,
}

/// Per-pair snapshot cache with mutation invalidation
pub struct SnapshotCache {
    ttl: Duration,
    entries: DashMap<(Pair, usize), Entry>,
    generations: DashMap<Pair, u64>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            generations: DashMap::new(),
        }
    }

    /// Current generation of a pair; pass it back to [`SnapshotCache::put`]
    pub fn generation(&self, pair: &Pair) -> u64 {
        self.generations.get(pair).map(|g| *g).unwrap_or(0)
    }

    /// Fresh cached snapshot, if any
    pub fn get(&self, pair: &Pair, depth: usize) -> Option<BookSnapshot> {
        if self.ttl.is_zero() {
            return None;
        }
        let key = (pair.clone(), depth);
        let entry = self.entries.get(&key)?;
        if entry.stored_at.elapsed() < self.ttl {
            metrics::counter!("book_snapshot_cache_hits_total").increment(1);
            Some(entry.snapshot.clone())
        } else {
            drop(entry);
            self.entries.remove(&key);
            None
        }
    }

    /// Store a snapshot computed at `generation`
    pub fn put(&self, depth: usize, generation: u64, snapshot: &BookSnapshot) {
        if self.ttl.is_zero() {
            return;
        }
        // hold the generation entry so an invalidation cannot interleave
        let current = self.generations.entry(snapshot.pair.clone()).or_insert(0);
        if *current != generation {
            return;
        }
        self.entries.insert(
            (snapshot.pair.clone(), depth),
            Entry {
                stored_at: Instant::now(),
                snapshot: snapshot.clone(),
            },
        );
        drop(current);
    }

    /// Drop every entry of a pair
    pub fn invalidate(&self, pair: &Pair) {
        *self.generations.entry(pair.clone()).or_insert(0) += 1;
        self.entries.retain(|(p, _), _| p != pair);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> Pair {
        "BTC-USDT".parse().unwrap()
    }

    #[test]
    fn test_put_get_and_invalidate() {
        let cache = SnapshotCache::new(Duration::from_secs(5));
        let snapshot = BookSnapshot::empty(pair());

        let gen = cache.generation(&pair());
        cache.put(10, gen, &snapshot);
        assert!(cache.get(&pair(), 10).is_some());
        assert!(cache.get(&pair(), 20).is_none());

        cache.invalidate(&pair());
        assert!(cache.get(&pair(), 10).is_none());
    }

    #[test]
    fn test_stale_generation_is_not_stored() {
        let cache = SnapshotCache::new(Duration::from_secs(5));
        let gen = cache.generation(&pair());
        cache.invalidate(&pair());
        cache.put(10, gen, &BookSnapshot::empty(pair()));
        assert!(cache.get(&pair(), 10).is_none());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = SnapshotCache::new(Duration::from_millis(1));
        cache.put(5, 0, &BookSnapshot::empty(pair()));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&pair(), 5).is_none());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = SnapshotCache::new(Duration::ZERO);
        cache.put(5, 0, &BookSnapshot::empty(pair()));
        assert!(cache.get(&pair(), 5).is_none());
    }
}
