//! Bounded cache for rendered display strings.
//!
//! Secondary cache only: every entry is reconstructible from a cell's
//! cached value, so eviction never loses authoritative data. Raw input and
//! dirty state never enter this cache. It carries its own lock so readers
//! can populate and evict it concurrently with other reads.

use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashMap;

use crate::cell_id::CellId;

/// LRU cache of `CellId -> display string`.
///
/// Recency is tracked with a monotonic tick per entry; eviction drops the
/// oldest quarter in one sweep when full. Capacities are small (thousands),
/// so the sweep stays cheap and keeps the hot path to a single map probe.
#[derive(Debug)]
pub struct DisplayCache {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: FxHashMap<CellId, (u64, String)>,
    tick: u64,
    capacity: usize,
}

impl DisplayCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: FxHashMap::default(),
                tick: 0,
                capacity: capacity.max(1),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a cached rendering, refreshing its recency.
    pub fn get(&self, id: CellId) -> Option<String> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.get_mut(&id).map(|slot| {
            slot.0 = tick;
            slot.1.clone()
        })
    }

    /// Insert a rendering, evicting the least recently used entries when
    /// over capacity.
    pub fn insert(&self, id: CellId, text: String) {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(id, (tick, text));

        if inner.entries.len() > inner.capacity {
            // Drop the stalest quarter so eviction is not per-insert.
            let mut ticks: Vec<u64> = inner.entries.values().map(|(t, _)| *t).collect();
            ticks.sort_unstable();
            let cutoff = ticks[ticks.len() / 4];
            inner.entries.retain(|_, (t, _)| *t > cutoff);
        }
    }

    /// Drop one entry (the cell's value changed).
    pub fn invalidate(&self, id: CellId) {
        self.lock().entries.remove(&id);
    }

    /// Drop entries for every changed cell in a batch.
    pub fn invalidate_many<'a>(&self, ids: impl IntoIterator<Item = &'a CellId>) {
        let mut inner = self.lock();
        for id in ids {
            inner.entries.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::SheetId;

    fn id(row: usize) -> CellId {
        CellId::new(SheetId::from_raw(1), row, 0)
    }

    #[test]
    fn test_get_after_insert() {
        let cache = DisplayCache::new(16);
        cache.insert(id(0), "42".to_string());
        assert_eq!(cache.get(id(0)), Some("42".to_string()));
        assert_eq!(cache.get(id(1)), None);
    }

    #[test]
    fn test_invalidate() {
        let cache = DisplayCache::new(16);
        cache.insert(id(0), "42".to_string());
        cache.invalidate(id(0));
        assert_eq!(cache.get(id(0)), None);
    }

    #[test]
    fn test_eviction_stays_bounded() {
        let cache = DisplayCache::new(16);
        for row in 0..200 {
            cache.insert(id(row), row.to_string());
        }
        assert!(cache.len() <= 16);
    }

    #[test]
    fn test_eviction_prefers_stale_entries() {
        let cache = DisplayCache::new(8);
        for row in 0..8 {
            cache.insert(id(row), row.to_string());
        }
        // Touch the first entry so it is the most recent.
        assert!(cache.get(id(0)).is_some());
        // Overflow triggers a sweep of the stalest quarter.
        cache.insert(id(100), "x".to_string());
        assert_eq!(cache.get(id(0)), Some("0".to_string()));
    }

    #[test]
    fn test_invalidate_many() {
        let cache = DisplayCache::new(16);
        for row in 0..4 {
            cache.insert(id(row), row.to_string());
        }
        let changed = [id(1), id(2)];
        cache.invalidate_many(changed.iter());
        assert_eq!(cache.get(id(0)), Some("0".to_string()));
        assert_eq!(cache.get(id(1)), None);
        assert_eq!(cache.get(id(2)), None);
    }
}
