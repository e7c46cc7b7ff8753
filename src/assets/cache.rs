// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::assets::{Asset, AssetId};

/// Entry in a cache table
struct CacheEntry<T> {
    asset: Arc<T>,
    last_touched: Instant,
    /// Selected by a sweep tick; invisible to lookups until erased or restored
    retiring: bool,
}

/// Per-table statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub live: usize,
    pub hits: u64,
    pub misses: u64,
    pub inserted: u64,
    pub reclaimed: u64,
}

/// One typed table: handle -> last-touched timestamp.
///
/// Not synchronized on its own. The manager keeps all four tables behind one
/// mutex; tables are small, so lookups scan linearly.
pub struct CacheTable<T: Asset> {
    entries: Vec<CacheEntry<T>>,
    stats: TableStats,
}

impl<T: Asset> CacheTable<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            stats: TableStats::default(),
        }
    }

    /// Insert a freshly loaded handle
    pub fn insert(&mut self, asset: Arc<T>, now: Instant) {
        debug_assert!(
            self.entries.iter().all(|e| e.asset.id() != asset.id()),
            "duplicate id {}",
            asset.id()
        );
        self.entries.push(CacheEntry {
            asset,
            last_touched: now,
            retiring: false,
        });
        self.stats.inserted += 1;
    }

    /// Look up by id and refresh the timestamp on hit
    pub fn get(&mut self, id: AssetId, now: Instant) -> Option<Arc<T>> {
        let found = self
            .entries
            .iter_mut()
            .find(|e| !e.retiring && e.asset.id() == id);
        match found {
            Some(entry) => {
                entry.last_touched = now;
                self.stats.hits += 1;
                Some(entry.asset.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Select entries idle for longer than `idle` and mark them retiring.
    ///
    /// Busy handles are skipped; they count as touched.
    pub fn collect_expired(&mut self, now: Instant, idle: Duration) -> SmallVec<[Arc<T>; 8]> {
        let mut expired = SmallVec::new();
        for entry in self.entries.iter_mut().filter(|e| !e.retiring) {
            if now.saturating_duration_since(entry.last_touched) <= idle {
                continue;
            }
            if entry.asset.is_busy() {
                entry.last_touched = now;
                continue;
            }
            entry.retiring = true;
            expired.push(entry.asset.clone());
        }
        expired
    }

    /// Drop retiring entries whose teardown completed
    pub fn erase(&mut self, ids: &[AssetId]) {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.retiring && ids.contains(&e.asset.id())));
        self.stats.reclaimed += (before - self.entries.len()) as u64;
    }

    /// Return retiring entries to service, e.g. after a busy reclaim
    pub fn restore(&mut self, ids: &[AssetId], now: Instant) {
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.retiring && ids.contains(&e.asset.id()))
        {
            entry.retiring = false;
            entry.last_touched = now;
        }
    }

    /// Remove every entry, retiring or not
    pub fn drain(&mut self) -> Vec<Arc<T>> {
        self.stats.reclaimed += self.entries.len() as u64;
        self.entries.drain(..).map(|e| e.asset).collect()
    }

    /// Entries visible to lookups
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.retiring)
            .map(|e| &e.asset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> TableStats {
        TableStats {
            live: self.entries.len(),
            ..self.stats
        }
    }

    /// Approximate host memory held by every cached payload
    pub fn memory_usage(&self) -> usize {
        self.entries.iter().map(|e| e.asset.memory_size()).sum()
    }
}

impl<T: Asset> Default for CacheTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetKind, Reclaim, ReclaimContext};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Blob {
        id: AssetId,
        busy: AtomicBool,
    }

    impl Blob {
        fn new(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id: AssetId::new(id),
                busy: AtomicBool::new(false),
            })
        }
    }

    impl Asset for Blob {
        const KIND: AssetKind = AssetKind::Texture;

        fn id(&self) -> AssetId {
            self.id
        }

        fn is_busy(&self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }

        fn reclaim(&self, _ctx: &ReclaimContext<'_>) -> Reclaim {
            Reclaim::Released
        }

        fn memory_size(&self) -> usize {
            8
        }
    }

    #[test]
    fn test_get_hit_and_miss() {
        let now = Instant::now();
        let mut table = CacheTable::new();
        table.insert(Blob::new(1), now);

        assert!(table.get(AssetId::new(1), now).is_some());
        assert!(table.get(AssetId::new(2), now).is_none());
        let stats = table.stats();
        assert_eq!((stats.live, stats.hits, stats.misses), (1, 1, 1));
        assert_eq!(table.memory_usage(), 8);
    }

    #[test]
    fn test_lookup_refreshes_timestamp() {
        let start = Instant::now();
        let idle = Duration::from_secs(1);
        let mut table = CacheTable::new();
        table.insert(Blob::new(1), start);

        table.get(AssetId::new(1), start + Duration::from_millis(900));
        assert!(table
            .collect_expired(start + Duration::from_millis(1500), idle)
            .is_empty());
        assert_eq!(
            table
                .collect_expired(start + Duration::from_millis(2000), idle)
                .len(),
            1
        );
    }

    #[test]
    fn test_retiring_entries_are_invisible() {
        let start = Instant::now();
        let mut table = CacheTable::new();
        table.insert(Blob::new(4), start);

        let later = start + Duration::from_secs(5);
        let expired = table.collect_expired(later, Duration::from_secs(1));
        assert_eq!(expired.len(), 1);
        assert!(table.get(AssetId::new(4), later).is_none());
        assert!(table.collect_expired(later, Duration::ZERO).is_empty());

        table.erase(&[AssetId::new(4)]);
        assert!(table.is_empty());
        assert_eq!(table.stats().reclaimed, 1);
    }

    #[test]
    fn test_busy_entries_are_never_idle() {
        let start = Instant::now();
        let blob = Blob::new(7);
        blob.busy.store(true, Ordering::SeqCst);
        let mut table = CacheTable::new();
        table.insert(blob.clone(), start);

        let later = start + Duration::from_secs(10);
        assert!(table.collect_expired(later, Duration::from_secs(1)).is_empty());

        blob.busy.store(false, Ordering::SeqCst);
        assert!(table
            .collect_expired(later + Duration::from_millis(500), Duration::from_secs(1))
            .is_empty());
    }

    #[test]
    fn test_restore_returns_entry() {
        let start = Instant::now();
        let mut table = CacheTable::new();
        table.insert(Blob::new(2), start);
        let later = start + Duration::from_secs(3);
        table.collect_expired(later, Duration::from_secs(1));

        table.restore(&[AssetId::new(2)], later);
        assert!(table.get(AssetId::new(2), later).is_some());
    }

    #[test]
    fn test_drain_takes_everything() {
        let now = Instant::now();
        let mut table = CacheTable::new();
        table.insert(Blob::new(1), now);
        table.insert(Blob::new(2), now);
        table.collect_expired(now + Duration::from_secs(2), Duration::from_secs(1));

        assert_eq!(table.drain().len(), 2);
        assert!(table.is_empty());
    }
}
