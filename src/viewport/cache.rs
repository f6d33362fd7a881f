//! Byte-budgeted LRU tile cache for rendered pages

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::Sender;
use log::{debug, warn};
use lru::LruCache;

use super::lifecycle::LifecycleGuard;
use super::request::EngineEvent;
use super::shared::ViewTarget;
use super::types::{Bitmap, Tile, TileKey, ZoomBucket};

/// Minimum number of tiles that must fit in the budget at any zoom
pub const MIN_RESIDENT_TILES: usize = 6;

/// Called for entries pushed out by the byte budget (never for explicit removals)
pub trait EvictionPolicy: Send {
    fn on_evict(&mut self, key: TileKey, now: Instant);

    /// Forget per-page history, e.g. after a generation bump
    fn reset(&mut self) {}
}

/// Eviction hook that does nothing
pub struct NoopEviction;

impl EvictionPolicy for NoopEviction {
    fn on_evict(&mut self, _key: TileKey, _now: Instant) {}
}

/// Re-renders visible pages whose tile was evicted, at most once per page per
/// `throttle` and at most `limit` times per page between resets.
pub struct RerenderOnEvict {
    guard: Arc<LifecycleGuard>,
    target: Arc<ViewTarget>,
    events: Sender<EngineEvent>,
    throttle: Duration,
    limit: u32,
    last_triggered: HashMap<usize, Instant>,
    trigger_counts: HashMap<usize, u32>,
}

impl RerenderOnEvict {
    pub fn new(
        guard: Arc<LifecycleGuard>,
        target: Arc<ViewTarget>,
        events: Sender<EngineEvent>,
        throttle: Duration,
        limit: u32,
    ) -> Self {
        Self {
            guard,
            target,
            events,
            throttle,
            limit,
            last_triggered: HashMap::new(),
            trigger_counts: HashMap::new(),
        }
    }
}

impl EvictionPolicy for RerenderOnEvict {
    fn on_evict(&mut self, key: TileKey, now: Instant) {
        if self.guard.is_destroyed() {
            return;
        }
        let Some(target) = self.target.snapshot() else {
            return;
        };
        let Some(visible) = target.visible else {
            return;
        };
        if !visible.contains(key.page) {
            return;
        }

        if let Some(last) = self.last_triggered.get(&key.page) {
            if now.saturating_duration_since(*last) < self.throttle {
                debug!("Eviction re-render of page {} throttled", key.page);
                return;
            }
        }

        let count = self.trigger_counts.entry(key.page).or_insert(0);
        if *count >= self.limit {
            debug!(
                "Page {} hit the eviction re-render limit ({}); waiting for next invalidation",
                key.page, self.limit
            );
            return;
        }
        *count += 1;

        self.last_triggered.insert(key.page, now);
        let _ = self.events.send(EngineEvent::Rerender { page: key.page });
    }

    fn reset(&mut self) {
        self.trigger_counts.clear();
    }
}

/// Cache statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub tile_count: usize,
    pub bytes_used: usize,
    pub budget: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// LRU cache of rendered tiles bounded by summed byte size
pub struct TileCache {
    entries: LruCache<TileKey, Tile>,
    /// page → key of the last tile stored for it
    by_page: HashMap<usize, TileKey>,
    /// Keys whose tile was too large to hold; not rendered again until reset
    refused: HashSet<TileKey>,
    bytes_used: usize,
    budget: usize,
    policy: Box<dyn EvictionPolicy>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl TileCache {
    /// Create a cache holding at most `budget` bytes of tiles
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self::with_policy(budget, Box::new(NoopEviction))
    }

    #[must_use]
    pub fn with_policy(budget: usize, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: LruCache::unbounded(),
            by_page: HashMap::new(),
            refused: HashSet::new(),
            bytes_used: 0,
            budget: budget.max(MIN_RESIDENT_TILES * Bitmap::BYTES_PER_PIXEL),
            policy,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    #[must_use]
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Largest tile the cache will hold
    #[must_use]
    pub fn max_tile_bytes(&self) -> usize {
        self.budget / MIN_RESIDENT_TILES
    }

    /// Largest pixels-per-unit scale at which a `width × height` page still
    /// fits in [`TileCache::max_tile_bytes`]
    #[must_use]
    pub fn max_render_scale(&self, width: f32, height: f32) -> f32 {
        let area_bytes = width * height * Bitmap::BYTES_PER_PIXEL as f32;
        if !(area_bytes.is_finite() && area_bytes > 0.0) {
            return f32::MAX;
        }
        (self.max_tile_bytes() as f32 / area_bytes).sqrt()
    }

    /// Get a tile, promoting it in the LRU order
    pub fn get(&mut self, key: &TileKey) -> Option<&Tile> {
        self.entries.get(key)
    }

    /// Check if a key is in the cache without promoting it
    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.entries.contains(key)
    }

    /// True if a tile for `key` was refused since the last reset
    #[must_use]
    pub fn is_refused(&self, key: &TileKey) -> bool {
        self.refused.contains(key)
    }

    /// Insert a tile, evicting least recently used tiles until within budget.
    /// Returns false if the tile exceeds [`TileCache::max_tile_bytes`] and was
    /// dropped instead.
    pub fn put(&mut self, key: TileKey, tile: Tile) -> bool {
        let size = tile.byte_size();
        if size > self.max_tile_bytes() {
            warn!(
                "Refusing {size} byte tile for page {} (limit {})",
                key.page,
                self.max_tile_bytes()
            );
            self.refused.insert(key);
            return false;
        }

        if let Some(old) = self.entries.put(key, tile) {
            self.bytes_used -= old.byte_size();
        }
        self.bytes_used += size;
        self.by_page.insert(key.page, key);
        self.refused.remove(&key);
        self.evict_to_fit();
        true
    }

    fn evict_to_fit(&mut self) {
        let now = Instant::now();
        while self.bytes_used > self.budget {
            let Some((key, tile)) = self.entries.pop_lru() else {
                break;
            };
            self.forget(key, tile.byte_size());
            self.evictions += 1;
            self.policy.on_evict(key, now);
        }
    }

    fn forget(&mut self, key: TileKey, size: usize) {
        self.bytes_used -= size;
        if self.by_page.get(&key.page) == Some(&key) {
            self.by_page.remove(&key.page);
        }
    }

    /// Remove a tile without notifying the eviction policy
    pub fn remove(&mut self, key: &TileKey) -> Option<Tile> {
        let tile = self.entries.pop(key)?;
        self.forget(*key, tile.byte_size());
        Some(tile)
    }

    /// Keys and sizes of all entries, most recently used first
    #[must_use]
    pub fn snapshot(&self) -> Vec<(TileKey, usize)> {
        self.entries
            .iter()
            .map(|(key, tile)| (*key, tile.byte_size()))
            .collect()
    }

    /// Best tile to draw for `page` at `zoom`: the exact bucket, else the last
    /// tile stored for the page, else whichever cached bucket is closest.
    pub fn best_tile(&mut self, page: usize, zoom: f32) -> Option<&Tile> {
        let exact = TileKey::new(page, zoom);
        let key = if self.entries.contains(&exact) {
            Some(exact)
        } else {
            match self.by_page.get(&page) {
                Some(indexed) if self.entries.contains(indexed) => Some(*indexed),
                _ => self.closest_cached(page, exact.bucket),
            }
        };

        match key {
            Some(key) => {
                self.hits += 1;
                self.entries.get(&key)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn closest_cached(&self, page: usize, bucket: ZoomBucket) -> Option<TileKey> {
        self.snapshot()
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| key.page == page)
            .min_by_key(|key| key.bucket.distance(bucket))
    }

    /// Drop tiles more than `radius` pages away from `page`. Used to make room
    /// after an allocation failure without flushing what is on screen.
    pub fn evict_far_from(&mut self, page: usize, radius: usize) -> usize {
        let far: Vec<TileKey> = self
            .entries
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| key.page.abs_diff(page) > radius)
            .collect();

        for key in &far {
            self.remove(key);
        }
        far.len()
    }

    /// Clear all cached tiles without notifying the eviction policy
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_page.clear();
        self.refused.clear();
        self.bytes_used = 0;
    }

    /// Start a new generation: eviction history and refusals are forgotten
    pub fn reset_policy(&mut self) {
        self.policy.reset();
        self.refused.clear();
    }

    /// Number of cached tiles
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tile_count: self.entries.len(),
            bytes_used: self.bytes_used,
            budget: self.budget,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}
