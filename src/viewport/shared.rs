//! State shared between the interaction thread and pool workers
//!
//! Lock order: `cache` before `pending`. The target lock is only ever taken
//! on its own or inside `cache` (from the eviction hook).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use flume::Sender;
use log::{debug, warn};

use super::cache::TileCache;
use super::lifecycle::LifecycleGuard;
use super::metrics::DocumentMetrics;
use super::rasterizer::DocumentSlot;
use super::request::{EngineEvent, Generation, RenderJob};
use super::types::{PageRange, Tile, TileKey};

/// What eviction hooks and completing jobs may know about the live view
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetState {
    pub visible: Option<PageRange>,
    pub zoom: f32,
}

/// Reference to the drawable. Detached first thing during teardown.
#[derive(Debug, Default)]
pub struct ViewTarget {
    inner: RwLock<Option<TargetState>>,
}

impl ViewTarget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, state: TargetState) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    /// Record the latest visible range; ignored once detached
    pub fn update(&self, state: TargetState) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.is_some() {
            *inner = Some(state);
        }
    }

    pub fn detach(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn snapshot(&self) -> Option<TargetState> {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_attached(&self) -> bool {
        self.snapshot().is_some()
    }
}

/// Result of handing a finished raster back
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    Applied,
    Stale,
    /// Current, but too large for the cache
    Refused,
}

pub struct Shared {
    pub guard: Arc<LifecycleGuard>,
    pub generation: Generation,
    pub document: DocumentSlot,
    pub target: Arc<ViewTarget>,
    metrics: RwLock<DocumentMetrics>,
    cache: Mutex<TileCache>,
    pending: Mutex<HashMap<TileKey, u64>>,
    rejected_jobs: AtomicUsize,
    events: Sender<EngineEvent>,
}

impl Shared {
    pub fn new(
        guard: Arc<LifecycleGuard>,
        target: Arc<ViewTarget>,
        document: DocumentSlot,
        cache: TileCache,
        events: Sender<EngineEvent>,
    ) -> Self {
        let metrics = DocumentMetrics::new(document.page_count());
        Self {
            guard,
            generation: Generation::new(),
            document,
            target,
            metrics: RwLock::new(metrics),
            cache: Mutex::new(cache),
            pending: Mutex::new(HashMap::new()),
            rejected_jobs: AtomicUsize::new(0),
            events,
        }
    }

    pub fn metrics(&self) -> RwLockReadGuard<'_, DocumentMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn metrics_mut(&self) -> RwLockWriteGuard<'_, DocumentMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache(&self) -> MutexGuard<'_, TileCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<TileKey, u64>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send to the interaction thread. A closed channel means nobody is
    /// listening any more, which only happens during shutdown.
    pub fn publish(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!("Dropping {event:?}: engine no longer listening");
        }
    }

    /// Record work the pool refused. Refusals once teardown has started are
    /// expected and not counted.
    pub fn note_rejected(&self, what: &str) {
        if self.guard.is_destroyed() {
            debug!("{what} not queued: shutting down");
            return;
        }
        self.rejected_jobs.fetch_add(1, Ordering::Relaxed);
        warn!("{what} rejected by a live pool");
    }

    /// Jobs the pool refused while the engine was still active
    pub fn rejected_jobs(&self) -> usize {
        self.rejected_jobs.load(Ordering::Relaxed)
    }

    /// Bump the generation and forget every pending job. Holding the cache
    /// lock keeps this atomic with respect to [`Shared::complete_render`].
    pub fn invalidate(&self) -> u64 {
        let mut cache = self.cache();
        let generation = self.generation.advance();
        self.pending().clear();
        cache.reset_policy();
        generation
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, key: &TileKey) -> bool {
        self.pending().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Reserve `key` for rendering under the current generation.
    /// Returns the generation, or `None` if the key is already pending.
    pub fn try_reserve(&self, key: TileKey) -> Option<u64> {
        let mut pending = self.pending();
        if pending.contains_key(&key) {
            return None;
        }
        let generation = self.generation.current();
        pending.insert(key, generation);
        Some(generation)
    }

    /// Drop a pending reservation, but only the one this job made
    pub fn finish_pending(&self, key: TileKey, generation: u64) {
        let mut pending = self.pending();
        if pending.get(&key) == Some(&generation) {
            pending.remove(&key);
        }
    }

    /// Insert a finished raster unless its generation has been superseded
    pub fn complete_render(&self, job: &RenderJob, tile: Tile) -> Completion {
        let completion = {
            let mut cache = self.cache();
            if self.generation.current() != job.generation {
                drop(tile);
                Completion::Stale
            } else if cache.put(job.key, tile) {
                Completion::Applied
            } else {
                Completion::Refused
            }
        };
        self.finish_pending(job.key, job.generation);

        if completion == Completion::Applied && self.target.is_attached() {
            self.publish(EngineEvent::Repaint);
        }
        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::types::Bitmap;

    fn test_shared() -> Shared {
        let (tx, _rx) = flume::unbounded();
        Shared::new(
            Arc::new(LifecycleGuard::new()),
            Arc::new(ViewTarget::new()),
            DocumentSlot::empty(),
            TileCache::new(1 << 20),
            tx,
        )
    }

    fn tile(page: usize) -> Tile {
        Tile {
            bitmap: Bitmap::try_alloc(4, 4).expect("alloc"),
            page,
            scale: 1.0,
        }
    }

    #[test]
    fn reserve_dedupes_pending_keys() {
        let shared = test_shared();
        let key = TileKey::new(3, 1.0);

        assert_eq!(shared.try_reserve(key), Some(0));
        assert_eq!(shared.try_reserve(key), None);
        assert_eq!(shared.pending_count(), 1);
    }

    #[test]
    fn stale_completion_never_reaches_cache() {
        let shared = test_shared();
        let key = TileKey::new(0, 1.0);
        let generation = shared.try_reserve(key).expect("reserved");
        let job = RenderJob {
            key,
            zoom: 1.0,
            fit_scale: 1.0,
            generation,
        };

        shared.invalidate();

        assert_eq!(shared.complete_render(&job, tile(0)), Completion::Stale);
        assert!(!shared.cache().contains(&key));
        assert_eq!(shared.pending_count(), 0);
    }

    #[test]
    fn stale_job_does_not_release_newer_reservation() {
        let shared = test_shared();
        let key = TileKey::new(0, 1.0);
        let old = shared.try_reserve(key).expect("reserved");

        shared.invalidate();
        let new = shared.try_reserve(key).expect("reserved again");
        assert_ne!(old, new);

        shared.finish_pending(key, old);
        assert!(shared.is_pending(&key));
    }

    #[test]
    fn current_completion_is_applied() {
        let shared = test_shared();
        let key = TileKey::new(2, 1.5);
        let generation = shared.try_reserve(key).expect("reserved");
        let job = RenderJob {
            key,
            zoom: 1.5,
            fit_scale: 1.0,
            generation,
        };

        assert_eq!(shared.complete_render(&job, tile(2)), Completion::Applied);
        assert!(shared.cache().contains(&key));
        assert!(!shared.is_pending(&key));
    }

    #[test]
    fn oversize_completion_is_refused_until_invalidated() {
        let (tx, rx) = flume::unbounded();
        let target = Arc::new(ViewTarget::new());
        target.attach(TargetState {
            visible: Some(PageRange::new(0, 0)),
            zoom: 1.0,
        });
        let shared = Shared::new(
            Arc::new(LifecycleGuard::new()),
            target,
            DocumentSlot::empty(),
            TileCache::new(6_000),
            tx,
        );
        let key = TileKey::new(0, 1.0);
        let generation = shared.try_reserve(key).expect("reserved");
        let job = RenderJob {
            key,
            zoom: 1.0,
            fit_scale: 1.0,
            generation,
        };
        let big = Tile {
            bitmap: Bitmap::try_alloc(20, 20).expect("alloc"),
            page: 0,
            scale: 1.0,
        };

        assert_eq!(shared.complete_render(&job, big), Completion::Refused);
        assert!(!shared.is_pending(&key));
        assert!(shared.cache().is_refused(&key));
        assert!(rx.try_recv().is_err(), "no repaint for a dropped tile");

        shared.invalidate();
        assert!(!shared.cache().is_refused(&key));
    }

    #[test]
    fn rejections_during_teardown_are_not_counted() {
        let shared = test_shared();
        shared.note_rejected("Render of page 0");
        assert_eq!(shared.rejected_jobs(), 1);

        assert!(shared.guard.begin_teardown());
        shared.note_rejected("Render of page 1");
        assert_eq!(shared.rejected_jobs(), 1);
    }

    #[test]
    fn detached_target_ignores_updates() {
        let target = ViewTarget::new();
        let state = TargetState {
            visible: Some(PageRange::new(0, 1)),
            zoom: 1.0,
        };
        target.update(state);
        assert_eq!(target.snapshot(), None);

        target.attach(state);
        assert!(target.is_attached());
        target.detach();
        target.update(state);
        assert!(!target.is_attached());
    }
}
