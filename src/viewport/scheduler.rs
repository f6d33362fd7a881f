//! Render scheduler - turns the visible range into deduplicated pool jobs

use std::sync::Arc;

use log::debug;

use super::request::{RenderJob, WorkItem};
use super::shared::Shared;
use super::types::{PageRange, TileKey};
use super::worker::JobQueue;

/// Plans renders for the visible range plus a prerender buffer
pub struct RenderScheduler {
    shared: Arc<Shared>,
    queue: Option<JobQueue>,
    prerender_pages: usize,
}

impl RenderScheduler {
    pub(crate) fn new(shared: Arc<Shared>, queue: Option<JobQueue>, prerender_pages: usize) -> Self {
        Self {
            shared,
            queue,
            prerender_pages,
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.generation.current()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending_count()
    }

    /// Full invalidation: new generation, empty pending set
    pub fn invalidate(&self) -> u64 {
        let generation = self.shared.invalidate();
        debug!("Render generation advanced to {generation}");
        generation
    }

    /// Order in which pages of `visible` and its buffer are requested:
    /// visible pages first, then the pages after, then the pages before.
    fn request_order(&self, visible: PageRange, known_pages: usize) -> Vec<usize> {
        let Some(buffered) = visible.expand(self.prerender_pages, known_pages) else {
            return Vec::new();
        };
        let last_visible = visible.last.min(known_pages - 1);

        let mut order: Vec<usize> = (visible.first..=last_visible).collect();
        order.extend(last_visible + 1..=buffered.last);
        order.extend((buffered.first..visible.first).rev());
        order
    }

    /// Ensure every visible page and its neighbours are cached or pending.
    /// Pages not yet measured are skipped. Returns the number of jobs submitted.
    pub fn ensure_range(&self, visible: PageRange, zoom: f32, fit_scale: f32) -> usize {
        if !self.accepting() {
            return 0;
        }

        let known_pages = self.shared.metrics().scanned();
        self.request_order(visible, known_pages)
            .into_iter()
            .filter(|&page| self.ensure_page(page, zoom, fit_scale))
            .count()
    }

    /// Submit a render of `page` at `zoom` unless it is cached, pending or was
    /// refused by the cache this generation
    pub fn ensure_page(&self, page: usize, zoom: f32, fit_scale: f32) -> bool {
        if !self.accepting() {
            return false;
        }
        if page >= self.shared.metrics().scanned() {
            return false;
        }

        let key = TileKey::new(page, zoom);
        {
            let cache = self.shared.cache();
            if cache.contains(&key) || cache.is_refused(&key) {
                return false;
            }
        }
        let Some(generation) = self.shared.try_reserve(key) else {
            return false;
        };

        let job = RenderJob {
            key,
            zoom,
            fit_scale,
            generation,
        };
        let submitted = self
            .queue
            .as_ref()
            .is_some_and(|queue| queue.submit(WorkItem::Render(job)));
        if !submitted {
            self.shared.note_rejected(&format!("Render of page {page}"));
            self.shared.finish_pending(key, generation);
        }
        submitted
    }

    fn accepting(&self) -> bool {
        !self.shared.guard.is_destroyed()
            && self.shared.document.is_live()
            && self.queue.as_ref().is_some_and(JobQueue::is_accepting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::cache::TileCache;
    use crate::viewport::lifecycle::LifecycleGuard;
    use crate::viewport::rasterizer::{DocumentSlot, DocumentSource, PageRasterizer};
    use crate::viewport::shared::ViewTarget;
    use crate::viewport::types::{Bitmap, PageSize, Tile};
    use crate::viewport::worker::{TileLimits, WorkerPool};
    use crate::synthetic::SyntheticRasterizer;

    fn test_shared(pages: usize, scanned: usize) -> Arc<Shared> {
        let rasterizer = SyntheticRasterizer::uniform(pages, 600.0, 800.0);
        let document = rasterizer
            .open_document(&DocumentSource::Path("test.pdf".into()))
            .expect("open");
        let (tx, _rx) = flume::unbounded();
        let shared = Arc::new(Shared::new(
            Arc::new(LifecycleGuard::new()),
            Arc::new(ViewTarget::new()),
            DocumentSlot::new(document),
            TileCache::new(64 << 20),
            tx,
        ));
        for _ in 0..scanned {
            shared.metrics_mut().push(PageSize::new(600.0, 800.0));
        }
        shared
    }

    /// A queue whose receiving end the test holds instead of a worker
    fn capture_queue() -> (JobQueue, flume::Receiver<WorkItem>) {
        let (tx, rx) = flume::unbounded();
        (JobQueue::for_tests(tx), rx)
    }

    fn queued_pages(rx: &flume::Receiver<WorkItem>) -> Vec<usize> {
        rx.try_iter()
            .filter_map(|item| match item {
                WorkItem::Render(job) => Some(job.key.page),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn schedules_visible_then_buffer() {
        let shared = test_shared(20, 20);
        let (queue, rx) = capture_queue();
        let scheduler = RenderScheduler::new(shared, Some(queue), 3);

        let submitted = scheduler.ensure_range(PageRange::new(5, 6), 1.0, 1.0);

        assert_eq!(submitted, 8);
        assert_eq!(queued_pages(&rx), vec![5, 6, 7, 8, 9, 4, 3, 2]);
    }

    #[test]
    fn skips_cached_and_pending() {
        let shared = test_shared(20, 20);
        let (queue, rx) = capture_queue();
        let scheduler = RenderScheduler::new(shared.clone(), Some(queue), 0);

        shared.cache().put(
            TileKey::new(1, 1.0),
            Tile {
                bitmap: Bitmap::try_alloc(2, 2).expect("alloc"),
                page: 1,
                scale: 1.0,
            },
        );
        assert!(scheduler.ensure_page(2, 1.0, 1.0));

        scheduler.ensure_range(PageRange::new(0, 2), 1.0, 1.0);

        assert_eq!(queued_pages(&rx), vec![2, 0]);
        assert_eq!(scheduler.pending_count(), 2);
    }

    #[test]
    fn refused_key_is_not_resubmitted_until_invalidated() {
        let shared = test_shared(20, 20);
        let (queue, rx) = capture_queue();
        let scheduler = RenderScheduler::new(shared.clone(), Some(queue), 0);

        // Simulate a completed render the cache would not hold
        let oversize = TileCache::new(64 << 20).max_tile_bytes() + 1;
        let side = ((oversize / Bitmap::BYTES_PER_PIXEL) as f64).sqrt().ceil() as u32 + 1;
        let accepted = shared.cache().put(
            TileKey::new(0, 1.0),
            Tile {
                bitmap: Bitmap::try_alloc(side, side).expect("alloc"),
                page: 0,
                scale: 1.0,
            },
        );
        assert!(!accepted);

        assert!(!scheduler.ensure_page(0, 1.0, 1.0));
        assert!(queued_pages(&rx).is_empty());

        scheduler.invalidate();
        assert!(scheduler.ensure_page(0, 1.0, 1.0));
        assert_eq!(queued_pages(&rx), vec![0]);
    }

    #[test]
    fn clamps_to_scanned_pages() {
        let shared = test_shared(500, 10);
        let (queue, rx) = capture_queue();
        let scheduler = RenderScheduler::new(shared, Some(queue), 3);

        assert_eq!(scheduler.ensure_range(PageRange::new(478, 481), 1.0, 1.0), 0);
        scheduler.ensure_range(PageRange::new(8, 12), 1.0, 1.0);
        assert_eq!(queued_pages(&rx), vec![8, 9, 7, 6, 5]);
    }

    #[test]
    fn invalidate_clears_pending_and_bumps_generation() {
        let shared = test_shared(20, 20);
        let (queue, rx) = capture_queue();
        let scheduler = RenderScheduler::new(shared, Some(queue), 0);

        scheduler.ensure_range(PageRange::new(0, 1), 1.0, 1.0);
        assert_eq!(scheduler.pending_count(), 2);

        let before = scheduler.generation();
        scheduler.invalidate();
        assert_eq!(scheduler.generation(), before + 1);
        assert_eq!(scheduler.pending_count(), 0);

        // The same keys can be requested again under the new generation
        scheduler.ensure_range(PageRange::new(0, 1), 1.0, 1.0);
        let generations: Vec<u64> = rx
            .try_iter()
            .filter_map(|item| match item {
                WorkItem::Render(job) => Some(job.generation),
                _ => None,
            })
            .collect();
        assert_eq!(generations, vec![before, before, before + 1, before + 1]);
    }

    #[test]
    fn nothing_scheduled_after_teardown_starts() {
        let shared = test_shared(20, 20);
        let mut pool = WorkerPool::spawn(
            1,
            shared.clone(),
            TileLimits {
                max_dimension: 4096,
                max_bytes: 1 << 24,
                oom_keep_radius: 3,
                scan_chunk: 4,
            },
        );
        let scheduler = RenderScheduler::new(shared.clone(), Some(pool.queue()), 3);

        assert!(shared.guard.begin_teardown());
        assert_eq!(scheduler.ensure_range(PageRange::new(0, 3), 1.0, 1.0), 0);
        assert_eq!(scheduler.pending_count(), 0);
        pool.shutdown(std::time::Duration::from_millis(200));
    }
}
