//! Render worker pool - runs page renders and metrics scan steps off the
//! interaction thread

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, error, warn};

use super::metrics::run_scan_step;
use super::request::{RasterFault, RenderJob, WorkItem};
use super::shared::{Completion, Shared};
use super::types::{Bitmap, PageSize, Tile};

/// Absolute raster limits, independent of the cache budget
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileLimits {
    pub max_dimension: u32,
    pub max_bytes: usize,
    /// Pages kept around the failing page when an allocation fails
    pub oom_keep_radius: usize,
    pub scan_chunk: usize,
}

/// Pre-computed rasterization parameters for a page
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterPlan {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl RasterPlan {
    /// `max_cache_scale` and `max_tile_bytes` come from the cache; the
    /// returned plan never allocates more than `max_tile_bytes` or
    /// `limits.max_bytes`, whichever is smaller.
    pub fn compute(
        page: PageSize,
        fit_scale: f32,
        zoom: f32,
        max_cache_scale: f32,
        max_tile_bytes: usize,
        limits: &TileLimits,
    ) -> Self {
        let mut scale = (fit_scale * zoom).min(max_cache_scale);
        if !(scale.is_finite() && scale > 0.0) {
            scale = 1.0_f32.min(max_cache_scale);
        }

        let max_dim = page.width.max(page.height) * scale;
        let dim_limit = limits.max_dimension as f32;
        if max_dim > dim_limit {
            scale *= dim_limit / max_dim;
        }

        let bytes = page.width * page.height * scale * scale * Bitmap::BYTES_PER_PIXEL as f32;
        let byte_limit = limits.max_bytes as f32;
        if bytes > byte_limit {
            scale *= (byte_limit / bytes).sqrt();
        }

        let mut width = ((page.width * scale).floor() as u32).max(1);
        let mut height = ((page.height * scale).floor() as u32).max(1);

        // Rounding a sliver up to one pixel can overshoot the byte ceiling
        let max_pixels = (limits.max_bytes.min(max_tile_bytes) / Bitmap::BYTES_PER_PIXEL).max(1);
        if (width as usize).saturating_mul(height as usize) > max_pixels {
            if width <= height {
                height = (max_pixels / width as usize).clamp(1, u32::MAX as usize) as u32;
            } else {
                width = (max_pixels / height as usize).clamp(1, u32::MAX as usize) as u32;
            }
        }

        Self {
            width,
            height,
            scale,
        }
    }

    /// Per-axis scale that maps the page onto exactly `width × height`
    #[must_use]
    pub fn axis_scales(&self, page: PageSize) -> (f32, f32) {
        let axis = |pixels: u32, extent: f32| {
            if extent > 0.0 {
                pixels as f32 / extent
            } else {
                self.scale
            }
        };
        (axis(self.width, page.width), axis(self.height, page.height))
    }
}

/// Submission side of the pool queue
#[derive(Clone)]
pub struct JobQueue {
    tx: Sender<WorkItem>,
    accepting: Arc<AtomicBool>,
}

impl JobQueue {
    /// Enqueue work. Returns false once the pool has stopped accepting jobs.
    pub fn submit(&self, item: WorkItem) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(item).is_ok()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(tx: Sender<WorkItem>) -> Self {
        Self {
            tx,
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// Fixed-size pool of worker threads pulling from one shared queue
pub struct WorkerPool {
    queue: JobQueue,
    handles: Vec<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl WorkerPool {
    pub fn spawn(size: usize, shared: Arc<Shared>, limits: TileLimits) -> Self {
        // MPMC: every worker clones the receiver and pulls from the same queue
        let (tx, rx) = flume::unbounded();
        let (exit_tx, exit_rx) = flume::unbounded();
        let queue = JobQueue {
            tx,
            accepting: Arc::new(AtomicBool::new(true)),
        };

        let mut handles = Vec::with_capacity(size.max(1));
        for index in 0..size.max(1) {
            let requests = rx.clone();
            let ctx = shared.clone();
            let resubmit = queue.clone();
            let exit = exit_tx.clone();

            let spawned = thread::Builder::new()
                .name(format!("pageview-worker-{index}"))
                .spawn(move || {
                    render_worker(&ctx, &resubmit, requests, &limits);
                    let _ = exit.send(());
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!("Failed to spawn render worker {index}: {e}"),
            }
        }

        Self {
            queue,
            handles,
            exited: exit_rx,
        }
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    /// Stop accepting work and wait up to `grace` for workers to exit.
    /// Returns how many workers were still running and got abandoned.
    pub fn shutdown(&mut self, grace: Duration) -> usize {
        self.queue.accepting.store(false, Ordering::Release);
        for _ in 0..self.handles.len() {
            let _ = self.queue.tx.send(WorkItem::Shutdown);
        }

        let deadline = Instant::now() + grace;
        let mut exited = 0;
        while exited < self.handles.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.exited.recv_timeout(remaining) {
                Ok(()) => exited += 1,
                Err(_) => break,
            }
        }

        let mut abandoned = 0;
        for handle in std::mem::take(&mut self.handles) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                abandoned += 1;
            }
        }
        abandoned
    }
}

/// Run `f`, turning a panic into `None` so one bad job cannot kill a worker
fn contain<T>(what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            error!("{what} panicked; worker continues");
            None
        }
    }
}

/// Main worker loop - runs in a dedicated thread until it pulls `Shutdown`
fn render_worker(shared: &Shared, queue: &JobQueue, requests: Receiver<WorkItem>, limits: &TileLimits) {
    for item in requests {
        match item {
            WorkItem::Render(job) => {
                if contain("Render job", || run_render_job(shared, &job, limits)).is_none() {
                    shared.finish_pending(job.key, job.generation);
                }
            }

            WorkItem::Scan(step) => {
                let next = contain("Scan step", || run_scan_step(shared, step, limits.scan_chunk));
                if let Some(Some(next)) = next {
                    if !queue.submit(WorkItem::Scan(next)) {
                        shared.note_rejected(&format!("Scan step at page {}", next.next_index));
                    }
                }
            }

            WorkItem::Shutdown => break,
        }
    }
}

/// Outcome of one render job, for logging and tests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Applied,
    Stale,
    /// The cache would not hold the tile; not retried this generation
    Refused,
    Skipped,
    OutOfMemory,
    Failed,
}

/// Render one tile: plan, rasterize under the document lock, then apply only
/// if the generation is still current.
pub(crate) fn run_render_job(shared: &Shared, job: &RenderJob, limits: &TileLimits) -> JobOutcome {
    let page = job.key.page;

    if shared.guard.is_destroyed() {
        return JobOutcome::Skipped;
    }
    if shared.generation.current() != job.generation {
        debug!("Skipping stale render of page {page} before start");
        shared.finish_pending(job.key, job.generation);
        return JobOutcome::Stale;
    }

    let Some(size) = shared.metrics().page(page) else {
        debug!("Page {page} not measured yet; dropping render");
        shared.finish_pending(job.key, job.generation);
        return JobOutcome::Skipped;
    };

    let (max_cache_scale, max_tile_bytes) = {
        let cache = shared.cache();
        (cache.max_render_scale(size.width, size.height), cache.max_tile_bytes())
    };
    let plan = RasterPlan::compute(
        size,
        job.fit_scale,
        job.zoom,
        max_cache_scale,
        max_tile_bytes,
        limits,
    );
    let (scale_x, scale_y) = plan.axis_scales(size);

    let rendered = shared.document.with_page(&shared.guard, page, |raster| {
        let mut bitmap = Bitmap::try_alloc(plan.width, plan.height)?;
        raster.render(&mut bitmap, scale_x, scale_y)?;
        Ok(bitmap)
    });

    match rendered {
        Ok(bitmap) => {
            let tile = Tile {
                bitmap,
                page,
                scale: plan.scale,
            };
            match shared.complete_render(job, tile) {
                Completion::Applied => JobOutcome::Applied,
                Completion::Stale => {
                    debug!("Discarded stale render of page {page}");
                    JobOutcome::Stale
                }
                Completion::Refused => JobOutcome::Refused,
            }
        }
        Err(RasterFault::OutOfMemory { bytes }) => {
            let dropped = shared.cache().evict_far_from(page, limits.oom_keep_radius);
            warn!(
                "Out of memory rendering page {page} ({bytes} bytes); dropped {dropped} distant tiles"
            );
            shared.finish_pending(job.key, job.generation);
            JobOutcome::OutOfMemory
        }
        Err(RasterFault::DocumentClosed) => {
            shared.finish_pending(job.key, job.generation);
            JobOutcome::Skipped
        }
        Err(e) => {
            warn!("Failed to render page {page}: {e}");
            shared.finish_pending(job.key, job.generation);
            JobOutcome::Failed
        }
    }
}
