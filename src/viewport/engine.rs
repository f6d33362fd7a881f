//! Viewport engine - ties the scanner, cache, scheduler, controller and
//! lifecycle together behind the calls the surrounding chrome makes

use std::sync::Arc;
use std::time::Instant;

use flume::Receiver;
use log::{debug, error, info};

use super::cache::{CacheStats, RerenderOnEvict, TileCache};
use super::lifecycle::{self, LifecycleGuard, LifecycleState};
use super::metrics::{DocumentMetrics, scan_initial};
use super::rasterizer::{DocumentSlot, DocumentSource, PageRasterizer};
use super::request::{EngineEvent, WorkItem};
use super::scheduler::RenderScheduler;
use super::shared::{Shared, TargetState, ViewTarget};
use super::state::{Command, Effect, ViewportController};
use super::types::{PageRange, ScreenPoint, ScreenSize, Surface, TileKey};
use super::worker::WorkerPool;
use crate::persistence::{SavedViewport, ViewportPersistence};
use crate::settings::EngineConfig;

/// Where the engine is in its life
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Active,
    /// The document could not be opened; nothing is interactive
    Unavailable(String),
    ShutDown,
}

/// Scrollable, zoomable view over one paginated document
pub struct ViewportEngine {
    config: EngineConfig,
    document_id: String,
    status: EngineStatus,
    shared: Arc<Shared>,
    scheduler: RenderScheduler,
    pool: Option<WorkerPool>,
    controller: ViewportController,
    events: Receiver<EngineEvent>,
    needs_repaint: bool,
}

impl ViewportEngine {
    /// Open `source` and measure its first pages. A document that fails to
    /// open yields an engine in [`EngineStatus::Unavailable`].
    pub fn open(config: EngineConfig, rasterizer: &dyn PageRasterizer, source: &DocumentSource) -> Self {
        let config = config.sanitized();
        let document_id = source.id();

        let (document, status) = match rasterizer.open_document(source) {
            Ok(document) => {
                info!(
                    "Opened {document_id} ({} pages)",
                    document.page_count()
                );
                (DocumentSlot::new(document), EngineStatus::Active)
            }
            Err(e) => {
                error!("Failed to open {document_id}: {e}");
                (DocumentSlot::empty(), EngineStatus::Unavailable(e.to_string()))
            }
        };

        let guard = Arc::new(LifecycleGuard::new());
        let target = Arc::new(ViewTarget::new());
        let (events_tx, events) = flume::unbounded();

        let budget = config.cache_budget();
        let policy = RerenderOnEvict::new(
            guard.clone(),
            target.clone(),
            events_tx.clone(),
            config.eviction_throttle(),
            config.eviction_rerender_limit,
        );
        let cache = TileCache::with_policy(budget, Box::new(policy));
        debug!("Tile cache budget: {budget} bytes");

        let shared = Arc::new(Shared::new(guard, target, document, cache, events_tx));

        let pool = (status == EngineStatus::Active).then(|| {
            shared.target.attach(TargetState {
                visible: None,
                zoom: 1.0,
            });
            WorkerPool::spawn(config.worker_count, shared.clone(), config.tile_limits())
        });
        let scheduler = RenderScheduler::new(
            shared.clone(),
            pool.as_ref().map(WorkerPool::queue),
            config.prerender_pages,
        );

        let mut engine = Self {
            controller: ViewportController::new(config.controller_settings()),
            config,
            document_id,
            status,
            shared,
            scheduler,
            pool,
            events,
            needs_repaint: true,
        };

        if engine.is_active() {
            engine.start_scan();
        }
        engine
    }

    fn start_scan(&mut self) {
        let next = scan_initial(&self.shared, self.config.initial_scan_pages);

        let (widths, heights, scanned, complete) = {
            let metrics = self.shared.metrics();
            let mut widths = vec![0.0; metrics.page_count()];
            let mut heights = vec![0.0; metrics.page_count()];
            for (i, page) in metrics.pages().iter().enumerate() {
                widths[i] = page.width;
                heights[i] = page.height;
            }
            (widths, heights, metrics.scanned(), metrics.is_complete())
        };
        self.init(&widths, &heights, scanned, complete);

        if let Some(step) = next {
            let queued = self
                .pool
                .as_ref()
                .is_some_and(|pool| pool.queue().submit(WorkItem::Scan(step)));
            if !queued {
                self.shared.note_rejected("Background scan");
            }
        }
    }

    /// Initial page geometry: the first `scanned` entries of the parallel
    /// width/height arrays are measured.
    pub fn init(&mut self, widths: &[f32], heights: &[f32], scanned: usize, complete: bool) {
        let metrics = DocumentMetrics::from_dimensions(widths, heights, scanned, complete);
        self.apply(Command::Init(metrics));
    }

    pub fn on_screen_size_changed(&mut self, width: f32, height: f32) {
        self.apply(Command::SetScreenSize(ScreenSize::new(width, height)));
    }

    /// The scanner measured `count` pages so far
    pub fn on_page_scan_progress(&mut self, count: usize, complete: bool) {
        if !self.is_active() {
            return;
        }
        let metrics = self.shared.metrics().prefix(count, complete);
        if !metrics.is_complete() && metrics.scanned() < self.controller.metrics().scanned() {
            debug!("Ignoring stale scan progress ({count} pages)");
            return;
        }
        self.apply(Command::ScanProgress(metrics));
    }

    pub fn restore_state(&mut self, scroll_y: f32, zoom: f32, pan_x: f32) {
        self.apply(Command::Restore {
            scroll_y,
            zoom,
            pan_x,
        });
    }

    /// Restore the position saved for this document at the current screen
    /// width. Returns false when nothing was saved.
    pub fn restore_saved(&mut self, store: &dyn ViewportPersistence) -> bool {
        let Some(saved) = store.load(&self.document_id) else {
            return false;
        };
        let scroll_y = match saved.anchor {
            Some(anchor) if self.controller.layout().page_count() > 0 => {
                self.controller.layout().resolve(anchor)
            }
            _ => saved.scroll_for_width(self.controller.screen().width),
        };
        self.restore_state(scroll_y, saved.zoom, saved.pan_x);
        true
    }

    pub fn save_state(&self, store: &mut dyn ViewportPersistence) -> anyhow::Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        store.save(
            &self.document_id,
            SavedViewport {
                scroll_y: self.scroll_y_position(),
                zoom: self.zoom_level(),
                pan_x: self.pan_x(),
                reference_width: self.controller.screen().width,
                anchor: self.controller.layout().anchor_at(self.scroll_y_position()),
                saved_at: chrono::Utc::now(),
            },
        )
    }

    #[must_use]
    pub fn scroll_y_position(&self) -> f32 {
        self.controller.scroll_offset()
    }

    #[must_use]
    pub fn zoom_level(&self) -> f32 {
        self.controller.zoom()
    }

    #[must_use]
    pub fn pan_x(&self) -> f32 {
        self.controller.pan_offset()
    }

    pub fn scroll_by(&mut self, dx: f32, dy: f32) {
        self.apply(Command::ScrollBy { dx, dy });
    }

    pub fn scroll_to_page(&mut self, page: usize) {
        self.apply(Command::ScrollToPage(page));
    }

    pub fn pinch_begin(&mut self) {
        self.apply(Command::PinchBegin);
    }

    pub fn pinch_step(&mut self, factor: f32, focal: ScreenPoint) {
        self.apply(Command::PinchStep { factor, focal });
    }

    pub fn pinch_end(&mut self) {
        self.apply(Command::PinchEnd);
    }

    pub fn double_tap(&mut self, focal: ScreenPoint, now: Instant) {
        self.apply(Command::DoubleTap { focal, now });
    }

    pub fn fling(&mut self, vx: f32, vy: f32, now: Instant) {
        self.apply(Command::Fling { vx, vy, now });
    }

    pub fn stop_fling(&mut self) {
        self.apply(Command::StopFling);
    }

    pub fn fast_scroll_begin(&mut self) {
        self.apply(Command::FastScrollBegin);
    }

    pub fn fast_scroll_drag(&mut self, y: f32) {
        self.apply(Command::FastScrollDrag { y });
    }

    pub fn fast_scroll_end(&mut self) {
        self.apply(Command::FastScrollEnd);
    }

    /// Advance animations. Returns true while more ticks are needed.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.apply(Command::Tick(now));
        self.controller.is_animating()
    }

    /// Drain the worker handoff. Returns how many events were handled.
    pub fn poll_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            handled += 1;
            if !self.is_active() {
                continue;
            }
            match event {
                EngineEvent::Repaint => self.needs_repaint = true,
                EngineEvent::ScanProgress { scanned, complete } => {
                    self.on_page_scan_progress(scanned, complete);
                }
                EngineEvent::Rerender { page } => {
                    let submitted = self.scheduler.ensure_page(
                        page,
                        self.controller.zoom(),
                        self.controller.layout().fit_scale(),
                    );
                    if submitted {
                        debug!("Re-rendering evicted page {page}");
                    }
                }
            }
        }
        handled
    }

    /// Paint every visible page: its best cached tile, or the plain page
    /// background. Returns the number of pages drawn.
    pub fn draw(&mut self, surface: &mut dyn Surface) -> usize {
        if !self.is_active() {
            return 0;
        }
        self.sync_target();
        if !self.controller.is_animating() && !self.controller.is_pinching() {
            self.schedule_visible();
        }

        let placements = self.controller.visible_placements();
        let zoom = self.controller.zoom();
        let mut cache = self.shared.cache();
        for placement in &placements {
            match cache.best_tile(placement.page, zoom) {
                Some(tile) => surface.draw_tile(placement.page, tile, placement.rect),
                None => surface.fill_page_background(placement.page, placement.rect),
            }
        }
        self.needs_repaint = false;
        placements.len()
    }

    /// Ordered teardown; see [`lifecycle`]. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.status == EngineStatus::ShutDown {
            return;
        }
        lifecycle::teardown(&self.shared, self.pool.take(), self.config.shutdown_grace());
        self.status = EngineStatus::ShutDown;
        self.events.drain().for_each(drop);
    }

    fn apply(&mut self, cmd: Command) {
        if !self.is_active() {
            return;
        }
        let effects = self.controller.apply(cmd);
        self.sync_target();
        self.execute_effects(effects);
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Invalidate => {
                    self.scheduler.invalidate();
                }
                Effect::ClearCache => self.shared.clear_cache(),
                Effect::ScheduleVisible => {
                    self.schedule_visible();
                }
                Effect::Repaint => self.needs_repaint = true,
            }
        }
    }

    fn schedule_visible(&self) -> usize {
        let Some(visible) = self.controller.visible_range() else {
            return 0;
        };
        self.scheduler.ensure_range(
            visible,
            self.controller.zoom(),
            self.controller.layout().fit_scale(),
        )
    }

    /// Publish what eviction hooks need to know about the view
    fn sync_target(&self) {
        self.shared.target.update(TargetState {
            visible: self.controller.visible_range(),
            zoom: self.controller.zoom(),
        });
    }

    #[must_use]
    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == EngineStatus::Active && !self.shared.guard.is_destroyed()
    }

    #[must_use]
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.shared.guard.state()
    }

    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    #[must_use]
    pub fn needs_repaint(&self) -> bool {
        self.needs_repaint
    }

    #[must_use]
    pub fn controller(&self) -> &ViewportController {
        &self.controller
    }

    #[must_use]
    pub fn visible_range(&self) -> Option<PageRange> {
        self.controller.visible_range()
    }

    #[must_use]
    pub fn current_page(&self) -> Option<usize> {
        self.controller.current_page()
    }

    #[must_use]
    pub fn fast_scroll_indicator(&self) -> Option<String> {
        self.controller.fast_scroll_indicator()
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.shared.metrics().page_count()
    }

    /// Pages measured by the scanner so far
    #[must_use]
    pub fn scanned_pages(&self) -> usize {
        self.shared.metrics().scanned()
    }

    #[must_use]
    pub fn scan_complete(&self) -> bool {
        self.shared.metrics().is_complete()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache().stats()
    }

    /// Keys and byte sizes of every resident tile
    #[must_use]
    pub fn cached_tiles(&self) -> Vec<(TileKey, usize)> {
        self.shared.cache().snapshot()
    }

    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Jobs the worker pool refused while the engine was active
    #[must_use]
    pub fn rejected_jobs(&self) -> usize {
        self.shared.rejected_jobs()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.scheduler.generation()
    }

    /// No renders in flight, scan finished and nothing left to hand off
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_jobs() == 0 && self.scan_complete() && self.events.is_empty()
    }
}

impl Drop for ViewportEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
