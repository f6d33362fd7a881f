//! Viewport controller - interaction state as `Command` in, `Effect` out

use std::time::{Duration, Instant};

use log::debug;

use super::gesture::{FastScroll, Fling, ZoomAnimation};
use super::layout::PageLayout;
use super::metrics::DocumentMetrics;
use super::types::{DocPoint, PagePlacement, PageRange, ScreenPoint, ScreenRect, ScreenSize, ZoomBucket};
use super::zoom::{ViewportState, ZoomLimits};

/// Tunables for gesture handling and layout
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControllerSettings {
    pub limits: ZoomLimits,
    pub double_tap_zoom: f32,
    pub double_tap_duration: Duration,
    pub fling_render_interval: Duration,
    pub page_gap: f32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            limits: ZoomLimits::default(),
            double_tap_zoom: 2.5,
            double_tap_duration: Duration::from_millis(250),
            fling_render_interval: Duration::from_millis(200),
            page_gap: 8.0,
        }
    }
}

/// Owns scroll/zoom/pan, the page layout and in-progress gestures
#[derive(Clone, Debug)]
pub struct ViewportController {
    settings: ControllerSettings,
    metrics: DocumentMetrics,
    layout: PageLayout,
    screen: ScreenSize,
    view: ViewportState,
    /// Zoom when the current pinch began
    pinch_start: Option<f32>,
    animation: Option<ZoomAnimation>,
    fling: Option<Fling>,
    fast_scroll: FastScroll,
}

impl ViewportController {
    #[must_use]
    pub(crate) fn new(settings: ControllerSettings) -> Self {
        Self {
            settings,
            metrics: DocumentMetrics::default(),
            layout: PageLayout::default(),
            screen: ScreenSize::default(),
            view: ViewportState::default(),
            pinch_start: None,
            animation: None,
            fling: None,
            fast_scroll: FastScroll::default(),
        }
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub(crate) fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::Init(metrics) => {
                self.metrics = metrics;
                self.layout = PageLayout::compute(&self.metrics, self.screen.width, self.settings.page_gap);
                self.view = ViewportState::default();
                self.clamp();
                vec![Effect::ScheduleVisible, Effect::Repaint]
            }

            Command::ScanProgress(metrics) => {
                self.metrics = metrics;
                self.relayout();
                vec![Effect::ScheduleVisible, Effect::Repaint]
            }

            Command::SetScreenSize(size) => {
                if size == self.screen {
                    return vec![];
                }
                let width_changed = (size.width - self.screen.width).abs() > f32::EPSILON;
                self.screen = size;
                if size.is_empty() {
                    return vec![];
                }

                if width_changed {
                    self.relayout();
                    // Tile keys carry no width, so every cached raster is now the wrong size
                    vec![
                        Effect::Invalidate,
                        Effect::ClearCache,
                        Effect::ScheduleVisible,
                        Effect::Repaint,
                    ]
                } else {
                    self.clamp();
                    vec![Effect::Invalidate, Effect::ScheduleVisible, Effect::Repaint]
                }
            }

            Command::Restore {
                scroll_y,
                zoom,
                pan_x,
            } => {
                self.stop_motion();
                self.view = ViewportState {
                    zoom,
                    scroll_offset: scroll_y,
                    pan_offset: pan_x,
                };
                self.clamp();
                vec![Effect::Invalidate, Effect::ScheduleVisible, Effect::Repaint]
            }

            Command::ScrollBy { dx, dy } => {
                self.fling = None;
                self.scroll_by(dx, dy);
                vec![Effect::ScheduleVisible, Effect::Repaint]
            }

            Command::ScrollToPage(page) => {
                self.stop_motion();
                let last = self.layout.page_count().saturating_sub(1);
                let Some(top) = self.layout.page_top(page.min(last)) else {
                    return vec![];
                };
                self.view.scroll_offset = top;
                self.clamp();
                vec![Effect::ScheduleVisible, Effect::Repaint]
            }

            Command::PinchBegin => {
                self.stop_motion();
                self.pinch_start = Some(self.view.zoom);
                vec![]
            }

            Command::PinchStep { factor, focal } => {
                if self.pinch_start.is_none() {
                    self.stop_motion();
                    self.pinch_start = Some(self.view.zoom);
                }
                if !factor.is_finite() || factor <= 0.0 {
                    return vec![];
                }
                self.zoom_about(self.view.zoom * factor, focal);
                vec![Effect::Repaint]
            }

            Command::PinchEnd => match self.pinch_start.take() {
                Some(start) => self.zoom_settled(start),
                None => vec![],
            },

            Command::DoubleTap { focal, now } => {
                self.stop_motion();
                let target = if self.view.zoom > 1.0 + f32::EPSILON {
                    1.0
                } else {
                    self.settings.double_tap_zoom
                };
                let target = self.settings.limits.clamp(target);
                self.animation = Some(ZoomAnimation::new(
                    self.view.zoom,
                    target,
                    focal,
                    now,
                    self.settings.double_tap_duration,
                ));
                vec![Effect::Repaint]
            }

            Command::Fling { vx, vy, now } => {
                self.animation = None;
                let fling = Fling::new(vx, vy, now, self.settings.fling_render_interval);
                self.fling = Some(fling);
                vec![]
            }

            Command::StopFling => match self.fling.take() {
                Some(_) => vec![Effect::ScheduleVisible],
                None => vec![],
            },

            Command::FastScrollBegin => {
                self.stop_motion();
                self.fast_scroll.begin();
                vec![Effect::Repaint]
            }

            Command::FastScrollDrag { y } => {
                if !self.fast_scroll.is_dragging() {
                    return vec![];
                }
                let fraction = FastScroll::fraction(y, self.screen.height);
                self.view.scroll_offset =
                    fraction * ViewportState::max_scroll(self.view.zoom, self.layout.total_height(), self.screen);
                self.clamp();
                vec![Effect::Repaint]
            }

            Command::FastScrollEnd => {
                if self.fast_scroll.end() {
                    vec![Effect::ScheduleVisible, Effect::Repaint]
                } else {
                    vec![]
                }
            }

            Command::Tick(now) => self.tick(now),
        }
    }

    fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        if let Some(animation) = self.animation {
            let (zoom, done) = animation.sample(now);
            self.zoom_about(zoom, animation.focal);
            if done {
                self.animation = None;
                effects = self.zoom_settled(animation.from);
            } else {
                effects.push(Effect::Repaint);
            }
        }

        if let Some(fling) = self.fling.as_mut() {
            let step = fling.step(now);
            if step.finished {
                self.fling = None;
            }
            self.scroll_by(step.dx, step.dy);
            if step.render_due && !effects.contains(&Effect::ScheduleVisible) {
                effects.push(Effect::ScheduleVisible);
            }
            if !effects.contains(&Effect::Repaint) {
                effects.push(Effect::Repaint);
            }
        }

        effects
    }

    /// Zoom gesture finished. A new zoom bucket means every queued raster
    /// targets the wrong resolution.
    fn zoom_settled(&self, start_zoom: f32) -> Vec<Effect> {
        if ZoomBucket::from_zoom(start_zoom) == ZoomBucket::from_zoom(self.view.zoom) {
            vec![Effect::ScheduleVisible, Effect::Repaint]
        } else {
            debug!("Zoom settled at {:.2} (from {:.2})", self.view.zoom, start_zoom);
            vec![Effect::Invalidate, Effect::ScheduleVisible, Effect::Repaint]
        }
    }

    fn stop_motion(&mut self) {
        self.animation = None;
        self.fling = None;
    }

    fn clamp(&mut self) {
        self.view
            .clamp(&self.settings.limits, self.layout.total_height(), self.screen);
    }

    fn scroll_by(&mut self, dx: f32, dy: f32) {
        self.view.scroll_by(
            dx,
            dy,
            &self.settings.limits,
            self.layout.total_height(),
            self.screen,
        );
    }

    fn zoom_about(&mut self, zoom: f32, focal: ScreenPoint) {
        self.view.zoom_about(
            zoom,
            focal,
            &self.settings.limits,
            self.layout.total_height(),
            self.screen,
        );
    }

    /// Recompute the layout, keeping the point at the top of the screen in place
    fn relayout(&mut self) {
        let anchor = self.layout.anchor_at(self.view.scroll_offset);
        self.layout = PageLayout::compute(&self.metrics, self.screen.width, self.settings.page_gap);
        if let Some(anchor) = anchor {
            self.view.scroll_offset = self.layout.resolve(anchor);
        }
        self.clamp();
    }

    /// Pages intersecting the screen
    #[must_use]
    pub fn visible_range(&self) -> Option<PageRange> {
        if self.screen.is_empty() {
            return None;
        }
        let top = self.view.scroll_offset;
        let bottom = top + self.screen.height / self.view.zoom;
        self.layout.visible_range(top, bottom)
    }

    /// Screen rectangle of every visible page, top to bottom
    #[must_use]
    pub fn visible_placements(&self) -> Vec<PagePlacement> {
        let Some(range) = self.visible_range() else {
            return Vec::new();
        };
        range
            .iter()
            .filter_map(|page| {
                let top = self.layout.page_top(page)?;
                let left = self.layout.page_left(page)?;
                let origin = self.view.to_screen(DocPoint { x: left, y: top }, self.screen);
                let rect = ScreenRect {
                    x: origin.x,
                    y: origin.y,
                    width: self.layout.page_width(page)? * self.view.zoom,
                    height: self.layout.page_height(page)? * self.view.zoom,
                };
                let on_screen = rect.bottom() > 0.0
                    && rect.y < self.screen.height
                    && rect.right() > 0.0
                    && rect.x < self.screen.width;
                on_screen.then_some(PagePlacement { page, rect })
            })
            .collect()
    }

    /// Page at the top edge of the screen
    #[must_use]
    pub fn current_page(&self) -> Option<usize> {
        self.layout.page_at(self.view.scroll_offset)
    }

    /// Floating "page / total" label shown while dragging the thumb
    #[must_use]
    pub fn fast_scroll_indicator(&self) -> Option<String> {
        if !self.fast_scroll.is_dragging() {
            return None;
        }
        let page = self.current_page()?;
        Some(format!("{} / {}", page + 1, self.layout.page_count()))
    }

    /// Thumb position along the track, in `[0, 1]`
    #[must_use]
    pub fn scroll_fraction(&self) -> f32 {
        let max = ViewportState::max_scroll(self.view.zoom, self.layout.total_height(), self.screen);
        if max > 0.0 {
            (self.view.scroll_offset / max).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// An animation or fling still needs ticks
    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.animation.is_some() || self.fling.is_some()
    }

    #[must_use]
    pub fn is_pinching(&self) -> bool {
        self.pinch_start.is_some()
    }

    #[must_use]
    pub fn view(&self) -> ViewportState {
        self.view
    }

    #[must_use]
    pub fn zoom(&self) -> f32 {
        self.view.zoom
    }

    #[must_use]
    pub fn scroll_offset(&self) -> f32 {
        self.view.scroll_offset
    }

    #[must_use]
    pub fn pan_offset(&self) -> f32 {
        self.view.pan_offset
    }

    #[must_use]
    pub fn screen(&self) -> ScreenSize {
        self.screen
    }

    #[must_use]
    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    #[must_use]
    pub fn metrics(&self) -> &DocumentMetrics {
        &self.metrics
    }

    #[cfg(test)]
    pub(crate) fn settings(&self) -> &ControllerSettings {
        &self.settings
    }
}

/// Commands that modify viewport state
#[derive(Clone, Debug)]
pub enum Command {
    /// Initial page geometry
    Init(DocumentMetrics),
    /// More pages measured
    ScanProgress(DocumentMetrics),
    SetScreenSize(ScreenSize),
    /// Previously saved position
    Restore { scroll_y: f32, zoom: f32, pan_x: f32 },
    /// Finger drag, in screen pixels
    ScrollBy { dx: f32, dy: f32 },
    ScrollToPage(usize),
    PinchBegin,
    /// Incremental scale factor since the previous step
    PinchStep { factor: f32, focal: ScreenPoint },
    PinchEnd,
    DoubleTap { focal: ScreenPoint, now: Instant },
    /// Release velocity in screen px/s
    Fling { vx: f32, vy: f32, now: Instant },
    StopFling,
    FastScrollBegin,
    /// Thumb position in screen pixels from the top of the track
    FastScrollDrag { y: f32 },
    FastScrollEnd,
    /// Animation frame
    Tick(Instant),
}

/// Effects produced by state changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Bump the generation and forget pending renders
    Invalidate,
    /// Drop every cached tile
    ClearCache,
    /// Render the visible range and its prerender buffer
    ScheduleVisible,
    Repaint,
}
