//! Time-driven gestures: double-tap zoom animation, fling decay and the
//! fast-scroll thumb.

use std::time::{Duration, Instant};

use super::types::ScreenPoint;

/// Fling velocity decay rate, per second
pub const FLING_FRICTION: f32 = 4.0;

/// Below this speed (px/s) a fling stops
pub const FLING_MIN_VELOCITY: f32 = 20.0;

/// Zoom animation toward a target, keeping `focal` fixed on screen
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoomAnimation {
    pub from: f32,
    pub to: f32,
    pub focal: ScreenPoint,
    start: Instant,
    duration: Duration,
}

impl ZoomAnimation {
    #[must_use]
    pub fn new(from: f32, to: f32, focal: ScreenPoint, start: Instant, duration: Duration) -> Self {
        Self {
            from,
            to,
            focal,
            start,
            duration,
        }
    }

    /// Zoom at `now` and whether the animation has finished
    #[must_use]
    pub fn sample(&self, now: Instant) -> (f32, bool) {
        let elapsed = now.saturating_duration_since(self.start);
        if self.duration.is_zero() || elapsed >= self.duration {
            return (self.to, true);
        }
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        let eased = 1.0 - (1.0 - t).powi(3);
        (self.from + (self.to - self.from) * eased, false)
    }
}

/// Movement produced by one fling tick
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlingStep {
    pub dx: f32,
    pub dy: f32,
    /// Time to request renders for pages coming into view
    pub render_due: bool,
    pub finished: bool,
}

/// Exponentially decaying scroll/pan after a release
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fling {
    vx: f32,
    vy: f32,
    last_tick: Instant,
    last_render: Instant,
    render_interval: Duration,
}

impl Fling {
    /// `vx`/`vy` are screen px/s in the direction content should move under
    /// the viewport (positive `vy` scrolls down the document).
    #[must_use]
    pub fn new(vx: f32, vy: f32, now: Instant, render_interval: Duration) -> Self {
        let finite = |v: f32| if v.is_finite() { v } else { 0.0 };
        Self {
            vx: finite(vx),
            vy: finite(vy),
            last_tick: now,
            last_render: now,
            render_interval,
        }
    }

    pub fn step(&mut self, now: Instant) -> FlingStep {
        let dt = now.saturating_duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;

        // Exact integral of v·e^(-k·t) over the tick
        let decay = (-FLING_FRICTION * dt).exp();
        let travel = (1.0 - decay) / FLING_FRICTION;
        let dx = self.vx * travel;
        let dy = self.vy * travel;
        self.vx *= decay;
        self.vy *= decay;

        let finished = self.vx.hypot(self.vy) < FLING_MIN_VELOCITY;
        let render_due = finished
            || now.saturating_duration_since(self.last_render) >= self.render_interval;
        if render_due {
            self.last_render = now;
        }

        FlingStep {
            dx,
            dy,
            render_due,
            finished,
        }
    }
}

/// Draggable scrollbar thumb: maps a drag position to an absolute scroll
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FastScroll {
    dragging: bool,
}

impl FastScroll {
    pub fn begin(&mut self) {
        self.dragging = true;
    }

    /// Returns true if a drag was in progress
    pub fn end(&mut self) -> bool {
        std::mem::take(&mut self.dragging)
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Scroll fraction for a thumb at screen `y` on a track `track_height` tall
    #[must_use]
    pub fn fraction(y: f32, track_height: f32) -> f32 {
        if !track_height.is_finite() || track_height <= 0.0 || !y.is_finite() {
            return 0.0;
        }
        (y / track_height).clamp(0.0, 1.0)
    }
}
