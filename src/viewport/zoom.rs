//! Zoom, pan and scroll state
//!
//! Document space is the page stack laid out at zoom 1: `x` in
//! `[0, screen_width]`, `y` measured from the top of the first page.
//! Screen space applies scroll, zoom and pan on top:
//!
//! ```text
//! screen_x = content_left(zoom) + pan + doc_x * zoom
//! screen_y = (doc_y - scroll) * zoom
//! ```
//!
//! When zoomed out below 1 the narrower content is centred (`content_left`);
//! when zoomed in, `pan` slides it left in `[-max_pan, 0]`.

use super::types::{DocPoint, ScreenPoint, ScreenSize};

/// Allowed zoom range
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoomLimits {
    pub min: f32,
    pub max: f32,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self { min: 0.5, max: 5.0 }
    }
}

impl ZoomLimits {
    /// Clamp factor to valid range, handling NaN/Inf
    #[must_use]
    pub fn clamp(&self, factor: f32) -> f32 {
        if !factor.is_finite() {
            1.0_f32.clamp(self.min, self.max)
        } else {
            factor.clamp(self.min, self.max)
        }
    }
}

/// Scroll/zoom/pan of the viewport
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    /// Current zoom factor (1.0 = page width fits the screen)
    pub zoom: f32,
    /// Document-space y at the top of the screen
    pub scroll_offset: f32,
    /// Screen-space horizontal offset, `<= 0`
    pub pan_offset: f32,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            scroll_offset: 0.0,
            pan_offset: 0.0,
        }
    }
}

impl ViewportState {
    /// Left edge of the content at zoom ≤ 1, where it is centred
    #[must_use]
    pub fn content_left(zoom: f32, screen: ScreenSize) -> f32 {
        if zoom < 1.0 {
            (screen.width - screen.width * zoom) / 2.0
        } else {
            0.0
        }
    }

    /// Largest scroll offset that still fills the screen
    #[must_use]
    pub fn max_scroll(zoom: f32, total_height: f32, screen: ScreenSize) -> f32 {
        (total_height - screen.height / zoom).max(0.0)
    }

    /// Largest leftward pan
    #[must_use]
    pub fn max_pan(zoom: f32, screen: ScreenSize) -> f32 {
        (screen.width * zoom - screen.width).max(0.0)
    }

    #[must_use]
    pub fn to_document(&self, point: ScreenPoint, screen: ScreenSize) -> DocPoint {
        let left = Self::content_left(self.zoom, screen);
        DocPoint {
            x: (point.x - left - self.pan_offset) / self.zoom,
            y: self.scroll_offset + point.y / self.zoom,
        }
    }

    #[must_use]
    pub fn to_screen(&self, point: DocPoint, screen: ScreenSize) -> ScreenPoint {
        let left = Self::content_left(self.zoom, screen);
        ScreenPoint {
            x: left + self.pan_offset + point.x * self.zoom,
            y: (point.y - self.scroll_offset) * self.zoom,
        }
    }

    /// Bring zoom, scroll and pan back inside their bounds
    pub fn clamp(&mut self, limits: &ZoomLimits, total_height: f32, screen: ScreenSize) {
        self.zoom = limits.clamp(self.zoom);

        let max_scroll = Self::max_scroll(self.zoom, total_height, screen);
        self.scroll_offset = if self.scroll_offset.is_finite() {
            self.scroll_offset.clamp(0.0, max_scroll)
        } else {
            0.0
        };

        let max_pan = Self::max_pan(self.zoom, screen);
        self.pan_offset = if self.pan_offset.is_finite() {
            self.pan_offset.clamp(-max_pan, 0.0)
        } else {
            0.0
        };
    }

    /// Change zoom so the document point under `focal` stays under it
    pub fn zoom_about(
        &mut self,
        zoom: f32,
        focal: ScreenPoint,
        limits: &ZoomLimits,
        total_height: f32,
        screen: ScreenSize,
    ) {
        let anchor = self.to_document(focal, screen);
        self.zoom = limits.clamp(zoom);
        self.scroll_offset = anchor.y - focal.y / self.zoom;
        self.pan_offset =
            focal.x - Self::content_left(self.zoom, screen) - anchor.x * self.zoom;
        self.clamp(limits, total_height, screen);
    }

    /// Move by a screen-space delta: positive `dy` scrolls down the document,
    /// positive `dx` reveals content further right.
    pub fn scroll_by(
        &mut self,
        dx: f32,
        dy: f32,
        limits: &ZoomLimits,
        total_height: f32,
        screen: ScreenSize,
    ) {
        self.scroll_offset += dy / self.zoom;
        self.pan_offset -= dx;
        self.clamp(limits, total_height, screen);
    }
}
