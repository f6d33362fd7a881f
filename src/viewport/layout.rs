//! Vertical page stack in document space
//!
//! Every page is scaled by one document-wide fit factor so the widest
//! scanned page spans the screen. Pages that have not been measured yet take
//! the average scanned height, so `total_height` is always the best estimate.

use serde::{Deserialize, Serialize};

use super::metrics::DocumentMetrics;
use super::types::{PageRange, PageSize};

/// Aspect ratio assumed before any page is measured (A4 portrait)
const FALLBACK_ASPECT: f32 = 1.414;

/// Position inside the stack that survives relayout: a page and how far
/// down it the point sits, as a fraction of its height.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutAnchor {
    pub page: usize,
    pub fraction: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageLayout {
    tops: Vec<f32>,
    heights: Vec<f32>,
    widths: Vec<f32>,
    total_height: f32,
    fit_scale: f32,
    screen_width: f32,
    measured: usize,
}

impl PageLayout {
    #[must_use]
    pub fn compute(metrics: &DocumentMetrics, screen_width: f32, gap: f32) -> Self {
        let pages = metrics.pages();
        let count = metrics.layout_page_count();
        let screen_width = screen_width.max(1.0);

        let widest = pages
            .iter()
            .map(|p| p.width)
            .fold(0.0_f32, f32::max);
        let fit_scale = if widest > 0.0 { screen_width / widest } else { 1.0 };

        let estimated = if pages.is_empty() {
            PageSize::new(screen_width, screen_width * FALLBACK_ASPECT)
        } else {
            let n = pages.len() as f32;
            let width = pages.iter().map(|p| p.width).sum::<f32>() / n;
            let height = pages.iter().map(|p| p.height).sum::<f32>() / n;
            PageSize::new(width * fit_scale, height * fit_scale)
        };

        let mut tops = Vec::with_capacity(count);
        let mut heights = Vec::with_capacity(count);
        let mut widths = Vec::with_capacity(count);
        let mut y = 0.0;
        for index in 0..count {
            let size = match pages.get(index) {
                Some(page) => PageSize::new(page.width * fit_scale, page.height * fit_scale),
                None => estimated,
            };
            tops.push(y);
            heights.push(size.height);
            widths.push(size.width);
            y += size.height + gap;
        }
        let total_height = if count > 0 { y - gap } else { 0.0 };

        Self {
            tops,
            heights,
            widths,
            total_height,
            fit_scale,
            screen_width,
            measured: pages.len().min(count),
        }
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.tops.len()
    }

    /// Pages whose size is measured rather than estimated
    #[must_use]
    pub fn measured(&self) -> usize {
        self.measured
    }

    #[must_use]
    pub fn total_height(&self) -> f32 {
        self.total_height
    }

    /// Screen pixels per document unit at zoom 1
    #[must_use]
    pub fn fit_scale(&self) -> f32 {
        self.fit_scale
    }

    #[must_use]
    pub fn screen_width(&self) -> f32 {
        self.screen_width
    }

    #[must_use]
    pub fn page_top(&self, page: usize) -> Option<f32> {
        self.tops.get(page).copied()
    }

    #[must_use]
    pub fn page_height(&self, page: usize) -> Option<f32> {
        self.heights.get(page).copied()
    }

    /// Page width in document space; narrower pages are centred
    #[must_use]
    pub fn page_width(&self, page: usize) -> Option<f32> {
        self.widths.get(page).copied()
    }

    #[must_use]
    pub fn page_left(&self, page: usize) -> Option<f32> {
        self.page_width(page)
            .map(|width| (self.screen_width - width) / 2.0)
    }

    /// Page at document-space `y`; a point in a gap belongs to the page above
    #[must_use]
    pub fn page_at(&self, y: f32) -> Option<usize> {
        if self.tops.is_empty() {
            return None;
        }
        let after = self.tops.partition_point(|&top| top <= y);
        Some(after.saturating_sub(1))
    }

    /// Pages intersecting the document-space span `[top, bottom)`
    #[must_use]
    pub fn visible_range(&self, top: f32, bottom: f32) -> Option<PageRange> {
        let mut first = self.page_at(top)?;
        if self.tops[first] + self.heights[first] <= top {
            first += 1;
        }
        let last = self
            .tops
            .partition_point(|&page_top| page_top < bottom)
            .checked_sub(1)?;
        (first <= last).then(|| PageRange::new(first, last))
    }

    #[must_use]
    pub fn anchor_at(&self, y: f32) -> Option<LayoutAnchor> {
        let page = self.page_at(y)?;
        let height = self.heights[page].max(f32::EPSILON);
        // A point in the gap below a page sticks to that page's bottom edge
        let fraction = ((y - self.tops[page]) / height).clamp(0.0, 1.0);
        Some(LayoutAnchor { page, fraction })
    }

    /// Document-space `y` of `anchor` under this layout. Falls back to the
    /// last page when the anchored page no longer exists.
    #[must_use]
    pub fn resolve(&self, anchor: LayoutAnchor) -> f32 {
        let Some(last) = self.tops.len().checked_sub(1) else {
            return 0.0;
        };
        let page = anchor.page.min(last);
        self.tops[page] + self.heights[page] * anchor.fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(sizes: &[(f32, f32)], page_count: usize) -> DocumentMetrics {
        let mut widths: Vec<f32> = sizes.iter().map(|s| s.0).collect();
        let mut heights: Vec<f32> = sizes.iter().map(|s| s.1).collect();
        widths.resize(page_count, 0.0);
        heights.resize(page_count, 0.0);
        DocumentMetrics::from_dimensions(&widths, &heights, sizes.len(), false)
    }

    #[test]
    fn stacks_pages_with_gap() {
        let layout = PageLayout::compute(&metrics(&[(100.0, 200.0), (100.0, 100.0)], 2), 400.0, 10.0);

        assert_eq!(layout.fit_scale(), 4.0);
        assert_eq!(layout.page_top(0), Some(0.0));
        assert_eq!(layout.page_top(1), Some(810.0));
        assert_eq!(layout.total_height(), 1210.0);
    }

    #[test]
    fn unscanned_pages_use_average_height() {
        let layout = PageLayout::compute(&metrics(&[(100.0, 100.0), (100.0, 300.0)], 10), 100.0, 0.0);

        assert_eq!(layout.page_count(), 10);
        assert_eq!(layout.measured(), 2);
        assert_eq!(layout.page_height(9), Some(200.0));
        assert_eq!(layout.total_height(), 400.0 + 8.0 * 200.0);
    }

    #[test]
    fn narrower_pages_are_centred() {
        let layout = PageLayout::compute(&metrics(&[(200.0, 100.0), (100.0, 100.0)], 2), 400.0, 0.0);
        assert_eq!(layout.page_left(0), Some(0.0));
        assert_eq!(layout.page_left(1), Some(100.0));
    }

    #[test]
    fn page_at_and_visible_range() {
        let layout = PageLayout::compute(&metrics(&[(100.0, 100.0); 5], 5), 100.0, 10.0);
        // tops: 0, 110, 220, 330, 440

        assert_eq!(layout.page_at(0.0), Some(0));
        assert_eq!(layout.page_at(105.0), Some(0));
        assert_eq!(layout.page_at(110.0), Some(1));
        assert_eq!(layout.page_at(1e6), Some(4));

        // Top edge in the gap after page 0 starts at page 1
        assert_eq!(layout.visible_range(105.0, 300.0), Some(PageRange::new(1, 2)));
        assert_eq!(layout.visible_range(0.0, 110.0), Some(PageRange::new(0, 0)));
        assert_eq!(layout.visible_range(400.0, 2000.0), Some(PageRange::new(3, 4)));
    }

    #[test]
    fn empty_layout() {
        let layout = PageLayout::compute(&DocumentMetrics::new(0), 100.0, 8.0);
        assert_eq!(layout.total_height(), 0.0);
        assert_eq!(layout.page_at(0.0), None);
        assert_eq!(layout.visible_range(0.0, 100.0), None);
    }

    #[test]
    fn anchor_survives_relayout() {
        let partial = PageLayout::compute(&metrics(&[(100.0, 100.0)], 4), 100.0, 0.0);
        let anchor = partial.anchor_at(250.0).expect("anchor");
        assert_eq!(anchor.page, 2);
        assert!((anchor.fraction - 0.5).abs() < 1e-6);

        let full = PageLayout::compute(
            &metrics(&[(100.0, 100.0), (100.0, 300.0), (100.0, 200.0), (100.0, 100.0)], 4),
            100.0,
            0.0,
        );
        assert_eq!(full.resolve(anchor), 400.0 + 100.0);
    }
}
