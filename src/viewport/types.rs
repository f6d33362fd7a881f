//! Core types for the viewport engine

use super::request::RasterFault;

/// Page dimensions in document units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Usable for layout: finite and strictly positive in both axes
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Zoom rounded to one decimal, stored as tenths for stable hashing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoomBucket(u16);

impl ZoomBucket {
    #[must_use]
    pub fn from_zoom(zoom: f32) -> Self {
        let tenths = if zoom.is_finite() {
            (zoom * 10.0).round().clamp(1.0, f32::from(u16::MAX))
        } else {
            10.0
        };
        Self(tenths as u16)
    }

    #[must_use]
    pub fn zoom(self) -> f32 {
        f32::from(self.0) / 10.0
    }

    #[must_use]
    pub fn distance(self, other: Self) -> u16 {
        self.0.abs_diff(other.0)
    }
}

/// Cache key for a rendered page tile
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub page: usize,
    pub bucket: ZoomBucket,
}

impl TileKey {
    #[must_use]
    pub fn new(page: usize, zoom: f32) -> Self {
        Self {
            page,
            bucket: ZoomBucket::from_zoom(zoom),
        }
    }
}

/// RGBA raster buffer handed to the rasterizer
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Allocate a white buffer, reporting allocation failure instead of aborting
    pub fn try_alloc(width: u32, height: u32) -> Result<Self, RasterFault> {
        let bytes = Self::byte_len_for(width, height);
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(bytes)
            .map_err(|_| RasterFault::OutOfMemory { bytes })?;
        pixels.resize(bytes, 0xFF);
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    #[must_use]
    pub fn byte_len_for(width: u32, height: u32) -> usize {
        (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(Self::BYTES_PER_PIXEL)
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// A rendered page at one zoom bucket
pub struct Tile {
    pub bitmap: Bitmap,
    pub page: usize,
    /// Pixels per document unit used for this raster
    pub scale: f32,
}

impl Tile {
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.bitmap.byte_len()
    }
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("page", &self.page)
            .field("width", &self.bitmap.width)
            .field("height", &self.bitmap.height)
            .field("scale", &self.scale)
            .field("bytes", &self.byte_size())
            .finish_non_exhaustive()
    }
}

/// Inclusive range of page indices
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRange {
    pub first: usize,
    pub last: usize,
}

impl PageRange {
    #[must_use]
    pub fn new(first: usize, last: usize) -> Self {
        Self {
            first: first.min(last),
            last: first.max(last),
        }
    }

    #[must_use]
    pub fn contains(self, page: usize) -> bool {
        page >= self.first && page <= self.last
    }

    /// Grow by `radius` pages on both sides, clipped to `[0, page_count)`.
    /// Returns `None` when nothing of the range lies below `page_count`.
    #[must_use]
    pub fn expand(self, radius: usize, page_count: usize) -> Option<Self> {
        if page_count == 0 || self.first >= page_count {
            return None;
        }
        Some(Self {
            first: self.first.saturating_sub(radius),
            last: self.last.saturating_add(radius).min(page_count - 1),
        })
    }

    pub fn iter(self) -> impl Iterator<Item = usize> {
        self.first..=self.last
    }
}

/// Point in screen pixels
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Point in document space (zoom = 1 pixels, y measured from the document top)
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct DocPoint {
    pub x: f32,
    pub y: f32,
}

/// Axis-aligned rectangle in screen pixels
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    #[must_use]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    #[must_use]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }
}

/// Screen size in pixels
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ScreenSize {
    pub width: f32,
    pub height: f32,
}

impl ScreenSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Screen placement of one visible page
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PagePlacement {
    pub page: usize,
    pub rect: ScreenRect,
}

/// Paint target supplied by the platform paint callback
pub trait Surface {
    /// Draw the plain page background when no tile is available
    fn fill_page_background(&mut self, page: usize, rect: ScreenRect);

    /// Draw a cached tile stretched to `rect`
    fn draw_tile(&mut self, page: usize, tile: &Tile, rect: ScreenRect);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_bucket_rounds_to_one_decimal() {
        assert_eq!(ZoomBucket::from_zoom(1.04), ZoomBucket::from_zoom(1.0));
        assert_ne!(ZoomBucket::from_zoom(1.06), ZoomBucket::from_zoom(1.0));
        assert!((ZoomBucket::from_zoom(2.46).zoom() - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn zoom_bucket_handles_non_finite() {
        assert_eq!(ZoomBucket::from_zoom(f32::NAN), ZoomBucket::from_zoom(1.0));
    }

    #[test]
    fn page_range_expand_clamps_to_known_pages() {
        let range = PageRange::new(2, 4);
        assert_eq!(range.expand(3, 100), Some(PageRange::new(0, 7)));
        assert_eq!(range.expand(3, 5), Some(PageRange::new(0, 4)));
        assert_eq!(PageRange::new(10, 12).expand(3, 10), None);
    }

    #[test]
    fn bitmap_allocates_rgba() {
        let bitmap = Bitmap::try_alloc(3, 2).expect("small alloc");
        assert_eq!(bitmap.byte_len(), 24);
    }
}
