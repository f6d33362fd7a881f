//! In-memory rasterizer producing flat-colored pages of known sizes.
//!
//! Drives the demo binary and the test suite. Every touch of a document
//! handle is counted on a shared [`RasterProbe`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::viewport::{
    Bitmap, DocumentSource, PageRasterizer, PageSize, RasterDocument, RasterFault, RasterPage,
};

/// Counters shared by a rasterizer and every document it opens
#[derive(Debug, Default)]
pub struct RasterProbe {
    document_opens: AtomicUsize,
    document_closes: AtomicUsize,
    page_opens: AtomicUsize,
    renders: AtomicUsize,
    open_pages: AtomicUsize,
    overlapping_opens: AtomicUsize,
}

impl RasterProbe {
    pub fn document_opens(&self) -> usize {
        self.document_opens.load(Ordering::SeqCst)
    }

    pub fn document_closes(&self) -> usize {
        self.document_closes.load(Ordering::SeqCst)
    }

    pub fn page_opens(&self) -> usize {
        self.page_opens.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    /// Page opens plus renders
    pub fn handle_accesses(&self) -> usize {
        self.page_opens() + self.renders()
    }

    /// Times a page was opened while another page of the same document was
    /// still open. Always zero when access is serialized.
    pub fn overlapping_opens(&self) -> usize {
        self.overlapping_opens.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default)]
struct Behaviour {
    measure_delay: Duration,
    render_delay: Duration,
    broken_pages: HashSet<usize>,
    failing_renders: HashSet<usize>,
    out_of_memory: HashSet<usize>,
    unavailable: bool,
}

/// Rasterizer over a fixed list of page sizes
#[derive(Clone, Debug)]
pub struct SyntheticRasterizer {
    pages: Arc<[PageSize]>,
    behaviour: Arc<Behaviour>,
    probe: Arc<RasterProbe>,
}

impl SyntheticRasterizer {
    #[must_use]
    pub fn new(pages: Vec<PageSize>) -> Self {
        Self {
            pages: pages.into(),
            behaviour: Arc::new(Behaviour::default()),
            probe: Arc::new(RasterProbe::default()),
        }
    }

    #[must_use]
    pub fn uniform(page_count: usize, width: f32, height: f32) -> Self {
        Self::new(vec![PageSize::new(width, height); page_count])
    }

    /// Pages alternating between portrait and a taller variant, so
    /// estimated layout differs from the measured one
    #[must_use]
    pub fn mixed(page_count: usize) -> Self {
        Self::new(
            (0..page_count)
                .map(|i| match i % 3 {
                    0 => PageSize::new(612.0, 792.0),
                    1 => PageSize::new(612.0, 1008.0),
                    _ => PageSize::new(595.0, 842.0),
                })
                .collect(),
        )
    }

    fn behaviour_mut(&mut self) -> &mut Behaviour {
        Arc::make_mut(&mut self.behaviour)
    }

    /// Sleep this long per page measured
    #[must_use]
    pub fn with_measure_delay(mut self, delay: Duration) -> Self {
        self.behaviour_mut().measure_delay = delay;
        self
    }

    /// Sleep this long per page rendered
    #[must_use]
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.behaviour_mut().render_delay = delay;
        self
    }

    /// Opening `page` fails
    #[must_use]
    pub fn broken_page(mut self, page: usize) -> Self {
        self.behaviour_mut().broken_pages.insert(page);
        self
    }

    /// Rendering `page` fails with a backend error
    #[must_use]
    pub fn failing_render(mut self, page: usize) -> Self {
        self.behaviour_mut().failing_renders.insert(page);
        self
    }

    /// Rendering `page` reports an allocation failure
    #[must_use]
    pub fn out_of_memory_on(mut self, page: usize) -> Self {
        self.behaviour_mut().out_of_memory.insert(page);
        self
    }

    /// Every open fails
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.behaviour_mut().unavailable = true;
        self
    }

    #[must_use]
    pub fn probe(&self) -> Arc<RasterProbe> {
        self.probe.clone()
    }

    #[must_use]
    pub fn page_sizes(&self) -> &[PageSize] {
        &self.pages
    }
}

impl PageRasterizer for SyntheticRasterizer {
    fn open_document(
        &self,
        source: &DocumentSource,
    ) -> Result<Box<dyn RasterDocument>, RasterFault> {
        if self.behaviour.unavailable {
            return Err(RasterFault::backend(format!(
                "cannot open {}",
                source.id()
            )));
        }
        self.probe.document_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticDocument {
            pages: self.pages.clone(),
            behaviour: self.behaviour.clone(),
            probe: self.probe.clone(),
        }))
    }
}

struct SyntheticDocument {
    pages: Arc<[PageSize]>,
    behaviour: Arc<Behaviour>,
    probe: Arc<RasterProbe>,
}

impl RasterDocument for SyntheticDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn open_page(&mut self, index: usize) -> Result<Box<dyn RasterPage + '_>, RasterFault> {
        self.probe.page_opens.fetch_add(1, Ordering::SeqCst);
        if self.behaviour.broken_pages.contains(&index) {
            return Err(RasterFault::backend(format!("page {index} is damaged")));
        }
        let size = *self.pages.get(index).ok_or(RasterFault::PageOutOfRange {
            index,
            page_count: self.pages.len(),
        })?;

        if self.probe.open_pages.fetch_add(1, Ordering::SeqCst) > 0 {
            self.probe.overlapping_opens.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Box::new(SyntheticPage {
            index,
            size,
            behaviour: &self.behaviour,
            probe: &self.probe,
        }))
    }

    fn close(self: Box<Self>) {
        self.probe.document_closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct SyntheticPage<'a> {
    index: usize,
    size: PageSize,
    behaviour: &'a Behaviour,
    probe: &'a RasterProbe,
}

impl RasterPage for SyntheticPage<'_> {
    fn size(&self) -> PageSize {
        if !self.behaviour.measure_delay.is_zero() {
            thread::sleep(self.behaviour.measure_delay);
        }
        self.size
    }

    fn render(&mut self, target: &mut Bitmap, scale_x: f32, scale_y: f32) -> Result<(), RasterFault> {
        self.probe.renders.fetch_add(1, Ordering::SeqCst);
        if !self.behaviour.render_delay.is_zero() {
            thread::sleep(self.behaviour.render_delay);
        }
        if self.behaviour.out_of_memory.contains(&self.index) {
            return Err(RasterFault::OutOfMemory {
                bytes: target.byte_len(),
            });
        }
        if self.behaviour.failing_renders.contains(&self.index) {
            return Err(RasterFault::backend(format!("render of page {} failed", self.index)));
        }
        if !(scale_x > 0.0 && scale_y > 0.0) {
            return Err(RasterFault::backend("non-positive render scale"));
        }

        let [r, g, b] = page_color(self.index);
        let width = target.width as usize;
        for (i, pixel) in target.pixels.chunks_exact_mut(Bitmap::BYTES_PER_PIXEL).enumerate() {
            // A darker band along the top edge makes page boundaries visible
            let shade = if i / width.max(1) < 4 { 2 } else { 1 };
            pixel.copy_from_slice(&[r / shade, g / shade, b / shade, 0xFF]);
        }
        Ok(())
    }
}

impl Drop for SyntheticPage<'_> {
    fn drop(&mut self) {
        self.probe.open_pages.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Light color derived from the page index
#[must_use]
pub fn page_color(page: usize) -> [u8; 3] {
    let h = (page as u32).wrapping_mul(2_654_435_761);
    [
        0x80 | (h >> 24) as u8,
        0x80 | (h >> 16) as u8,
        0x80 | (h >> 8) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> DocumentSource {
        DocumentSource::Path("synthetic.pdf".into())
    }

    #[test]
    fn renders_page_color() {
        let rasterizer = SyntheticRasterizer::uniform(2, 10.0, 10.0);
        let mut document = rasterizer.open_document(&source()).expect("open");
        let mut bitmap = Bitmap::try_alloc(4, 8).expect("alloc");

        document
            .open_page(1)
            .expect("page")
            .render(&mut bitmap, 1.0, 1.0)
            .expect("render");

        let [r, g, b] = page_color(1);
        let last = bitmap.pixels.len() - 4;
        assert_eq!(&bitmap.pixels[last..], &[r, g, b, 0xFF]);
        assert_eq!(rasterizer.probe().renders(), 1);
    }

    #[test]
    fn counts_handle_use() {
        let rasterizer = SyntheticRasterizer::uniform(3, 10.0, 10.0);
        let probe = rasterizer.probe();
        let mut document = rasterizer.open_document(&source()).expect("open");

        {
            let first = document.open_page(0).expect("page");
            assert_eq!(first.size(), PageSize::new(10.0, 10.0));
        }
        assert!(document.open_page(5).is_err());
        document.close();

        assert_eq!(probe.document_opens(), 1);
        assert_eq!(probe.page_opens(), 2);
        assert_eq!(probe.document_closes(), 1);
        assert_eq!(probe.overlapping_opens(), 0);
    }

    #[test]
    fn configured_failures() {
        let rasterizer = SyntheticRasterizer::uniform(3, 10.0, 10.0)
            .broken_page(0)
            .out_of_memory_on(1)
            .failing_render(2);
        let mut document = rasterizer.open_document(&source()).expect("open");
        let mut bitmap = Bitmap::try_alloc(2, 2).expect("alloc");

        assert!(document.open_page(0).is_err());
        assert!(matches!(
            document.open_page(1).expect("page").render(&mut bitmap, 1.0, 1.0),
            Err(RasterFault::OutOfMemory { .. })
        ));
        assert!(matches!(
            document.open_page(2).expect("page").render(&mut bitmap, 1.0, 1.0),
            Err(RasterFault::Backend { .. })
        ));

        assert!(SyntheticRasterizer::uniform(1, 1.0, 1.0)
            .unavailable()
            .open_document(&source())
            .is_err());
    }
}
