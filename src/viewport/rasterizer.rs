//! Page rasterizer boundary and the single shared document handle

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::lifecycle::LifecycleGuard;
use super::request::RasterFault;
use super::types::{Bitmap, PageSize};

/// Where the rasterizer reads the document from. Opaque to the engine.
#[derive(Clone, Debug)]
pub enum DocumentSource {
    Path(PathBuf),
    Memory { name: String, bytes: Arc<[u8]> },
}

impl DocumentSource {
    /// Stable identifier used as the persistence key
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Path(path) => path.to_string_lossy().into_owned(),
            Self::Memory { name, .. } => format!("memory:{name}"),
        }
    }
}

/// Opens documents. Implementations wrap a concrete format library.
pub trait PageRasterizer: Send + Sync {
    fn open_document(
        &self,
        source: &DocumentSource,
    ) -> Result<Box<dyn RasterDocument>, RasterFault>;
}

/// An open document. Not safe for concurrent use; the engine serializes access.
pub trait RasterDocument: Send {
    fn page_count(&self) -> usize;

    /// Open one page. Dropping the returned handle closes the page.
    fn open_page(&mut self, index: usize) -> Result<Box<dyn RasterPage + '_>, RasterFault>;

    /// Close the document. Called exactly once, from engine teardown.
    fn close(self: Box<Self>) {}
}

/// An open page
pub trait RasterPage {
    fn size(&self) -> PageSize;

    fn render(&mut self, target: &mut Bitmap, scale_x: f32, scale_y: f32)
    -> Result<(), RasterFault>;
}

/// Owner of the one document handle. Every access goes through
/// [`DocumentSlot::with_page`], which checks liveness before taking the lock
/// and again after acquiring it. Only [`DocumentSlot::release`] closes the handle.
pub struct DocumentSlot {
    live: AtomicBool,
    page_count: usize,
    handle: Mutex<Option<Box<dyn RasterDocument>>>,
}

impl DocumentSlot {
    #[must_use]
    pub fn new(document: Box<dyn RasterDocument>) -> Self {
        Self {
            live: AtomicBool::new(true),
            page_count: document.page_count(),
            handle: Mutex::new(Some(document)),
        }
    }

    /// Slot for a document that failed to open
    #[must_use]
    pub fn empty() -> Self {
        Self {
            live: AtomicBool::new(false),
            page_count: 0,
            handle: Mutex::new(None),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Page count reported when the document was opened
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Run `f` against an open page while holding the document lock
    pub fn with_page<T>(
        &self,
        guard: &LifecycleGuard,
        index: usize,
        f: impl FnOnce(&mut dyn RasterPage) -> Result<T, RasterFault>,
    ) -> Result<T, RasterFault> {
        if guard.is_destroyed() || !self.is_live() {
            return Err(RasterFault::DocumentClosed);
        }

        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);

        // Teardown may have started while we waited for the lock
        if guard.is_destroyed() {
            return Err(RasterFault::DocumentClosed);
        }
        let Some(document) = slot.as_mut() else {
            return Err(RasterFault::DocumentClosed);
        };

        let page_count = document.page_count();
        if index >= page_count {
            return Err(RasterFault::PageOutOfRange { index, page_count });
        }

        let mut page = document.open_page(index)?;
        f(&mut *page)
    }

    /// Read one page's dimensions
    pub fn page_size(&self, guard: &LifecycleGuard, index: usize) -> Result<PageSize, RasterFault> {
        self.with_page(guard, index, |page| Ok(page.size()))
    }

    /// Close the handle. Waits for any in-progress page access to finish.
    pub(crate) fn release(&self) {
        self.live.store(false, Ordering::Release);
        let document = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(document) = document {
            document.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{RasterProbe, SyntheticRasterizer};

    fn open_slot(pages: usize) -> (DocumentSlot, Arc<RasterProbe>) {
        let rasterizer = SyntheticRasterizer::uniform(pages, 600.0, 800.0);
        let probe = rasterizer.probe();
        let document = rasterizer
            .open_document(&DocumentSource::Path("test.pdf".into()))
            .expect("synthetic open");
        (DocumentSlot::new(document), probe)
    }

    #[test]
    fn with_page_reads_size() {
        let (slot, probe) = open_slot(3);
        let guard = LifecycleGuard::new();

        let size = slot.page_size(&guard, 1).expect("page 1");
        assert_eq!(size, PageSize::new(600.0, 800.0));
        assert_eq!(probe.page_opens(), 1);
    }

    #[test]
    fn with_page_rejects_out_of_range() {
        let (slot, probe) = open_slot(3);
        let guard = LifecycleGuard::new();

        let err = slot.page_size(&guard, 7).unwrap_err();
        assert!(matches!(
            err,
            RasterFault::PageOutOfRange {
                index: 7,
                page_count: 3
            }
        ));
        assert_eq!(probe.page_opens(), 0);
    }

    #[test]
    fn released_slot_is_never_touched() {
        let (slot, probe) = open_slot(3);
        let guard = LifecycleGuard::new();

        slot.release();
        assert!(!slot.is_live());
        assert_eq!(probe.document_closes(), 1);

        assert!(matches!(
            slot.page_size(&guard, 0),
            Err(RasterFault::DocumentClosed)
        ));
        assert_eq!(probe.page_opens(), 0);

        // Second release is a no-op
        slot.release();
        assert_eq!(probe.document_closes(), 1);
    }

    #[test]
    fn destroyed_guard_blocks_access() {
        let (slot, probe) = open_slot(3);
        let guard = LifecycleGuard::new();
        assert!(guard.begin_teardown());

        assert!(matches!(
            slot.page_size(&guard, 0),
            Err(RasterFault::DocumentClosed)
        ));
        assert_eq!(probe.page_opens(), 0);
    }
}
