//! Page metrics discovery
//!
//! The first few pages are measured synchronously on open so layout is usable
//! immediately; the rest are measured in chunks on the worker pool, each
//! chunk publishing progress back to the interaction thread.

use log::{debug, info, warn};

use super::request::{EngineEvent, RasterFault};
use super::shared::Shared;
use super::types::PageSize;

/// Known page geometry of the open document
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentMetrics {
    pages: Vec<PageSize>,
    page_count: usize,
    complete: bool,
}

impl DocumentMetrics {
    #[must_use]
    pub fn new(page_count: usize) -> Self {
        Self {
            pages: Vec::with_capacity(page_count),
            page_count,
            complete: page_count == 0,
        }
    }

    /// Build from parallel width/height arrays of which the first `scanned`
    /// entries are valid.
    #[must_use]
    pub fn from_dimensions(widths: &[f32], heights: &[f32], scanned: usize, complete: bool) -> Self {
        let page_count = widths.len().min(heights.len());
        let scanned = scanned.min(page_count);
        let pages = widths
            .iter()
            .zip(heights)
            .take(scanned)
            .map(|(&w, &h)| PageSize::new(w, h))
            .collect();
        Self {
            pages,
            page_count,
            complete: complete || scanned == page_count,
        }
    }

    /// Pages measured so far, in document order
    #[must_use]
    pub fn pages(&self) -> &[PageSize] {
        &self.pages
    }

    #[must_use]
    pub fn scanned(&self) -> usize {
        self.pages.len()
    }

    /// Page count reported by the document
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Pages the layout should account for. A scan that stopped early on
    /// failure is complete, and only its scanned prefix exists.
    #[must_use]
    pub fn layout_page_count(&self) -> usize {
        if self.complete {
            self.pages.len()
        } else {
            self.page_count
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    #[must_use]
    pub fn page(&self, index: usize) -> Option<PageSize> {
        self.pages.get(index).copied()
    }

    /// Copy limited to the first `count` scanned pages
    #[must_use]
    pub fn prefix(&self, count: usize, complete: bool) -> Self {
        let count = count.min(self.pages.len());
        Self {
            pages: self.pages[..count].to_vec(),
            page_count: self.page_count,
            complete: complete && (count == self.pages.len()),
        }
    }

    pub(crate) fn push(&mut self, size: PageSize) {
        if self.pages.len() < self.page_count {
            self.pages.push(size);
        }
        if self.pages.len() == self.page_count {
            self.complete = true;
        }
    }

    pub(crate) fn mark_complete(&mut self) {
        self.complete = true;
    }
}

/// Resume point for the background scan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanStep {
    pub next_index: usize,
}

enum PageScan {
    Measured,
    Stop,
}

fn scan_page(shared: &Shared, index: usize) -> PageScan {
    match shared.document.page_size(&shared.guard, index) {
        Ok(size) if size.is_valid() => {
            shared.metrics_mut().push(size);
            PageScan::Measured
        }
        Ok(size) => {
            warn!("Page {index} reported unusable size {size:?}; ending scan early");
            shared.metrics_mut().mark_complete();
            PageScan::Stop
        }
        Err(RasterFault::DocumentClosed) => {
            debug!("Document closed during scan of page {index}");
            PageScan::Stop
        }
        Err(e) => {
            warn!("Failed to measure page {index}: {e}; ending scan early");
            shared.metrics_mut().mark_complete();
            PageScan::Stop
        }
    }
}

/// Measure up to `initial_pages` pages on the calling thread. Returns the
/// background step to continue with, if pages remain.
pub(crate) fn scan_initial(shared: &Shared, initial_pages: usize) -> Option<ScanStep> {
    let page_count = shared.metrics().page_count();
    for index in 0..initial_pages.min(page_count) {
        if let PageScan::Stop = scan_page(shared, index) {
            return None;
        }
    }

    let metrics = shared.metrics();
    if metrics.is_complete() {
        info!("Measured all {} pages synchronously", metrics.scanned());
        None
    } else {
        Some(ScanStep {
            next_index: metrics.scanned(),
        })
    }
}

/// Measure one chunk on a worker thread and publish progress.
pub(crate) fn run_scan_step(shared: &Shared, step: ScanStep, chunk: usize) -> Option<ScanStep> {
    if shared.guard.is_destroyed() {
        return None;
    }

    let page_count = shared.metrics().page_count();
    let end = step.next_index.saturating_add(chunk.max(1)).min(page_count);
    let mut stopped = false;
    for index in step.next_index..end {
        if shared.guard.is_destroyed() {
            return None;
        }
        if let PageScan::Stop = scan_page(shared, index) {
            stopped = true;
            break;
        }
    }

    if shared.guard.is_destroyed() {
        return None;
    }

    let (scanned, complete) = {
        let metrics = shared.metrics();
        (metrics.scanned(), metrics.is_complete())
    };
    shared.publish(EngineEvent::ScanProgress { scanned, complete });

    if complete {
        info!("Page scan complete: {scanned} pages");
        None
    } else if stopped {
        None
    } else {
        Some(ScanStep {
            next_index: scanned,
        })
    }
}
