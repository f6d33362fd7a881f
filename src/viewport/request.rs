//! Render job, event and fault types shared between the interaction thread and workers

use std::sync::atomic::{AtomicU64, Ordering};

use super::metrics::ScanStep;
use super::types::TileKey;

/// Engine-wide epoch. Jobs capture it at submission; results are applied
/// only while it is unchanged.
#[derive(Debug, Default)]
pub struct Generation(AtomicU64);

impl Generation {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advance the epoch, returning the new value
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// One page render at one zoom, tagged with the generation it was planned under
#[derive(Clone, Copy, Debug)]
pub struct RenderJob {
    pub key: TileKey,
    /// Exact zoom at submission (the key only keeps the bucket)
    pub zoom: f32,
    /// Screen pixels per document unit at zoom 1
    pub fit_scale: f32,
    pub generation: u64,
}

/// Work pulled by pool threads
#[derive(Debug)]
pub enum WorkItem {
    Render(RenderJob),
    Scan(ScanStep),
    Shutdown,
}

/// Worker → interaction thread handoff
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// A tile landed; the next paint can use it
    Repaint,
    /// Background metrics scan advanced
    ScanProgress { scanned: usize, complete: bool },
    /// A visible page lost its tile to eviction
    Rerender { page: usize },
}

/// Errors at the rasterizer boundary
#[derive(Debug, thiserror::Error)]
pub enum RasterFault {
    #[error("out of memory allocating {bytes} byte raster")]
    OutOfMemory { bytes: usize },

    #[error("page {index} out of range (document has {page_count} pages)")]
    PageOutOfRange { index: usize, page_count: usize },

    #[error("document handle is closed")]
    DocumentClosed,

    #[error("{detail}")]
    Backend { detail: String },
}

impl RasterFault {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend { detail: msg.into() }
    }
}
