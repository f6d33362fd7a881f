// Export modules for use in tests
pub mod persistence;
pub mod settings;
pub mod synthetic;
pub mod viewport;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the engine entry points
pub use persistence::{JsonViewportStore, SavedViewport, ViewportPersistence};
pub use settings::EngineConfig;
pub use viewport::{DocumentSource, EngineStatus, PageRasterizer, Surface, ViewportEngine};
