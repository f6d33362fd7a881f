//! Paginated document viewport: page metrics discovery, tile cache, render
//! scheduling, gesture handling and ordered teardown

mod cache;
mod engine;
mod gesture;
mod layout;
mod lifecycle;
mod metrics;
mod rasterizer;
mod request;
mod scheduler;
mod shared;
mod state;
mod types;
mod worker;
mod zoom;

pub use cache::{CacheStats, EvictionPolicy, MIN_RESIDENT_TILES, RerenderOnEvict, TileCache};
pub use engine::{EngineStatus, ViewportEngine};
pub use layout::{LayoutAnchor, PageLayout};
pub use lifecycle::{LifecycleGuard, LifecycleState};
pub use metrics::DocumentMetrics;
pub use rasterizer::{DocumentSource, PageRasterizer, RasterDocument, RasterPage};
pub use request::{EngineEvent, RasterFault};
pub use shared::{TargetState, ViewTarget};
pub use state::ViewportController;
pub use types::{
    Bitmap, DocPoint, PagePlacement, PageRange, PageSize, ScreenPoint, ScreenRect, ScreenSize,
    Surface, Tile, TileKey, ZoomBucket,
};
pub use zoom::{ViewportState, ZoomLimits};

pub(crate) use state::ControllerSettings;
pub(crate) use worker::TileLimits;
