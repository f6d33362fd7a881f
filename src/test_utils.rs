pub mod test_helpers {
    use std::time::{Duration, Instant};

    use crate::settings::EngineConfig;
    use crate::synthetic::SyntheticRasterizer;
    use crate::viewport::{DocumentSource, ScreenRect, Surface, Tile, ViewportEngine};

    /// One call the engine made on a surface
    #[derive(Clone, Debug, PartialEq)]
    pub enum DrawCall {
        Background { page: usize, rect: ScreenRect },
        Tile { page: usize, width: u32, height: u32, rect: ScreenRect },
    }

    /// Surface that records draw calls instead of painting
    #[derive(Debug, Default)]
    pub struct RecordingSurface {
        pub calls: Vec<DrawCall>,
    }

    impl RecordingSurface {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn clear(&mut self) {
            self.calls.clear();
        }

        pub fn tiles_drawn(&self) -> usize {
            self.calls
                .iter()
                .filter(|call| matches!(call, DrawCall::Tile { .. }))
                .count()
        }

        pub fn backgrounds_drawn(&self) -> usize {
            self.calls
                .iter()
                .filter(|call| matches!(call, DrawCall::Background { .. }))
                .count()
        }

        /// Pages drawn, in draw order
        pub fn pages(&self) -> Vec<usize> {
            self.calls
                .iter()
                .map(|call| match call {
                    DrawCall::Background { page, .. } | DrawCall::Tile { page, .. } => *page,
                })
                .collect()
        }
    }

    impl Surface for RecordingSurface {
        fn fill_page_background(&mut self, page: usize, rect: ScreenRect) {
            self.calls.push(DrawCall::Background { page, rect });
        }

        fn draw_tile(&mut self, page: usize, tile: &Tile, rect: ScreenRect) {
            self.calls.push(DrawCall::Tile {
                page,
                width: tile.bitmap.width,
                height: tile.bitmap.height,
                rect,
            });
        }
    }

    /// Poll `condition` every couple of milliseconds until it holds or
    /// `timeout` passes
    pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Pump engine events until no work is left
    pub fn settle(engine: &mut ViewportEngine, timeout: Duration) -> bool {
        wait_until(timeout, || {
            engine.poll_events();
            engine.is_idle()
        })
    }

    /// Config with a fixed cache budget instead of a share of system memory
    pub fn test_config(cache_bytes: usize) -> EngineConfig {
        EngineConfig {
            cache_memory_fraction: 1.0,
            max_cache_bytes: cache_bytes,
            ..EngineConfig::default()
        }
    }

    /// Open a synthetic document and give it a screen
    pub fn open_engine(
        rasterizer: &SyntheticRasterizer,
        config: EngineConfig,
        width: f32,
        height: f32,
    ) -> ViewportEngine {
        let source = DocumentSource::Path("synthetic.pdf".into());
        let mut engine = ViewportEngine::open(config, rasterizer, &source);
        engine.on_screen_size_changed(width, height);
        engine
    }
}
