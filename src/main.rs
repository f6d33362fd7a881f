use std::fs::File;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use image::{Rgba, RgbaImage};
use log::{info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use pageview::persistence::JsonViewportStore;
use pageview::settings::EngineConfig;
use pageview::synthetic::SyntheticRasterizer;
use pageview::viewport::{ScreenRect, Tile};
use pageview::{DocumentSource, Surface, ViewportEngine};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);
const DESK_COLOR: Rgba<u8> = Rgba([0x30, 0x30, 0x30, 0xFF]);
const PAPER_COLOR: Rgba<u8> = Rgba([0xEE, 0xEE, 0xEE, 0xFF]);

/// Render one frame of a synthetic document to a PNG
#[derive(Parser)]
#[command(name = "pageview", version, about)]
struct Args {
    /// Number of pages in the synthetic document
    #[arg(long, default_value_t = 200)]
    pages: usize,

    /// Screen width in pixels
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Screen height in pixels
    #[arg(long, default_value_t = 1200)]
    height: u32,

    #[arg(long, default_value_t = 1.0)]
    zoom: f32,

    /// Position through the document, 0.0 to 1.0, as the fast-scroll thumb would set it
    #[arg(long, default_value_t = 0.0)]
    scroll_fraction: f32,

    /// Jump to this page (0-based) instead of using --scroll-fraction
    #[arg(long)]
    page: Option<usize>,

    /// Simulated per-page measuring cost
    #[arg(long, default_value_t = 0)]
    measure_delay_ms: u64,

    /// Engine config file; defaults to the user config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file of saved viewport positions to restore from and save to
    #[arg(long)]
    positions: Option<PathBuf>,

    #[arg(short, long, default_value = "frame.png")]
    out: PathBuf,

    #[arg(long, default_value = "pageview.log")]
    log_file: PathBuf,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

/// Surface painting into an RGBA image with nearest-neighbour scaling
struct PngSurface {
    canvas: RgbaImage,
}

impl PngSurface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::from_pixel(width, height, DESK_COLOR),
        }
    }

    /// Canvas pixel span covered by `rect`, clipped to the canvas
    fn clip(&self, rect: ScreenRect) -> Option<(u32, u32, u32, u32)> {
        let x0 = rect.x.max(0.0).floor() as u32;
        let y0 = rect.y.max(0.0).floor() as u32;
        let x1 = (rect.right().min(self.canvas.width() as f32)).ceil().max(0.0) as u32;
        let y1 = (rect.bottom().min(self.canvas.height() as f32)).ceil().max(0.0) as u32;
        (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
    }
}

impl Surface for PngSurface {
    fn fill_page_background(&mut self, _page: usize, rect: ScreenRect) {
        let Some((x0, y0, x1, y1)) = self.clip(rect) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                self.canvas.put_pixel(x, y, PAPER_COLOR);
            }
        }
    }

    fn draw_tile(&mut self, _page: usize, tile: &Tile, rect: ScreenRect) {
        let Some((x0, y0, x1, y1)) = self.clip(rect) else {
            return;
        };
        let bitmap = &tile.bitmap;
        if bitmap.width == 0 || bitmap.height == 0 || rect.width <= 0.0 || rect.height <= 0.0 {
            return;
        }
        let sx = bitmap.width as f32 / rect.width;
        let sy = bitmap.height as f32 / rect.height;

        for y in y0..y1 {
            let src_y = (((y as f32 - rect.y) * sy) as u32).min(bitmap.height - 1);
            for x in x0..x1 {
                let src_x = (((x as f32 - rect.x) * sx) as u32).min(bitmap.width - 1);
                let offset = (src_y as usize * bitmap.width as usize + src_x as usize) * 4;
                if let Some(px) = bitmap.pixels.get(offset..offset + 4) {
                    self.canvas.put_pixel(x, y, Rgba([px[0], px[1], px[2], px[3]]));
                }
            }
        }
    }
}

/// Pump events until the engine has nothing left to do
fn settle(engine: &mut ViewportEngine, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        engine.poll_events();
        if engine.is_idle() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    WriteLogger::init(
        args.log_level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("creating log file {}", args.log_file.display()))?,
    )?;

    info!("Starting pageview");

    if args.width == 0 || args.height == 0 {
        bail!("screen size must be non-zero, got {}x{}", args.width, args.height);
    }

    let config = match &args.config {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::load(),
    };
    let mut positions = JsonViewportStore::load_or_ephemeral(args.positions.as_deref());

    let rasterizer = SyntheticRasterizer::mixed(args.pages)
        .with_measure_delay(Duration::from_millis(args.measure_delay_ms));
    let source = DocumentSource::Path(PathBuf::from(format!("synthetic-{}.pdf", args.pages)));

    let mut engine = ViewportEngine::open(config, &rasterizer, &source);
    if !engine.is_active() {
        bail!("document unavailable: {:?}", engine.status());
    }
    engine.on_screen_size_changed(args.width as f32, args.height as f32);

    let restored = args.positions.is_some()
        && args.page.is_none()
        && args.scroll_fraction == 0.0
        && engine.restore_saved(&positions);

    if !settle(&mut engine, SETTLE_TIMEOUT) {
        warn!("Engine did not settle after the scan; continuing");
    }

    if !restored {
        match args.page {
            Some(page) => engine.scroll_to_page(page),
            None => {
                engine.fast_scroll_begin();
                engine.fast_scroll_drag(args.scroll_fraction.clamp(0.0, 1.0) * args.height as f32);
                engine.fast_scroll_end();
            }
        }
        engine.restore_state(engine.scroll_y_position(), args.zoom, engine.pan_x());
    }

    // First draw schedules the visible pages; the second paints their tiles
    let mut surface = PngSurface::new(args.width, args.height);
    engine.draw(&mut surface);
    if !settle(&mut engine, SETTLE_TIMEOUT) {
        warn!("Renders still pending after {SETTLE_TIMEOUT:?}");
    }
    let drawn = engine.draw(&mut surface);

    surface
        .canvas
        .save(&args.out)
        .with_context(|| format!("writing {}", args.out.display()))?;

    let stats = engine.cache_stats();
    println!(
        "{} pages drawn at zoom {:.2} (page {} of {}), {} tiles / {} bytes cached -> {}",
        drawn,
        engine.zoom_level(),
        engine.current_page().map_or(0, |page| page + 1),
        engine.page_count(),
        stats.tile_count,
        stats.bytes_used,
        args.out.display()
    );

    if let Err(e) = engine.save_state(&mut positions) {
        warn!("Failed to save viewport position: {e}");
    }
    engine.shutdown();

    info!("Shutting down pageview");
    Ok(())
}
