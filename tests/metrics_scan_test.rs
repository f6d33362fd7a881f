use std::time::{Duration, Instant};

use pageview::persistence::JsonViewportStore;
use pageview::settings::EngineConfig;
use pageview::synthetic::SyntheticRasterizer;
use pageview::test_utils::test_helpers::{RecordingSurface, open_engine, settle, wait_until};
use pageview::viewport::ScreenPoint;

const SETTLE: Duration = Duration::from_secs(20);

#[test]
fn test_fast_scroll_before_scan_completes_settles_on_same_page() {
    let rasterizer = SyntheticRasterizer::mixed(500).with_measure_delay(Duration::from_millis(2));
    let mut engine = open_engine(&rasterizer, EngineConfig::default(), 600.0, 1000.0);

    // Only the synchronous prefix is known, the rest is estimated
    assert!(!engine.scan_complete());
    assert_eq!(engine.controller().layout().page_count(), 500);

    engine.fast_scroll_begin();
    engine.fast_scroll_drag(500.0);
    let label = engine.fast_scroll_indicator().expect("indicator while dragging");
    assert!(label.ends_with("/ 500"), "{label}");
    engine.fast_scroll_end();
    assert_eq!(engine.fast_scroll_indicator(), None);

    let page = engine.current_page().expect("current page");
    assert!((200..300).contains(&page), "landed on {page}");

    assert!(settle(&mut engine, SETTLE));
    assert!(engine.scan_complete());
    assert_eq!(engine.scanned_pages(), 500);

    // Relayout with measured sizes keeps the same page at the top
    assert_eq!(engine.current_page(), Some(page));
    let layout = engine.controller().layout();
    let top = layout.page_top(page).expect("page top");
    let height = layout.page_height(page).expect("page height");
    let scroll = engine.scroll_y_position();
    assert!(scroll >= top - 1e-2 && scroll <= top + height + 1e-2);

    // And it renders once measured
    engine.draw(&mut RecordingSurface::new());
    assert!(settle(&mut engine, SETTLE));
    let mut surface = RecordingSurface::new();
    engine.draw(&mut surface);
    assert!(surface.pages().contains(&page));
    assert_eq!(surface.backgrounds_drawn(), 0);
}

#[test]
fn test_scan_progress_is_published() {
    let rasterizer = SyntheticRasterizer::mixed(120).with_measure_delay(Duration::from_millis(1));
    let mut engine = open_engine(&rasterizer, EngineConfig::default(), 600.0, 1000.0);
    let initial = engine.scanned_pages();
    assert_eq!(initial, EngineConfig::default().initial_scan_pages);

    assert!(wait_until(SETTLE, || {
        engine.poll_events();
        engine.controller().metrics().scanned() > initial
    }));
    assert!(settle(&mut engine, SETTLE));
    assert_eq!(engine.controller().metrics().scanned(), 120);
    assert_eq!(engine.controller().layout().measured(), 120);
}

#[test]
fn test_broken_page_ends_scan_early() {
    let rasterizer = SyntheticRasterizer::uniform(40, 600.0, 800.0).broken_page(25);
    let mut engine = open_engine(&rasterizer, EngineConfig::default(), 400.0, 800.0);
    assert!(settle(&mut engine, SETTLE));

    assert!(engine.scan_complete());
    assert_eq!(engine.scanned_pages(), 25);
    assert_eq!(engine.controller().layout().page_count(), 25);

    // Past the last measured page: clamped to the end of the shortened document
    engine.scroll_to_page(39);
    assert!(engine.current_page() >= Some(23));
    let range = engine.visible_range().expect("visible");
    assert_eq!(range.last, 24);
}

#[test]
fn test_broken_page_inside_initial_scan() {
    let rasterizer = SyntheticRasterizer::uniform(40, 600.0, 800.0).broken_page(3);
    let mut engine = open_engine(&rasterizer, EngineConfig::default(), 400.0, 800.0);

    assert!(engine.scan_complete());
    assert_eq!(engine.scanned_pages(), 3);
    assert!(settle(&mut engine, SETTLE));

    let mut surface = RecordingSurface::new();
    engine.scroll_to_page(10);
    engine.draw(&mut surface);
    assert!(surface.pages().iter().all(|&page| page < 3));
}

#[test]
fn test_pinch_keeps_focal_point_fixed() {
    let rasterizer = SyntheticRasterizer::uniform(30, 600.0, 800.0);
    let mut engine = open_engine(&rasterizer, EngineConfig::default(), 400.0, 800.0);
    engine.scroll_by(0.0, 1500.0);

    let focal = ScreenPoint::new(120.0, 300.0);
    let screen = engine.controller().screen();
    let before = engine.controller().view().to_document(focal, screen);

    let generation = engine.generation();
    engine.pinch_begin();
    for _ in 0..10 {
        engine.pinch_step(1.1, focal);
    }
    let during = engine.controller().view().to_document(focal, screen);
    engine.pinch_end();

    assert!((during.x - before.x).abs() < 0.5, "{before:?} vs {during:?}");
    assert!((during.y - before.y).abs() < 0.5, "{before:?} vs {during:?}");
    assert!((engine.zoom_level() - 1.1_f32.powi(10)).abs() < 1e-3);
    assert_eq!(engine.generation(), generation + 1);
}

#[test]
fn test_double_tap_animates_to_target_zoom() {
    let rasterizer = SyntheticRasterizer::uniform(30, 600.0, 800.0);
    let mut engine = open_engine(&rasterizer, EngineConfig::default(), 400.0, 800.0);
    let start = Instant::now();

    engine.double_tap(ScreenPoint::new(200.0, 400.0), start);
    assert!(engine.tick(start + Duration::from_millis(100)));
    let midway = engine.zoom_level();
    assert!(midway > 1.0 && midway < 2.5);

    assert!(!engine.tick(start + Duration::from_millis(400)));
    assert!((engine.zoom_level() - 2.5).abs() < 1e-4);
}

#[test]
fn test_fling_decays_and_stops() {
    let rasterizer = SyntheticRasterizer::uniform(100, 600.0, 800.0);
    let mut engine = open_engine(&rasterizer, EngineConfig::default(), 400.0, 800.0);
    let start = Instant::now();

    engine.fling(0.0, 3000.0, start);
    let mut now = start;
    let mut frames = 0;
    while engine.tick(now) {
        now += Duration::from_millis(16);
        frames += 1;
        assert!(frames < 1000, "fling never stopped");
    }
    assert!(engine.scroll_y_position() > 0.0);
}

#[test]
fn test_position_survives_reopen_at_new_width() {
    let rasterizer = SyntheticRasterizer::uniform(50, 600.0, 800.0);
    let mut store = JsonViewportStore::ephemeral();

    let mut first = open_engine(&rasterizer, EngineConfig::default(), 400.0, 800.0);
    first.scroll_to_page(20);
    let page = first.current_page();
    first.save_state(&mut store).expect("save");
    first.shutdown();

    let mut second = open_engine(&rasterizer, EngineConfig::default(), 600.0, 800.0);
    assert!(second.restore_saved(&store));
    assert_eq!(second.current_page(), page);
}

#[test]
fn test_deep_position_survives_width_change() {
    let rasterizer = SyntheticRasterizer::uniform(500, 600.0, 800.0);
    let mut store = JsonViewportStore::ephemeral();

    let mut narrow = open_engine(&rasterizer, EngineConfig::default(), 400.0, 800.0);
    narrow.scroll_to_page(400);
    narrow.scroll_by(0.0, 100.0);
    let page = narrow.current_page();
    assert_eq!(page, Some(400));
    narrow.save_state(&mut store).expect("save");
    narrow.shutdown();

    // Twice as wide: pages double in height, the gaps between them do not
    let mut wide = open_engine(&rasterizer, EngineConfig::default(), 800.0, 800.0);
    assert!(wide.restore_saved(&store));
    assert_eq!(wide.current_page(), page);

    let layout = wide.controller().layout();
    let into_page = wide.scroll_y_position() - layout.page_top(400).expect("page top");
    assert!((into_page - 200.0).abs() < 0.5, "{into_page}");
}
