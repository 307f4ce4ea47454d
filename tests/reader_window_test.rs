use std::sync::Arc;
use std::time::{Duration, Instant};

use docpager::adapter::PageAdapter;
use docpager::geometry::ISize;
use docpager::page_view::SlotConfig;
use docpager::reader::{NoHooks, ReaderConfig, ReaderView};
use docpager::task::WorkerPool;
use docpager::test_utils::{FakeEngine, pump_until};

const WAIT: Duration = Duration::from_secs(5);

fn open(engine: Arc<FakeEngine>) -> ReaderView {
    let pool = Arc::new(WorkerPool::new(2).unwrap());
    let adapter = PageAdapter::new(engine, pool, SlotConfig::default());
    let mut reader = ReaderView::new(adapter, ReaderConfig::default(), Box::new(NoHooks));
    reader.set_viewport(ISize::new(400, 600), 160.0);
    reader
}

fn run_idle(reader: &mut ReaderView) {
    assert!(
        pump_until(WAIT, || {
            reader.frame(Instant::now());
            !reader.needs_frame()
        }),
        "reader never went idle: {reader:?}"
    );
}

fn assert_window(reader: &ReaderView) {
    let current = reader.displayed_view_index();
    let count = reader.page_count();
    let expected: Vec<usize> = (current.saturating_sub(1)..=(current + 1).min(count - 1)).collect();
    assert_eq!(reader.window_pages(), expected, "window around page {current}");
}

#[test]
fn test_window_holds_current_and_neighbours_only() {
    let engine = Arc::new(FakeEngine::uniform(30, 200.0, 300.0));
    let mut reader = open(engine);
    run_idle(&mut reader);
    assert_window(&reader);

    for page in [1, 29, 15, 16, 0, 28] {
        assert!(reader.set_displayed_view_index(page));
        run_idle(&mut reader);
        assert_eq!(reader.displayed_view_index(), page);
        assert_window(&reader);
        assert!(reader.window_pages().len() <= 3);
    }
}

#[test]
fn test_out_of_range_jump_is_ignored() {
    let engine = Arc::new(FakeEngine::uniform(4, 200.0, 300.0));
    let mut reader = open(engine);
    run_idle(&mut reader);

    assert!(!reader.set_displayed_view_index(4));
    assert_eq!(reader.displayed_view_index(), 0);
    assert!(reader.history().is_empty());
}

#[test]
fn test_single_page_document_has_single_slot() {
    let engine = Arc::new(FakeEngine::uniform(1, 200.0, 300.0));
    let mut reader = open(engine);
    run_idle(&mut reader);
    assert_eq!(reader.window_pages(), vec![0]);

    // Nothing to page to in either direction
    reader.smart_move_forwards();
    run_idle(&mut reader);
    reader.smart_move_backwards();
    run_idle(&mut reader);
    assert_eq!(reader.displayed_view_index(), 0);
}

#[test]
fn test_at_most_one_render_per_slot() {
    let engine = Arc::new(FakeEngine::uniform(6, 200.0, 300.0));
    engine.pause();
    let mut reader = open(Arc::clone(&engine));

    for _ in 0..20 {
        reader.frame(Instant::now());
        for page in reader.window_pages() {
            let view = reader.view(page).unwrap();
            assert!(view.entire_renders_in_flight() <= 1);
            assert!(view.patch_renders_in_flight() <= 1);
        }
    }

    // Jumping while renders are stuck cancels them rather than piling up
    reader.set_displayed_view_index(3);
    for _ in 0..20 {
        reader.frame(Instant::now());
        for page in reader.window_pages() {
            assert!(reader.view(page).unwrap().entire_renders_in_flight() <= 1);
        }
    }

    engine.resume();
    run_idle(&mut reader);
    let drawn = engine.drawn_pages();
    for page in [2, 3, 4] {
        assert!(drawn.contains(&page), "page {page} never drawn: {drawn:?}");
    }
}

#[test]
fn test_taps_page_through_document() {
    let engine = Arc::new(FakeEngine::uniform(5, 200.0, 300.0));
    let mut reader = open(engine);
    run_idle(&mut reader);

    // Right margin pages forward, left margin pages back
    reader.on_single_tap(395.0, 300.0);
    run_idle(&mut reader);
    assert_eq!(reader.displayed_view_index(), 1);

    reader.on_single_tap(395.0, 300.0);
    run_idle(&mut reader);
    assert_eq!(reader.displayed_view_index(), 2);

    reader.on_single_tap(5.0, 300.0);
    run_idle(&mut reader);
    assert_eq!(reader.displayed_view_index(), 1);
    assert_window(&reader);
}

#[test]
fn test_release_bitmaps_is_idempotent() {
    let engine = Arc::new(FakeEngine::uniform(5, 200.0, 300.0));
    let mut reader = open(engine);
    run_idle(&mut reader);
    assert!(reader.adapter().shared_hq().is_some());

    reader.release_bitmaps();
    reader.release_bitmaps();
    assert!(reader.window_pages().is_empty());
    assert!(reader.adapter().shared_hq().is_none());

    reader.refresh();
    run_idle(&mut reader);
    assert_window(&reader);
}

#[test]
fn test_zoom_stays_within_limits() {
    let engine = Arc::new(FakeEngine::uniform(3, 200.0, 300.0));
    let mut reader = open(engine);
    run_idle(&mut reader);
    let config = ReaderConfig::default();

    reader.on_scale_begin();
    for _ in 0..40 {
        reader.on_scale(1.5, 200.0, 300.0);
    }
    reader.on_scale_end();
    assert_eq!(reader.scale(), config.max_scale);

    reader.on_scale_begin();
    for _ in 0..40 {
        reader.on_scale(0.5, 200.0, 300.0);
    }
    reader.on_scale_end();
    assert_eq!(reader.scale(), config.min_scale);
}

#[test]
fn test_page_without_size_falls_back_and_shows_error() {
    let engine = Arc::new(FakeEngine::uniform(3, 200.0, 300.0).with_failing_size(0));
    let mut reader = open(Arc::clone(&engine));
    run_idle(&mut reader);

    let view = reader.view(0).unwrap();
    assert!(!view.is_blank());
    assert!(view.is_entire_shown());
    assert_eq!(view.error(), Some("Error loading page"));
    assert!(!view.is_busy_visible(Instant::now() + Duration::from_secs(1)));
    // Default 612x792 page fitted into the viewport
    assert_eq!(view.size().height, 517);
    assert!(engine.drawn_pages().contains(&0));

    // The neighbour is unaffected
    assert_eq!(reader.view(1).unwrap().error(), None);
}

#[test]
fn test_out_of_memory_during_layout_is_retried() {
    let engine = Arc::new(FakeEngine::uniform(3, 200.0, 300.0));
    let mut reader = open(engine);
    run_idle(&mut reader);

    reader.set_viewport(ISize::new(i32::MAX, i32::MAX), 160.0);
    for _ in 0..3 {
        reader.frame(Instant::now());
    }
    assert!(reader.window_pages().is_empty());
    assert!(reader.needs_frame());

    reader.set_viewport(ISize::new(400, 600), 160.0);
    run_idle(&mut reader);
    assert_window(&reader);
    assert!(reader.displayed_view().unwrap().is_entire_shown());
}

#[test]
fn test_vertical_mode_stacks_pages_and_drags_both_ways() {
    let engine = Arc::new(FakeEngine::uniform(4, 200.0, 300.0));
    let pool = Arc::new(WorkerPool::new(2).unwrap());
    let adapter = PageAdapter::new(engine, pool, SlotConfig::default());
    let config = ReaderConfig {
        horizontal_scrolling: false,
        ..ReaderConfig::default()
    };
    let mut reader = ReaderView::new(adapter, config, Box::new(NoHooks));
    reader.set_viewport(ISize::new(400, 600), 160.0);
    run_idle(&mut reader);

    let below = reader.view(1).unwrap().frame();
    assert_eq!(below.left, 0);
    assert_eq!(below.top, 600 + 20);

    // Finger moves up: trailing edge passes the middle of the screen
    reader.on_down();
    reader.on_scroll(0.0, 320.0);
    reader.frame(Instant::now());
    assert_eq!(reader.displayed_view_index(), 1);
    reader.on_up();
    run_idle(&mut reader);
    assert_eq!(reader.view(1).unwrap().frame().top, 0);
    assert_eq!(reader.view(0).unwrap().frame().bottom, -20);
    assert_window(&reader);

    // Finger moves down: leading edge passes the middle again
    reader.on_down();
    reader.on_scroll(0.0, -320.0);
    reader.frame(Instant::now());
    assert_eq!(reader.displayed_view_index(), 0);
    reader.on_up();
    run_idle(&mut reader);
    assert_eq!(reader.view(0).unwrap().frame().top, 0);
}

#[test]
fn test_move_to_next_and_previous_slide_between_slots() {
    let engine = Arc::new(FakeEngine::uniform(3, 200.0, 300.0));
    let mut reader = open(engine);
    run_idle(&mut reader);

    reader.move_to_previous();
    assert!(!reader.needs_frame());

    reader.move_to_next();
    assert!(reader.needs_frame());
    run_idle(&mut reader);
    assert_eq!(reader.displayed_view_index(), 1);
    assert_eq!(reader.view(1).unwrap().frame().left, 0);

    reader.move_to_next();
    run_idle(&mut reader);
    assert_eq!(reader.displayed_view_index(), 2);
    reader.move_to_next();
    assert!(!reader.needs_frame());

    reader.move_to_previous();
    run_idle(&mut reader);
    assert_eq!(reader.displayed_view_index(), 1);
    assert_window(&reader);
}
