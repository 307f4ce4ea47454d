use std::sync::Arc;
use std::time::{Duration, Instant};

use docpager::engine::{DocumentEngine, OutlineNode};
use docpager::error::ViewerError;
use docpager::geometry::RectF;
use docpager::search::SearchDirection;
use docpager::session::DocumentSession;
use docpager::settings::ViewerSettings;
use docpager::test_utils::{FakeEngine, pump_until};

const WAIT: Duration = Duration::from_secs(5);

fn open(engine: FakeEngine) -> DocumentSession {
    let mut session = DocumentSession::open(Arc::new(engine), &ViewerSettings::default(), "doc.pdf")
        .expect("session should open");
    session.resize(400, 600, 160.0);
    session
}

fn run_idle(session: &mut DocumentSession) {
    assert!(pump_until(WAIT, || {
        session.frame(Instant::now());
        !session.needs_frame()
    }));
}

fn node(title: Option<&str>, page: Option<usize>, children: Vec<OutlineNode>) -> OutlineNode {
    OutlineNode {
        title: title.map(str::to_string),
        page,
        children,
    }
}

#[test]
fn test_empty_document_is_rejected() {
    let result = DocumentSession::open(
        Arc::new(FakeEngine::uniform(0, 100.0, 100.0)),
        &ViewerSettings::default(),
        "empty.pdf",
    );
    assert!(matches!(result, Err(ViewerError::EmptyDocument)));
}

#[test]
fn test_password_must_be_supplied_before_open() {
    let engine = Arc::new(FakeEngine::uniform(3, 100.0, 100.0).with_password("secret"));
    let settings = ViewerSettings::default();

    let locked = DocumentSession::open(engine.clone(), &settings, "locked.pdf");
    assert!(matches!(locked, Err(ViewerError::PasswordRequired)));

    let wrong = DocumentSession::authenticate(&*engine, "guess");
    assert!(matches!(wrong, Err(ViewerError::AuthenticationFailed)));
    assert!(engine.needs_password());

    DocumentSession::authenticate(&*engine, "secret").unwrap();
    let session = DocumentSession::open(engine, &settings, "locked.pdf").unwrap();
    assert_eq!(session.page_count(), 3);
}

#[test]
fn test_title_falls_back_to_document_key() {
    let session = open(FakeEngine::uniform(2, 100.0, 100.0));
    assert_eq!(session.title(), "doc.pdf");

    let session = open(FakeEngine::uniform(2, 100.0, 100.0).with_title("Field Guide"));
    assert_eq!(session.title(), "Field Guide");
}

#[test]
fn test_search_jumps_to_match_without_history() {
    let engine = FakeEngine::uniform(10, 200.0, 300.0).with_hit(6, RectF::new(10.0, 10.0, 50.0, 20.0));
    let mut session = open(engine);
    run_idle(&mut session);

    session.set_search_text("needle");
    session.search(SearchDirection::Forward, Instant::now());
    run_idle(&mut session);

    assert_eq!(session.displayed_page(), 6);
    let result = session.reader().search_result().unwrap();
    assert_eq!(result.page, 6);
    assert_eq!(result.text, "needle");
    assert!(session.reader().displayed_view().unwrap().search_boxes().is_some());
    assert!(!session.back());
}

#[test]
fn test_search_miss_notifies() {
    let mut session = open(FakeEngine::uniform(4, 200.0, 300.0));
    run_idle(&mut session);

    session.set_search_text("absent");
    session.search(SearchDirection::Forward, Instant::now());
    run_idle(&mut session);

    assert_eq!(session.displayed_page(), 0);
    assert!(session.reader().search_result().is_none());
    let note = session.notifications().current().unwrap();
    assert_eq!(note.message, "Text not found");
}

#[test]
fn test_new_search_text_drops_old_match() {
    let engine = FakeEngine::uniform(5, 200.0, 300.0).with_hit(2, RectF::new(0.0, 0.0, 5.0, 5.0));
    let mut session = open(engine);
    session.set_search_text("one");
    session.search(SearchDirection::Forward, Instant::now());
    run_idle(&mut session);
    assert!(session.reader().search_result().is_some());

    session.set_search_text("one");
    assert!(session.reader().search_result().is_some());
    session.set_search_text("two");
    assert!(session.reader().search_result().is_none());
}

#[test]
fn test_empty_search_text_does_nothing() {
    let mut session = open(FakeEngine::uniform(3, 200.0, 300.0));
    session.search(SearchDirection::Forward, Instant::now());
    assert!(!session.search_controller().is_searching());
}

#[test]
fn test_slider_rounds_and_records_history() {
    let mut session = open(FakeEngine::uniform(11, 200.0, 300.0));
    run_idle(&mut session);

    assert_eq!(session.slider_resolution(), 2);
    assert_eq!(session.slider_max(), 20);
    assert_eq!(session.slider_page(3), 2);
    assert_eq!(session.slider_page(100), 10);

    session.slider_release(9);
    run_idle(&mut session);
    assert_eq!(session.displayed_page(), 5);
    assert_eq!(session.slider_progress(), 10);
    assert_eq!(session.page_label(), "6 / 11");

    assert!(session.back());
    run_idle(&mut session);
    assert_eq!(session.displayed_page(), 0);
}

#[test]
fn test_outline_is_flattened_and_navigable() {
    let outline = vec![
        node(Some("Intro"), Some(0), vec![node(Some("Part"), Some(3), vec![])]),
        node(None, None, vec![node(Some("Appendix"), Some(8), vec![])]),
    ];
    let mut session = open(FakeEngine::uniform(10, 200.0, 300.0).with_outline(outline));
    run_idle(&mut session);

    assert!(session.has_outline());
    let titles: Vec<String> = session.outline().iter().map(|i| i.title.clone()).collect();
    assert_eq!(titles, vec!["Intro", "    Part", "    Appendix"]);
    assert_eq!(session.outline_start_index(), Some(0));

    session.show_page(4);
    assert_eq!(session.outline_start_index(), Some(2));

    session.jump_to_outline(3);
    run_idle(&mut session);
    assert_eq!(session.displayed_page(), 3);
    assert!(session.back());
    assert_eq!(session.displayed_page(), 4);
}

#[test]
fn test_resize_reflows_and_keeps_relative_position() {
    let engine = Arc::new(FakeEngine::uniform(10, 200.0, 300.0).reflowable(20));
    let mut session =
        DocumentSession::open(engine.clone(), &ViewerSettings::default(), "book.epub").unwrap();
    session.show_page(4);
    session.reader_mut().push_history();

    session.resize(624, 1008, 144.0);
    run_idle(&mut session);

    assert_eq!(engine.layouts().last(), Some(&(312, 504, 10)));
    assert_eq!(session.page_count(), 20);
    assert_eq!(session.displayed_page(), 8);
    // Page numbers from before the reflow mean nothing now
    assert!(session.reader().history().is_empty());
    assert_eq!(session.slider_resolution(), 2);
}

#[test]
fn test_link_highlight_toggles() {
    let mut session = open(FakeEngine::uniform(3, 200.0, 300.0));
    run_idle(&mut session);
    assert!(session.toggle_link_highlight());
    assert!(session.reader().displayed_view().unwrap().highlights_links());
    assert!(!session.toggle_link_highlight());
}

#[test]
fn test_close_reports_page_to_remember() {
    let mut session = open(FakeEngine::uniform(8, 200.0, 300.0));
    run_idle(&mut session);
    session.show_page(5);
    run_idle(&mut session);
    assert_eq!(session.close(), 5);
}

#[test]
fn test_content_change_redraws_live_slots_in_place() {
    let engine = Arc::new(FakeEngine::uniform(6, 200.0, 300.0).with_failing_page(3));
    let mut session =
        DocumentSession::open(engine.clone(), &ViewerSettings::default(), "doc.pdf").unwrap();
    session.resize(400, 600, 160.0);
    session.show_page(2);
    run_idle(&mut session);
    assert_eq!(session.reader().window_pages(), vec![1, 2, 3]);
    assert_eq!(engine.update_count(), 0);

    session.content_changed();
    run_idle(&mut session);

    // Page 3 failed to render and stays in its error state
    assert_eq!(engine.update_count(), 2);
    assert_eq!(session.displayed_page(), 2);
    assert_eq!(session.reader().window_pages(), vec![1, 2, 3]);
    assert!(session.reader().view(2).unwrap().is_entire_shown());
    assert!(session.reader().view(3).unwrap().error().is_some());
}
