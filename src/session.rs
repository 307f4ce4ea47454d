//! One open document: the reader, its search and the chrome-facing surface
//!
//! Everything that would otherwise be process-wide (the current search
//! result, the flattened outline, reflow parameters) lives here and dies with
//! the session.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::adapter::PageAdapter;
use crate::engine::{DocumentEngine, OutlineItem, flatten_outline};
use crate::error::ViewerError;
use crate::geometry::ISize;
use crate::notification::NotificationManager;
use crate::page_view::{PageView, SlotConfig};
use crate::reader::{NoHooks, ReaderConfig, ReaderHooks, ReaderView};
use crate::search::{SearchController, SearchDirection, SearchEvent, SearchProgress};
use crate::settings::ViewerSettings;
use crate::task::WorkerPool;

const TEXT_NOT_FOUND: &str = "Text not found";

pub struct DocumentSession {
    engine: Arc<dyn DocumentEngine>,
    doc_key: String,
    reader: ReaderView,
    search: SearchController,
    search_text: String,
    outline: Option<Vec<OutlineItem>>,
    layout_width: u32,
    layout_height: u32,
    layout_em: u32,
    slider_res: usize,
}

impl DocumentSession {
    /// Open a session with hooks that ignore every callback
    pub fn open(
        engine: Arc<dyn DocumentEngine>,
        settings: &ViewerSettings,
        doc_key: impl Into<String>,
    ) -> Result<Self, ViewerError> {
        Self::open_with_hooks(engine, settings, doc_key, Box::new(NoHooks))
    }

    pub fn open_with_hooks(
        engine: Arc<dyn DocumentEngine>,
        settings: &ViewerSettings,
        doc_key: impl Into<String>,
        hooks: Box<dyn ReaderHooks>,
    ) -> Result<Self, ViewerError> {
        let doc_key = doc_key.into();
        if engine.needs_password() {
            return Err(ViewerError::PasswordRequired);
        }
        let count = engine.page_count()?;
        if count == 0 {
            return Err(ViewerError::EmptyDocument);
        }

        let pool = Arc::new(WorkerPool::new(settings.worker_threads)?);
        let adapter = PageAdapter::new(
            Arc::clone(&engine),
            Arc::clone(&pool),
            SlotConfig::from(settings),
        );
        let reader = ReaderView::new(adapter, ReaderConfig::from(settings), hooks);
        let search = SearchController::new(
            Arc::clone(&engine),
            pool,
            settings.search_progress_delay(),
        );
        info!("Opened {doc_key} with {count} pages");

        Ok(Self {
            engine,
            doc_key,
            reader,
            search,
            search_text: String::new(),
            outline: None,
            layout_width: settings.layout_width,
            layout_height: settings.layout_height,
            layout_em: settings.layout_em,
            slider_res: slider_resolution_for(count),
        })
    }

    /// Unlock a password-protected engine before [`DocumentSession::open`]
    pub fn authenticate(engine: &dyn DocumentEngine, password: &str) -> Result<(), ViewerError> {
        if engine.authenticate_password(password) {
            Ok(())
        } else {
            warn!("Authentication failed");
            Err(ViewerError::AuthenticationFailed)
        }
    }

    pub fn doc_key(&self) -> &str {
        &self.doc_key
    }

    /// Document title, or its key when the document has none
    pub fn title(&self) -> String {
        self.engine
            .title()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.doc_key.clone())
    }

    pub fn reader(&self) -> &ReaderView {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut ReaderView {
        &mut self.reader
    }

    pub fn notifications(&self) -> &NotificationManager {
        self.reader.notifications()
    }

    // Frames

    /// Run one UI frame and deliver a finished search
    pub fn frame(&mut self, now: Instant) -> bool {
        let mut changed = self.reader.frame(now);
        match self.search.poll() {
            Some(SearchEvent::Found(result)) => {
                let page = result.page;
                self.reader.set_search_result(Some(result));
                // No history entry for search jumps
                self.reader.set_displayed_view_index(page);
                self.reader.resetup_children();
                changed = true;
            }
            Some(SearchEvent::NotFound) => {
                self.reader.notifications_mut().info(TEXT_NOT_FOUND);
                changed = true;
            }
            None => {}
        }
        changed
    }

    pub fn needs_frame(&self) -> bool {
        self.reader.needs_frame() || self.search.is_searching()
    }

    // Page indicator and slider

    pub fn displayed_page(&self) -> usize {
        self.reader.displayed_view_index()
    }

    pub fn page_count(&self) -> usize {
        self.reader.page_count()
    }

    /// Jump without recording history
    pub fn show_page(&mut self, page: usize) -> bool {
        self.reader.set_displayed_view_index(page)
    }

    /// "N / M" with a 1-based page number
    pub fn page_label(&self) -> String {
        page_label(self.displayed_page(), self.page_count())
    }

    /// Slider ticks per page
    pub fn slider_resolution(&self) -> usize {
        self.slider_res
    }

    pub fn slider_max(&self) -> usize {
        self.page_count().saturating_sub(1) * self.slider_res
    }

    pub fn slider_progress(&self) -> usize {
        self.displayed_page() * self.slider_res
    }

    /// Page a slider position rounds to
    pub fn slider_page(&self, progress: usize) -> usize {
        ((progress + self.slider_res / 2) / self.slider_res).min(self.page_count().saturating_sub(1))
    }

    /// The user let go of the slider
    pub fn slider_release(&mut self, progress: usize) {
        let page = self.slider_page(progress);
        self.reader.push_history();
        self.reader.set_displayed_view_index(page);
    }

    // Search

    /// Update the search box. A different text invalidates the current match.
    pub fn set_search_text(&mut self, text: &str) {
        let stale = self
            .reader
            .search_result()
            .is_some_and(|r| r.text != text);
        if stale {
            self.reader.set_search_result(None);
        }
        self.search_text = text.to_string();
    }

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn search(&mut self, direction: SearchDirection, now: Instant) {
        if self.search_text.is_empty() {
            debug!("Ignoring search for empty text");
            return;
        }
        let display_page = self.reader.displayed_view_index();
        let search_page = self.reader.search_result().map(|r| r.page);
        self.search
            .go(&self.search_text, direction, display_page, search_page, now);
    }

    pub fn stop_search(&mut self) {
        self.search.stop();
    }

    /// Leave search mode: stop scanning and drop the highlights
    pub fn close_search(&mut self) {
        self.search.stop();
        self.reader.set_search_result(None);
    }

    pub fn search_progress(&self, now: Instant) -> Option<SearchProgress> {
        self.search.progress(now)
    }

    pub fn search_controller(&self) -> &SearchController {
        &self.search
    }

    // Outline

    /// Flattened outline, fetched on first use
    pub fn outline(&mut self) -> &[OutlineItem] {
        let engine = &self.engine;
        self.outline.get_or_insert_with(|| match engine.outline() {
            Ok(nodes) => flatten_outline(&nodes),
            Err(e) => {
                warn!("Failed to load outline: {e}");
                Vec::new()
            }
        })
    }

    pub fn has_outline(&mut self) -> bool {
        !self.outline().is_empty()
    }

    /// First outline entry at or after the displayed page
    pub fn outline_start_index(&mut self) -> Option<usize> {
        let current = self.displayed_page();
        self.outline()
            .iter()
            .position(|item| item.page.is_some_and(|p| p >= current))
    }

    pub fn jump_to_outline(&mut self, page: usize) {
        self.reader.push_history();
        self.reader.set_displayed_view_index(page);
    }

    // Links and history

    pub fn set_link_highlight(&mut self, highlight: bool) {
        self.reader.set_links_enabled(highlight);
    }

    pub fn toggle_link_highlight(&mut self) -> bool {
        let highlight = !self.reader.links_enabled();
        self.set_link_highlight(highlight);
        highlight
    }

    /// The document changed in place: redraw every live slot where it stands
    pub fn content_changed(&mut self) {
        debug!("Document content changed, redrawing visible pages");
        self.reader.apply_to_children(PageView::update);
    }

    /// Pop history. `false` means there was none and the caller should fall back.
    pub fn back(&mut self) -> bool {
        self.reader.pop_history()
    }

    // Reflow

    /// The viewport changed size. Reflowable documents are laid out again
    /// for the new size in points; fixed documents just rebuild their slots.
    pub fn resize(&mut self, width: i32, height: i32, dpi: f32) {
        self.reader.set_viewport(ISize::new(width, height), dpi);
        if self.engine.is_reflowable() && dpi > 0.0 {
            self.layout_width = (width.max(0) as f32 * 72.0 / dpi) as u32;
            self.layout_height = (height.max(0) as f32 * 72.0 / dpi) as u32;
            self.relayout();
        } else {
            self.reader.refresh();
        }
    }

    pub fn layout_em(&self) -> u32 {
        self.layout_em
    }

    pub fn set_layout_em(&mut self, em: u32) {
        if em != self.layout_em {
            self.layout_em = em;
            self.relayout();
        }
    }

    /// Reflow the document and land on wherever the current page went
    pub fn relayout(&mut self) {
        let current = self.reader.displayed_view_index();
        let page = match self.engine.layout(
            current,
            self.layout_width,
            self.layout_height,
            self.layout_em,
        ) {
            Ok(page) => page,
            Err(e) => {
                warn!("Relayout failed: {e}");
                current
            }
        };
        debug!(
            "Relayout at {}x{} em {} moved page {current} to {page}",
            self.layout_width, self.layout_height, self.layout_em
        );
        self.outline = None;
        self.reader.clear_history();
        self.reader.refresh();
        self.slider_res = slider_resolution_for(self.reader.page_count());
        self.reader.set_displayed_view_index(page);
    }

    // Teardown

    /// Stop all work, free every bitmap and return the page to remember
    pub fn close(mut self) -> usize {
        self.search.stop();
        self.reader.release_bitmaps();
        let page = self.reader.displayed_view_index();
        info!("Closed {} at page {page}", self.doc_key);
        page
    }
}

impl std::fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("doc_key", &self.doc_key)
            .field("reader", &self.reader)
            .field("search", &self.search)
            .finish_non_exhaustive()
    }
}

pub fn page_label(page: usize, count: usize) -> String {
    format!("{} / {}", page + 1, count)
}

/// At least ten slider ticks across the document, always an even number per page
pub fn slider_resolution_for(count: usize) -> usize {
    let smax = count.saturating_sub(1).max(1);
    ((10 + smax - 1) / smax) * 2
}
