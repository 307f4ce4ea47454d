//! In-memory document engine and polling helpers for tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::{
    Bitmap, DocumentEngine, EngineError, Link, LinkTarget, OutlineNode, PageSize, SearchHits,
};
use crate::geometry::{IRect, ISize, Quad, RectF};
use crate::task::CancelToken;

/// Call `check` until it returns true or `timeout` passes
pub fn pump_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[derive(Debug, Default)]
struct Calls {
    drawn: Vec<usize>,
    updated: Vec<usize>,
    searched: Vec<usize>,
    size_queries: Vec<usize>,
    layouts: Vec<(u32, u32, u32)>,
}

/// Scriptable [`DocumentEngine`] recording every call it serves
#[derive(Debug)]
pub struct FakeEngine {
    sizes: Mutex<Vec<PageSize>>,
    links: HashMap<usize, Vec<Link>>,
    hits: HashMap<usize, SearchHits>,
    failing_pages: HashSet<usize>,
    failing_sizes: HashSet<usize>,
    outline: Vec<OutlineNode>,
    password: Option<String>,
    unlocked: AtomicBool,
    title: Option<String>,
    reflow_pages: Option<usize>,
    search_delay: Duration,
    paused: Mutex<bool>,
    resumed: Condvar,
    calls: Mutex<Calls>,
}

impl FakeEngine {
    /// `pages` pages of `width` x `height` points
    pub fn uniform(pages: usize, width: f32, height: f32) -> Self {
        Self::with_sizes(vec![PageSize::new(width, height); pages])
    }

    pub fn with_sizes(sizes: Vec<PageSize>) -> Self {
        Self {
            sizes: Mutex::new(sizes),
            links: HashMap::new(),
            hits: HashMap::new(),
            failing_pages: HashSet::new(),
            failing_sizes: HashSet::new(),
            outline: Vec::new(),
            password: None,
            unlocked: AtomicBool::new(true),
            title: None,
            reflow_pages: None,
            search_delay: Duration::ZERO,
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn with_link(mut self, page: usize, bounds: RectF, target: LinkTarget) -> Self {
        self.links
            .entry(page)
            .or_default()
            .push(Link { bounds, target });
        self
    }

    /// One hit on `page` covering `bounds`
    pub fn with_hit(mut self, page: usize, bounds: RectF) -> Self {
        self.hits
            .entry(page)
            .or_default()
            .push(vec![Quad::from_rect(bounds)]);
        self
    }

    /// Rendering `page` fails
    pub fn with_failing_page(mut self, page: usize) -> Self {
        self.failing_pages.insert(page);
        self
    }

    /// Looking up the size of `page` fails
    pub fn with_failing_size(mut self, page: usize) -> Self {
        self.failing_sizes.insert(page);
        self
    }

    pub fn with_outline(mut self, outline: Vec<OutlineNode>) -> Self {
        self.outline = outline;
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self.unlocked = AtomicBool::new(false);
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Make the document reflowable; a relayout changes the page count to `pages`
    pub fn reflowable(mut self, pages: usize) -> Self {
        self.reflow_pages = Some(pages);
        self
    }

    /// Slow every page scan down by `delay`
    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = delay;
        self
    }

    /// Hold every render until [`FakeEngine::resume`]
    pub fn pause(&self) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn resume(&self) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.resumed.notify_all();
    }

    pub fn drawn_pages(&self) -> Vec<usize> {
        self.calls().drawn.clone()
    }

    pub fn update_count(&self) -> usize {
        self.calls().updated.len()
    }

    pub fn searched_pages(&self) -> Vec<usize> {
        self.calls().searched.clone()
    }

    pub fn size_queries(&self) -> Vec<usize> {
        self.calls().size_queries.clone()
    }

    pub fn layouts(&self) -> Vec<(u32, u32, u32)> {
        self.calls().layouts.clone()
    }

    fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self) -> usize {
        self.sizes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn wait_while_paused(&self, token: &CancelToken) -> Result<(), EngineError> {
        let mut paused = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        while *paused {
            if token.is_aborted() {
                return Err(EngineError::Aborted);
            }
            paused = self
                .resumed
                .wait_timeout(paused, Duration::from_millis(5))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if token.is_aborted() {
            return Err(EngineError::Aborted);
        }
        Ok(())
    }

    fn check_page(&self, page: usize) -> Result<(), EngineError> {
        let count = self.count();
        if page >= count {
            return Err(EngineError::PageOutOfRange { page, count });
        }
        Ok(())
    }

    fn rasterize(
        &self,
        bitmap: &mut Bitmap,
        page: usize,
        page_size: ISize,
        patch: IRect,
        token: &CancelToken,
    ) -> Result<(), EngineError> {
        self.check_page(page)?;
        self.wait_while_paused(token)?;
        if self.failing_pages.contains(&page) {
            return Err(EngineError::generic(format!("cannot render page {page}")));
        }
        if patch.is_empty()
            || patch.right > page_size.width
            || patch.bottom > page_size.height
            || patch.width() > bitmap.size().width
            || patch.height() > bitmap.size().height
        {
            return Err(EngineError::generic(format!(
                "patch {patch:?} does not fit page {page_size:?} or bitmap {:?}",
                bitmap.size()
            )));
        }
        let shade = (page % 251) as u8;
        bitmap.erase([shade, shade, shade, 0xff]);
        Ok(())
    }
}

impl DocumentEngine for FakeEngine {
    fn page_count(&self) -> Result<usize, EngineError> {
        if !self.unlocked.load(Ordering::Acquire) {
            return Err(EngineError::PasswordRequired);
        }
        Ok(self.count())
    }

    fn page_size(&self, page: usize) -> Result<PageSize, EngineError> {
        self.calls().size_queries.push(page);
        if self.failing_sizes.contains(&page) {
            return Err(EngineError::generic(format!("no size for page {page}")));
        }
        let sizes = self.sizes.lock().unwrap_or_else(PoisonError::into_inner);
        sizes
            .get(page)
            .copied()
            .ok_or(EngineError::PageOutOfRange {
                page,
                count: sizes.len(),
            })
    }

    fn draw_page(
        &self,
        bitmap: &mut Bitmap,
        page: usize,
        page_size: ISize,
        patch: IRect,
        token: &CancelToken,
    ) -> Result<(), EngineError> {
        self.rasterize(bitmap, page, page_size, patch, token)?;
        self.calls().drawn.push(page);
        Ok(())
    }

    fn update_page(
        &self,
        bitmap: &mut Bitmap,
        page: usize,
        page_size: ISize,
        patch: IRect,
        token: &CancelToken,
    ) -> Result<(), EngineError> {
        self.rasterize(bitmap, page, page_size, patch, token)?;
        self.calls().updated.push(page);
        Ok(())
    }

    fn page_links(&self, page: usize) -> Result<Vec<Link>, EngineError> {
        self.check_page(page)?;
        Ok(self.links.get(&page).cloned().unwrap_or_default())
    }

    fn search_page(&self, page: usize, _text: &str) -> Result<SearchHits, EngineError> {
        self.check_page(page)?;
        if !self.search_delay.is_zero() {
            thread::sleep(self.search_delay);
        }
        self.calls().searched.push(page);
        Ok(self.hits.get(&page).cloned().unwrap_or_default())
    }

    fn outline(&self) -> Result<Vec<OutlineNode>, EngineError> {
        Ok(self.outline.clone())
    }

    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn needs_password(&self) -> bool {
        self.password.is_some() && !self.unlocked.load(Ordering::Acquire)
    }

    fn authenticate_password(&self, password: &str) -> bool {
        let ok = self.password.as_deref() == Some(password);
        if ok {
            self.unlocked.store(true, Ordering::Release);
        }
        ok
    }

    fn is_reflowable(&self) -> bool {
        self.reflow_pages.is_some()
    }

    fn layout(
        &self,
        current_page: usize,
        width: u32,
        height: u32,
        em: u32,
    ) -> Result<usize, EngineError> {
        self.calls().layouts.push((width, height, em));
        let Some(pages) = self.reflow_pages else {
            return Ok(current_page);
        };
        let mut sizes = self.sizes.lock().unwrap_or_else(PoisonError::into_inner);
        let old = sizes.len().max(1);
        *sizes = vec![PageSize::new(width as f32, height as f32); pages];
        Ok((current_page * pages / old).min(pages.saturating_sub(1)))
    }
}
