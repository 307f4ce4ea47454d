//! Render slot: one page's visual state inside the reader window
//!
//! A slot drives two independent render pipelines against the document
//! engine:
//! - the *entire* pipeline rasterizes the whole page at the fitted scale into
//!   the slot's own bitmap
//! - the *patch* pipeline rasterizes only the visible sub-rectangle at the
//!   current zoom into the high-resolution bitmap shared by all slots
//!
//! Each pipeline has at most one task in flight; starting a new one cancels
//! the previous one first. Results are applied from [`PageView::poll`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::engine::{
    Bitmap, DocumentEngine, EngineError, Link, LinkTarget, PageSize, SearchHits, SharedBitmap,
    release_shared,
};
use crate::error::ViewerError;
use crate::geometry::{IRect, ISize, PointF, RectF};
use crate::notification::NotificationManager;
use crate::reader::ReaderHooks;
use crate::settings::ViewerSettings;
use crate::task::{CancelToken, CancellableTask, TaskOutcome, WorkerPool};

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

const ERROR_LOADING: &str = "Error loading page";
const ERROR_RENDERING: &str = "Error rendering page";
const ERROR_UPDATING: &str = "Error updating page";
const ERROR_PATCH: &str = "Error rendering patch";

/// Per-slot tunables taken from [`ViewerSettings`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlotConfig {
    pub default_page_size: PageSize,
    pub busy_delay: Duration,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self::from(&ViewerSettings::default())
    }
}

impl From<&ViewerSettings> for SlotConfig {
    fn from(settings: &ViewerSettings) -> Self {
        Self {
            default_page_size: PageSize::new(
                settings.default_page_width,
                settings.default_page_height,
            ),
            busy_delay: settings.busy_indicator_delay(),
        }
    }
}

/// Colour cue behind the page content
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Background {
    /// Plain white: loading, blank or failed
    Opaque,
    /// Content is showing
    Transparent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Busy {
    Hidden,
    Shown,
    Delayed { show_at: Instant },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RenderMode {
    Draw,
    Update,
}

type RenderTask = CancellableTask<Result<(), EngineError>>;

struct EntireJob {
    task: RenderTask,
    mode: RenderMode,
}

struct PatchJob {
    task: RenderTask,
    area: IRect,
    view_size: ISize,
}

pub struct PageView {
    id: u64,
    engine: Arc<dyn DocumentEngine>,
    pool: Arc<WorkerPool>,
    config: SlotConfig,

    page: usize,
    parent_size: ISize,
    /// Page size at minimum zoom
    size: ISize,
    source_scale: f32,
    measured: ISize,
    frame: IRect,

    entire_bm: Option<SharedBitmap>,
    entire_shown: bool,
    draw_entire: Option<EntireJob>,

    patch_bm: Option<SharedBitmap>,
    /// Laid-out size the current patch was rendered for
    patch_view_size: Option<ISize>,
    patch_area: Option<IRect>,
    patch_shown: bool,
    draw_patch: Option<PatchJob>,

    get_links: Option<CancellableTask<Vec<Link>>>,
    search_boxes: Option<SearchHits>,
    links: Option<Vec<Link>>,
    is_blank: bool,
    highlight_links: bool,

    busy: Busy,
    error: Option<String>,
    /// Error to raise once the in-flight render lands
    deferred_error: Option<&'static str>,
    background: Background,
}

impl PageView {
    /// Create a slot for a viewport of `parent_size`, lending it the shared
    /// high-resolution bitmap.
    pub fn new(
        engine: Arc<dyn DocumentEngine>,
        pool: Arc<WorkerPool>,
        parent_size: ISize,
        shared_hq: Option<SharedBitmap>,
        config: SlotConfig,
    ) -> Result<Self, ViewerError> {
        let entire_bm = Bitmap::try_shared(parent_size)?;
        Ok(Self {
            id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
            engine,
            pool,
            config,
            page: 0,
            parent_size,
            size: parent_size,
            source_scale: 1.0,
            measured: parent_size,
            frame: IRect::default(),
            entire_bm: Some(entire_bm),
            entire_shown: false,
            draw_entire: None,
            patch_bm: shared_hq,
            patch_view_size: None,
            patch_area: None,
            patch_shown: false,
            draw_patch: None,
            get_links: None,
            search_boxes: None,
            links: None,
            is_blank: true,
            highlight_links: false,
            busy: Busy::Hidden,
            error: None,
            deferred_error: None,
            background: Background::Opaque,
        })
    }

    fn cancel_entire(&mut self) {
        if let Some(mut job) = self.draw_entire.take() {
            job.task.cancel();
        }
    }

    fn cancel_patch(&mut self) {
        if let Some(mut job) = self.draw_patch.take() {
            job.task.cancel();
        }
    }

    fn cancel_links(&mut self) {
        if let Some(mut task) = self.get_links.take() {
            task.cancel();
        }
    }

    fn reinit(&mut self) {
        self.cancel_entire();
        self.cancel_patch();
        self.cancel_links();

        self.is_blank = true;
        self.page = 0;
        self.entire_shown = false;
        self.patch_shown = false;
        self.patch_view_size = None;
        self.patch_area = None;
        self.search_boxes = None;
        self.links = None;
        self.deferred_error = None;
        self.error = None;
    }

    /// Cancel everything and drop view-level state. Bitmaps are kept.
    pub fn release_resources(&mut self) {
        self.reinit();
        self.busy = Busy::Hidden;
    }

    /// Cancel everything and free bitmap memory
    pub fn release_bitmaps(&mut self) {
        self.reinit();
        if let Some(bm) = self.entire_bm.take() {
            release_shared(bm);
        }
        // The shared bitmap belongs to the adapter, only the loan ends here
        self.patch_bm = None;
    }

    /// Show a placeholder for `page` while its size is being looked up
    pub fn blank(&mut self, page: usize) {
        self.reinit();
        self.page = page;
        self.busy = Busy::Shown;
        self.background = Background::Opaque;
    }

    fn set_render_error(&mut self, why: &str) {
        let page = self.page;
        self.reinit();
        self.page = page;
        self.busy = Busy::Hidden;
        self.background = Background::Opaque;
        warn!("Page {page}: {why}");
        self.error = Some(why.to_string());
    }

    /// Assign `page` to this slot and start rendering it.
    ///
    /// Without a `size` the configured default page size is used; the render
    /// still runs and the slot reports an error once it lands.
    pub fn set_page(&mut self, page: usize, size: Option<PageSize>) {
        self.cancel_entire();
        self.is_blank = false;
        self.page = page;
        self.error = None;
        self.deferred_error = None;

        let page_size = match size {
            Some(s) if s.width > 0.0 && s.height > 0.0 => s,
            _ => {
                warn!("Page {page}: size unavailable, using default page size");
                self.deferred_error = Some(ERROR_LOADING);
                self.config.default_page_size
            }
        };

        self.source_scale = (self.parent_size.width as f32 / page_size.width)
            .min(self.parent_size.height as f32 / page_size.height);
        self.size = ISize::new(
            (page_size.width * self.source_scale) as i32,
            (page_size.height * self.source_scale) as i32,
        );

        self.entire_shown = false;

        self.cancel_links();
        let engine = Arc::clone(&self.engine);
        self.get_links = Some(CancellableTask::spawn(&self.pool, move |token| {
            if token.is_aborted() {
                return None;
            }
            match engine.page_links(page) {
                Ok(links) => Some(links),
                Err(e) => {
                    debug!("No links for page {page}: {e}");
                    None
                }
            }
        }));

        if self.size.is_empty() {
            debug!("Page {page}: nothing to draw in an empty viewport");
            self.busy = Busy::Hidden;
            return;
        }

        let bitmap = match self.entire_bitmap_or_alloc() {
            Ok(bm) => bm,
            Err(e) => {
                error!("Page {page}: {e}");
                self.set_render_error(ERROR_RENDERING);
                return;
            }
        };

        self.background = Background::Opaque;
        if self.busy == Busy::Hidden {
            self.busy = Busy::Delayed {
                show_at: Instant::now() + self.config.busy_delay,
            };
        }

        let task = CancellableTask::spawn(
            &self.pool,
            render_unit(
                Arc::clone(&self.engine),
                bitmap,
                page,
                self.size,
                IRect::from_size(self.size),
                RenderMode::Draw,
            ),
        );
        self.draw_entire = Some(EntireJob {
            task,
            mode: RenderMode::Draw,
        });
    }

    fn entire_bitmap_or_alloc(&mut self) -> Result<SharedBitmap, ViewerError> {
        if let Some(bm) = &self.entire_bm {
            return Ok(Arc::clone(bm));
        }
        let bm = Bitmap::try_shared(self.parent_size)?;
        self.entire_bm = Some(Arc::clone(&bm));
        Ok(bm)
    }

    pub fn set_search_boxes(&mut self, boxes: Option<SearchHits>) {
        self.search_boxes = boxes;
    }

    pub fn set_link_highlighting(&mut self, highlight: bool) {
        self.highlight_links = highlight;
    }

    /// Record the size the reader measured for this slot
    pub fn measure(&mut self, measured: ISize) {
        self.measured = measured;
    }

    /// Place the slot in viewport coordinates. A patch rendered for a
    /// different laid-out size (the user zoomed since) is dropped.
    pub fn layout(&mut self, frame: IRect) {
        self.frame = frame;
        if let Some(view_size) = self.patch_view_size {
            if view_size != frame.size() {
                self.patch_view_size = None;
                self.patch_area = None;
                self.patch_shown = false;
            }
        }
    }

    /// Render the visible part of the page at the current zoom.
    ///
    /// With `force` the patch is refreshed even when the visible area is
    /// unchanged, reusing the existing raster.
    pub fn update_hq(&mut self, force: bool) {
        if self.error.is_some() {
            self.patch_shown = false;
            return;
        }

        let view_area = self.frame;
        if view_area.width() == self.size.width || view_area.height() == self.size.height {
            // Unzoomed: the entire bitmap is already sharp enough
            self.remove_hq();
            return;
        }

        let patch_view_size = view_area.size();
        let Some(area) = IRect::from_size(self.parent_size).intersect(&view_area) else {
            return;
        };
        let patch_area = area.offset(-view_area.left, -view_area.top);

        let area_unchanged =
            self.patch_area == Some(patch_area) && self.patch_view_size == Some(patch_view_size);
        if area_unchanged && !force {
            return;
        }
        if !force {
            if let Some(job) = &self.draw_patch {
                if job.area == patch_area && job.view_size == patch_view_size {
                    return;
                }
            }
        }

        let mode = if area_unchanged && force {
            RenderMode::Update
        } else {
            RenderMode::Draw
        };

        self.cancel_patch();

        let Some(bitmap) = self.patch_bm.clone() else {
            debug!("Page {}: no high-resolution bitmap to draw into", self.page);
            return;
        };

        let task = CancellableTask::spawn(
            &self.pool,
            render_unit(
                Arc::clone(&self.engine),
                bitmap,
                self.page,
                patch_view_size,
                patch_area,
                mode,
            ),
        );
        self.draw_patch = Some(PatchJob {
            task,
            area: patch_area,
            view_size: patch_view_size,
        });
    }

    /// Re-render the entire bitmap and the patch after a content change
    pub fn update(&mut self) {
        if self.error.is_some() || self.is_blank {
            return;
        }
        self.cancel_entire();
        self.cancel_patch();

        if self.size.is_empty() {
            return;
        }
        let bitmap = match self.entire_bitmap_or_alloc() {
            Ok(bm) => bm,
            Err(e) => {
                error!("Page {}: {e}", self.page);
                self.set_render_error(ERROR_UPDATING);
                return;
            }
        };

        let task = CancellableTask::spawn(
            &self.pool,
            render_unit(
                Arc::clone(&self.engine),
                bitmap,
                self.page,
                self.size,
                IRect::from_size(self.size),
                RenderMode::Update,
            ),
        );
        self.draw_entire = Some(EntireJob {
            task,
            mode: RenderMode::Update,
        });

        self.update_hq(true);
    }

    /// Stop and discard the high-resolution patch
    pub fn remove_hq(&mut self) {
        self.cancel_patch();
        self.patch_view_size = None;
        self.patch_area = None;
        self.patch_shown = false;
    }

    /// Apply finished background work. Returns whether anything visible changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;

        if let Some(job) = self.draw_entire.as_mut() {
            let mode = job.mode;
            match job.task.poll() {
                TaskOutcome::Pending => {}
                TaskOutcome::Cancelled => self.draw_entire = None,
                TaskOutcome::Completed(Ok(())) => {
                    self.draw_entire = None;
                    self.busy = Busy::Hidden;
                    self.entire_shown = true;
                    if let Some(why) = self.deferred_error.take() {
                        warn!("Page {}: {why}", self.page);
                        self.error = Some(why.to_string());
                        self.background = Background::Opaque;
                    } else {
                        self.error = None;
                        self.background = Background::Transparent;
                    }
                    changed = true;
                }
                TaskOutcome::Completed(Err(e)) => {
                    self.draw_entire = None;
                    debug!("Page {}: engine reported {e}", self.page);
                    self.set_render_error(entire_error(mode));
                    changed = true;
                }
                TaskOutcome::Empty => {
                    self.draw_entire = None;
                    self.set_render_error(entire_error(mode));
                    changed = true;
                }
            }
        }

        if let Some(job) = self.draw_patch.as_mut() {
            let (area, view_size) = (job.area, job.view_size);
            match job.task.poll() {
                TaskOutcome::Pending => {}
                TaskOutcome::Cancelled => self.draw_patch = None,
                TaskOutcome::Completed(Ok(())) => {
                    self.draw_patch = None;
                    self.patch_view_size = Some(view_size);
                    self.patch_area = Some(area);
                    self.patch_shown = true;
                    changed = true;
                }
                TaskOutcome::Completed(Err(_)) | TaskOutcome::Empty => {
                    self.draw_patch = None;
                    self.set_render_error(ERROR_PATCH);
                    changed = true;
                }
            }
        }

        if let Some(task) = self.get_links.as_mut() {
            match task.poll() {
                TaskOutcome::Pending => {}
                TaskOutcome::Completed(links) => {
                    self.get_links = None;
                    self.links = Some(links);
                    changed = true;
                }
                TaskOutcome::Empty | TaskOutcome::Cancelled => self.get_links = None,
            }
        }

        changed
    }

    /// Whether any background work is still outstanding
    pub fn has_pending_work(&self) -> bool {
        self.draw_entire.is_some() || self.draw_patch.is_some() || self.get_links.is_some()
    }

    /// View-to-document scale at the current laid-out width
    pub fn current_scale(&self) -> f32 {
        if self.size.width <= 0 {
            return self.source_scale;
        }
        self.source_scale * self.frame.width() as f32 / self.size.width as f32
    }

    /// Follow the link under viewport point (`x`, `y`).
    ///
    /// Returns the page an internal link leads to. External links are handed
    /// to `hooks` and never navigate; failures are reported through `notes`.
    pub fn hit_link(
        &self,
        x: f32,
        y: f32,
        hooks: &mut dyn ReaderHooks,
        notes: &mut NotificationManager,
    ) -> Option<usize> {
        let scale = self.current_scale();
        if scale <= 0.0 {
            return None;
        }
        let doc_x = (x - self.frame.left as f32) / scale;
        let doc_y = (y - self.frame.top as f32) / scale;

        let link = self
            .links
            .as_ref()?
            .iter()
            .find(|l| l.bounds.contains(doc_x, doc_y))?;
        self.follow_link(link, hooks, notes)
    }

    fn follow_link(
        &self,
        link: &Link,
        hooks: &mut dyn ReaderHooks,
        notes: &mut NotificationManager,
    ) -> Option<usize> {
        match &link.target {
            LinkTarget::External { uri } => {
                if let Err(e) = hooks.open_uri(uri) {
                    error!("Failed to open link {uri}: {e:#}");
                    notes.error(format!("Could not open {uri}: {e}"));
                }
                None
            }
            LinkTarget::Internal { .. } => match self.engine.resolve_link(link) {
                Ok(page) => Some(page),
                Err(e) => {
                    error!("Failed to resolve link on page {}: {e}", self.page);
                    notes.error(format!("Broken link: {e}"));
                    None
                }
            },
        }
    }

    /// Search highlight outlines in view coordinates
    pub fn search_overlay(&self) -> Vec<[PointF; 4]> {
        if self.is_blank {
            return Vec::new();
        }
        let scale = self.current_scale();
        self.search_boxes
            .iter()
            .flatten()
            .flatten()
            .map(|q| q.scale(scale).outline())
            .collect()
    }

    /// Link rectangles in view coordinates, empty unless highlighting is on
    pub fn link_overlay(&self) -> Vec<RectF> {
        if self.is_blank || !self.highlight_links {
            return Vec::new();
        }
        let scale = self.current_scale();
        self.links
            .iter()
            .flatten()
            .map(|l| l.bounds.scale(scale))
            .collect()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn size(&self) -> ISize {
        self.size
    }

    pub fn parent_size(&self) -> ISize {
        self.parent_size
    }

    pub fn measured(&self) -> ISize {
        self.measured
    }

    pub fn frame(&self) -> IRect {
        self.frame
    }

    pub fn is_blank(&self) -> bool {
        self.is_blank
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn background(&self) -> Background {
        self.background
    }

    pub fn is_busy_visible(&self, now: Instant) -> bool {
        match self.busy {
            Busy::Hidden => false,
            Busy::Shown => true,
            Busy::Delayed { show_at } => now >= show_at,
        }
    }

    pub fn is_entire_shown(&self) -> bool {
        self.entire_shown
    }

    pub fn is_patch_shown(&self) -> bool {
        self.patch_shown
    }

    pub fn patch_area(&self) -> Option<IRect> {
        self.patch_area
    }

    pub fn patch_view_size(&self) -> Option<ISize> {
        self.patch_view_size
    }

    pub fn search_boxes(&self) -> Option<&SearchHits> {
        self.search_boxes.as_ref()
    }

    pub fn links(&self) -> Option<&[Link]> {
        self.links.as_deref()
    }

    pub fn highlights_links(&self) -> bool {
        self.highlight_links
    }

    pub fn entire_bitmap(&self) -> Option<&SharedBitmap> {
        self.entire_bm.as_ref()
    }

    pub fn patch_bitmap(&self) -> Option<&SharedBitmap> {
        self.patch_bm.as_ref()
    }

    /// Number of entire-page renders in flight (0 or 1)
    pub fn entire_renders_in_flight(&self) -> usize {
        usize::from(self.draw_entire.is_some())
    }

    /// Number of patch renders in flight (0 or 1)
    pub fn patch_renders_in_flight(&self) -> usize {
        usize::from(self.draw_patch.is_some())
    }

    pub fn entire_token(&self) -> Option<CancelToken> {
        self.draw_entire.as_ref().map(|job| job.task.token().clone())
    }

    pub fn patch_token(&self) -> Option<CancelToken> {
        self.draw_patch.as_ref().map(|job| job.task.token().clone())
    }
}

impl std::fmt::Debug for PageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageView")
            .field("id", &self.id)
            .field("page", &self.page)
            .field("size", &self.size)
            .field("frame", &self.frame)
            .field("is_blank", &self.is_blank)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Drop for PageView {
    fn drop(&mut self) {
        self.cancel_entire();
        self.cancel_patch();
        self.cancel_links();
    }
}

fn entire_error(mode: RenderMode) -> &'static str {
    match mode {
        RenderMode::Draw => ERROR_RENDERING,
        RenderMode::Update => ERROR_UPDATING,
    }
}

/// Background unit rasterizing `patch` of `page` into `bitmap`.
///
/// The bitmap lock is taken before the abort check: a cancelled unit that
/// is still waiting for the lock never overwrites the newer owner's pixels.
fn render_unit(
    engine: Arc<dyn DocumentEngine>,
    bitmap: SharedBitmap,
    page: usize,
    page_size: ISize,
    patch: IRect,
    mode: RenderMode,
) -> impl FnOnce(&CancelToken) -> Option<Result<(), EngineError>> + Send + 'static {
    move |token| {
        let mut bm = bitmap.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_aborted() {
            return None;
        }
        let result = match mode {
            RenderMode::Draw => engine.draw_page(&mut bm, page, page_size, patch, token),
            RenderMode::Update => engine.update_page(&mut bm, page, page_size, patch, token),
        };
        match result {
            Err(EngineError::Aborted) => None,
            other => Some(other),
        }
    }
}
