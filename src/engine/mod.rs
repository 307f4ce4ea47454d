//! Document engine interface
//!
//! The engine owns parsing, layout and rasterization. The viewer only talks to
//! it through [`DocumentEngine`], from worker threads as well as the UI thread,
//! so implementations must be `Send + Sync`.

#[cfg(feature = "pdf")]
pub mod mupdf;

use std::sync::{Arc, Mutex, TryLockError};

use crate::error::ViewerError;
use crate::geometry::{IRect, ISize, Quad, RectF};
use crate::task::CancelToken;

/// Page dimensions in document points
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Where a link leads
#[derive(Clone, Debug, PartialEq)]
pub enum LinkTarget {
    Internal { page: usize },
    External { uri: String },
}

/// Clickable area on a page, bounds in document points
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub bounds: RectF,
    pub target: LinkTarget,
}

impl Link {
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self.target, LinkTarget::External { .. })
    }
}

/// One node of the document outline
#[derive(Clone, Debug, PartialEq)]
pub struct OutlineNode {
    pub title: Option<String>,
    pub page: Option<usize>,
    pub children: Vec<OutlineNode>,
}

/// Outline entry flattened for display, indented by nesting depth
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutlineItem {
    pub title: String,
    pub page: Option<usize>,
}

/// Flatten titled outline nodes depth-first, four spaces of indent per level.
/// Untitled nodes are skipped but their children are kept.
pub fn flatten_outline(nodes: &[OutlineNode]) -> Vec<OutlineItem> {
    fn walk(nodes: &[OutlineNode], indent: &str, out: &mut Vec<OutlineItem>) {
        for node in nodes {
            if let Some(title) = &node.title {
                out.push(OutlineItem {
                    title: format!("{indent}{title}"),
                    page: node.page,
                });
            }
            walk(&node.children, &format!("{indent}    "), out);
        }
    }

    let mut out = Vec::new();
    walk(nodes, "", &mut out);
    out
}

/// Hits on a page: one entry per match, each match one or more quads
pub type SearchHits = Vec<Vec<Quad>>;

/// Errors reported by a document engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("operation aborted")]
    Aborted,

    #[error("document requires a password")]
    PasswordRequired,

    #[error("{detail}")]
    Generic { detail: String },
}

impl EngineError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Operations the viewer consumes from the document engine
pub trait DocumentEngine: Send + Sync {
    fn page_count(&self) -> Result<usize, EngineError>;

    fn page_size(&self, page: usize) -> Result<PageSize, EngineError>;

    /// Rasterize `patch` (in pixels of a page rendered at `page_size`) into
    /// the top-left corner of `bitmap`.
    fn draw_page(
        &self,
        bitmap: &mut Bitmap,
        page: usize,
        page_size: ISize,
        patch: IRect,
        token: &CancelToken,
    ) -> Result<(), EngineError>;

    /// Refresh an existing raster. Engines without incremental updates redraw.
    fn update_page(
        &self,
        bitmap: &mut Bitmap,
        page: usize,
        page_size: ISize,
        patch: IRect,
        token: &CancelToken,
    ) -> Result<(), EngineError> {
        self.draw_page(bitmap, page, page_size, patch, token)
    }

    fn page_links(&self, page: usize) -> Result<Vec<Link>, EngineError>;

    /// Page a link lands on
    fn resolve_link(&self, link: &Link) -> Result<usize, EngineError> {
        match &link.target {
            LinkTarget::Internal { page } => Ok(*page),
            LinkTarget::External { uri } => Err(EngineError::generic(format!(
                "external link {uri} has no page"
            ))),
        }
    }

    fn search_page(&self, page: usize, text: &str) -> Result<SearchHits, EngineError>;

    fn outline(&self) -> Result<Vec<OutlineNode>, EngineError> {
        Ok(Vec::new())
    }

    fn title(&self) -> Option<String> {
        None
    }

    fn needs_password(&self) -> bool {
        false
    }

    fn authenticate_password(&self, _password: &str) -> bool {
        true
    }

    fn is_reflowable(&self) -> bool {
        false
    }

    /// Re-flow the document and return where `current_page` ended up
    fn layout(
        &self,
        current_page: usize,
        _width: u32,
        _height: u32,
        _em: u32,
    ) -> Result<usize, EngineError> {
        Ok(current_page)
    }
}

/// RGBA raster target
#[derive(Clone)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Bitmap handed between the UI thread and render workers
pub type SharedBitmap = Arc<Mutex<Bitmap>>;

/// Drop a handle on a shared bitmap without waiting for a render worker.
///
/// The pixels are freed at once when no worker is drawing into the bitmap,
/// otherwise when the last handle goes. Returns whether they were freed now.
pub fn release_shared(bitmap: SharedBitmap) -> bool {
    match bitmap.try_lock() {
        Ok(mut bm) => {
            bm.recycle();
            true
        }
        Err(TryLockError::Poisoned(poisoned)) => {
            poisoned.into_inner().recycle();
            true
        }
        Err(TryLockError::WouldBlock) => false,
    }
}

impl Bitmap {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Allocate a cleared bitmap, reporting allocation failure instead of aborting
    pub fn try_new(width: u32, height: u32) -> Result<Self, ViewerError> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(Self::BYTES_PER_PIXEL))
            .ok_or(ViewerError::OutOfMemory { width, height })?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| ViewerError::OutOfMemory { width, height })?;
        pixels.resize(len, 0);
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn try_shared(size: ISize) -> Result<SharedBitmap, ViewerError> {
        let w = u32::try_from(size.width.max(0)).unwrap_or(0);
        let h = u32::try_from(size.height.max(0)).unwrap_or(0);
        Ok(Arc::new(Mutex::new(Self::try_new(w, h)?)))
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn size(&self) -> ISize {
        ISize::new(
            i32::try_from(self.width).unwrap_or(i32::MAX),
            i32::try_from(self.height).unwrap_or(i32::MAX),
        )
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Fill with a single RGBA value
    pub fn erase(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(Self::BYTES_PER_PIXEL) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Free the pixel memory; the bitmap reports a zero size afterwards
    pub fn recycle(&mut self) {
        self.pixels = Vec::new();
        self.width = 0;
        self.height = 0;
    }

    #[must_use]
    pub fn is_recycled(&self) -> bool {
        self.pixels.is_empty()
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
