//! MuPDF-backed engine
//!
//! `mupdf::Document` is not `Send`, so it lives on a dedicated thread and
//! every call is a request carrying its own reply channel. Render workers
//! block on the reply; requests whose token was aborted while queued are
//! answered with [`EngineError::Aborted`] without touching the document.

use std::path::Path;
use std::thread;

use flume::{Receiver, Sender};
use log::{debug, error, info, warn};
use mupdf::{Colorspace, Device, Document, Matrix, MetadataName, Page, Pixmap};

use super::{
    Bitmap, DocumentEngine, EngineError, Link, LinkTarget, OutlineNode, PageSize, SearchHits,
};
use crate::geometry::{IRect, ISize, PointF, Quad, RectF};
use crate::task::CancelToken;

const MAX_HITS: u32 = 500;

type Reply<T> = Sender<Result<T, EngineError>>;

/// Rendered patch, tightly packed RGBA
struct Raster {
    width: usize,
    height: usize,
    rgba: Vec<u8>,
}

enum Request {
    PageCount(Reply<usize>),
    PageSize {
        page: usize,
        reply: Reply<PageSize>,
    },
    Render {
        page: usize,
        page_size: ISize,
        patch: IRect,
        token: CancelToken,
        reply: Reply<Raster>,
    },
    Links {
        page: usize,
        reply: Reply<Vec<Link>>,
    },
    Search {
        page: usize,
        text: String,
        reply: Reply<SearchHits>,
    },
    Outline(Reply<Vec<OutlineNode>>),
    Title(Sender<Option<String>>),
    NeedsPassword(Sender<bool>),
    Authenticate {
        password: String,
        reply: Sender<bool>,
    },
    IsReflowable(Sender<bool>),
    Layout {
        current_page: usize,
        width: u32,
        height: u32,
        em: u32,
        reply: Reply<usize>,
    },
}

pub struct MupdfEngine {
    requests: Sender<Request>,
}

impl MupdfEngine {
    /// Open `path` on a fresh engine thread
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let path_str = path.to_string_lossy().into_owned();
        let (requests, inbox) = flume::unbounded();
        let (opened_tx, opened_rx) = flume::bounded(1);

        thread::Builder::new()
            .name("mupdf-engine".to_string())
            .spawn(move || match Document::open(&path_str) {
                Ok(doc) => {
                    let _ = opened_tx.send(Ok(()));
                    serve(doc, &inbox);
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(pdf_error(&e)));
                }
            })
            .map_err(|e| EngineError::generic(format!("failed to start engine thread: {e}")))?;

        opened_rx.recv().map_err(|_| thread_gone())??;
        info!("Opened document {}", path.display());
        Ok(Self { requests })
    }

    fn call<T>(&self, build: impl FnOnce(Sender<T>) -> Request) -> Result<T, EngineError> {
        let (tx, rx) = flume::bounded(1);
        self.requests.send(build(tx)).map_err(|_| thread_gone())?;
        rx.recv().map_err(|_| thread_gone())
    }

    fn call_or<T>(&self, fallback: T, build: impl FnOnce(Sender<T>) -> Request) -> T {
        self.call(build).unwrap_or_else(|e| {
            warn!("{e}");
            fallback
        })
    }
}

impl DocumentEngine for MupdfEngine {
    fn page_count(&self) -> Result<usize, EngineError> {
        self.call(Request::PageCount)?
    }

    fn page_size(&self, page: usize) -> Result<PageSize, EngineError> {
        self.call(|reply| Request::PageSize { page, reply })?
    }

    fn draw_page(
        &self,
        bitmap: &mut Bitmap,
        page: usize,
        page_size: ISize,
        patch: IRect,
        token: &CancelToken,
    ) -> Result<(), EngineError> {
        if token.is_aborted() {
            return Err(EngineError::Aborted);
        }
        let raster = self.call(|reply| Request::Render {
            page,
            page_size,
            patch,
            token: token.clone(),
            reply,
        })??;
        if token.is_aborted() {
            return Err(EngineError::Aborted);
        }
        blit(&raster, bitmap);
        Ok(())
    }

    fn page_links(&self, page: usize) -> Result<Vec<Link>, EngineError> {
        self.call(|reply| Request::Links { page, reply })?
    }

    fn search_page(&self, page: usize, text: &str) -> Result<SearchHits, EngineError> {
        let text = text.to_string();
        self.call(|reply| Request::Search { page, text, reply })?
    }

    fn outline(&self) -> Result<Vec<OutlineNode>, EngineError> {
        self.call(Request::Outline)?
    }

    fn title(&self) -> Option<String> {
        self.call_or(None, Request::Title)
    }

    fn needs_password(&self) -> bool {
        self.call_or(false, Request::NeedsPassword)
    }

    fn authenticate_password(&self, password: &str) -> bool {
        let password = password.to_string();
        self.call_or(false, |reply| Request::Authenticate { password, reply })
    }

    fn is_reflowable(&self) -> bool {
        self.call_or(false, Request::IsReflowable)
    }

    fn layout(&self, current_page: usize, width: u32, height: u32, em: u32) -> Result<usize, EngineError> {
        self.call(|reply| Request::Layout {
            current_page,
            width,
            height,
            em,
            reply,
        })?
    }
}

impl std::fmt::Debug for MupdfEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MupdfEngine")
            .field("queued", &self.requests.len())
            .finish()
    }
}

fn thread_gone() -> EngineError {
    EngineError::generic("engine thread has stopped")
}

fn pdf_error(e: &mupdf::error::Error) -> EngineError {
    EngineError::generic(e.to_string())
}

/// Engine thread main loop, ends when the last [`MupdfEngine`] handle drops
fn serve(mut doc: Document, inbox: &Receiver<Request>) {
    for request in inbox.iter() {
        match request {
            Request::PageCount(reply) => {
                let _ = reply.send(page_count(&doc));
            }
            Request::PageSize { page, reply } => {
                let _ = reply.send(load_page(&doc, page).and_then(|p| page_size(&p)));
            }
            Request::Render {
                page,
                page_size,
                patch,
                token,
                reply,
            } => {
                let result = if token.is_aborted() {
                    Err(EngineError::Aborted)
                } else {
                    render(&doc, page, page_size, patch)
                };
                let _ = reply.send(result);
            }
            Request::Links { page, reply } => {
                let _ = reply.send(load_page(&doc, page).map(|p| links(&p)));
            }
            Request::Search { page, text, reply } => {
                let _ = reply.send(search(&doc, page, &text));
            }
            Request::Outline(reply) => {
                let result = doc
                    .outlines()
                    .map(|outlines| outline_nodes(&outlines))
                    .map_err(|e| pdf_error(&e));
                let _ = reply.send(result);
            }
            Request::Title(reply) => {
                let title = doc
                    .metadata(MetadataName::Title)
                    .ok()
                    .filter(|t| !t.is_empty());
                let _ = reply.send(title);
            }
            Request::NeedsPassword(reply) => {
                let _ = reply.send(doc.needs_password().unwrap_or(false));
            }
            Request::Authenticate { password, reply } => {
                let ok = doc.authenticate(&password).unwrap_or_else(|e| {
                    error!("Password check failed: {e}");
                    false
                });
                let _ = reply.send(ok);
            }
            Request::IsReflowable(reply) => {
                let _ = reply.send(doc.is_reflowable().unwrap_or(false));
            }
            Request::Layout {
                current_page,
                width,
                height,
                em,
                reply,
            } => {
                let _ = reply.send(relayout(&mut doc, current_page, width, height, em));
            }
        }
    }
    debug!("Engine thread exiting");
}

fn page_count(doc: &Document) -> Result<usize, EngineError> {
    let count = doc.page_count().map_err(|e| pdf_error(&e))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn load_page(doc: &Document, page: usize) -> Result<Page, EngineError> {
    let count = page_count(doc)?;
    if page >= count {
        return Err(EngineError::PageOutOfRange { page, count });
    }
    let index = i32::try_from(page).map_err(|_| EngineError::PageOutOfRange { page, count })?;
    doc.load_page(index).map_err(|e| pdf_error(&e))
}

fn page_size(page: &Page) -> Result<PageSize, EngineError> {
    let b = page.bounds().map_err(|e| pdf_error(&e))?;
    Ok(PageSize::new(b.x1 - b.x0, b.y1 - b.y0))
}

/// Rasterize just `patch` of the page scaled to `page_size`.
///
/// The pixmap covers the patch alone, so memory stays bounded by the patch
/// however far the page is zoomed.
fn render(doc: &Document, page: usize, page_size: ISize, patch: IRect) -> Result<Raster, EngineError> {
    let page = load_page(doc, page)?;
    let bounds = page.bounds().map_err(|e| pdf_error(&e))?;
    let (natural_w, natural_h) = (bounds.x1 - bounds.x0, bounds.y1 - bounds.y0);
    if natural_w <= 0.0 || natural_h <= 0.0 || page_size.is_empty() || patch.is_empty() {
        return Err(EngineError::generic("page has no area"));
    }
    let sx = page_size.width as f32 / natural_w;
    let sy = page_size.height as f32 / natural_h;

    // Device space starts at the scaled page origin, which need not be zero
    let ox = (bounds.x0 * sx).floor() as i32;
    let oy = (bounds.y0 * sy).floor() as i32;
    let area = mupdf::IRect::new(
        ox + patch.left,
        oy + patch.top,
        ox + patch.right,
        oy + patch.bottom,
    );

    let mut pixmap =
        Pixmap::new_with_rect(&Colorspace::device_rgb(), area, false).map_err(|e| pdf_error(&e))?;
    pixmap.clear_with(0xff).map_err(|e| pdf_error(&e))?;
    {
        let device = Device::from_pixmap(&pixmap).map_err(|e| pdf_error(&e))?;
        page.run(&device, &Matrix::new_scale(sx, sy))
            .map_err(|e| pdf_error(&e))?;
    }

    Ok(pack_rgba(
        pixmap.samples(),
        pixmap.n() as usize,
        patch.width() as usize,
        patch.height() as usize,
    ))
}

/// Repack `n`-channel samples into opaque RGBA, row stride taken from the buffer
fn pack_rgba(samples: &[u8], n: usize, width: usize, height: usize) -> Raster {
    let mut rgba = vec![0xff; width * height * Bitmap::BYTES_PER_PIXEL];
    if n >= 3 && width > 0 {
        let stride = samples.len() / height.max(1);
        for (row, dst_row) in rgba
            .chunks_exact_mut(width * Bitmap::BYTES_PER_PIXEL)
            .enumerate()
        {
            let Some(src_row) = samples.get(row * stride..(row + 1) * stride) else {
                break;
            };
            for (src, dst) in src_row
                .chunks_exact(n)
                .zip(dst_row.chunks_exact_mut(Bitmap::BYTES_PER_PIXEL))
            {
                dst[..3].copy_from_slice(&src[..3]);
            }
        }
    }
    Raster {
        width,
        height,
        rgba,
    }
}

/// Copy a raster into the top-left corner of `bitmap`, clipped to both
fn blit(raster: &Raster, bitmap: &mut Bitmap) {
    let dst_w = bitmap.width() as usize;
    let rows = raster.height.min(bitmap.height() as usize);
    let cols = raster.width.min(dst_w);
    let row_bytes = cols * Bitmap::BYTES_PER_PIXEL;
    let pixels = bitmap.pixels_mut();
    for row in 0..rows {
        let src = row * raster.width * Bitmap::BYTES_PER_PIXEL;
        let dst = row * dst_w * Bitmap::BYTES_PER_PIXEL;
        pixels[dst..dst + row_bytes].copy_from_slice(&raster.rgba[src..src + row_bytes]);
    }
}

fn links(page: &Page) -> Vec<Link> {
    let Ok(links) = page.links() else {
        return Vec::new();
    };

    links
        .filter_map(|link| {
            let target = if let Some(dest) = link.dest {
                LinkTarget::Internal {
                    page: dest.loc.page_number as usize,
                }
            } else if !link.uri.is_empty() {
                LinkTarget::External {
                    uri: link.uri.clone(),
                }
            } else {
                return None;
            };
            let r = link.bounds;
            Some(Link {
                bounds: RectF::new(r.x0, r.y0, r.x1, r.y1),
                target,
            })
        })
        .collect()
}

fn search(doc: &Document, page: usize, text: &str) -> Result<SearchHits, EngineError> {
    let page = load_page(doc, page)?;
    let quads = page.search(text, MAX_HITS).map_err(|e| pdf_error(&e))?;
    Ok(quads
        .iter()
        .map(|q| {
            vec![Quad {
                ul: PointF::new(q.ul.x, q.ul.y),
                ur: PointF::new(q.ur.x, q.ur.y),
                ll: PointF::new(q.ll.x, q.ll.y),
                lr: PointF::new(q.lr.x, q.lr.y),
            }]
        })
        .collect())
}

fn outline_nodes(outlines: &[mupdf::Outline]) -> Vec<OutlineNode> {
    outlines
        .iter()
        .map(|o| {
            let title = o.title.trim();
            OutlineNode {
                title: (!title.is_empty()).then(|| title.to_string()),
                page: o.dest.map(|dest| dest.loc.page_number as usize),
                children: outline_nodes(&o.down),
            }
        })
        .collect()
}

/// Lay the document out again and map `current_page` to the same relative
/// position in the new pagination
fn relayout(doc: &mut Document, current_page: usize, width: u32, height: u32, em: u32) -> Result<usize, EngineError> {
    let before = page_count(doc)?;
    doc.layout(width as f32, height as f32, em as f32)
        .map_err(|e| pdf_error(&e))?;
    let after = page_count(doc)?;
    if before == 0 || after == 0 {
        return Ok(0);
    }
    let page = (current_page * after / before).min(after - 1);
    debug!("Relayout: {before} pages -> {after}, page {current_page} -> {page}");
    Ok(page)
}
