//! Page slot cache: hands out render slots and remembers page sizes

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::engine::{Bitmap, DocumentEngine, PageSize, SharedBitmap, release_shared};
use crate::error::ViewerError;
use crate::geometry::ISize;
use crate::page_view::{PageView, SlotConfig};
use crate::task::{CancellableTask, TaskOutcome, WorkerPool};

/// A page size lookup that finished for a slot; `size` is `None` when the
/// engine could not tell
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SizeDelivery {
    pub slot_id: u64,
    pub page: usize,
    pub size: Option<PageSize>,
}

struct SizeLookup {
    page: usize,
    /// Completes with `None` when the engine failed; empty only when aborted
    task: CancellableTask<Option<PageSize>>,
}

pub struct PageAdapter {
    engine: Arc<dyn DocumentEngine>,
    pool: Arc<WorkerPool>,
    config: SlotConfig,
    page_sizes: HashMap<usize, PageSize>,
    /// Size is kept beside the bitmap so checking it never takes the lock
    shared_hq: Option<(SharedBitmap, ISize)>,
    /// Keyed by the id of the slot that asked
    lookups: HashMap<u64, SizeLookup>,
}

impl PageAdapter {
    pub fn new(engine: Arc<dyn DocumentEngine>, pool: Arc<WorkerPool>, config: SlotConfig) -> Self {
        Self {
            engine,
            pool,
            config,
            page_sizes: HashMap::new(),
            shared_hq: None,
            lookups: HashMap::new(),
        }
    }

    /// Page count, 0 when the engine cannot tell
    pub fn count(&self) -> usize {
        match self.engine.page_count() {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to count pages: {e}");
                0
            }
        }
    }

    pub fn engine(&self) -> &Arc<dyn DocumentEngine> {
        &self.engine
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Produce a slot showing `page`, reusing `recycled` when given.
    ///
    /// With a cached size the slot starts rendering at once; otherwise it is
    /// blanked and a size lookup is queued, delivered through
    /// [`PageAdapter::poll`].
    pub fn get_view(
        &mut self,
        page: usize,
        recycled: Option<PageView>,
        parent: ISize,
    ) -> Result<PageView, ViewerError> {
        let mut view = match recycled {
            Some(view) => view,
            None => {
                let hq = self.shared_hq_for(parent)?;
                PageView::new(
                    Arc::clone(&self.engine),
                    Arc::clone(&self.pool),
                    parent,
                    hq,
                    self.config,
                )?
            }
        };

        if let Some(size) = self.page_sizes.get(&page).copied() {
            view.set_page(page, Some(size));
        } else {
            view.blank(page);
            let engine = Arc::clone(&self.engine);
            let task = CancellableTask::spawn(&self.pool, move |token| {
                if token.is_aborted() {
                    return None;
                }
                match engine.page_size(page) {
                    Ok(size) => Some(Some(size)),
                    Err(e) => {
                        warn!("Failed to get size of page {page}: {e}");
                        Some(None)
                    }
                }
            });
            // Replacing an older lookup for the same slot aborts it
            self.lookups.insert(view.id(), SizeLookup { page, task });
        }

        Ok(view)
    }

    /// The shared high-resolution bitmap, reallocated only when the viewport size changes
    fn shared_hq_for(&mut self, parent: ISize) -> Result<Option<SharedBitmap>, ViewerError> {
        let reusable = matches!(self.shared_hq, Some((_, size)) if size == parent);
        if !reusable {
            // Slots sized for the old viewport may still hold the old bitmap
            self.shared_hq = None;
            if !parent.is_empty() {
                debug!(
                    "Allocating shared high-resolution bitmap {}x{}",
                    parent.width, parent.height
                );
                self.shared_hq = Some((Bitmap::try_shared(parent)?, parent));
            }
        }
        Ok(self.shared_hq.as_ref().map(|(bm, _)| Arc::clone(bm)))
    }

    /// Collect finished size lookups, failed ones included. Sizes are cached
    /// even when the slot has moved on; the caller delivers only to slots
    /// still on that page.
    pub fn poll(&mut self) -> Vec<SizeDelivery> {
        let mut delivered = Vec::new();
        let page_sizes = &mut self.page_sizes;
        self.lookups.retain(|&slot_id, lookup| match lookup.task.poll() {
            TaskOutcome::Pending => true,
            TaskOutcome::Completed(size) => {
                if let Some(size) = size {
                    page_sizes.insert(lookup.page, size);
                }
                delivered.push(SizeDelivery {
                    slot_id,
                    page: lookup.page,
                    size,
                });
                false
            }
            // Panicked or dropped by the pool: treated as a failed lookup
            TaskOutcome::Empty => {
                delivered.push(SizeDelivery {
                    slot_id,
                    page: lookup.page,
                    size: None,
                });
                false
            }
            TaskOutcome::Cancelled => false,
        });
        delivered
    }

    /// Cancel the size lookup started for a slot that is going away
    pub fn forget(&mut self, slot_id: u64) {
        if let Some(mut lookup) = self.lookups.remove(&slot_id) {
            lookup.task.cancel();
        }
    }

    pub fn pending_lookups(&self) -> usize {
        self.lookups.len()
    }

    pub fn cached_size(&self, page: usize) -> Option<PageSize> {
        self.page_sizes.get(&page).copied()
    }

    /// Forget every cached size, e.g. after a reflow
    pub fn refresh(&mut self) {
        self.page_sizes.clear();
        for (_, mut lookup) in self.lookups.drain() {
            lookup.task.cancel();
        }
    }

    /// Free the shared high-resolution bitmap. A patch render still
    /// drawing into it keeps the pixels alive until it finishes.
    pub fn release_bitmaps(&mut self) {
        if let Some((bm, _)) = self.shared_hq.take() {
            if !release_shared(bm) {
                debug!("Shared bitmap busy, freeing it after the render");
            }
        }
    }

    pub fn shared_hq(&self) -> Option<&SharedBitmap> {
        self.shared_hq.as_ref().map(|(bm, _)| bm)
    }
}

impl std::fmt::Debug for PageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageAdapter")
            .field("cached_sizes", &self.page_sizes.len())
            .field("pending_lookups", &self.lookups.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeEngine, pump_until};
    use std::time::Duration;

    fn adapter(engine: FakeEngine) -> (Arc<FakeEngine>, PageAdapter) {
        let engine = Arc::new(engine);
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let adapter = PageAdapter::new(engine.clone(), pool, SlotConfig::default());
        (engine, adapter)
    }

    fn wait_for_sizes(adapter: &mut PageAdapter) -> Vec<SizeDelivery> {
        let mut all = Vec::new();
        assert!(pump_until(Duration::from_secs(5), || {
            all.extend(adapter.poll());
            adapter.pending_lookups() == 0
        }));
        all
    }

    #[test]
    fn first_view_is_blank_until_size_arrives() {
        let (_, mut adapter) = adapter(FakeEngine::uniform(4, 100.0, 200.0));
        let view = adapter.get_view(2, None, ISize::new(300, 300)).unwrap();
        assert!(view.is_blank());
        assert_eq!(view.page(), 2);

        let delivered = wait_for_sizes(&mut adapter);
        assert_eq!(
            delivered,
            vec![SizeDelivery {
                slot_id: view.id(),
                page: 2,
                size: Some(PageSize::new(100.0, 200.0))
            }]
        );
        assert_eq!(adapter.cached_size(2), Some(PageSize::new(100.0, 200.0)));

        // Cached now: the next slot for page 2 renders straight away
        let again = adapter.get_view(2, Some(view), ISize::new(300, 300)).unwrap();
        assert!(!again.is_blank());
        assert_eq!(adapter.pending_lookups(), 0);
    }

    #[test]
    fn failed_lookup_is_delivered_without_a_size() {
        let (_, mut adapter) = adapter(FakeEngine::uniform(4, 100.0, 200.0).with_failing_size(1));
        let view = adapter.get_view(1, None, ISize::new(300, 300)).unwrap();
        assert_eq!(
            wait_for_sizes(&mut adapter),
            vec![SizeDelivery {
                slot_id: view.id(),
                page: 1,
                size: None
            }]
        );
        // Nothing cached: the next slot for the page asks again
        assert_eq!(adapter.cached_size(1), None);
    }

    #[test]
    fn cancelled_lookup_is_not_delivered() {
        let (_, mut adapter) = adapter(FakeEngine::uniform(4, 100.0, 200.0));
        let view = adapter.get_view(1, None, ISize::new(300, 300)).unwrap();
        adapter.forget(view.id());
        assert!(wait_for_sizes(&mut adapter).is_empty());
    }

    #[test]
    fn refresh_drops_cached_sizes() {
        let (engine, mut adapter) = adapter(FakeEngine::uniform(4, 100.0, 200.0));
        let view = adapter.get_view(0, None, ISize::new(300, 300)).unwrap();
        wait_for_sizes(&mut adapter);
        adapter.refresh();
        assert_eq!(adapter.cached_size(0), None);

        let view = adapter.get_view(0, Some(view), ISize::new(300, 300)).unwrap();
        assert!(view.is_blank());
        wait_for_sizes(&mut adapter);
        assert_eq!(engine.size_queries(), vec![0, 0]);
    }

    #[test]
    fn shared_bitmap_is_reused_until_viewport_changes() {
        let (_, mut adapter) = adapter(FakeEngine::uniform(4, 100.0, 200.0));
        let a = adapter.get_view(0, None, ISize::new(300, 300)).unwrap();
        let b = adapter.get_view(1, None, ISize::new(300, 300)).unwrap();
        assert!(Arc::ptr_eq(
            a.patch_bitmap().unwrap(),
            b.patch_bitmap().unwrap()
        ));

        let c = adapter.get_view(2, None, ISize::new(500, 300)).unwrap();
        assert!(!Arc::ptr_eq(
            a.patch_bitmap().unwrap(),
            c.patch_bitmap().unwrap()
        ));

        adapter.release_bitmaps();
        assert!(adapter.shared_hq().is_none());
        assert!(c.patch_bitmap().unwrap().lock().unwrap().is_recycled());

        // A fresh bitmap after release, even for the same viewport
        let d = adapter.get_view(3, None, ISize::new(500, 300)).unwrap();
        assert!(!Arc::ptr_eq(
            c.patch_bitmap().unwrap(),
            d.patch_bitmap().unwrap()
        ));
        assert!(!d.patch_bitmap().unwrap().lock().unwrap().is_recycled());
    }

    #[test]
    fn busy_shared_bitmap_never_blocks_the_caller() {
        let (_, mut adapter) = adapter(FakeEngine::uniform(4, 100.0, 200.0));
        let parent = ISize::new(300, 300);
        let _a = adapter.get_view(0, None, parent).unwrap();

        // Stand-in for a worker drawing a patch into the shared bitmap
        let shared = Arc::clone(adapter.shared_hq().unwrap());
        let (locked_tx, locked_rx) = flume::bounded(1);
        let (done_tx, done_rx) = flume::bounded::<()>(1);
        let holder = std::thread::spawn(move || {
            let _bm = shared.lock().unwrap();
            locked_tx.send(()).unwrap();
            let _ = done_rx.recv_timeout(Duration::from_secs(10));
        });
        locked_rx.recv().unwrap();

        let started = std::time::Instant::now();
        let b = adapter.get_view(1, None, parent).unwrap();
        adapter.release_bitmaps();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(adapter.shared_hq().is_none());

        done_tx.send(()).unwrap();
        holder.join().unwrap();
        // Released while busy: the pixels stay with the remaining handles
        assert!(!b.patch_bitmap().unwrap().lock().unwrap().is_recycled());
    }

    #[test]
    fn count_is_zero_when_engine_fails() {
        let (_, adapter) = adapter(FakeEngine::uniform(4, 1.0, 1.0).with_password("pw"));
        assert_eq!(adapter.count(), 0);
    }
}
