//! Directional page-by-page text search
//!
//! A search scans pages one at a time on a worker, stepping forwards or
//! backwards from the start page, and stops at the first page with a hit.
//! It never wraps: running off either end of the document means "not found".

use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::Receiver;
use log::{debug, info, warn};

use crate::engine::{DocumentEngine, SearchHits};
use crate::task::{CancellableTask, TaskOutcome, WorkerPool};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

impl SearchDirection {
    pub fn step(self) -> isize {
        match self {
            SearchDirection::Forward => 1,
            SearchDirection::Backward => -1,
        }
    }
}

/// The match currently highlighted in the document
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    pub text: String,
    pub page: usize,
    pub boxes: SearchHits,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Searching,
    Found,
    NotFound,
    Cancelled,
}

/// What a finished search reports to its owner. Cancellation reports nothing.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchEvent {
    Found(SearchResult),
    NotFound,
}

/// Page being scanned, for a progress indicator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchProgress {
    pub page: usize,
    pub page_count: usize,
}

enum Scan {
    Found(SearchResult),
    Exhausted,
}

struct ActiveSearch {
    task: CancellableTask<Scan>,
    progress: Receiver<usize>,
    last_page: usize,
    page_count: usize,
    show_progress_at: Instant,
}

pub struct SearchController {
    engine: Arc<dyn DocumentEngine>,
    pool: Arc<WorkerPool>,
    progress_delay: Duration,
    active: Option<ActiveSearch>,
    state: SearchState,
}

impl SearchController {
    pub fn new(engine: Arc<dyn DocumentEngine>, pool: Arc<WorkerPool>, progress_delay: Duration) -> Self {
        Self {
            engine,
            pool,
            progress_delay,
            active: None,
            state: SearchState::Idle,
        }
    }

    /// Start searching for `text`, cancelling any search in flight.
    ///
    /// Continues from the page after (or before) `search_page` when a
    /// previous match exists, otherwise starts at `display_page`.
    pub fn go(
        &mut self,
        text: &str,
        direction: SearchDirection,
        display_page: usize,
        search_page: Option<usize>,
        now: Instant,
    ) {
        self.stop();

        let step = direction.step();
        let start = match search_page {
            Some(page) => page as isize + step,
            None => display_page as isize,
        };
        let page_count = match self.engine.page_count() {
            Ok(n) => n,
            Err(e) => {
                warn!("Cannot search, page count unavailable: {e}");
                0
            }
        };
        debug!("Searching {direction:?} for {text:?} from page {start}");

        let (progress_tx, progress_rx) = flume::unbounded();
        let engine = Arc::clone(&self.engine);
        let text = text.to_string();
        let task = CancellableTask::spawn(&self.pool, move |token| {
            let mut index = start;
            while index >= 0 && (index as usize) < page_count && !token.is_aborted() {
                let page = index as usize;
                let _ = progress_tx.send(page);
                match engine.search_page(page, &text) {
                    Ok(hits) if !hits.is_empty() => {
                        return Some(Scan::Found(SearchResult {
                            text,
                            page,
                            boxes: hits,
                        }));
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Search failed on page {page}: {e}"),
                }
                index += step;
            }
            if token.is_aborted() {
                return None;
            }
            Some(Scan::Exhausted)
        });

        self.active = Some(ActiveSearch {
            task,
            progress: progress_rx,
            last_page: start.max(0) as usize,
            page_count,
            show_progress_at: now + self.progress_delay,
        });
        self.state = SearchState::Searching;
    }

    /// Cancel the search in flight, if any. Nothing is reported for it.
    pub fn stop(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.task.cancel();
            self.state = SearchState::Cancelled;
            debug!("Search cancelled");
        }
    }

    /// Collect the outcome of a finished search
    pub fn poll(&mut self) -> Option<SearchEvent> {
        let active = self.active.as_mut()?;
        if let Some(page) = active.progress.try_iter().last() {
            active.last_page = page;
        }

        let event = match active.task.poll() {
            TaskOutcome::Pending => return None,
            TaskOutcome::Completed(Scan::Found(result)) => {
                info!("Found {:?} on page {}", result.text, result.page);
                self.state = SearchState::Found;
                Some(SearchEvent::Found(result))
            }
            TaskOutcome::Completed(Scan::Exhausted) => {
                info!("Search text not found");
                self.state = SearchState::NotFound;
                Some(SearchEvent::NotFound)
            }
            TaskOutcome::Empty | TaskOutcome::Cancelled => {
                self.state = SearchState::Cancelled;
                None
            }
        };
        self.active = None;
        event
    }

    /// Progress to display, only once the search has run past the delay
    pub fn progress(&self, now: Instant) -> Option<SearchProgress> {
        let active = self.active.as_ref()?;
        if now < active.show_progress_at {
            return None;
        }
        Some(SearchProgress {
            page: active.last_page,
            page_count: active.page_count,
        })
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn is_searching(&self) -> bool {
        self.active.is_some()
    }
}

impl std::fmt::Debug for SearchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchController")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
