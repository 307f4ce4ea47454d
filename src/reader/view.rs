//! Windowed paging controller
//!
//! Keeps at most three slots alive (the current page and its neighbours),
//! turns gestures into scroll and zoom offsets and lays the slots out once
//! per frame. Gestures only record offsets; [`ReaderView::frame`] consumes
//! them in a layout pass.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use log::{debug, error};

use super::gesture::{
    Travel, correction, scroll_bounds, smart_advance_amount, sub_screen_size_offset,
    tap_page_margin, within_bounds_in_direction_of_travel,
};
use super::history::HistoryStack;
use super::hooks::ReaderHooks;
use super::scroller::Scroller;
use crate::adapter::PageAdapter;
use crate::error::ViewerError;
use crate::geometry::{IPoint, IRect, ISize, PointF};
use crate::notification::NotificationManager;
use crate::page_view::PageView;
use crate::search::SearchResult;
use crate::settings::ViewerSettings;

/// Paging tunables taken from [`ViewerSettings`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReaderConfig {
    pub min_scale: f32,
    pub max_scale: f32,
    pub fling_margin: i32,
    pub page_gap: i32,
    pub horizontal_scrolling: bool,
    pub scroll_duration: Duration,
    pub min_tap_margin: i32,
}

impl From<&ViewerSettings> for ReaderConfig {
    fn from(settings: &ViewerSettings) -> Self {
        Self {
            min_scale: settings.min_scale,
            max_scale: settings.max_scale,
            fling_margin: settings.fling_margin,
            page_gap: settings.page_gap,
            horizontal_scrolling: settings.horizontal_scrolling,
            scroll_duration: settings.scroll_duration(),
            min_tap_margin: settings.min_tap_margin,
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::from(&ViewerSettings::default())
    }
}

/// Work deferred to the start of the next frame, addressed by slot id
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Posted {
    Settle(u64),
    Unsettle(u64),
}

pub struct ReaderView {
    adapter: PageAdapter,
    hooks: Box<dyn ReaderHooks>,
    config: ReaderConfig,

    viewport: ISize,
    tap_margin: i32,

    current: usize,
    reset_layout: bool,
    layout_requested: bool,
    children: BTreeMap<usize, PageView>,
    view_cache: VecDeque<PageView>,

    user_interacting: bool,
    scaling: bool,
    tap_disabled: bool,
    links_enabled: bool,

    scale: f32,
    x_scroll: i32,
    y_scroll: i32,
    scroller: Scroller,
    scroller_last: IPoint,
    last_scale_focus: Option<PointF>,
    stepper_armed: bool,
    posted: VecDeque<Posted>,

    history: HistoryStack,
    search_result: Option<SearchResult>,
    notifications: NotificationManager,
}

impl ReaderView {
    pub fn new(adapter: PageAdapter, config: ReaderConfig, hooks: Box<dyn ReaderHooks>) -> Self {
        Self {
            adapter,
            hooks,
            config,
            viewport: ISize::default(),
            tap_margin: config.min_tap_margin,
            current: 0,
            reset_layout: false,
            layout_requested: true,
            children: BTreeMap::new(),
            view_cache: VecDeque::new(),
            user_interacting: false,
            scaling: false,
            tap_disabled: false,
            links_enabled: false,
            scale: 1.0,
            x_scroll: 0,
            y_scroll: 0,
            scroller: Scroller::new(),
            scroller_last: IPoint::default(),
            last_scale_focus: None,
            stepper_armed: false,
            posted: VecDeque::new(),
            history: HistoryStack::new(),
            search_result: None,
            notifications: NotificationManager::new(),
        }
    }

    /// Set the viewport size in pixels and the screen density used for tap margins.
    ///
    /// A size change drops every slot, since slots are sized to the viewport.
    pub fn set_viewport(&mut self, size: ISize, dpi: f32) {
        self.tap_margin = tap_page_margin(dpi, size.width, self.config.min_tap_margin);
        if size != self.viewport {
            debug!("Viewport resized to {}x{}", size.width, size.height);
            self.viewport = size;
            self.drop_slots();
            self.reset_layout = true;
        }
        self.request_layout();
    }

    pub fn viewport(&self) -> ISize {
        self.viewport
    }

    pub fn tap_margin(&self) -> i32 {
        self.tap_margin
    }

    fn request_layout(&mut self) {
        self.layout_requested = true;
    }

    /// Schedule a stepper tick on the next frame
    fn prod(&mut self) {
        self.stepper_armed = true;
    }

    /// Run one UI frame: deferred actions, the stepper, size deliveries,
    /// slot results and finally the layout pass.
    ///
    /// Returns whether anything visible changed.
    pub fn frame(&mut self, now: Instant) -> bool {
        let mut changed = false;

        let posted: Vec<Posted> = self.posted.drain(..).collect();
        for action in posted {
            self.run_posted(action);
        }

        if self.stepper_armed {
            self.stepper_armed = false;
            self.step(now);
        }

        for delivery in self.adapter.poll() {
            let slot = self
                .children
                .values_mut()
                .find(|v| v.id() == delivery.slot_id && v.page() == delivery.page);
            if let Some(view) = slot {
                view.set_page(delivery.page, delivery.size);
                self.layout_requested = true;
            }
        }

        for view in self.children.values_mut() {
            changed |= view.poll();
        }

        if self.layout_requested {
            match self.layout() {
                Ok(()) => changed = true,
                Err(e) => {
                    error!("Out of memory during layout: {e}");
                    self.layout_requested = true;
                }
            }
        }

        changed |= self.notifications.update(now);
        changed
    }

    /// Whether the owner must keep calling [`ReaderView::frame`]
    pub fn needs_frame(&self) -> bool {
        self.stepper_armed
            || self.layout_requested
            || !self.posted.is_empty()
            || !self.scroller.is_finished()
            || self.adapter.pending_lookups() > 0
            || self.children.values().any(PageView::has_pending_work)
    }

    fn run_posted(&mut self, action: Posted) {
        match action {
            Posted::Settle(id) => {
                if !self.children.values().any(|v| v.id() == id) {
                    return;
                }
                // Only the settled slot may draw into the shared bitmap
                for view in self.children.values_mut().filter(|v| v.id() != id) {
                    view.remove_hq();
                }
                if let Some(view) = self.children.values_mut().find(|v| v.id() == id) {
                    view.update_hq(false);
                }
            }
            Posted::Unsettle(id) => {
                if let Some(view) = self.children.values_mut().find(|v| v.id() == id) {
                    view.remove_hq();
                }
            }
        }
    }

    fn post_settle(&mut self, page: usize) {
        if let Some(view) = self.children.get(&page) {
            self.posted.push_back(Posted::Settle(view.id()));
        }
    }

    /// One tick of scroll physics
    fn step(&mut self, now: Instant) {
        if !self.scroller.is_finished() {
            self.scroller.compute_offset(now);
            let p = self.scroller.current();
            self.x_scroll += p.x - self.scroller_last.x;
            self.y_scroll += p.y - self.scroller_last.y;
            self.scroller_last = p;
            self.request_layout();
            self.prod();
        } else if !self.user_interacting {
            self.post_settle(self.current);
        }
    }

    // Gestures

    /// A finger touched down
    pub fn on_down(&mut self) {
        self.tap_disabled = false;
        self.scroller.force_finished(false);
        self.user_interacting = true;
        self.request_layout();
    }

    /// The last finger lifted
    pub fn on_up(&mut self) {
        self.user_interacting = false;
        if self.children.contains_key(&self.current) {
            if self.scroller.is_finished() {
                self.slide_view_onto_screen(self.current);
            }
            if self.scroller.is_finished() {
                self.post_settle(self.current);
            }
        }
        self.request_layout();
    }

    /// Drag by (`distance_x`, `distance_y`), positive when the finger moves left/up
    pub fn on_scroll(&mut self, distance_x: f32, distance_y: f32) {
        if !self.tap_disabled {
            self.hooks.on_doc_motion();
        }
        if !self.scaling {
            self.x_scroll -= distance_x as i32;
            self.y_scroll -= distance_y as i32;
            self.request_layout();
        }
    }

    /// Fling with velocity in pixels per second
    pub fn on_fling(&mut self, velocity_x: f32, velocity_y: f32) {
        if self.scaling {
            return;
        }
        let Some(bounds) = self.scroll_bounds_of(self.current) else {
            return;
        };

        let horizontal = self.config.horizontal_scrolling;
        let neighbour = match Travel::of(velocity_x, velocity_y) {
            Travel::Left if horizontal && bounds.left >= 0 => self.current.checked_add(1),
            Travel::Up if !horizontal && bounds.top >= 0 => self.current.checked_add(1),
            Travel::Right if horizontal && bounds.right <= 0 => self.current.checked_sub(1),
            Travel::Down if !horizontal && bounds.bottom <= 0 => self.current.checked_sub(1),
            _ => None,
        };
        if let Some(page) = neighbour {
            if self.children.contains_key(&page) {
                self.slide_view_onto_screen(page);
                return;
            }
        }

        self.scroller_last = IPoint::default();
        let expanded = bounds.inflate(self.config.fling_margin);
        if within_bounds_in_direction_of_travel(&bounds, velocity_x, velocity_y)
            && expanded.contains(0, 0)
        {
            self.scroller
                .fling(IPoint::default(), velocity_x, velocity_y, bounds);
            self.prod();
        }
    }

    pub fn on_scale_begin(&mut self) {
        self.tap_disabled = true;
        self.scaling = true;
        self.x_scroll = 0;
        self.y_scroll = 0;
        self.last_scale_focus = None;
    }

    /// Pinch by `factor` around viewport point (`focus_x`, `focus_y`)
    pub fn on_scale(&mut self, factor: f32, focus_x: f32, focus_y: f32) {
        let previous = self.scale;
        self.scale = (self.scale * factor)
            .max(self.config.min_scale)
            .min(self.config.max_scale);
        let factor = self.scale / previous;

        let Some(view) = self.children.get(&self.current) else {
            return;
        };
        let frame = view.frame();
        let view_focus_x = focus_x as i32 - (frame.left + self.x_scroll);
        let view_focus_y = focus_y as i32 - (frame.top + self.y_scroll);
        self.x_scroll += view_focus_x - (view_focus_x as f32 * factor) as i32;
        self.y_scroll += view_focus_y - (view_focus_y as f32 * factor) as i32;

        // The focal point itself may drift between events
        if let Some(last) = self.last_scale_focus {
            self.x_scroll += (focus_x - last.x) as i32;
            self.y_scroll += (focus_y - last.y) as i32;
        }
        self.last_scale_focus = Some(PointF::new(focus_x, focus_y));
        self.request_layout();
    }

    pub fn on_scale_end(&mut self) {
        self.scaling = false;
    }

    /// A tap that was not part of a drag or pinch
    pub fn on_single_tap(&mut self, x: f32, y: f32) {
        if self.tap_disabled {
            return;
        }

        if self.links_enabled {
            if let Some(view) = self.children.get(&self.current) {
                match view.hit_link(x, y, self.hooks.as_mut(), &mut self.notifications) {
                    Some(page) => {
                        self.push_history();
                        self.set_displayed_view_index(page);
                    }
                    None => self.hooks.on_tap_main_doc_area(),
                }
                return;
            }
        }

        let margin = self.tap_margin as f32;
        let (width, height) = (self.viewport.width as f32, self.viewport.height as f32);
        if x < margin {
            self.smart_move_backwards();
        } else if x > width - margin {
            self.smart_move_forwards();
        } else if y < margin {
            self.smart_move_backwards();
        } else if y > height - margin {
            self.smart_move_forwards();
        } else {
            self.hooks.on_tap_main_doc_area();
        }
    }

    // Navigation

    pub fn displayed_view_index(&self) -> usize {
        self.current
    }

    /// Jump to `page`, discarding the current layout. Out of range pages are ignored.
    pub fn set_displayed_view_index(&mut self, page: usize) -> bool {
        let count = self.adapter.count();
        if page >= count {
            debug!("Ignoring jump to page {page} of {count}");
            return false;
        }
        self.hooks.on_move_off_child(self.current);
        self.current = page;
        self.on_move_to_child(page);
        self.reset_layout = true;
        self.request_layout();
        true
    }

    pub fn push_history(&mut self) {
        self.history.push(self.current);
    }

    /// Go back to the last page pushed. `false` when there is no history.
    pub fn pop_history(&mut self) -> bool {
        match self.history.pop() {
            Some(page) => {
                self.set_displayed_view_index(page);
                true
            }
            None => false,
        }
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn move_to_next(&mut self) {
        let next = self.current + 1;
        if self.children.contains_key(&next) {
            self.slide_view_onto_screen(next);
        }
    }

    pub fn move_to_previous(&mut self) {
        if let Some(prev) = self.current.checked_sub(1) {
            if self.children.contains_key(&prev) {
                self.slide_view_onto_screen(prev);
            }
        }
    }

    /// Page forwards: down through the current page in screen-sized steps,
    /// then across to the next page.
    pub fn smart_move_forwards(&mut self) {
        let Some(view) = self.children.get(&self.current) else {
            return;
        };
        let ISize {
            width: screen_width,
            height: screen_height,
        } = self.viewport;
        let remaining = self.scroller.remaining();
        let frame = view.frame();

        let top = -(frame.top + self.y_scroll + remaining.y);
        let right = screen_width - (frame.left + self.x_scroll + remaining.x);
        let bottom = screen_height + top;
        let doc = view.measured();

        let (x_offset, y_offset) = if bottom >= doc.height {
            if right + screen_width > doc.width {
                let Some(next) = self.children.get(&(self.current + 1)) else {
                    return;
                };
                let next_frame = next.frame();
                let next_top = -(next_frame.top + self.y_scroll + remaining.y);
                let next_left = -(next_frame.left + self.x_scroll + remaining.x);
                let next_doc = next.measured();

                let y_offset = if next_doc.height < screen_height {
                    (next_doc.height - screen_height) / 2
                } else {
                    0
                };
                let mut x_offset = if next_doc.width < screen_width {
                    (next_doc.width - screen_width) / 2
                } else {
                    right % screen_width
                };
                if x_offset + screen_width > next_doc.width {
                    x_offset = next_doc.width - screen_width;
                }
                (x_offset - next_left, y_offset - next_top)
            } else {
                (screen_width, screen_height - bottom)
            }
        } else {
            (0, smart_advance_amount(screen_height, doc.height - bottom))
        };

        self.start_step_scroll(remaining, x_offset, y_offset);
    }

    /// Mirror of [`ReaderView::smart_move_forwards`]
    pub fn smart_move_backwards(&mut self) {
        let Some(view) = self.children.get(&self.current) else {
            return;
        };
        let ISize {
            width: screen_width,
            height: screen_height,
        } = self.viewport;
        let remaining = self.scroller.remaining();
        let frame = view.frame();

        let left = -(frame.left + self.x_scroll + remaining.x);
        let top = -(frame.top + self.y_scroll + remaining.y);
        let doc_height = view.measured().height;

        let (x_offset, y_offset) = if top <= 0 {
            if left < screen_width {
                let Some(prev) = self
                    .current
                    .checked_sub(1)
                    .and_then(|p| self.children.get(&p))
                else {
                    return;
                };
                let prev_doc = prev.measured();
                let prev_frame = prev.frame();

                let y_offset = if prev_doc.height < screen_height {
                    (prev_doc.height - screen_height) / 2
                } else {
                    0
                };
                let prev_left = -(prev_frame.left + self.x_scroll);
                let prev_top = -(prev_frame.top + self.y_scroll);

                let mut x_offset;
                if prev_doc.width < screen_width {
                    x_offset = (prev_doc.width - screen_width) / 2;
                } else {
                    x_offset = if left > 0 { left % screen_width } else { 0 };
                    if x_offset + screen_width > prev_doc.width {
                        x_offset = prev_doc.width - screen_width;
                    }
                    while x_offset + screen_width * 2 < prev_doc.width {
                        x_offset += screen_width;
                    }
                }
                (
                    x_offset - prev_left,
                    y_offset - (prev_top - prev_doc.height + screen_height),
                )
            } else {
                (-screen_width, doc_height - screen_height + top)
            }
        } else {
            (0, -smart_advance_amount(screen_height, top))
        };

        self.start_step_scroll(remaining, x_offset, y_offset);
    }

    fn start_step_scroll(&mut self, remaining: IPoint, x_offset: i32, y_offset: i32) {
        self.scroller_last = IPoint::default();
        self.scroller.start_scroll(
            IPoint::default(),
            IPoint::new(remaining.x - x_offset, remaining.y - y_offset),
            self.config.scroll_duration,
        );
        self.prod();
    }

    fn slide_view_onto_screen(&mut self, page: usize) {
        let Some(bounds) = self.scroll_bounds_of(page) else {
            return;
        };
        let corr = correction(&bounds);
        if corr != IPoint::default() {
            self.scroller_last = IPoint::default();
            self.scroller
                .start_scroll(IPoint::default(), corr, self.config.scroll_duration);
            self.prod();
        }
    }

    fn scroll_bounds_of(&self, page: usize) -> Option<IRect> {
        let view = self.children.get(&page)?;
        let frame = view.frame();
        let m = view.measured();
        let left = frame.left + self.x_scroll;
        let top = frame.top + self.y_scroll;
        Some(scroll_bounds(
            self.viewport,
            IRect::new(left, top, left + m.width, top + m.height),
        ))
    }

    // Slot management

    fn on_move_to_child(&mut self, page: usize) {
        let stale = self
            .search_result
            .as_ref()
            .is_some_and(|r| r.page != page);
        if stale {
            self.search_result = None;
            self.resetup_children();
        }
        self.hooks.on_move_to_child(page);
    }

    fn setup_child(
        view: &mut PageView,
        page: usize,
        search_result: Option<&SearchResult>,
        links_enabled: bool,
    ) {
        let boxes = search_result
            .filter(|r| r.page == page)
            .map(|r| r.boxes.clone());
        view.set_search_boxes(boxes);
        view.set_link_highlighting(links_enabled);
    }

    /// Re-apply search highlights and link highlighting to every slot
    pub fn resetup_children(&mut self) {
        for (&page, view) in self.children.iter_mut() {
            Self::setup_child(view, page, self.search_result.as_ref(), self.links_enabled);
        }
    }

    pub fn apply_to_children(&mut self, mut f: impl FnMut(&mut PageView)) {
        for view in self.children.values_mut() {
            f(view);
        }
    }

    pub fn set_links_enabled(&mut self, enabled: bool) {
        self.links_enabled = enabled;
        self.resetup_children();
    }

    pub fn links_enabled(&self) -> bool {
        self.links_enabled
    }

    pub fn set_search_result(&mut self, result: Option<SearchResult>) {
        self.search_result = result;
        self.resetup_children();
    }

    pub fn search_result(&self) -> Option<&SearchResult> {
        self.search_result.as_ref()
    }

    /// Reset zoom and pan, forget cached page sizes and rebuild every slot
    pub fn refresh(&mut self) {
        self.reset_layout = true;
        self.scale = 1.0;
        self.x_scroll = 0;
        self.y_scroll = 0;
        self.adapter.refresh();
        self.drop_slots();
        self.request_layout();
    }

    fn drop_slots(&mut self) {
        for (_, mut view) in std::mem::take(&mut self.children) {
            view.release_resources();
        }
        self.view_cache.clear();
        self.posted.clear();
    }

    /// Free every bitmap, including the shared one. Slots come back on the
    /// next layout request.
    pub fn release_bitmaps(&mut self) {
        for view in self.children.values_mut() {
            view.release_bitmaps();
        }
        for view in self.view_cache.iter_mut() {
            view.release_bitmaps();
        }
        self.children.clear();
        self.view_cache.clear();
        self.posted.clear();
        self.adapter.release_bitmaps();
        self.reset_layout = true;
    }

    // Layout

    /// Natural size scaled to fit the viewport, times the zoom
    fn measure_view(viewport: ISize, scale: f32, view: &mut PageView) {
        let natural = view.size();
        if natural.is_empty() {
            view.measure(ISize::default());
            return;
        }
        let fit = (viewport.width as f32 / natural.width as f32)
            .min(viewport.height as f32 / natural.height as f32);
        view.measure(ISize::new(
            (natural.width as f32 * fit * scale) as i32,
            (natural.height as f32 * fit * scale) as i32,
        ));
    }

    fn get_or_create_child(&mut self, page: usize) -> Result<(), ViewerError> {
        if self.children.contains_key(&page) {
            return Ok(());
        }
        let recycled = self.view_cache.pop_front();
        let mut view = self.adapter.get_view(page, recycled, self.viewport)?;
        Self::measure_view(self.viewport, self.scale, &mut view);
        Self::setup_child(
            &mut view,
            page,
            self.search_result.as_ref(),
            self.links_enabled,
        );
        self.children.insert(page, view);
        Ok(())
    }

    fn evict(&mut self, page: usize) {
        if let Some(mut view) = self.children.remove(&page) {
            self.adapter.forget(view.id());
            view.release_resources();
            self.view_cache.push_back(view);
        }
    }

    fn layout(&mut self) -> Result<(), ViewerError> {
        self.layout_requested = false;
        let count = self.adapter.count();
        if count == 0 || self.viewport.is_empty() {
            return Ok(());
        }
        if self.current >= count {
            self.current = count - 1;
        }

        let (viewport, scale) = (self.viewport, self.scale);
        for view in self.children.values_mut() {
            Self::measure_view(viewport, scale, view);
        }

        let horizontal = self.config.horizontal_scrolling;
        let half_gap = self.config.page_gap / 2;

        if !self.reset_layout {
            if let Some(cv) = self.children.get(&self.current) {
                let offset = sub_screen_size_offset(viewport, cv.measured());
                let frame = cv.frame();
                let m = cv.measured();
                let id = cv.id();

                let past_trailing = if horizontal {
                    frame.left + m.width + offset.x + half_gap + self.x_scroll < viewport.width / 2
                } else {
                    frame.top + m.height + offset.y + half_gap + self.y_scroll < viewport.height / 2
                };
                let past_leading = if horizontal {
                    frame.left - offset.x - half_gap + self.x_scroll >= viewport.width / 2
                } else {
                    frame.top - offset.y - half_gap + self.y_scroll >= viewport.height / 2
                };

                if past_trailing && self.current + 1 < count {
                    self.posted.push_back(Posted::Unsettle(id));
                    self.prod();
                    self.hooks.on_move_off_child(self.current);
                    self.current += 1;
                    self.on_move_to_child(self.current);
                }
                if past_leading && self.current > 0 {
                    self.posted.push_back(Posted::Unsettle(id));
                    self.prod();
                    self.hooks.on_move_off_child(self.current);
                    self.current -= 1;
                    self.on_move_to_child(self.current);
                }
            }

            let current = self.current;
            let outside: Vec<usize> = self
                .children
                .keys()
                .copied()
                .filter(|&p| p + 1 < current || p > current + 1)
                .collect();
            for page in outside {
                self.evict(page);
            }
        } else {
            self.reset_layout = false;
            self.x_scroll = 0;
            self.y_scroll = 0;
            let all: Vec<usize> = self.children.keys().copied().collect();
            for page in all {
                self.evict(page);
            }
            self.prod();
        }

        let not_present = !self.children.contains_key(&self.current);
        self.get_or_create_child(self.current)?;
        let Some(cv) = self.children.get(&self.current) else {
            return Ok(());
        };
        let cv_offset = sub_screen_size_offset(viewport, cv.measured());
        let m = cv.measured();
        let (left, top) = if not_present {
            (cv_offset.x, cv_offset.y)
        } else {
            let frame = cv.frame();
            (frame.left + self.x_scroll, frame.top + self.y_scroll)
        };
        self.x_scroll = 0;
        self.y_scroll = 0;
        let mut frame = IRect::new(left, top, left + m.width, top + m.height);

        let corr = correction(&scroll_bounds(viewport, frame));
        if !self.user_interacting && self.scroller.is_finished() {
            frame = frame.offset(corr.x, corr.y);
        } else if horizontal && m.height <= viewport.height {
            frame = frame.offset(0, corr.y);
        } else if !horizontal && m.width <= viewport.width {
            frame = frame.offset(corr.x, 0);
        }
        if let Some(cv) = self.children.get_mut(&self.current) {
            cv.layout(frame);
        }

        let gap = self.config.page_gap;
        if self.current > 0 {
            let page = self.current - 1;
            self.get_or_create_child(page)?;
            if let Some(lv) = self.children.get_mut(&page) {
                let lm = lv.measured();
                let left_offset = sub_screen_size_offset(viewport, lm);
                let placed = if horizontal {
                    let g = left_offset.x + gap + cv_offset.x;
                    IRect::new(
                        frame.left - lm.width - g,
                        (frame.bottom + frame.top - lm.height) / 2,
                        frame.left - g,
                        (frame.bottom + frame.top + lm.height) / 2,
                    )
                } else {
                    let g = left_offset.y + gap + cv_offset.y;
                    IRect::new(
                        (frame.left + frame.right - lm.width) / 2,
                        frame.top - lm.height - g,
                        (frame.left + frame.right + lm.width) / 2,
                        frame.top - g,
                    )
                };
                lv.layout(placed);
            }
        }

        if self.current + 1 < count {
            let page = self.current + 1;
            self.get_or_create_child(page)?;
            if let Some(rv) = self.children.get_mut(&page) {
                let rm = rv.measured();
                let right_offset = sub_screen_size_offset(viewport, rm);
                let placed = if horizontal {
                    let g = cv_offset.x + gap + right_offset.x;
                    IRect::new(
                        frame.right + g,
                        (frame.bottom + frame.top - rm.height) / 2,
                        frame.right + rm.width + g,
                        (frame.bottom + frame.top + rm.height) / 2,
                    )
                } else {
                    let g = cv_offset.y + gap + right_offset.y;
                    IRect::new(
                        (frame.left + frame.right - rm.width) / 2,
                        frame.bottom + g,
                        (frame.left + frame.right + rm.width) / 2,
                        frame.bottom + g + rm.height,
                    )
                };
                rv.layout(placed);
            }
        }

        Ok(())
    }

    // Accessors

    /// Pages that currently have a slot, in order
    pub fn window_pages(&self) -> Vec<usize> {
        self.children.keys().copied().collect()
    }

    pub fn view(&self, page: usize) -> Option<&PageView> {
        self.children.get(&page)
    }

    pub fn displayed_view(&self) -> Option<&PageView> {
        self.children.get(&self.current)
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn page_count(&self) -> usize {
        self.adapter.count()
    }

    pub fn is_user_interacting(&self) -> bool {
        self.user_interacting
    }

    pub fn notifications(&self) -> &NotificationManager {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationManager {
        &mut self.notifications
    }

    pub fn adapter(&self) -> &PageAdapter {
        &self.adapter
    }
}

impl std::fmt::Debug for ReaderView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderView")
            .field("current", &self.current)
            .field("window", &self.window_pages())
            .field("scale", &self.scale)
            .field("viewport", &self.viewport)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_view::SlotConfig;
    use crate::reader::NoHooks;
    use crate::task::WorkerPool;
    use crate::test_utils::{FakeEngine, pump_until};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(5);

    fn reader_with(engine: FakeEngine, hooks: Box<dyn ReaderHooks>) -> ReaderView {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let adapter = PageAdapter::new(Arc::new(engine), pool, SlotConfig::default());
        let mut reader = ReaderView::new(adapter, ReaderConfig::default(), hooks);
        reader.set_viewport(ISize::new(400, 600), 160.0);
        reader
    }

    fn reader(pages: usize) -> ReaderView {
        reader_with(FakeEngine::uniform(pages, 200.0, 300.0), Box::new(NoHooks))
    }

    fn run_idle(reader: &mut ReaderView) {
        assert!(pump_until(WAIT, || {
            reader.frame(Instant::now());
            !reader.needs_frame()
        }));
    }

    #[derive(Default)]
    struct Recorded {
        entered: Vec<usize>,
        left: Vec<usize>,
        taps: usize,
    }

    struct Recorder(Rc<RefCell<Recorded>>);

    impl ReaderHooks for Recorder {
        fn on_move_to_child(&mut self, page: usize) {
            self.0.borrow_mut().entered.push(page);
        }
        fn on_move_off_child(&mut self, page: usize) {
            self.0.borrow_mut().left.push(page);
        }
        fn on_tap_main_doc_area(&mut self) {
            self.0.borrow_mut().taps += 1;
        }
    }

    #[test]
    fn window_follows_displayed_index() {
        let mut reader = reader(10);
        run_idle(&mut reader);
        assert_eq!(reader.window_pages(), vec![0, 1]);

        assert!(reader.set_displayed_view_index(5));
        reader.frame(Instant::now());
        assert_eq!(reader.window_pages(), vec![4, 5, 6]);

        assert!(reader.set_displayed_view_index(9));
        reader.frame(Instant::now());
        assert_eq!(reader.window_pages(), vec![8, 9]);

        assert!(!reader.set_displayed_view_index(10));
        assert_eq!(reader.displayed_view_index(), 9);
    }

    #[test]
    fn current_page_is_centred_and_neighbours_gap_separated() {
        let mut reader = reader(3);
        reader.set_displayed_view_index(1);
        run_idle(&mut reader);

        // 200x300 fits 400x600 exactly
        let cv = reader.view(1).unwrap().frame();
        assert_eq!(cv, IRect::new(0, 0, 400, 600));
        let lv = reader.view(0).unwrap().frame();
        assert_eq!(lv.right, cv.left - 20);
        let rv = reader.view(2).unwrap().frame();
        assert_eq!(rv.left, cv.right + 20);
    }

    #[test]
    fn hooks_see_leave_then_enter() {
        let rec = Rc::new(RefCell::new(Recorded::default()));
        let mut reader = reader_with(
            FakeEngine::uniform(5, 200.0, 300.0),
            Box::new(Recorder(rec.clone())),
        );
        reader.set_displayed_view_index(3);
        assert_eq!(rec.borrow().left, vec![0]);
        assert_eq!(rec.borrow().entered, vec![3]);
    }

    #[test]
    fn dragging_past_midpoint_advances_current() {
        let mut reader = reader(5);
        run_idle(&mut reader);
        assert_eq!(reader.displayed_view_index(), 0);

        reader.on_down();
        reader.on_scroll(300.0, 0.0);
        reader.frame(Instant::now());
        // Trailing edge at 100 plus half the gap is left of the 200 midpoint
        assert_eq!(reader.displayed_view_index(), 1);
        reader.on_up();
        run_idle(&mut reader);
        assert_eq!(reader.window_pages(), vec![0, 1, 2]);
        assert_eq!(reader.view(1).unwrap().frame().left, 0);
    }

    #[test]
    fn dragging_back_past_midpoint_retreats_current() {
        let mut reader = reader(5);
        reader.set_displayed_view_index(1);
        run_idle(&mut reader);

        reader.on_down();
        reader.on_scroll(-300.0, 0.0);
        reader.frame(Instant::now());
        // Leading edge at 300 minus half the gap is right of the midpoint
        assert_eq!(reader.displayed_view_index(), 0);
        reader.on_up();
        run_idle(&mut reader);
        assert_eq!(reader.window_pages(), vec![0, 1]);
        assert_eq!(reader.view(0).unwrap().frame().left, 0);
    }

    /// Zoom page 0 to 2x around the viewport centre and let it settle
    fn zoomed(pages: usize) -> ReaderView {
        let mut reader = reader(pages);
        run_idle(&mut reader);
        reader.on_down();
        reader.on_scale_begin();
        reader.on_scale(2.0, 200.0, 300.0);
        reader.frame(Instant::now());
        reader.on_scale_end();
        reader.on_up();
        run_idle(&mut reader);
        assert_eq!(reader.view(0).unwrap().frame(), IRect::new(-200, -300, 600, 900));
        reader
    }

    #[test]
    fn fling_inside_zoomed_page_stops_at_its_edge() {
        let mut reader = zoomed(3);
        reader.on_fling(0.0, -2000.0);
        assert!(reader.needs_frame());
        run_idle(&mut reader);

        let frame = reader.view(0).unwrap().frame();
        assert_eq!(frame.top, -600);
        assert_eq!(frame.left, -200);
        assert_eq!(reader.displayed_view_index(), 0);
    }

    #[test]
    fn fling_needs_the_page_near_its_bounds() {
        // Dragged 50 past the top edge: inside the fling margin
        let mut reader = zoomed(3);
        reader.on_down();
        reader.on_scroll(0.0, -350.0);
        reader.frame(Instant::now());
        assert_eq!(reader.view(0).unwrap().frame().top, 50);
        reader.on_fling(0.0, -2000.0);
        run_idle(&mut reader);
        assert_eq!(reader.view(0).unwrap().frame().top, -600);

        // Dragged 150 past it: the fling is ignored
        let mut reader = zoomed(3);
        reader.on_down();
        reader.on_scroll(0.0, -450.0);
        reader.frame(Instant::now());
        reader.on_fling(0.0, -2000.0);
        run_idle(&mut reader);
        assert_eq!(reader.view(0).unwrap().frame().top, 150);
    }

    #[test]
    fn smart_move_steps_down_a_tall_page_then_across() {
        let mut reader = zoomed(3);

        // 300 left below the viewport: one short step reaches the bottom
        reader.smart_move_forwards();
        run_idle(&mut reader);
        assert_eq!(reader.displayed_view_index(), 0);
        assert_eq!(reader.view(0).unwrap().frame(), IRect::new(-200, -600, 600, 600));

        // At the bottom: continue at the top of the next page, same column
        reader.smart_move_forwards();
        run_idle(&mut reader);
        assert_eq!(reader.displayed_view_index(), 1);
        assert_eq!(reader.view(1).unwrap().frame(), IRect::new(-200, 0, 600, 1200));

        reader.smart_move_backwards();
        run_idle(&mut reader);
        assert_eq!(reader.displayed_view_index(), 0);
    }

    #[test]
    fn pinch_scale_is_clamped() {
        let mut reader = reader(3);
        run_idle(&mut reader);

        reader.on_scale_begin();
        reader.on_scale(0.25, 200.0, 300.0);
        assert_eq!(reader.scale(), 1.0);
        for _ in 0..10 {
            reader.on_scale(4.0, 200.0, 300.0);
        }
        assert_eq!(reader.scale(), 64.0);
        reader.on_scale_end();
    }

    #[test]
    fn pinch_keeps_focus_fixed() {
        let mut reader = reader(3);
        run_idle(&mut reader);

        reader.on_down();
        reader.on_scale_begin();
        reader.on_scale(2.0, 100.0, 150.0);
        reader.frame(Instant::now());
        reader.on_scale_end();

        let frame = reader.view(0).unwrap().frame();
        assert_eq!(frame.width(), 800);
        // Document point under (100, 150) stays there: it was at 1/4 of the page
        assert_eq!(frame.left, -100);
        assert_eq!(frame.top, -150);
    }

    #[test]
    fn taps_in_margins_page_and_centre_taps_reach_hooks() {
        let rec = Rc::new(RefCell::new(Recorded::default()));
        let mut reader = reader_with(
            FakeEngine::uniform(5, 200.0, 300.0),
            Box::new(Recorder(rec.clone())),
        );
        run_idle(&mut reader);
        // 160 dpi capped at a fifth of the 400 pixel width
        assert_eq!(reader.tap_margin(), 80);

        reader.on_single_tap(200.0, 300.0);
        assert_eq!(rec.borrow().taps, 1);

        reader.on_single_tap(390.0, 300.0);
        run_idle(&mut reader);
        assert_eq!(reader.displayed_view_index(), 1);

        reader.on_single_tap(10.0, 300.0);
        run_idle(&mut reader);
        assert_eq!(reader.displayed_view_index(), 0);
    }

    #[test]
    fn fling_at_page_edge_slides_to_neighbour() {
        let mut reader = reader(3);
        run_idle(&mut reader);

        reader.on_fling(-3000.0, 0.0);
        assert!(reader.needs_frame());
        run_idle(&mut reader);
        assert_eq!(reader.displayed_view_index(), 1);
    }

    #[test]
    fn history_round_trip() {
        let mut reader = reader(10);
        run_idle(&mut reader);

        reader.set_displayed_view_index(3);
        reader.push_history();
        reader.set_displayed_view_index(7);
        reader.push_history();
        reader.set_displayed_view_index(9);

        assert!(reader.pop_history());
        assert_eq!(reader.displayed_view_index(), 7);
        assert!(reader.pop_history());
        assert_eq!(reader.displayed_view_index(), 3);
        assert!(!reader.pop_history());
        assert_eq!(reader.displayed_view_index(), 3);
    }

    #[test]
    fn internal_link_tap_pushes_history() {
        let engine = FakeEngine::uniform(10, 200.0, 300.0).with_link(
            0,
            crate::geometry::RectF::new(0.0, 0.0, 200.0, 300.0),
            crate::engine::LinkTarget::Internal { page: 6 },
        );
        let mut reader = reader_with(engine, Box::new(NoHooks));
        reader.set_links_enabled(true);
        run_idle(&mut reader);

        reader.on_single_tap(200.0, 300.0);
        assert_eq!(reader.displayed_view_index(), 6);
        assert_eq!(reader.history().peek(), Some(0));
    }

    #[test]
    fn leaving_matched_page_clears_search_result() {
        let mut reader = reader(10);
        run_idle(&mut reader);
        reader.set_search_result(Some(SearchResult {
            text: "x".into(),
            page: 0,
            boxes: vec![Vec::new()],
        }));
        assert!(reader.view(0).unwrap().search_boxes().is_some());
        assert!(reader.view(1).unwrap().search_boxes().is_none());

        reader.set_displayed_view_index(4);
        assert!(reader.search_result().is_none());
    }

    #[test]
    fn settling_zoomed_page_renders_patch() {
        let mut reader = reader(3);
        run_idle(&mut reader);

        reader.on_down();
        reader.on_scale_begin();
        reader.on_scale(2.0, 200.0, 300.0);
        reader.frame(Instant::now());
        reader.on_scale_end();
        reader.on_up();
        run_idle(&mut reader);

        let cv = reader.view(0).unwrap();
        assert!(cv.is_patch_shown());
        assert!(!reader.view(1).unwrap().is_patch_shown());
    }

    #[test]
    fn release_bitmaps_then_refresh_rebuilds() {
        let mut reader = reader(4);
        run_idle(&mut reader);
        reader.release_bitmaps();
        assert!(reader.window_pages().is_empty());
        assert!(reader.adapter().shared_hq().is_none());

        reader.frame(Instant::now());
        assert!(reader.window_pages().is_empty());
        reader.refresh();
        run_idle(&mut reader);
        assert_eq!(reader.window_pages(), vec![0, 1]);
        assert!(reader.view(0).unwrap().is_entire_shown());
    }
}
