//! Pure geometry behind gesture handling: fling classification, scroll
//! bounds and the paging step used by tap navigation.

use crate::geometry::{IPoint, IRect, ISize};

/// Dominant direction of a fling, classified with a 2:1 ratio
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Travel {
    Diagonal,
    Left,
    Right,
    Up,
    Down,
}

impl Travel {
    pub fn of(vx: f32, vy: f32) -> Self {
        if vx.abs() > 2.0 * vy.abs() {
            if vx > 0.0 { Travel::Right } else { Travel::Left }
        } else if vy.abs() > 2.0 * vx.abs() {
            if vy > 0.0 { Travel::Down } else { Travel::Up }
        } else {
            Travel::Diagonal
        }
    }
}

/// Range of scroll offsets that keep `frame` covering the viewport.
///
/// On an axis where the frame is smaller than the viewport the range
/// collapses to the single offset that centres it.
pub fn scroll_bounds(viewport: ISize, frame: IRect) -> IRect {
    let mut xmin = viewport.width - frame.right;
    let mut xmax = -frame.left;
    let mut ymin = viewport.height - frame.bottom;
    let mut ymax = -frame.top;

    if xmin > xmax {
        let mid = (xmin + xmax) / 2;
        xmin = mid;
        xmax = mid;
    }
    if ymin > ymax {
        let mid = (ymin + ymax) / 2;
        ymin = mid;
        ymax = mid;
    }

    IRect::new(xmin, ymin, xmax, ymax)
}

/// Smallest shift that brings offset zero inside `bounds`
pub fn correction(bounds: &IRect) -> IPoint {
    IPoint::new(
        0.max(bounds.left).min(bounds.right),
        0.max(bounds.top).min(bounds.bottom),
    )
}

/// Whether a fling in this direction starts from inside the bounds
pub fn within_bounds_in_direction_of_travel(bounds: &IRect, vx: f32, vy: f32) -> bool {
    match Travel::of(vx, vy) {
        Travel::Diagonal => bounds.contains(0, 0),
        Travel::Left => bounds.left <= 0,
        Travel::Right => bounds.right >= 0,
        Travel::Up => bounds.top <= 0,
        Travel::Down => bounds.bottom >= 0,
    }
}

/// Centering offset for a page smaller than the viewport, zero otherwise
pub fn sub_screen_size_offset(viewport: ISize, measured: ISize) -> IPoint {
    IPoint::new(
        ((viewport.width - measured.width) / 2).max(0),
        ((viewport.height - measured.height) / 2).max(0),
    )
}

/// Step for paging through `max` pixels with a `screen_height` viewport.
///
/// Starts from 90% of the screen and nudges the step so whole steps land
/// exactly on the end: up by at most 5% of the screen, or down by at most 10%.
pub fn smart_advance_amount(screen_height: i32, max: i32) -> i32 {
    let mut advance = (f64::from(screen_height) * 0.9 + 0.5) as i32;
    if advance <= 0 || max <= 0 {
        return advance.min(max).max(0);
    }

    let left_over = max % advance;
    let steps = max / advance;
    if left_over != 0 && steps > 0 {
        let up = left_over as f32 / steps as f32;
        if up <= screen_height as f32 * 0.05 {
            advance += (up + 0.5) as i32;
        } else {
            let down = (advance - left_over) as f32 / steps as f32;
            if down <= screen_height as f32 * 0.1 {
                advance -= (down + 0.5) as i32;
            }
        }
    }

    advance.min(max)
}

/// Width of the edge strips that page on tap: one inch of screen, kept
/// between `min_margin` and a fifth of the viewport width.
pub fn tap_page_margin(dpi: f32, viewport_width: i32, min_margin: i32) -> i32 {
    (dpi as i32).max(min_margin).min(viewport_width / 5)
}
