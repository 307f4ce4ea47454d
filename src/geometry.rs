//! Integer and floating point geometry shared by slots and the paging controller
//!
//! Viewport math is done in whole pixels (`IPoint`, `ISize`, `IRect`), document
//! space math in points (`PointF`, `RectF`, `Quad`).

/// Integer point in viewport pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IPoint {
    pub x: i32,
    pub y: i32,
}

impl IPoint {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Integer size in viewport pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ISize {
    pub width: i32,
    pub height: i32,
}

impl ISize {
    #[must_use]
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Integer rectangle, `left`/`top` inclusive, `right`/`bottom` exclusive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IRect {
    #[must_use]
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    #[must_use]
    pub const fn from_size(size: ISize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    #[must_use]
    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    #[must_use]
    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    #[must_use]
    pub const fn size(&self) -> ISize {
        ISize::new(self.width(), self.height())
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// Point containment, edges included on all sides
    #[must_use]
    pub const fn contains(&self, x: i32, y: i32) -> bool {
        self.left <= x && x <= self.right && self.top <= y && y <= self.bottom
    }

    /// Intersection of two rectangles, `None` when they do not overlap
    #[must_use]
    pub fn intersect(&self, other: &IRect) -> Option<IRect> {
        let r = IRect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() { None } else { Some(r) }
    }

    #[must_use]
    pub const fn offset(&self, dx: i32, dy: i32) -> IRect {
        IRect::new(
            self.left + dx,
            self.top + dy,
            self.right + dx,
            self.bottom + dy,
        )
    }

    /// Grow (positive) or shrink (negative) on every side
    #[must_use]
    pub const fn inflate(&self, margin: i32) -> IRect {
        IRect::new(
            self.left - margin,
            self.top - margin,
            self.right + margin,
            self.bottom + margin,
        )
    }
}

/// Point in document space
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn scale(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }
}

/// Rectangle in document space
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RectF {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl RectF {
    #[must_use]
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        self.x0.min(self.x1) <= x
            && x < self.x0.max(self.x1)
            && self.y0.min(self.y1) <= y
            && y < self.y0.max(self.y1)
    }

    #[must_use]
    pub fn scale(&self, factor: f32) -> Self {
        Self::new(
            self.x0 * factor,
            self.y0 * factor,
            self.x1 * factor,
            self.y1 * factor,
        )
    }
}

/// Four-corner highlight shape produced by text search
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Quad {
    pub ul: PointF,
    pub ur: PointF,
    pub ll: PointF,
    pub lr: PointF,
}

impl Quad {
    #[must_use]
    pub fn from_rect(r: RectF) -> Self {
        Self {
            ul: PointF::new(r.x0, r.y0),
            ur: PointF::new(r.x1, r.y0),
            ll: PointF::new(r.x0, r.y1),
            lr: PointF::new(r.x1, r.y1),
        }
    }

    #[must_use]
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            ul: self.ul.scale(factor),
            ur: self.ur.scale(factor),
            ll: self.ll.scale(factor),
            lr: self.lr.scale(factor),
        }
    }

    /// Corners in drawing order: upper-left, lower-left, lower-right, upper-right
    #[must_use]
    pub fn outline(&self) -> [PointF; 4] {
        [self.ul, self.ll, self.lr, self.ur]
    }
}
