//! Scroll and fling physics driven by the frame clock
//!
//! The scroller works in offsets relative to where the motion started. It
//! does not read the clock itself: the first [`Scroller::compute_offset`]
//! call after a start stamps the start time, so a motion begins on the frame
//! that first observes it.

use std::time::{Duration, Instant};

use crate::geometry::{IPoint, IRect};

/// Fling deceleration in pixels per second squared
const DECELERATION: f32 = 2000.0;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Motion {
    Scroll {
        delta: IPoint,
        duration: Duration,
    },
    Fling {
        velocity: f32,
        cos: f32,
        sin: f32,
        duration: Duration,
        bounds: IRect,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Scroller {
    motion: Option<Motion>,
    started_at: Option<Instant>,
    start: IPoint,
    current: IPoint,
    target: IPoint,
    finished: bool,
}

impl Default for Scroller {
    fn default() -> Self {
        Self::new()
    }
}

impl Scroller {
    pub fn new() -> Self {
        Self {
            motion: None,
            started_at: None,
            start: IPoint::default(),
            current: IPoint::default(),
            target: IPoint::default(),
            finished: true,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stop where we are. With `jump_to_end` the current position snaps to the target.
    pub fn force_finished(&mut self, jump_to_end: bool) {
        if jump_to_end {
            self.current = self.target;
        }
        self.finished = true;
        self.motion = None;
    }

    pub fn current(&self) -> IPoint {
        self.current
    }

    pub fn target(&self) -> IPoint {
        self.target
    }

    /// Distance still to travel before the motion ends, zero once finished
    pub fn remaining(&self) -> IPoint {
        if self.finished {
            return IPoint::default();
        }
        IPoint::new(
            self.target.x - self.current.x,
            self.target.y - self.current.y,
        )
    }

    /// Animate from `start` by `delta` over `duration` with an ease-out curve
    pub fn start_scroll(&mut self, start: IPoint, delta: IPoint, duration: Duration) {
        self.start = start;
        self.current = start;
        self.target = IPoint::new(start.x + delta.x, start.y + delta.y);
        self.started_at = None;
        self.finished = false;
        self.motion = Some(Motion::Scroll { delta, duration });
    }

    /// Decelerate from `velocity` (pixels per second), never leaving `bounds`
    pub fn fling(&mut self, start: IPoint, vx: f32, vy: f32, bounds: IRect) {
        let velocity = vx.hypot(vy);
        self.start = start;
        self.current = start;
        self.started_at = None;

        if !velocity.is_finite() || velocity <= f32::EPSILON {
            self.target = start;
            self.finished = true;
            self.motion = None;
            return;
        }

        let cos = vx / velocity;
        let sin = vy / velocity;
        let duration = Duration::from_secs_f32(velocity / DECELERATION);
        let distance = velocity * velocity / (2.0 * DECELERATION);

        self.target = clamp_to(
            IPoint::new(
                start.x + (distance * cos).round() as i32,
                start.y + (distance * sin).round() as i32,
            ),
            &bounds,
        );
        self.finished = false;
        self.motion = Some(Motion::Fling {
            velocity,
            cos,
            sin,
            duration,
            bounds,
        });
    }

    /// Advance to `now`. Returns `false` once the motion had already finished.
    pub fn compute_offset(&mut self, now: Instant) -> bool {
        if self.finished {
            return false;
        }
        let Some(motion) = self.motion else {
            self.finished = true;
            return false;
        };
        let started_at = *self.started_at.get_or_insert(now);
        let elapsed = now.saturating_duration_since(started_at);

        match motion {
            Motion::Scroll { delta, duration } => {
                if elapsed >= duration {
                    self.finish_at_target();
                } else {
                    let t = elapsed.as_secs_f32() / duration.as_secs_f32();
                    let eased = ease_out(t);
                    self.current = IPoint::new(
                        self.start.x + (delta.x as f32 * eased).round() as i32,
                        self.start.y + (delta.y as f32 * eased).round() as i32,
                    );
                }
            }
            Motion::Fling {
                velocity,
                cos,
                sin,
                duration,
                bounds,
            } => {
                if elapsed >= duration {
                    self.finish_at_target();
                } else {
                    let t = elapsed.as_secs_f32();
                    let travelled = velocity * t - DECELERATION * t * t / 2.0;
                    self.current = clamp_to(
                        IPoint::new(
                            self.start.x + (travelled * cos).round() as i32,
                            self.start.y + (travelled * sin).round() as i32,
                        ),
                        &bounds,
                    );
                    if self.current == self.target {
                        self.finish_at_target();
                    }
                }
            }
        }
        true
    }

    fn finish_at_target(&mut self) {
        self.current = self.target;
        self.finished = true;
        self.motion = None;
    }
}

fn ease_out(t: f32) -> f32 {
    let inv = 1.0 - t.clamp(0.0, 1.0);
    1.0 - inv * inv * inv
}

fn clamp_to(p: IPoint, bounds: &IRect) -> IPoint {
    IPoint::new(
        p.x.max(bounds.left).min(bounds.right),
        p.y.max(bounds.top).min(bounds.bottom),
    )
}
