//! Pointer movement paths.
//!
//! A path is a quadratic Bézier curve from the current pointer position to
//! the target, bent through a randomly offset control point and sampled
//! with ease-in-out timing: slow to start, fast through the middle, slow
//! to land.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// A position on the page, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// One sampled point along a path and the delay before reaching it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStep {
    pub point: Point,
    pub delay_ms: u64,
}

/// Something that can plan pointer movement between two points.
pub trait MouseSimulator {
    fn path(&mut self, from: Point, to: Point) -> Vec<PathStep>;
}

/// Curved, eased paths with a step count proportional to distance.
#[derive(Debug)]
pub struct BezierMouse<R = StdRng> {
    rng: R,

    /// Time to cross 1000px, in milliseconds.
    pub speed_ms_per_1000px: f64,
}

impl BezierMouse<StdRng> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Default for BezierMouse<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> BezierMouse<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            speed_ms_per_1000px: 600.0,
        }
    }
}

impl<R: Rng> MouseSimulator for BezierMouse<R> {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn path(&mut self, from: Point, to: Point) -> Vec<PathStep> {
        let distance = from.distance(to);
        if distance < 1.0 {
            return vec![PathStep {
                point: to,
                delay_ms: 0,
            }];
        }

        let steps = ((distance / 20.0).round() as usize).clamp(5, 60);
        let bend = distance * self.rng.gen_range(0.1..0.3);
        let side = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        // Offset the midpoint perpendicular to the straight line.
        let (nx, ny) = ((to.y - from.y) / distance, (from.x - to.x) / distance);
        let control = Point::new(
            (from.x + to.x) / 2.0 + nx * bend * side,
            (from.y + to.y) / 2.0 + ny * bend * side,
        );

        let total_ms = distance / 1000.0 * self.speed_ms_per_1000px * self.rng.gen_range(0.8..1.2);
        let mut elapsed = 0.0;
        (1..=steps)
            .map(|i| {
                let t = ease_in_out(i as f64 / steps as f64);
                let at = total_ms * t;
                let delay_ms = (at - elapsed).max(0.0).round() as u64;
                elapsed = at;
                let point = if i == steps {
                    to
                } else {
                    quadratic(from, control, to, t)
                };
                PathStep { point, delay_ms }
            })
            .collect()
    }
}

fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

fn quadratic(p0: Point, p1: Point, p2: Point, t: f64) -> Point {
    let u = 1.0 - t;
    Point::new(
        u * u * p0.x + 2.0 * u * t * p1.x + t * t * p2.x,
        u * u * p0.y + 2.0 * u * t * p1.y + t * t * p2.y,
    )
}
