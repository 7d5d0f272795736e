use serde::{Deserialize, Serialize};

/// Clamps `value` into `[min, max]`, mapping NaN to `min`.
pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        return min;
    }
    value.max(min).min(max)
}

/// Returns `scale` when it is a usable multiplier, otherwise `1.0`.
pub fn sanitize_scale(scale: f32) -> f32 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}

/// Applies `steps` multiplicative zoom steps to `scale` and clamps the result.
pub fn step_scale(scale: f32, step: f32, steps: i32, min: f32, max: f32) -> f32 {
    let next = scale * step.powi(steps);
    clamp(sanitize_scale(next), min, max)
}

/// Symmetric margin that centres `content` inside `viewport` on one axis.
pub fn centering_margin(viewport: f32, content: f32) -> f32 {
    if content < viewport {
        (viewport - content) / 2.0
    } else {
        0.0
    }
}

pub fn approx_eq(a: f32, b: f32, tolerance: f32) -> bool {
    (a - b).abs() <= tolerance
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Axis-aligned rectangle. Used both for page-pixel block geometry and
/// for post-transform screen rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Inclusive on every edge.
    pub fn contains(&self, point: Point) -> bool {
        self.x <= point.x && point.x <= self.right() && self.y <= point.y && point.y <= self.bottom()
    }

    /// True when every component of `other` lies within `tolerance` of this one.
    pub fn matches(&self, other: &Rect, tolerance: f32) -> bool {
        approx_eq(self.x, other.x, tolerance)
            && approx_eq(self.y, other.y, tolerance)
            && approx_eq(self.width, other.width, tolerance)
            && approx_eq(self.height, other.height, tolerance)
    }

    /// Maps the rectangle through `origin + self * scale`.
    pub fn project(&self, origin: Point, scale: f32) -> Rect {
        Rect {
            x: origin.x + self.x * scale,
            y: origin.y + self.y * scale,
            width: self.width * scale,
            height: self.height * scale,
        }
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}
