//! Fit-to-viewport scaling, user zoom, centring and scroll bounds.

use serde::{Deserialize, Serialize};

use crate::config::ZoomConfig;
use crate::geometry::{centering_margin, clamp, sanitize_scale, step_scale, Point, Size};

/// Per-render view state. Reset on every full render.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub fit_scale: f32,
    pub user_scale: f32,
    pub scroll_left: f32,
    pub scroll_top: f32,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            fit_scale: 1.0,
            user_scale: 1.0,
            scroll_left: 0.0,
            scroll_top: 0.0,
        }
    }
}

/// Result of [`ViewportLayoutEngine::apply_layout`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Layout {
    /// `fit_scale * user_scale`.
    pub scale: f32,
    pub margin_left: f32,
    pub margin_top: f32,
    pub scaled_width: f32,
    pub scaled_height: f32,
    pub overflow_x: bool,
    pub overflow_y: bool,
}

impl Layout {
    pub fn overflows(&self) -> bool {
        self.overflow_x || self.overflow_y
    }
}

#[derive(Debug, Clone)]
pub struct ViewportLayoutEngine {
    zoom: ZoomConfig,
    viewport: Size,
    content: Size,
    state: ViewState,
    layout: Layout,
}

impl ViewportLayoutEngine {
    pub fn new(zoom: ZoomConfig, viewport: Size) -> Self {
        let mut engine = Self {
            zoom,
            viewport,
            content: Size::default(),
            state: ViewState::default(),
            layout: Layout::default(),
        };
        engine.apply_layout(1.0);
        engine
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn content(&self) -> Size {
        self.content
    }

    /// Top-left of the scaled content in viewport coordinates, after
    /// centring margins and scrolling.
    pub fn content_origin(&self) -> Point {
        Point::new(
            self.layout.margin_left - self.state.scroll_left,
            self.layout.margin_top - self.state.scroll_top,
        )
    }

    /// Records content extents for a new page set. Recomputes the fit
    /// scale and resets zoom and scroll.
    pub fn set_dimensions(&mut self, total_width: f32, max_height: f32) {
        self.content = Size::new(total_width.max(0.0), max_height.max(0.0));
        self.state = ViewState {
            fit_scale: self.compute_fit_scale(),
            ..ViewState::default()
        };
        self.apply_layout(1.0);
    }

    /// `min(viewport.w / content.w, viewport.h / content.h)`, or `1.0` when
    /// that is not a positive finite number.
    pub fn compute_fit_scale(&self) -> f32 {
        let scale = (self.viewport.width / self.content.width)
            .min(self.viewport.height / self.content.height);
        sanitize_scale(scale)
    }

    /// Viewport resize keeps both scales and only re-centres and
    /// re-clamps scroll. The fit scale follows on the next
    /// `set_dimensions`.
    pub fn resize(&mut self, width: f32, height: f32) {
        self.viewport = Size::new(width.max(0.0), height.max(0.0));
        self.apply_layout(self.state.user_scale);
    }

    pub fn apply_layout(&mut self, user_scale: f32) -> Layout {
        let user_scale = clamp(sanitize_scale(user_scale), self.zoom.min, self.zoom.max);
        self.state.user_scale = user_scale;

        let scale = self.state.fit_scale * user_scale;
        let scaled_width = self.content.width * scale;
        let scaled_height = self.content.height * scale;
        let overflow_x = scaled_width > self.viewport.width;
        let overflow_y = scaled_height > self.viewport.height;

        if !overflow_x {
            self.state.scroll_left = 0.0;
        }
        if !overflow_y {
            self.state.scroll_top = 0.0;
        }

        self.layout = Layout {
            scale,
            margin_left: centering_margin(self.viewport.width, scaled_width),
            margin_top: centering_margin(self.viewport.height, scaled_height),
            scaled_width,
            scaled_height,
            overflow_x,
            overflow_y,
        };
        self.clamp_scroll();
        self.layout
    }

    /// Zooms by `steps` multiples of the zoom step, keeping the content
    /// point under `anchor` (viewport coordinates) fixed where scrolling
    /// allows.
    pub fn zoom(&mut self, steps: i32, anchor: Option<Point>) -> Layout {
        let before = self.layout.scale;
        let anchor = anchor.unwrap_or_else(|| {
            Point::new(self.viewport.width / 2.0, self.viewport.height / 2.0)
        });
        let content_x = (anchor.x - self.content_origin().x) / before;
        let content_y = (anchor.y - self.content_origin().y) / before;

        let user_scale = step_scale(
            self.state.user_scale,
            self.zoom.step,
            steps,
            self.zoom.min,
            self.zoom.max,
        );
        let layout = self.apply_layout(user_scale);

        if layout.overflow_x {
            self.state.scroll_left = layout.margin_left + content_x * layout.scale - anchor.x;
        }
        if layout.overflow_y {
            self.state.scroll_top = layout.margin_top + content_y * layout.scale - anchor.y;
        }
        self.clamp_scroll();
        self.layout
    }

    /// Scrolls by a pointer delta. Dragging right moves content right,
    /// which scrolls left.
    pub fn pan_by(&mut self, dx: f32, dy: f32) -> bool {
        let before = (self.state.scroll_left, self.state.scroll_top);
        if self.layout.overflow_x {
            self.state.scroll_left -= dx;
        }
        if self.layout.overflow_y {
            self.state.scroll_top -= dy;
        }
        self.clamp_scroll();
        before != (self.state.scroll_left, self.state.scroll_top)
    }

    pub fn max_scroll(&self) -> (f32, f32) {
        (
            (self.layout.scaled_width - self.viewport.width).max(0.0),
            (self.layout.scaled_height - self.viewport.height).max(0.0),
        )
    }

    fn clamp_scroll(&mut self) {
        let (max_x, max_y) = self.max_scroll();
        self.state.scroll_left = clamp(self.state.scroll_left, 0.0, max_x);
        self.state.scroll_top = clamp(self.state.scroll_top, 0.0, max_y);
    }
}
