//! Inline lookup popup: `Hidden -> Shown(payload) -> Hidden`.

use koma_core::config::PopupConfig;
use koma_core::geometry::{clamp, Point, Rect, Size};
use koma_core::protocol::{OutboundRequest, PopupPayload};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Affordance {
    Track,
    ViewContext,
    Expand,
}

impl Affordance {
    pub fn name(&self) -> &'static str {
        match self {
            Affordance::Track => "track",
            Affordance::ViewContext => "viewContext",
            Affordance::Expand => "expand",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupView {
    pub payload: PopupPayload,
    pub anchor: Point,
    /// Viewport rectangle the popup occupies.
    pub placement: Rect,
    pub affordances: Vec<Affordance>,
    pub tracked_badge: bool,
}

impl PopupView {
    fn new(payload: PopupPayload, placement: Rect) -> Self {
        let anchor = Point::new(payload.mouse_x, payload.mouse_y);
        let affordances = affordances_for(&payload);
        let tracked_badge = payload.is_tracked && !payload.not_found;
        Self {
            payload,
            anchor,
            placement,
            affordances,
            tracked_badge,
        }
    }

    pub fn title(&self) -> String {
        let payload = &self.payload;
        if !payload.surface.is_empty() {
            payload.surface.clone()
        } else {
            payload.lemma.clone()
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        self.placement.contains(point)
    }

    pub fn offers(&self, affordance: Affordance) -> bool {
        self.affordances.contains(&affordance)
    }

    /// The host request behind an action button, if the popup offers it.
    pub fn request_for(&self, affordance: Affordance) -> Option<OutboundRequest> {
        if !self.offers(affordance) {
            return None;
        }
        let lemma = self.payload.lemma.clone();
        Some(match affordance {
            Affordance::Track => OutboundRequest::TrackWord {
                lemma,
                reading: self.payload.reading.clone(),
                part_of_speech: self.payload.part_of_speech.clone(),
            },
            Affordance::ViewContext => OutboundRequest::ViewWordContext { lemma },
            Affordance::Expand => OutboundRequest::ShowFullDefinition { lemma },
        })
    }
}

fn affordances_for(payload: &PopupPayload) -> Vec<Affordance> {
    if payload.not_found {
        return Vec::new();
    }
    let tracking = if payload.is_tracked {
        Affordance::ViewContext
    } else {
        Affordance::Track
    };
    vec![tracking, Affordance::Expand]
}

/// Places a box of `size` next to `anchor`, flipping to the other side
/// of the anchor on an axis where it would overflow and clamping so the
/// box stays `margin` inside the viewport.
pub fn place(anchor: Point, size: Size, viewport: Size, offset: f32, margin: f32) -> Rect {
    let axis = |anchor: f32, extent: f32, limit: f32| -> f32 {
        let mut start = anchor + offset;
        if start + extent > limit - margin {
            start = anchor - offset - extent;
        }
        let max = (limit - margin - extent).max(margin);
        clamp(start, margin, max)
    };
    Rect::new(
        axis(anchor.x, size.width, viewport.width),
        axis(anchor.y, size.height, viewport.height),
        size.width,
        size.height,
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PopupState<'a> {
    Hidden,
    Shown(&'a PopupView),
}

#[derive(Debug, Clone)]
pub struct PopupController {
    config: PopupConfig,
    current: Option<PopupView>,
}

impl PopupController {
    pub fn new(config: PopupConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    pub fn state(&self) -> PopupState<'_> {
        match &self.current {
            Some(view) => PopupState::Shown(view),
            None => PopupState::Hidden,
        }
    }

    pub fn view(&self) -> Option<&PopupView> {
        self.current.as_ref()
    }

    pub fn is_shown(&self) -> bool {
        self.view().is_some()
    }

    pub fn contains(&self, point: Point) -> bool {
        self.view().is_some_and(|view| view.contains(point))
    }

    /// Replaces any open popup with one for `payload`.
    pub fn show(&mut self, payload: PopupPayload, viewport: Size) -> &PopupView {
        self.hide();
        let anchor = Point::new(payload.mouse_x, payload.mouse_y);
        let size = self.fitted_size(viewport);
        let placement = place(anchor, size, viewport, self.config.offset, self.config.margin);
        debug!(lemma = %payload.lemma, not_found = payload.not_found, "popup shown");
        self.current.insert(PopupView::new(payload, placement))
    }

    /// Returns `true` if a popup was open.
    pub fn hide(&mut self) -> bool {
        self.current.take().is_some()
    }

    /// Re-clamps an open popup after the viewport changed size.
    pub fn reposition(&mut self, viewport: Size) {
        let config = self.config;
        let size = self.fitted_size(viewport);
        if let Some(view) = &mut self.current {
            view.placement = place(view.anchor, size, viewport, config.offset, config.margin);
        }
    }

    /// Configured popup size, shrunk to fit inside the viewport margins.
    fn fitted_size(&self, viewport: Size) -> Size {
        let margin = self.config.margin * 2.0;
        Size::new(
            self.config.width.min((viewport.width - margin).max(0.0)),
            self.config.height.min((viewport.height - margin).max(0.0)),
        )
    }

    /// Switches an open popup for `lemma` to its tracked presentation in
    /// place. Returns `false` when there is nothing to update.
    pub fn mark_word_as_tracked(&mut self, lemma: &str) -> bool {
        let Some(view) = &mut self.current else {
            return false;
        };
        if view.payload.lemma != lemma || view.payload.not_found || view.payload.is_tracked {
            return false;
        }
        view.payload.is_tracked = true;
        view.tracked_badge = true;
        for affordance in &mut view.affordances {
            if *affordance == Affordance::Track {
                *affordance = Affordance::ViewContext;
            }
        }
        true
    }
}
