//! Input classification for the viewer surface.
//!
//! [`EventMapper`] turns terminal events into [`InputEvent`]s, and
//! [`InteractionRouter`] decides what each event means given what lies
//! under the pointer and whether a popup is open.

use crossterm::event::{
    Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use koma_core::geometry::Point;
use koma_core::model::BlockId;
use koma_core::protocol::Direction;
use tracing::trace;

/// What the pointer is over, most specific first.
#[derive(Debug, Clone, PartialEq)]
pub enum PointerTarget {
    Popup,
    Token {
        page_index: usize,
        block_id: BlockId,
        lemma: String,
        surface: String,
    },
    /// A line of text, off any token.
    Line { page_index: usize, block_id: BlockId },
    /// Inside a block but outside its text.
    Block { page_index: usize, block_id: BlockId },
    Background,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Positive `delta` scrolls down, negative scrolls up.
    Wheel {
        point: Point,
        delta: f32,
        modifiers: KeyModifiers,
    },
    PointerDown { point: Point },
    PointerMove { point: Point },
    PointerUp { point: Point },
    /// Press and release without movement in between.
    Click { point: Point },
    Key(KeyEvent),
    Resize { width: f32, height: f32 },
}

impl InputEvent {
    pub fn point(&self) -> Option<Point> {
        match self {
            InputEvent::Wheel { point, .. }
            | InputEvent::PointerDown { point }
            | InputEvent::PointerMove { point }
            | InputEvent::PointerUp { point }
            | InputEvent::Click { point } => Some(*point),
            InputEvent::Key(_) | InputEvent::Resize { .. } => None,
        }
    }
}

/// View facts the router needs for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteContext {
    pub target: PointerTarget,
    pub popup_open: bool,
    /// Whether the laid-out content overflows the viewport on any axis.
    pub overflows: bool,
}

impl Default for RouteContext {
    fn default() -> Self {
        Self {
            target: PointerTarget::Background,
            popup_open: false,
            overflows: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteAction {
    /// Not intercepted.
    None,
    /// Swallowed by the open popup.
    Absorbed,
    Zoom {
        steps: i32,
        anchor: Option<Point>,
    },
    StartPan,
    Pan {
        dx: f32,
        dy: f32,
    },
    EndPan,
    Lookup {
        page_index: usize,
        block_id: BlockId,
        lemma: String,
        surface: String,
        point: Point,
    },
    /// Off-token click inside a block. Also dismisses an open popup.
    BlockClicked {
        page_index: usize,
        block_id: BlockId,
    },
    DismissPopup,
    Navigate(Direction),
    Resize {
        width: f32,
        height: f32,
    },
}

#[derive(Debug, Default)]
pub struct InteractionRouter {
    pan_from: Option<Point>,
}

impl InteractionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_panning(&self) -> bool {
        self.pan_from.is_some()
    }

    pub fn route(&mut self, event: InputEvent, ctx: &RouteContext) -> RouteAction {
        let action = match event {
            InputEvent::Wheel {
                point,
                delta,
                modifiers,
            } => route_wheel(point, delta, modifiers),
            InputEvent::PointerDown { point } => self.pointer_down(point, ctx),
            InputEvent::PointerMove { point } => self.pointer_move(point),
            InputEvent::PointerUp { .. } => self.end_pan(),
            InputEvent::Click { point } => {
                self.pan_from = None;
                route_click(point, ctx)
            }
            InputEvent::Key(key) => route_key(key, ctx),
            InputEvent::Resize { width, height } => RouteAction::Resize { width, height },
        };
        trace!(?action, "routed input");
        action
    }

    fn pointer_down(&mut self, point: Point, ctx: &RouteContext) -> RouteAction {
        match &ctx.target {
            PointerTarget::Popup if ctx.popup_open => RouteAction::Absorbed,
            // Tokens react on click; lines keep native text selection.
            PointerTarget::Token { .. } | PointerTarget::Line { .. } => RouteAction::None,
            _ if ctx.overflows => {
                self.pan_from = Some(point);
                RouteAction::StartPan
            }
            _ => RouteAction::None,
        }
    }

    fn pointer_move(&mut self, point: Point) -> RouteAction {
        let Some(from) = self.pan_from else {
            return RouteAction::None;
        };
        self.pan_from = Some(point);
        RouteAction::Pan {
            dx: point.x - from.x,
            dy: point.y - from.y,
        }
    }

    fn end_pan(&mut self) -> RouteAction {
        match self.pan_from.take() {
            Some(_) => RouteAction::EndPan,
            None => RouteAction::None,
        }
    }
}

fn route_wheel(point: Point, delta: f32, modifiers: KeyModifiers) -> RouteAction {
    let zoom_held = modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER);
    if !zoom_held || delta == 0.0 || !delta.is_finite() {
        return RouteAction::None;
    }
    RouteAction::Zoom {
        steps: if delta < 0.0 { 1 } else { -1 },
        anchor: Some(point),
    }
}

fn route_click(point: Point, ctx: &RouteContext) -> RouteAction {
    match &ctx.target {
        PointerTarget::Popup if ctx.popup_open => RouteAction::Absorbed,
        PointerTarget::Token {
            page_index,
            block_id,
            lemma,
            surface,
        } => RouteAction::Lookup {
            page_index: *page_index,
            block_id: *block_id,
            lemma: lemma.clone(),
            surface: surface.clone(),
            point,
        },
        PointerTarget::Line {
            page_index,
            block_id,
        }
        | PointerTarget::Block {
            page_index,
            block_id,
        } => RouteAction::BlockClicked {
            page_index: *page_index,
            block_id: *block_id,
        },
        _ if ctx.popup_open => RouteAction::DismissPopup,
        _ => RouteAction::None,
    }
}

fn route_key(key: KeyEvent, ctx: &RouteContext) -> RouteAction {
    if key.kind == KeyEventKind::Release {
        return RouteAction::None;
    }
    match key.code {
        KeyCode::Esc if ctx.popup_open => RouteAction::DismissPopup,
        // Right-to-left reading order.
        KeyCode::Left => RouteAction::Navigate(Direction::Next),
        KeyCode::Right => RouteAction::Navigate(Direction::Previous),
        KeyCode::Char('+') | KeyCode::Char('=') => RouteAction::Zoom {
            steps: 1,
            anchor: None,
        },
        KeyCode::Char('-') => RouteAction::Zoom {
            steps: -1,
            anchor: None,
        },
        _ => RouteAction::None,
    }
}

/// Pixel size of one terminal cell, used to place mouse events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetrics {
    pub width: f32,
    pub height: f32,
}

impl Default for CellMetrics {
    fn default() -> Self {
        Self {
            width: 8.0,
            height: 16.0,
        }
    }
}

impl CellMetrics {
    /// Centre of the cell at `column`, `row`.
    pub fn point(&self, column: u16, row: u16) -> Point {
        Point::new(
            (f32::from(column) + 0.5) * self.width,
            (f32::from(row) + 0.5) * self.height,
        )
    }
}

/// Maps crossterm events onto [`InputEvent`]s.
#[derive(Debug, Default)]
pub struct EventMapper {
    cells: CellMetrics,
    pressed: bool,
    dragged: bool,
}

impl EventMapper {
    pub fn new(cells: CellMetrics) -> Self {
        Self {
            cells,
            pressed: false,
            dragged: false,
        }
    }

    pub fn map_event(&mut self, event: Event) -> Option<InputEvent> {
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => Some(InputEvent::Key(key)),
            Event::Mouse(mouse) => self.map_mouse(mouse),
            Event::Resize(columns, rows) => Some(InputEvent::Resize {
                width: f32::from(columns) * self.cells.width,
                height: f32::from(rows) * self.cells.height,
            }),
            _ => None,
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent) -> Option<InputEvent> {
        let point = self.cells.point(mouse.column, mouse.row);
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                self.pressed = true;
                self.dragged = false;
                Some(InputEvent::PointerDown { point })
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                self.dragged = self.pressed;
                Some(InputEvent::PointerMove { point })
            }
            MouseEventKind::Up(MouseButton::Left) => {
                let was_click = self.pressed && !self.dragged;
                self.pressed = false;
                self.dragged = false;
                Some(if was_click {
                    InputEvent::Click { point }
                } else {
                    InputEvent::PointerUp { point }
                })
            }
            MouseEventKind::Moved => Some(InputEvent::PointerMove { point }),
            MouseEventKind::ScrollUp => Some(InputEvent::Wheel {
                point,
                delta: -1.0,
                modifiers: mouse.modifiers,
            }),
            MouseEventKind::ScrollDown => Some(InputEvent::Wheel {
                point,
                delta: 1.0,
                modifiers: mouse.modifiers,
            }),
            _ => None,
        }
    }
}
