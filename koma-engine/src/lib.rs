//! The viewer engine: one instance owns the view state, the rendered
//! tree, the popup, the highlight and the host bridge. Every mutation
//! happens on the caller's turn; host results come back as
//! [`InboundCommand`]s passed to [`Engine::apply`].

pub mod driver;

use std::collections::BTreeSet;
use std::time::Instant;

use crossterm::event::{KeyCode, KeyEventKind, KeyModifiers};
use koma_core::bridge::{BridgeError, HostEndpoint, SessionBridge};
use koma_core::config::EngineConfig;
use koma_core::geometry::{Point, Rect, Size};
use koma_core::model::{BlockId, PageSet};
use koma_core::protocol::{
    InboundCommand, OutboundRequest, PageSetPayload, PopupPayload, RequestId,
};
use koma_core::viewport::{Layout, ViewState, ViewportLayoutEngine};
use koma_input::{InputEvent, InteractionRouter, PointerTarget, RouteAction, RouteContext};
use koma_render::overlay::BlockHit;
use koma_render::{
    html, Affordance, Highlight, OverlayHighlighter, OverlayTree, PopupController, PopupView,
    Projection,
};
use tracing::{debug, info, instrument, warn};

pub use driver::EngineDriver;

/// The token click a pending lookup belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupAnchor {
    pub request_id: RequestId,
    pub lemma: String,
    pub point: Point,
    pub page_index: usize,
    pub block_id: BlockId,
}

/// Highlight waiting for its page to be rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingHighlight {
    pub page_index: usize,
    pub rect: Rect,
}

pub struct Engine {
    config: EngineConfig,
    viewport: ViewportLayoutEngine,
    pages: PageSet,
    tree: OverlayTree,
    tracked: BTreeSet<String>,
    popup: PopupController,
    highlighter: OverlayHighlighter,
    router: InteractionRouter,
    bridge: SessionBridge,
    lookup: Option<LookupAnchor>,
    pending_highlight: Option<PendingHighlight>,
}

impl Engine {
    pub fn new(config: EngineConfig, viewport: Size, bridge: SessionBridge) -> Self {
        Self {
            viewport: ViewportLayoutEngine::new(config.zoom, viewport),
            pages: PageSet::default(),
            tree: OverlayTree::default(),
            tracked: BTreeSet::new(),
            popup: PopupController::new(config.popup),
            highlighter: OverlayHighlighter::new(config.highlight),
            router: InteractionRouter::new(),
            bridge,
            lookup: None,
            pending_highlight: None,
            config,
        }
    }

    /// Connects to the host and builds an engine. Fails when the host is
    /// missing or lacks a required operation.
    pub fn connect(
        config: EngineConfig,
        viewport: Size,
        endpoint: Option<HostEndpoint>,
    ) -> Result<Self, BridgeError> {
        let bridge = SessionBridge::connect(endpoint)?;
        Ok(Self::new(config, viewport, bridge))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pages(&self) -> &PageSet {
        &self.pages
    }

    pub fn tree(&self) -> &OverlayTree {
        &self.tree
    }

    pub fn popup(&self) -> Option<&PopupView> {
        self.popup.view()
    }

    pub fn highlight(&self) -> Option<&Highlight> {
        self.highlighter.current()
    }

    pub fn view_state(&self) -> ViewState {
        self.viewport.state()
    }

    pub fn layout(&self) -> Layout {
        self.viewport.layout()
    }

    pub fn viewport_size(&self) -> Size {
        self.viewport.viewport()
    }

    pub fn lookup(&self) -> Option<&LookupAnchor> {
        self.lookup.as_ref()
    }

    pub fn pending_highlight(&self) -> Option<PendingHighlight> {
        self.pending_highlight
    }

    pub fn bridge(&self) -> &SessionBridge {
        &self.bridge
    }

    pub fn projection(&self) -> Projection {
        Projection::new(self.viewport.content_origin(), self.viewport.layout().scale)
    }

    pub fn render_html(&self) -> String {
        html::render_viewport(
            &self.tree,
            self.viewport.viewport(),
            self.projection(),
            self.popup.view(),
            self.highlighter.current(),
        )
    }

    pub fn apply(&mut self, command: InboundCommand, now: Instant) -> Result<(), BridgeError> {
        match command {
            InboundCommand::UpdateView(payload) => self.update_view(payload, now),
            InboundCommand::ShowPopup(payload) => self.show_popup(payload),
            InboundCommand::HidePopup => self.dismiss_popup(),
            InboundCommand::MarkWordTracked { lemma } => self.mark_word_tracked(&lemma),
            InboundCommand::HighlightBlock {
                x,
                y,
                width,
                height,
            } => {
                self.highlight_block(Rect::new(x, y, width, height), now);
            }
            InboundCommand::RevealAppearance {
                page_index,
                x,
                y,
                width,
                height,
            } => return self.reveal_appearance(page_index, Rect::new(x, y, width, height), now),
        }
        Ok(())
    }

    /// Discards the current tree and renders `payload` from scratch.
    #[instrument(skip_all, fields(pages = payload.pages.len()))]
    pub fn update_view(&mut self, payload: PageSetPayload, now: Instant) {
        self.pages = PageSet::from_payload(payload, self.config.layout.page_gap);
        for page in &self.pages.pages {
            for block in &page.blocks {
                for token in block.tokens.iter().filter(|token| token.is_tracked) {
                    self.tracked.insert(token.lemma.clone());
                }
            }
        }
        self.viewport
            .set_dimensions(self.pages.total_width(), self.pages.max_height());
        self.tree = OverlayTree::build(&self.pages, &self.tracked);
        self.highlighter.clear();
        self.popup.hide();
        self.lookup = None;

        if let Some(pending) = self.pending_highlight {
            if self.pages.contains_page(pending.page_index) {
                self.pending_highlight = None;
                debug!(page = pending.page_index, "drawing deferred highlight");
                self.highlight_on(Some(pending.page_index), pending.rect, now);
            }
        }
        info!(
            scale = self.viewport.layout().scale,
            fit = self.viewport.state().fit_scale,
            "page set rendered"
        );
    }

    fn show_popup(&mut self, mut payload: PopupPayload) {
        match (&self.lookup, payload.request_id) {
            (Some(anchor), Some(id)) if anchor.request_id != id => {
                debug!(%id, lemma = %payload.lemma, "stale lookup response discarded");
                return;
            }
            (None, Some(id)) => {
                debug!(%id, lemma = %payload.lemma, "lookup response without pending lookup discarded");
                return;
            }
            (Some(anchor), None) if anchor.lemma != payload.lemma => {
                debug!(lemma = %payload.lemma, "popup for a different word discarded");
                return;
            }
            (Some(anchor), _) => {
                payload.mouse_x = anchor.point.x;
                payload.mouse_y = anchor.point.y;
            }
            (None, None) => {}
        }
        if payload.not_found {
            debug!(lemma = %payload.lemma, "lookup miss");
        }
        payload.is_tracked |= self.tracked.contains(&payload.lemma);
        self.popup.show(payload, self.viewport.viewport());
    }

    pub fn mark_word_tracked(&mut self, lemma: &str) {
        self.tracked.insert(lemma.to_string());
        self.tree.mark_word_tracked(lemma);
        self.popup.mark_word_as_tracked(lemma);
    }

    /// Highlights page-pixel `rect` on whichever displayed page has a
    /// matching block.
    pub fn highlight_block(&mut self, rect: Rect, now: Instant) -> &Highlight {
        self.highlight_on(None, rect, now)
    }

    fn highlight_on(&mut self, page: Option<usize>, rect: Rect, now: Instant) -> &Highlight {
        let projection = self.projection();
        self.highlighter
            .highlight_block(rect, page, &self.tree, projection, now)
    }

    /// Highlights a recorded appearance, asking the host to show its page
    /// first when it is not displayed.
    pub fn reveal_appearance(
        &mut self,
        page_index: usize,
        rect: Rect,
        now: Instant,
    ) -> Result<(), BridgeError> {
        if self.pages.contains_page(page_index) {
            self.pending_highlight = None;
            self.highlight_on(Some(page_index), rect, now);
            return Ok(());
        }
        self.highlighter.clear();
        self.pending_highlight = Some(PendingHighlight { page_index, rect });
        self.send(OutboundRequest::JumpToPage { page_index })?;
        Ok(())
    }

    /// Sets the user zoom directly.
    pub fn set_user_scale(&mut self, user_scale: f32) -> Layout {
        let layout = self.viewport.apply_layout(user_scale);
        self.reproject();
        layout
    }

    pub fn target_at(&self, point: Point) -> PointerTarget {
        if self.popup.contains(point) {
            return PointerTarget::Popup;
        }
        let content = self.projection().to_content(point);
        let Some(hit) = self.tree.hit_test(content) else {
            return PointerTarget::Background;
        };
        let page_index = hit.page.index;
        let block_id = hit.block.id;
        match hit.kind {
            BlockHit::Token { span, .. } => {
                let surface = self
                    .pages
                    .page(page_index)
                    .and_then(|page| page.block(block_id))
                    .and_then(|block| block.tokens.get(span.token).map(|token| token.surface(block)))
                    .unwrap_or_else(|| span.text.clone());
                PointerTarget::Token {
                    page_index,
                    block_id,
                    lemma: span.lemma.clone(),
                    surface,
                }
            }
            BlockHit::Line { .. } => PointerTarget::Line {
                page_index,
                block_id,
            },
            BlockHit::Block => PointerTarget::Block {
                page_index,
                block_id,
            },
        }
    }

    /// Routes one input event and performs its effect.
    pub fn handle_input(&mut self, event: InputEvent) -> Result<RouteAction, BridgeError> {
        if let Some(affordance) = self.popup.view().and_then(|_| popup_shortcut(&event)) {
            self.activate(affordance)?;
            return Ok(RouteAction::Absorbed);
        }
        let target = event
            .point()
            .map(|point| self.target_at(point))
            .unwrap_or(PointerTarget::Background);
        let ctx = RouteContext {
            target,
            popup_open: self.popup.is_shown(),
            overflows: self.viewport.layout().overflows(),
        };
        let action = self.router.route(event, &ctx);
        self.perform(&action)?;
        Ok(action)
    }

    fn perform(&mut self, action: &RouteAction) -> Result<(), BridgeError> {
        match action {
            RouteAction::None
            | RouteAction::Absorbed
            | RouteAction::StartPan
            | RouteAction::EndPan => {}
            RouteAction::Zoom { steps, anchor } => {
                self.viewport.zoom(*steps, *anchor);
                self.reproject();
            }
            RouteAction::Pan { dx, dy } => {
                if self.viewport.pan_by(*dx, *dy) {
                    self.reproject();
                }
            }
            RouteAction::Lookup {
                page_index,
                block_id,
                lemma,
                surface,
                point,
            } => {
                let content = self.projection().to_content(*point);
                let request = OutboundRequest::WordLookup {
                    lemma: lemma.clone(),
                    surface: surface.clone(),
                    x: content.x,
                    y: content.y,
                    page_index: *page_index,
                    block_id: *block_id,
                };
                if let Some(request_id) = self.send(request)? {
                    self.lookup = Some(LookupAnchor {
                        request_id,
                        lemma: lemma.clone(),
                        point: *point,
                        page_index: *page_index,
                        block_id: *block_id,
                    });
                }
            }
            RouteAction::BlockClicked {
                page_index,
                block_id,
            } => {
                self.dismiss_popup();
                self.send(OutboundRequest::BlockClicked {
                    block_id: *block_id,
                    page_index: *page_index,
                })?;
            }
            RouteAction::DismissPopup => self.dismiss_popup(),
            RouteAction::Navigate(direction) => {
                self.send(OutboundRequest::Navigation {
                    direction: *direction,
                })?;
            }
            RouteAction::Resize { width, height } => {
                self.viewport.resize(*width, *height);
                self.popup.reposition(self.viewport.viewport());
                self.reproject();
            }
        }
        Ok(())
    }

    /// Triggers a popup action button.
    pub fn activate(&mut self, affordance: Affordance) -> Result<Option<RequestId>, BridgeError> {
        let Some(request) = self.popup.view().and_then(|view| view.request_for(affordance)) else {
            debug!(action = affordance.name(), "popup action not available");
            return Ok(None);
        };
        self.send(request)
    }

    /// Advances timers and drains host acknowledgments. Returns `true`
    /// when the visible state changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.bridge.poll_acks();
        self.highlighter.tick(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.highlighter.deadline()
    }

    fn dismiss_popup(&mut self) {
        self.popup.hide();
        self.lookup = None;
    }

    fn reproject(&mut self) {
        let projection = self.projection();
        self.highlighter.reproject(&self.tree, projection);
    }

    /// Sends a request. A missing optional operation is logged and yields
    /// `Ok(None)`; anything else that fails is terminal.
    fn send(&mut self, request: OutboundRequest) -> Result<Option<RequestId>, BridgeError> {
        match self.bridge.send(request) {
            Ok(id) => Ok(Some(id)),
            Err(err) if !err.is_terminal() => {
                warn!(%err, "host request skipped");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Key that triggers `affordance` while a popup is open.
pub fn shortcut_key(affordance: Affordance) -> char {
    match affordance {
        Affordance::Track => 't',
        Affordance::ViewContext => 'c',
        Affordance::Expand => 'd',
    }
}

fn popup_shortcut(event: &InputEvent) -> Option<Affordance> {
    let InputEvent::Key(key) = event else {
        return None;
    };
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if !key.modifiers.is_empty() && key.modifiers != KeyModifiers::SHIFT {
        return None;
    }
    let KeyCode::Char(ch) = key.code else {
        return None;
    };
    [Affordance::Track, Affordance::ViewContext, Affordance::Expand]
        .into_iter()
        .find(|affordance| shortcut_key(*affordance) == ch)
}
