use std::time::Instant;

use koma_core::config::HighlightConfig;
use koma_core::geometry::Rect;
use tracing::debug;

use crate::overlay::{OverlayTree, Projection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Visible,
    Fading,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    /// Requested block geometry in page pixels.
    pub target: Rect,
    /// Page the geometry belongs to. Without one, every displayed page is
    /// searched and the fallback treats `target` as content coordinates.
    pub page: Option<usize>,
    /// Where the highlight is drawn, in viewport coordinates.
    pub screen: Rect,
    /// Whether `screen` came from a rendered block or from projecting
    /// `target` directly.
    pub matched: bool,
    pub phase: Phase,
    started: Instant,
}

/// Draws at most one transient highlight over a block.
#[derive(Debug, Clone)]
pub struct OverlayHighlighter {
    config: HighlightConfig,
    current: Option<Highlight>,
}

impl OverlayHighlighter {
    pub fn new(config: HighlightConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&Highlight> {
        self.current.as_ref()
    }

    pub fn highlight_block(
        &mut self,
        target: Rect,
        page: Option<usize>,
        tree: &OverlayTree,
        projection: Projection,
        now: Instant,
    ) -> &Highlight {
        self.clear();
        let (screen, matched) = self.locate(&target, page, tree, projection);
        if !matched {
            debug!(?target, ?page, "no rendered block matches highlight; projecting directly");
        }
        self.current.insert(Highlight {
            target,
            page,
            screen,
            matched,
            phase: Phase::Visible,
            started: now,
        })
    }

    /// Follows zoom and pan without restarting the timer.
    pub fn reproject(&mut self, tree: &OverlayTree, projection: Projection) {
        let Some((target, page)) = self
            .current
            .as_ref()
            .map(|highlight| (highlight.target, highlight.page))
        else {
            return;
        };
        let (screen, matched) = self.locate(&target, page, tree, projection);
        if let Some(highlight) = &mut self.current {
            highlight.screen = screen;
            highlight.matched = matched;
        }
    }

    /// Advances the fade sequence. Returns `true` if anything changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(highlight) = &mut self.current else {
            return false;
        };
        let elapsed = now.saturating_duration_since(highlight.started);
        if elapsed >= self.config.visible + self.config.fade {
            self.current = None;
            return true;
        }
        if elapsed >= self.config.visible && highlight.phase == Phase::Visible {
            highlight.phase = Phase::Fading;
            return true;
        }
        false
    }

    /// When the next phase change is due.
    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|highlight| match highlight.phase {
            Phase::Visible => highlight.started + self.config.visible,
            Phase::Fading => highlight.started + self.config.visible + self.config.fade,
        })
    }

    pub fn clear(&mut self) -> bool {
        self.current.take().is_some()
    }

    fn locate(
        &self,
        target: &Rect,
        page: Option<usize>,
        tree: &OverlayTree,
        projection: Projection,
    ) -> (Rect, bool) {
        let tolerance = self.config.match_tolerance;
        let page_view = page.and_then(|index| tree.page(index));
        let found = match page_view {
            Some(view) => view.find_block_rect(target, tolerance),
            None => tree.find_block_rect(target, tolerance),
        };
        match found {
            Some(content) => (projection.rect(content), true),
            None => {
                let content = page_view.map_or(*target, |view| view.content_rect(*target));
                (projection.rect(content), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use koma_core::geometry::Point;
    use koma_core::model::PageSet;
    use koma_core::protocol::{BlockPayload, PagePayload, PageSetPayload};

    fn tree_with_block_on_second_page() -> OverlayTree {
        let page = |index: usize, blocks: Vec<BlockPayload>| PagePayload {
            index: Some(index),
            width: 800.0,
            height: 1200.0,
            image_ref: format!("{index:03}.jpg"),
            blocks,
        };
        let set = PageSet::from_payload(
            PageSetPayload {
                pages: vec![
                    page(3, Vec::new()),
                    page(
                        4,
                        vec![BlockPayload {
                            id: 7,
                            x: 120.0,
                            y: 340.0,
                            width: 200.0,
                            height: 60.0,
                            font_size: Some(20.0),
                            lines: vec!["猫".to_string()],
                            tokens: Vec::new(),
                        }],
                    ),
                ],
                gap: Some(0.0),
            },
            0.0,
        );
        OverlayTree::build(&set, &BTreeSet::new())
    }

    fn projection() -> Projection {
        Projection::new(Point::new(0.0, 100.0), 0.5)
    }

    #[test]
    fn matched_block_uses_rendered_position() {
        let tree = tree_with_block_on_second_page();
        let mut highlighter = OverlayHighlighter::new(HighlightConfig::default());
        let highlight = highlighter.highlight_block(
            Rect::new(120.0, 340.0, 200.0, 60.0),
            None,
            &tree,
            projection(),
            Instant::now(),
        );
        assert!(highlight.matched);
        assert_eq!(highlight.screen, Rect::new(460.0, 270.0, 100.0, 30.0));
    }

    #[test]
    fn unmatched_block_is_projected_manually() {
        let tree = OverlayTree::default();
        let mut highlighter = OverlayHighlighter::new(HighlightConfig::default());
        let highlight = highlighter.highlight_block(
            Rect::new(120.0, 340.0, 200.0, 60.0),
            None,
            &tree,
            projection(),
            Instant::now(),
        );
        assert!(!highlight.matched);
        assert_eq!(highlight.screen, Rect::new(60.0, 270.0, 100.0, 30.0));
    }

    #[test]
    fn highlight_fades_then_clears() {
        let tree = OverlayTree::default();
        let config = HighlightConfig::default();
        let mut highlighter = OverlayHighlighter::new(config);
        let start = Instant::now();
        highlighter.highlight_block(Rect::new(0.0, 0.0, 1.0, 1.0), None, &tree, projection(), start);
        assert_eq!(highlighter.deadline(), Some(start + config.visible));

        assert!(!highlighter.tick(start + Duration::from_millis(100)));
        assert!(highlighter.tick(start + config.visible));
        assert_eq!(highlighter.current().map(|h| h.phase), Some(Phase::Fading));
        assert_eq!(highlighter.deadline(), Some(start + config.visible + config.fade));

        assert!(highlighter.tick(start + config.visible + config.fade));
        assert!(highlighter.current().is_none());
        assert!(!highlighter.tick(start + Duration::from_secs(60)));
    }

    #[test]
    fn only_one_highlight_exists() {
        let tree = tree_with_block_on_second_page();
        let mut highlighter = OverlayHighlighter::new(HighlightConfig::default());
        let now = Instant::now();
        highlighter.highlight_block(Rect::new(0.0, 0.0, 5.0, 5.0), None, &tree, projection(), now);
        highlighter.highlight_block(
            Rect::new(120.0, 340.0, 200.0, 60.0),
            None,
            &tree,
            projection(),
            now,
        );
        assert_eq!(
            highlighter.current().map(|h| h.target),
            Some(Rect::new(120.0, 340.0, 200.0, 60.0))
        );
        assert!(highlighter.clear());
        assert!(!highlighter.clear());
    }

    #[test]
    fn reprojection_follows_zoom() {
        let tree = tree_with_block_on_second_page();
        let mut highlighter = OverlayHighlighter::new(HighlightConfig::default());
        let now = Instant::now();
        highlighter.highlight_block(
            Rect::new(120.0, 340.0, 200.0, 60.0),
            Some(4),
            &tree,
            projection(),
            now,
        );
        highlighter.reproject(&tree, Projection::new(Point::new(0.0, 0.0), 1.0));
        let highlight = highlighter.current().unwrap();
        assert_eq!(highlight.screen, Rect::new(920.0, 340.0, 200.0, 60.0));
        assert_eq!(highlighter.deadline(), Some(now + HighlightConfig::default().visible));
    }

    #[test]
    fn page_scoped_highlight_stays_on_its_page() {
        let tree = tree_with_block_on_second_page();
        let mut highlighter = OverlayHighlighter::new(HighlightConfig::default());
        let now = Instant::now();
        let rect = Rect::new(120.0, 340.0, 200.0, 60.0);

        let highlight = highlighter.highlight_block(rect, Some(3), &tree, projection(), now);
        assert!(!highlight.matched);
        assert_eq!(highlight.screen, Rect::new(60.0, 270.0, 100.0, 30.0));

        let highlight = highlighter.highlight_block(rect, Some(4), &tree, projection(), now);
        assert!(highlight.matched);
        assert_eq!(highlight.screen, Rect::new(460.0, 270.0, 100.0, 30.0));

        let unknown = Rect::new(10.0, 20.0, 40.0, 40.0);
        let highlight = highlighter.highlight_block(unknown, Some(4), &tree, projection(), now);
        assert!(!highlight.matched);
        assert_eq!(highlight.screen, Rect::new(405.0, 110.0, 20.0, 20.0));
    }
}
