//! Visual tree for the current page set.
//!
//! The tree is rebuilt from scratch on every full render. Each block is
//! split into lines, and each line into plain-text and token segments
//! whose concatenation is exactly the line text.
//!
//! Lines are laid out vertically: every line is a column one font-size
//! wide, columns run right to left from the block's right edge, and
//! characters stack top to bottom in square cells.

use std::collections::BTreeSet;

use koma_core::geometry::{Point, Rect};
use koma_core::model::{Block, BlockId, Page, PageSet, Token};
use serde::Serialize;
use tracing::{debug, instrument};

const FIT_MARGIN: f32 = 0.9;
const MIN_FONT_SIZE: f32 = 10.0;
const MAX_FONT_SIZE: f32 = 200.0;
const EMPTY_FONT_SIZE: f32 = 12.0;

/// Largest whole font size at which every line fits the block box.
pub fn fit_font_size(block: &Block) -> f32 {
    let longest = block
        .lines
        .iter()
        .map(|line| line.chars().count())
        .max()
        .unwrap_or(0);
    if longest == 0 {
        return EMPTY_FONT_SIZE;
    }
    let by_height = block.rect.height * FIT_MARGIN / longest as f32;
    let by_width = block.rect.width * FIT_MARGIN / block.lines.len() as f32;
    by_height.min(by_width).floor().clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
}

/// Maps content coordinates to viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub origin: Point,
    pub scale: f32,
}

impl Projection {
    pub fn new(origin: Point, scale: f32) -> Self {
        Self { origin, scale }
    }

    pub fn rect(&self, rect: Rect) -> Rect {
        rect.project(self.origin, self.scale)
    }

    pub fn point(&self, point: Point) -> Point {
        Point::new(
            self.origin.x + point.x * self.scale,
            self.origin.y + point.y * self.scale,
        )
    }

    /// Inverse of the projection for a single point.
    pub fn to_content(&self, point: Point) -> Point {
        Point::new(
            (point.x - self.origin.x) / self.scale,
            (point.y - self.origin.y) / self.scale,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenSpan {
    pub text: String,
    pub lemma: String,
    pub part_of_speech: String,
    pub tracked: bool,
    /// Index into the source block's token list.
    pub token: usize,
    /// Line-local char range covered by the span.
    pub local_start: usize,
    pub local_end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Segment {
    Text { text: String },
    Token(TokenSpan),
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Segment::Text { text } => text,
            Segment::Token(span) => &span.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineView {
    /// Offset of the line's first char in the block text.
    pub start: usize,
    pub len: usize,
    pub segments: Vec<Segment>,
}

impl LineView {
    pub fn text(&self) -> String {
        self.segments.iter().map(Segment::text).collect()
    }

    pub fn spans(&self) -> impl Iterator<Item = &TokenSpan> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Token(span) => Some(span),
            Segment::Text { .. } => None,
        })
    }

    /// The token span covering the line-local char `offset`, if any.
    pub fn span_at(&self, offset: usize) -> Option<&TokenSpan> {
        self.spans()
            .find(|span| span.local_start <= offset && offset < span.local_end)
    }
}

/// What a point inside a block falls on.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockHit<'a> {
    Token { line: usize, span: &'a TokenSpan },
    Line { line: usize },
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockView {
    pub id: BlockId,
    /// Page-pixel geometry as received.
    pub rect: Rect,
    pub font_size: f32,
    pub lines: Vec<LineView>,
}

impl BlockView {
    pub fn text(&self) -> String {
        self.lines.iter().map(LineView::text).collect()
    }

    pub fn spans(&self) -> impl Iterator<Item = &TokenSpan> {
        self.lines.iter().flat_map(LineView::spans)
    }

    /// Classifies a page-pixel point. Returns `None` outside the block.
    pub fn hit(&self, point: Point) -> Option<BlockHit<'_>> {
        if !self.rect.contains(point) {
            return None;
        }
        let cell = self.font_size;
        if cell <= 0.0 {
            return Some(BlockHit::Block);
        }
        let column = ((self.rect.right() - point.x) / cell).floor() as usize;
        let row = ((point.y - self.rect.y) / cell).floor() as usize;
        let Some(line) = self.lines.get(column) else {
            return Some(BlockHit::Block);
        };
        if row >= line.len {
            return Some(BlockHit::Block);
        }
        Some(match line.span_at(row) {
            Some(span) => BlockHit::Token { line: column, span },
            None => BlockHit::Line { line: column },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageView {
    pub index: usize,
    pub image_ref: String,
    pub width: f32,
    pub height: f32,
    /// Horizontal position inside the unscaled content box.
    pub offset_x: f32,
    pub blocks: Vec<BlockView>,
}

impl PageView {
    pub fn block(&self, id: BlockId) -> Option<&BlockView> {
        self.blocks.iter().find(|block| block.id == id)
    }

    /// Block geometry in content coordinates.
    pub fn content_rect(&self, rect: Rect) -> Rect {
        rect.translate(self.offset_x, 0.0)
    }

    /// Content-space rectangle of the block on this page whose recorded
    /// geometry matches `rect` within `tolerance`.
    pub fn find_block_rect(&self, rect: &Rect, tolerance: f32) -> Option<Rect> {
        self.blocks
            .iter()
            .find(|block| block.rect.matches(rect, tolerance))
            .map(|block| self.content_rect(block.rect))
    }

    fn contains(&self, point: Point) -> bool {
        Rect::new(self.offset_x, 0.0, self.width, self.height).contains(point)
    }
}

/// Result of hit-testing a content-space point.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeHit<'a> {
    pub page: &'a PageView,
    pub block: &'a BlockView,
    /// Point in page pixels.
    pub point: Point,
    pub kind: BlockHit<'a>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OverlayTree {
    pub pages: Vec<PageView>,
    pub gap: f32,
}

impl OverlayTree {
    /// Builds the tree for `set`. Tokens whose lemma is in `tracked`
    /// are styled as tracked even if the payload says otherwise.
    #[instrument(skip_all, fields(pages = set.pages.len()))]
    pub fn build(set: &PageSet, tracked: &BTreeSet<String>) -> Self {
        let offsets = set.page_offsets();
        let pages = set
            .pages
            .iter()
            .zip(offsets)
            .map(|(page, offset_x)| build_page(page, offset_x, tracked))
            .collect();
        Self {
            pages,
            gap: set.gap,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page(&self, index: usize) -> Option<&PageView> {
        self.pages.iter().find(|page| page.index == index)
    }

    pub fn block(&self, page_index: usize, id: BlockId) -> Option<&BlockView> {
        self.page(page_index).and_then(|page| page.block(id))
    }

    /// Finds the rendered block whose recorded geometry matches `rect`
    /// within `tolerance`, returning its content-space rectangle.
    pub fn find_block_rect(&self, rect: &Rect, tolerance: f32) -> Option<Rect> {
        self.pages
            .iter()
            .find_map(|page| page.find_block_rect(rect, tolerance))
    }

    pub fn hit_test(&self, content: Point) -> Option<TreeHit<'_>> {
        let page = self.pages.iter().find(|page| page.contains(content))?;
        let point = Point::new(content.x - page.offset_x, content.y);
        page.blocks.iter().find_map(|block| {
            block.hit(point).map(|kind| TreeHit {
                page,
                block,
                point,
                kind,
            })
        })
    }

    /// Restyles every span for `lemma` as tracked. Returns how many spans
    /// changed.
    pub fn mark_word_tracked(&mut self, lemma: &str) -> usize {
        let mut changed = 0;
        for page in &mut self.pages {
            for block in &mut page.blocks {
                for line in &mut block.lines {
                    for segment in &mut line.segments {
                        if let Segment::Token(span) = segment {
                            if span.lemma == lemma && !span.tracked {
                                span.tracked = true;
                                changed += 1;
                            }
                        }
                    }
                }
            }
        }
        debug!(lemma, changed, "marked word tracked");
        changed
    }
}

fn build_page(page: &Page, offset_x: f32, tracked: &BTreeSet<String>) -> PageView {
    PageView {
        index: page.index,
        image_ref: page.image_ref.clone(),
        width: page.width,
        height: page.height,
        offset_x,
        blocks: page
            .blocks
            .iter()
            .map(|block| build_block(page.index, block, tracked))
            .collect(),
    }
}

pub fn build_block(page_index: usize, block: &Block, tracked: &BTreeSet<String>) -> BlockView {
    let font_size = if block.font_size > 0.0 {
        block.font_size
    } else {
        fit_font_size(block)
    };

    let mut lines = Vec::with_capacity(block.lines.len());
    let mut line_start = 0;
    for text in &block.lines {
        let chars: Vec<char> = text.chars().collect();
        let segments = split_line(page_index, block, &chars, line_start, tracked);
        lines.push(LineView {
            start: line_start,
            len: chars.len(),
            segments,
        });
        line_start += chars.len();
    }

    BlockView {
        id: block.id,
        rect: block.rect,
        font_size,
        lines,
    }
}

/// Splits one line into segments. Overlapping tokens are resolved by
/// start offset: the earlier token keeps its chars and later ones are
/// truncated to what is left.
fn split_line(
    page_index: usize,
    block: &Block,
    chars: &[char],
    line_start: usize,
    tracked: &BTreeSet<String>,
) -> Vec<Segment> {
    let line_len = chars.len();
    let line_end = line_start + line_len;

    let mut selected: Vec<(usize, usize, usize, &Token)> = block
        .tokens
        .iter()
        .enumerate()
        .filter(|(_, token)| token.start < line_end && token.end > line_start)
        .map(|(index, token)| {
            let local_start = token.start.saturating_sub(line_start);
            let local_end = line_len.min(token.end - line_start);
            (local_start, local_end, index, token)
        })
        .collect();

    let slice = |from: usize, to: usize| -> String { chars[from..to].iter().collect() };
    if selected.is_empty() {
        return vec![Segment::Text {
            text: slice(0, line_len),
        }];
    }
    selected.sort_by_key(|(local_start, ..)| *local_start);

    let mut segments = Vec::with_capacity(selected.len() * 2 + 1);
    let mut cursor = 0;
    for (local_start, local_end, index, token) in selected {
        let start = local_start.max(cursor);
        if start >= local_end {
            debug!(
                page = page_index,
                block = block.id,
                lemma = %token.lemma,
                "token fully overlapped by an earlier token; skipped"
            );
            continue;
        }
        if start > local_start {
            debug!(
                page = page_index,
                block = block.id,
                lemma = %token.lemma,
                "overlapping token truncated"
            );
        }
        if start > cursor {
            segments.push(Segment::Text {
                text: slice(cursor, start),
            });
        }
        segments.push(Segment::Token(TokenSpan {
            text: slice(start, local_end),
            lemma: token.lemma.clone(),
            part_of_speech: token.part_of_speech.clone(),
            tracked: token.is_tracked || tracked.contains(&token.lemma),
            token: index,
            local_start: start,
            local_end,
        }));
        cursor = local_end;
    }
    if cursor < line_len {
        segments.push(Segment::Text {
            text: slice(cursor, line_len),
        });
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use koma_core::protocol::{BlockPayload, PagePayload, PageSetPayload, TokenPayload};

    fn token(start: i64, end: i64, lemma: &str) -> TokenPayload {
        TokenPayload {
            start,
            end,
            lemma: lemma.to_string(),
            part_of_speech: "verb".to_string(),
            is_tracked: false,
        }
    }

    fn page_set(lines: &[&str], tokens: Vec<TokenPayload>, font_size: Option<f32>) -> PageSet {
        PageSet::from_payload(
            PageSetPayload {
                pages: vec![PagePayload {
                    index: None,
                    width: 800.0,
                    height: 1200.0,
                    image_ref: "001.jpg".to_string(),
                    blocks: vec![BlockPayload {
                        id: 1,
                        x: 120.0,
                        y: 340.0,
                        width: 200.0,
                        height: 60.0,
                        font_size,
                        lines: lines.iter().map(|line| line.to_string()).collect(),
                        tokens,
                    }],
                }],
                gap: None,
            },
            0.0,
        )
    }

    fn only_block(tree: &OverlayTree) -> &BlockView {
        &tree.pages[0].blocks[0]
    }

    #[test]
    fn single_token_wraps_whole_line() {
        let set = page_set(&["食べた"], vec![token(0, 3, "食べる")], Some(18.0));
        let tree = OverlayTree::build(&set, &BTreeSet::new());
        let line = &only_block(&tree).lines[0];

        assert_eq!(line.segments.len(), 1);
        match &line.segments[0] {
            Segment::Token(span) => {
                assert_eq!(span.text, "食べた");
                assert_eq!(span.lemma, "食べる");
                assert_eq!(span.part_of_speech, "verb");
                assert!(!span.tracked);
            }
            other => panic!("unexpected segment: {:?}", other),
        }
    }

    #[test]
    fn segments_cover_each_line_exactly() {
        let lines = ["今日は猫が", "ごはんを食べた", "", "ね"];
        let tokens = vec![
            token(0, 2, "今日"),
            token(3, 4, "猫"),
            token(4, 7, "がご"),
            token(9, 12, "を食べ"),
            token(10, 13, "食べる"),
            token(13, 14, "ね"),
        ];
        let set = page_set(&lines, tokens, Some(16.0));
        let tree = OverlayTree::build(&set, &BTreeSet::new());
        let block = only_block(&tree);

        for (view, source) in block.lines.iter().zip(lines) {
            assert_eq!(view.text(), source);
            for span in view.spans() {
                assert!(span.local_start <= span.local_end);
                assert!(span.local_end <= view.len);
            }
        }
        assert_eq!(block.text(), lines.concat());
    }

    #[test]
    fn token_crossing_lines_is_split_per_line() {
        let set = page_set(&["猫が", "いる"], vec![token(1, 3, "がい")], Some(16.0));
        let tree = OverlayTree::build(&set, &BTreeSet::new());
        let block = only_block(&tree);

        let first: Vec<_> = block.lines[0].spans().map(|s| s.text.as_str()).collect();
        let second: Vec<_> = block.lines[1].spans().map(|s| s.text.as_str()).collect();
        assert_eq!(first, vec!["が"]);
        assert_eq!(second, vec!["い"]);
        assert_eq!(block.lines[1].spans().next().map(|s| s.local_start), Some(0));
    }

    #[test]
    fn earlier_token_wins_overlap() {
        let set = page_set(
            &["たべものや"],
            vec![token(2, 5, "ものや"), token(0, 3, "たべも")],
            Some(16.0),
        );
        let tree = OverlayTree::build(&set, &BTreeSet::new());
        let spans: Vec<_> = only_block(&tree).lines[0]
            .spans()
            .map(|span| (span.text.clone(), span.lemma.clone()))
            .collect();
        assert_eq!(
            spans,
            vec![
                ("たべも".to_string(), "たべも".to_string()),
                ("のや".to_string(), "ものや".to_string()),
            ]
        );
    }

    #[test]
    fn fully_covered_token_is_dropped() {
        let set = page_set(&["食べた"], vec![token(0, 3, "食べる"), token(1, 2, "べ")], Some(16.0));
        let tree = OverlayTree::build(&set, &BTreeSet::new());
        assert_eq!(only_block(&tree).lines[0].spans().count(), 1);
    }

    #[test]
    fn tracked_set_and_marking_style_spans() {
        let set = page_set(
            &["猫と猫"],
            vec![token(0, 1, "猫"), token(1, 2, "と"), token(2, 3, "猫")],
            Some(16.0),
        );
        let tracked: BTreeSet<String> = ["と".to_string()].into_iter().collect();
        let mut tree = OverlayTree::build(&set, &tracked);
        let tracked_lemmas: Vec<_> = only_block(&tree)
            .spans()
            .filter(|span| span.tracked)
            .map(|span| span.lemma.clone())
            .collect();
        assert_eq!(tracked_lemmas, vec!["と"]);

        assert_eq!(tree.mark_word_tracked("猫"), 2);
        assert_eq!(tree.mark_word_tracked("猫"), 0);
        assert!(only_block(&tree).spans().all(|span| span.tracked));
    }

    #[test]
    fn font_size_is_fitted_when_missing() {
        let set = page_set(&["あいう", "え"], Vec::new(), None);
        let block = &set.pages[0].blocks[0];
        // height 60 * 0.9 / 3 = 18, width 200 * 0.9 / 2 = 90
        assert_eq!(fit_font_size(block), 18.0);

        let empty = page_set(&[], Vec::new(), None);
        assert_eq!(fit_font_size(&empty.pages[0].blocks[0]), 12.0);

        let tree = OverlayTree::build(&set, &BTreeSet::new());
        assert_eq!(only_block(&tree).font_size, 18.0);
    }

    #[test]
    fn hit_test_walks_columns_right_to_left() {
        // Block spans x 120..320, y 340..400, cells are 20px.
        let set = page_set(&["猫が", "いる"], vec![token(0, 1, "猫")], Some(20.0));
        let tree = OverlayTree::build(&set, &BTreeSet::new());

        let hit = tree.hit_test(Point::new(315.0, 345.0)).unwrap();
        match hit.kind {
            BlockHit::Token { line, span } => {
                assert_eq!(line, 0);
                assert_eq!(span.lemma, "猫");
            }
            other => panic!("unexpected hit: {:?}", other),
        }
        assert_eq!(hit.block.id, 1);

        let off_token = tree.hit_test(Point::new(315.0, 365.0)).unwrap();
        assert_eq!(off_token.kind, BlockHit::Line { line: 0 });

        let second_line = tree.hit_test(Point::new(295.0, 345.0)).unwrap();
        assert_eq!(second_line.kind, BlockHit::Line { line: 1 });

        let empty_area = tree.hit_test(Point::new(130.0, 345.0)).unwrap();
        assert_eq!(empty_area.kind, BlockHit::Block);

        assert!(tree.hit_test(Point::new(10.0, 10.0)).is_none());
    }

    #[test]
    fn matching_block_rect_uses_page_offset() {
        let mut set = page_set(&["猫"], Vec::new(), Some(16.0));
        let mut second = set.pages[0].clone();
        second.index = 1;
        set.pages.insert(0, Page {
            blocks: Vec::new(),
            ..second
        });
        set.pages[1].index = 5;
        set.gap = 10.0;
        let tree = OverlayTree::build(&set, &BTreeSet::new());

        let found = tree
            .find_block_rect(&Rect::new(120.2, 339.8, 200.0, 60.0), 0.5)
            .unwrap();
        assert_eq!(found, Rect::new(930.0, 340.0, 200.0, 60.0));
        assert!(tree.find_block_rect(&Rect::new(0.0, 0.0, 1.0, 1.0), 0.5).is_none());
        assert!(tree.block(5, 1).is_some());
    }

    #[test]
    fn projection_round_trips_points() {
        let projection = Projection::new(Point::new(200.0, 50.0), 0.5);
        assert_eq!(
            projection.rect(Rect::new(120.0, 340.0, 200.0, 60.0)),
            Rect::new(260.0, 220.0, 100.0, 30.0)
        );
        assert_eq!(
            projection.to_content(Point::new(260.0, 220.0)),
            Point::new(120.0, 340.0)
        );
        assert_eq!(
            projection.point(Point::new(120.0, 340.0)),
            Point::new(260.0, 220.0)
        );
    }

    #[test]
    fn tree_serializes_segment_kinds() {
        let set = page_set(&["食べた!"], vec![token(0, 3, "食べる")], Some(16.0));
        let tree = OverlayTree::build(&set, &BTreeSet::new());
        let json = serde_json::to_value(&tree).unwrap();
        let segments = &json["pages"][0]["blocks"][0]["lines"][0]["segments"];
        assert_eq!(segments[0]["kind"], "token");
        assert_eq!(segments[1]["kind"], "text");
        assert_eq!(segments[1]["text"], "!");
    }
}
