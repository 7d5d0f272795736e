//! Validated page-set model.
//!
//! Everything here is built from the wire payloads in [`crate::protocol`]
//! by [`PageSet::from_payload`], which is the only place untrusted render
//! input is checked. Past that point token offsets always satisfy
//! `start < end <= block.char_len()`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geometry::{Point, Rect};
use crate::protocol::{BlockPayload, PagePayload, PageSetPayload, TokenPayload};

pub type BlockId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Inclusive start, in chars of the block's concatenated line text.
    pub start: usize,
    /// Exclusive end, in chars of the block's concatenated line text.
    pub end: usize,
    pub lemma: String,
    pub part_of_speech: String,
    /// Advisory; may lag behind the appearance index.
    pub is_tracked: bool,
}

impl Token {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Surface text of the token, sliced out of `block`.
    pub fn surface(&self, block: &Block) -> String {
        block
            .text()
            .chars()
            .skip(self.start)
            .take(self.len())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub rect: Rect,
    /// Zero means "fit to the block box" at render time.
    pub font_size: f32,
    pub lines: Vec<String>,
    pub tokens: Vec<Token>,
}

impl Block {
    /// The address space for token offsets.
    pub fn text(&self) -> String {
        self.lines.concat()
    }

    pub fn char_len(&self) -> usize {
        self.lines.iter().map(|line| line.chars().count()).sum()
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        self.rect.contains(Point::new(x, y))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Position of the page within its volume.
    pub index: usize,
    pub width: f32,
    pub height: f32,
    pub image_ref: String,
    pub blocks: Vec<Block>,
}

impl Page {
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|block| block.id == id)
    }

    /// First block whose box contains the page-pixel point.
    pub fn block_at(&self, x: f32, y: f32) -> Option<&Block> {
        self.blocks.iter().find(|block| block.contains_point(x, y))
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageSet {
    pub pages: Vec<Page>,
    pub gap: f32,
}

impl PageSet {
    /// Validates a render payload. Malformed values are clamped and logged
    /// rather than rejected so that the viewer stays usable.
    pub fn from_payload(payload: PageSetPayload, default_gap: f32) -> Self {
        let gap = match payload.gap {
            Some(gap) if gap.is_finite() && gap >= 0.0 => gap,
            Some(gap) => {
                warn!(gap, "invalid page gap in render payload; using default");
                default_gap
            }
            None => default_gap,
        };

        let pages = payload
            .pages
            .into_iter()
            .enumerate()
            .map(|(position, page)| page_from_payload(position, page))
            .collect();

        Self { pages, gap }
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.iter().find(|page| page.index == index)
    }

    pub fn contains_page(&self, index: usize) -> bool {
        self.page(index).is_some()
    }

    /// Sum of page widths plus the gaps between them.
    pub fn total_width(&self) -> f32 {
        let widths: f32 = self.pages.iter().map(|page| page.width).sum();
        let gaps = self.gap * self.pages.len().saturating_sub(1) as f32;
        widths + gaps
    }

    pub fn max_height(&self) -> f32 {
        self.pages
            .iter()
            .map(|page| page.height)
            .fold(0.0, f32::max)
    }

    /// Horizontal offset of each page inside the unscaled content box.
    pub fn page_offsets(&self) -> Vec<f32> {
        let mut offsets = Vec::with_capacity(self.pages.len());
        let mut cursor = 0.0;
        for page in &self.pages {
            offsets.push(cursor);
            cursor += page.width + self.gap;
        }
        offsets
    }
}

fn non_negative(value: f32, what: &'static str, page: usize) -> f32 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        warn!(page, value, field = what, "invalid dimension in render payload; clamped to 0");
        0.0
    }
}

fn page_from_payload(position: usize, payload: PagePayload) -> Page {
    let index = payload.index.unwrap_or(position);
    let width = non_negative(payload.width, "width", index);
    let height = non_negative(payload.height, "height", index);
    let mut blocks: Vec<Block> = Vec::with_capacity(payload.blocks.len());
    for block in payload.blocks {
        if blocks.iter().any(|existing| existing.id == block.id) {
            warn!(page = index, block = block.id, "duplicate block id in render payload");
        }
        blocks.push(block_from_payload(index, block));
    }

    Page {
        index,
        width,
        height,
        image_ref: payload.image_ref,
        blocks,
    }
}

fn block_from_payload(page: usize, payload: BlockPayload) -> Block {
    let rect = Rect::new(
        finite_or_zero(payload.x),
        finite_or_zero(payload.y),
        non_negative(payload.width, "block.width", page),
        non_negative(payload.height, "block.height", page),
    );
    let font_size = match payload.font_size {
        Some(size) if size.is_finite() && size > 0.0 => size,
        _ => 0.0,
    };
    let char_len: usize = payload.lines.iter().map(|line| line.chars().count()).sum();
    let tokens = payload
        .tokens
        .into_iter()
        .filter_map(|token| token_from_payload(page, payload.id, char_len, token))
        .collect();

    Block {
        id: payload.id,
        rect,
        font_size,
        lines: payload.lines,
        tokens,
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn token_from_payload(
    page: usize,
    block: BlockId,
    char_len: usize,
    payload: TokenPayload,
) -> Option<Token> {
    let limit = char_len as i64;
    let start = payload.start.clamp(0, limit);
    let end = payload.end.clamp(0, limit);
    if start != payload.start || end != payload.end {
        warn!(
            page,
            block,
            lemma = %payload.lemma,
            start = payload.start,
            end = payload.end,
            char_len,
            "token offsets outside block text; clamped"
        );
    }
    if start >= end {
        warn!(page, block, lemma = %payload.lemma, "empty token after clamping; dropped");
        return None;
    }

    Some(Token {
        start: start as usize,
        end: end as usize,
        lemma: payload.lemma,
        part_of_speech: payload.part_of_speech,
        is_tracked: payload.is_tracked,
    })
}
