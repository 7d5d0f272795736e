//! Text-mode drawing of the engine state. Block text is laid out in the
//! same vertical cells the hit test uses, so a click on a glyph lands on
//! the token it belongs to.

use std::io::Write;

use anyhow::Result;
use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{Clear, ClearType};
use koma_core::geometry::{Point, Rect};
use koma_engine::{shortcut_key, Engine};
use koma_input::CellMetrics;
use koma_render::{BlockView, PageView, Phase, PopupView, Projection, Segment};

#[derive(Debug, Clone, Copy)]
struct Grid {
    cells: CellMetrics,
    columns: u16,
    rows: u16,
}

impl Grid {
    fn cell(&self, point: Point) -> Option<(u16, u16)> {
        if !(point.x >= 0.0 && point.y >= 0.0) {
            return None;
        }
        let column = (point.x / self.cells.width).floor();
        let row = (point.y / self.cells.height).floor();
        if column >= f32::from(self.columns) || row >= f32::from(self.rows) {
            return None;
        }
        Some((column as u16, row as u16))
    }

    /// Cells covered by `rect`, clipped to the grid: (left, top, right, bottom).
    fn bounds(&self, rect: Rect) -> Option<(u16, u16, u16, u16)> {
        if self.columns == 0 || self.rows == 0 {
            return None;
        }
        let max_column = f32::from(self.columns - 1);
        let max_row = f32::from(self.rows - 1);
        let left = (rect.x / self.cells.width).floor();
        let top = (rect.y / self.cells.height).floor();
        let right = (rect.right() / self.cells.width).ceil() - 1.0;
        let bottom = (rect.bottom() / self.cells.height).ceil() - 1.0;
        if !(right >= 0.0 && bottom >= 0.0 && left <= max_column && top <= max_row) {
            return None;
        }
        Some((
            left.max(0.0) as u16,
            top.max(0.0) as u16,
            right.min(max_column).max(left.max(0.0)) as u16,
            bottom.min(max_row).max(top.max(0.0)) as u16,
        ))
    }
}

pub struct Screen<W: Write> {
    out: W,
    cells: CellMetrics,
}

impl<W: Write> Screen<W> {
    pub fn new(out: W, cells: CellMetrics) -> Self {
        Self { out, cells }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn draw(&mut self, engine: &Engine) -> Result<()> {
        let viewport = engine.viewport_size();
        let grid = Grid {
            cells: self.cells,
            columns: (viewport.width / self.cells.width).floor() as u16,
            rows: (viewport.height / self.cells.height).floor() as u16,
        };
        queue!(self.out, Clear(ClearType::All))?;

        let projection = engine.projection();
        for page in &engine.tree().pages {
            for block in &page.blocks {
                self.draw_block(&grid, projection, page, block)?;
            }
        }
        if let Some(highlight) = engine.highlight() {
            let attribute = match highlight.phase {
                Phase::Visible => Attribute::Reverse,
                Phase::Fading => Attribute::Dim,
            };
            self.frame(&grid, highlight.screen, attribute)?;
        }
        if let Some(popup) = engine.popup() {
            self.draw_popup(&grid, popup)?;
        }

        queue!(
            self.out,
            MoveTo(0, grid.rows),
            Clear(ClearType::CurrentLine),
            Print(status_line(engine))
        )?;
        self.out.flush()?;
        Ok(())
    }

    fn put(
        &mut self,
        column: u16,
        row: u16,
        glyph: char,
        attribute: Option<Attribute>,
    ) -> Result<()> {
        match attribute {
            Some(attribute) => queue!(
                self.out,
                MoveTo(column, row),
                SetAttribute(attribute),
                Print(glyph),
                SetAttribute(Attribute::Reset)
            )?,
            None => queue!(self.out, MoveTo(column, row), Print(glyph))?,
        }
        Ok(())
    }

    /// Lines run top to bottom, the first line rightmost.
    fn draw_block(
        &mut self,
        grid: &Grid,
        projection: Projection,
        page: &PageView,
        block: &BlockView,
    ) -> Result<()> {
        let rect = page.content_rect(block.rect);
        let cell = block.font_size;
        for (column, line) in block.lines.iter().enumerate() {
            let x = rect.right() - (column as f32 + 0.5) * cell;
            let mut row = 0usize;
            for segment in &line.segments {
                let attribute = match segment {
                    Segment::Text { .. } => None,
                    Segment::Token(span) if span.tracked => Some(Attribute::Bold),
                    Segment::Token(_) => Some(Attribute::Underlined),
                };
                for glyph in segment.text().chars() {
                    let y = rect.y + (row as f32 + 0.5) * cell;
                    row += 1;
                    if let Some((column, row)) = grid.cell(projection.point(Point::new(x, y))) {
                        self.put(column, row, glyph, attribute)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn frame(&mut self, grid: &Grid, rect: Rect, attribute: Attribute) -> Result<()> {
        let Some((left, top, right, bottom)) = grid.bounds(rect) else {
            return Ok(());
        };
        for row in top..=bottom {
            for column in left..=right {
                let edge_row = row == top || row == bottom;
                let edge_column = column == left || column == right;
                let glyph = match (edge_row, edge_column) {
                    (true, true) => '+',
                    (true, false) => '-',
                    (false, true) => '|',
                    (false, false) => continue,
                };
                self.put(column, row, glyph, Some(attribute))?;
            }
        }
        Ok(())
    }

    fn draw_popup(&mut self, grid: &Grid, popup: &PopupView) -> Result<()> {
        let Some((left, top, right, bottom)) = grid.bounds(popup.placement) else {
            return Ok(());
        };
        let inner = usize::from(right.saturating_sub(left).saturating_sub(1));
        let blank = " ".repeat(usize::from(right - left) + 1);
        for row in top..=bottom {
            queue!(self.out, MoveTo(left, row), Print(&blank))?;
        }
        self.frame(grid, popup.placement, Attribute::Bold)?;

        let capacity = usize::from(bottom.saturating_sub(top).saturating_sub(1));
        for (offset, text) in popup_lines(popup).into_iter().take(capacity).enumerate() {
            let text: String = text.chars().take(inner).collect();
            queue!(self.out, MoveTo(left + 1, top + 1 + offset as u16), Print(text))?;
        }
        Ok(())
    }
}

fn popup_lines(popup: &PopupView) -> Vec<String> {
    let payload = &popup.payload;
    let mut title = popup.title();
    if !payload.reading.is_empty() {
        title.push_str(&format!(" [{}]", payload.reading));
    }
    if popup.tracked_badge {
        title.push_str(" (tracked)");
    }
    let mut lines = vec![title];
    if payload.not_found {
        lines.push("No definition found.".to_string());
        return lines;
    }
    if !payload.part_of_speech.is_empty() {
        lines.push(payload.part_of_speech.clone());
    }
    for (number, sense) in payload.senses.iter().enumerate() {
        lines.push(format!("{}. {}", number + 1, sense.glosses.join("; ")));
    }
    let actions: Vec<String> = popup
        .affordances
        .iter()
        .map(|affordance| format!("[{}] {}", shortcut_key(*affordance), affordance.name()))
        .collect();
    lines.push(actions.join("  "));
    lines
}

pub fn status_line(engine: &Engine) -> String {
    let pages: Vec<String> = engine
        .tree()
        .pages
        .iter()
        .map(|page| (page.index + 1).to_string())
        .collect();
    let mut status = if pages.is_empty() {
        "no pages".to_string()
    } else {
        format!("p{}", pages.join("-"))
    };
    status.push_str(&format!(" | {:.0}%", engine.layout().scale * 100.0));
    if let Some(popup) = engine.popup() {
        status.push_str(" | ");
        status.push_str(&popup.title());
    }
    let pending = engine.bridge().pending();
    if pending > 0 {
        status.push_str(&format!(" | {} pending", pending));
    }
    status.push_str(" | q quit");
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use koma_core::bridge::HostEndpoint;
    use koma_core::config::EngineConfig;
    use koma_core::geometry::Size;
    use koma_core::protocol::{
        BlockPayload, HostOperation, InboundCommand, PagePayload, PageSetPayload, PopupPayload,
        Sense, TokenPayload,
    };

    fn engine() -> Engine {
        let (endpoint, _rx) = HostEndpoint::channel(HostOperation::ALL);
        let mut engine =
            Engine::connect(EngineConfig::default(), Size::new(800.0, 1200.0), Some(endpoint))
                .unwrap();
        engine
            .apply(
                InboundCommand::UpdateView(PageSetPayload {
                    pages: vec![PagePayload {
                        index: Some(0),
                        width: 800.0,
                        height: 1200.0,
                        image_ref: "000.jpg".to_string(),
                        blocks: vec![BlockPayload {
                            id: 1,
                            x: 100.0,
                            y: 100.0,
                            width: 40.0,
                            height: 80.0,
                            font_size: Some(20.0),
                            lines: vec!["猫だ".to_string()],
                            tokens: vec![TokenPayload {
                                start: 0,
                                end: 1,
                                lemma: "猫".to_string(),
                                part_of_speech: "noun".to_string(),
                                is_tracked: false,
                            }],
                        }],
                    }],
                    gap: None,
                }),
                Instant::now(),
            )
            .unwrap();
        engine
    }

    #[test]
    fn glyphs_land_in_their_hit_test_cells() {
        let engine = engine();
        let mut screen = Screen::new(Vec::new(), CellMetrics::default());
        screen.draw(&engine).unwrap();
        let output = String::from_utf8(screen.into_inner()).unwrap();

        let ansi = |glyph: char, column: u16, row: u16, attribute: Option<Attribute>| {
            let mut buf = Vec::new();
            match attribute {
                Some(attribute) => {
                    queue!(buf, MoveTo(column, row), SetAttribute(attribute), Print(glyph)).unwrap()
                }
                None => queue!(buf, MoveTo(column, row), Print(glyph)).unwrap(),
            }
            String::from_utf8(buf).unwrap()
        };
        // 猫 sits at content (130, 110): column 16, row 6.
        assert!(output.contains(&ansi('猫', 16, 6, Some(Attribute::Underlined))));
        // だ is the next cell down: (130, 130), row 8.
        assert!(output.contains(&ansi('だ', 16, 8, None)));
        assert!(output.ends_with("p1 | 100% | q quit"));
    }

    #[test]
    fn popup_lists_senses_and_shortcuts() {
        let mut engine = engine();
        engine
            .apply(
                InboundCommand::ShowPopup(PopupPayload {
                    lemma: "猫".to_string(),
                    reading: "ねこ".to_string(),
                    senses: vec![Sense {
                        glosses: vec!["cat".to_string()],
                        pos: Vec::new(),
                    }],
                    mouse_x: 200.0,
                    mouse_y: 200.0,
                    ..PopupPayload::default()
                }),
                Instant::now(),
            )
            .unwrap();
        let lines = popup_lines(engine.popup().unwrap());
        assert_eq!(
            lines,
            vec!["猫 [ねこ]", "1. cat", "[t] track  [d] expand"]
        );
        assert!(status_line(&engine).contains("| 猫 |"));

        let mut screen = Screen::new(Vec::new(), CellMetrics::default());
        screen.draw(&engine).unwrap();
        let output = String::from_utf8(screen.into_inner()).unwrap();
        assert!(output.contains("1. cat"));
    }

    #[test]
    fn bounds_clip_to_the_grid() {
        let grid = Grid {
            cells: CellMetrics::default(),
            columns: 10,
            rows: 5,
        };
        assert_eq!(grid.bounds(Rect::new(8.0, 16.0, 16.0, 32.0)), Some((1, 1, 2, 2)));
        assert_eq!(grid.bounds(Rect::new(-40.0, -40.0, 400.0, 400.0)), Some((0, 0, 9, 4)));
        assert_eq!(grid.bounds(Rect::new(200.0, 0.0, 10.0, 10.0)), None);
        assert_eq!(grid.cell(Point::new(79.0, 79.0)), Some((9, 4)));
        assert_eq!(grid.cell(Point::new(80.0, 10.0)), None);
    }
}
