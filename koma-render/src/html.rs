//! HTML emission for the overlay tree, popup and highlight.
//!
//! Output is a fragment meant for a retained-DOM host. Geometry is in
//! unscaled page pixels; the host applies the combined scale as a single
//! transform on the content container.

use std::fmt::{self, Write};

use koma_core::geometry::{Rect, Size};

use crate::highlight::{Highlight, Phase};
use crate::overlay::{BlockView, LineView, OverlayTree, PageView, Projection, Segment};
use crate::popup::{Affordance, PopupView};

/// Appends `text` with `<`, `>`, `&`, `"` and `'` escaped.
pub fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    push_escaped(&mut out, text);
    out
}

/// Runs `emit` against a fresh buffer. Formatting into a `String` never
/// fails, so the result carries no information.
fn build(emit: impl FnOnce(&mut String) -> fmt::Result) -> String {
    let mut out = String::new();
    let _ = emit(&mut out);
    out
}

fn push_rect_style(out: &mut String, rect: &Rect) -> fmt::Result {
    write!(
        out,
        "left:{}px;top:{}px;width:{}px;height:{}px",
        rect.x, rect.y, rect.width, rect.height
    )
}

/// Full viewer surface: the transformed page set with the popup and
/// highlight layered on top in viewport coordinates.
pub fn render_viewport(
    tree: &OverlayTree,
    viewport: Size,
    projection: Projection,
    popup: Option<&PopupView>,
    highlight: Option<&Highlight>,
) -> String {
    build(|out| {
        write!(
            out,
            "<div class=\"viewport\" style=\"width:{}px;height:{}px\">",
            viewport.width, viewport.height
        )?;
        write!(
            out,
            "<div class=\"content\" style=\"transform-origin:0 0;transform:translate({}px,{}px) scale({})\">",
            projection.origin.x, projection.origin.y, projection.scale
        )?;
        write_tree(out, tree)?;
        out.push_str("</div>");
        if let Some(highlight) = highlight {
            write_highlight(out, highlight)?;
        }
        if let Some(popup) = popup {
            write_popup(out, popup)?;
        }
        out.push_str("</div>");
        Ok(())
    })
}

pub fn render_tree(tree: &OverlayTree) -> String {
    build(|out| write_tree(out, tree))
}

pub fn render_popup(popup: &PopupView) -> String {
    build(|out| write_popup(out, popup))
}

pub fn render_highlight(highlight: &Highlight) -> String {
    build(|out| write_highlight(out, highlight))
}

fn write_tree(out: &mut String, tree: &OverlayTree) -> fmt::Result {
    out.push_str("<div class=\"page-set\">");
    for page in &tree.pages {
        write_page(out, page)?;
    }
    out.push_str("</div>");
    Ok(())
}

fn write_page(out: &mut String, page: &PageView) -> fmt::Result {
    write!(out, "<div class=\"page\" data-page=\"{}\" style=\"", page.index)?;
    push_rect_style(out, &Rect::new(page.offset_x, 0.0, page.width, page.height))?;
    out.push_str("\"><img class=\"page-image\" src=\"");
    push_escaped(out, &page.image_ref);
    write!(
        out,
        "\" width=\"{}\" height=\"{}\" alt=\"\">",
        page.width, page.height
    )?;
    for block in &page.blocks {
        write_block(out, block)?;
    }
    out.push_str("</div>");
    Ok(())
}

fn write_block(out: &mut String, block: &BlockView) -> fmt::Result {
    write!(out, "<div class=\"ocr-block\" data-block-id=\"{}\" style=\"", block.id)?;
    push_rect_style(out, &block.rect)?;
    write!(out, ";font-size:{}px\">", block.font_size)?;
    for line in &block.lines {
        write_line(out, line);
    }
    out.push_str("</div>");
    Ok(())
}

fn write_line(out: &mut String, line: &LineView) {
    out.push_str("<div class=\"line\">");
    for segment in &line.segments {
        match segment {
            Segment::Text { text } => push_escaped(out, text),
            Segment::Token(span) => {
                out.push_str(if span.tracked {
                    "<span class=\"token tracked\" data-lemma=\""
                } else {
                    "<span class=\"token\" data-lemma=\""
                });
                push_escaped(out, &span.lemma);
                out.push_str("\" data-pos=\"");
                push_escaped(out, &span.part_of_speech);
                out.push_str("\">");
                push_escaped(out, &span.text);
                out.push_str("</span>");
            }
        }
    }
    out.push_str("</div>");
}

fn write_popup(out: &mut String, popup: &PopupView) -> fmt::Result {
    let payload = &popup.payload;
    out.push_str("<div class=\"popup\" style=\"");
    push_rect_style(out, &popup.placement)?;
    out.push_str("\"><div class=\"popup-header\"><span class=\"popup-surface\">");
    push_escaped(out, &popup.title());
    out.push_str("</span>");
    if !payload.reading.is_empty() {
        out.push_str("<span class=\"popup-reading\">");
        push_escaped(out, &payload.reading);
        out.push_str("</span>");
    }
    if popup.tracked_badge {
        out.push_str("<span class=\"badge tracked\">tracked</span>");
    }
    out.push_str("</div>");

    if payload.not_found {
        out.push_str("<p class=\"popup-empty\">No definition found.</p></div>");
        return Ok(());
    }

    if !payload.part_of_speech.is_empty() {
        out.push_str("<p class=\"popup-pos\">");
        push_escaped(out, &payload.part_of_speech);
        out.push_str("</p>");
    }
    out.push_str("<ol class=\"senses\">");
    for sense in &payload.senses {
        out.push_str("<li>");
        if !sense.pos.is_empty() {
            out.push_str("<span class=\"sense-pos\">");
            push_escaped(out, &sense.pos.join(", "));
            out.push_str("</span> ");
        }
        push_escaped(out, &sense.glosses.join("; "));
        out.push_str("</li>");
    }
    out.push_str("</ol><div class=\"popup-actions\">");
    for affordance in &popup.affordances {
        write!(
            out,
            "<button data-action=\"{}\">{}</button>",
            affordance.name(),
            affordance.label()
        )?;
    }
    out.push_str("</div></div>");
    Ok(())
}

fn write_highlight(out: &mut String, highlight: &Highlight) -> fmt::Result {
    let class = match highlight.phase {
        Phase::Visible => "highlight",
        Phase::Fading => "highlight fading",
    };
    write!(out, "<div class=\"{}\" style=\"", class)?;
    push_rect_style(out, &highlight.screen)?;
    out.push_str("\"></div>");
    Ok(())
}

impl Affordance {
    fn label(&self) -> &'static str {
        match self {
            Affordance::Track => "Track",
            Affordance::ViewContext => "View context",
            Affordance::Expand => "Full definition",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use koma_core::geometry::Point;
    use koma_core::model::PageSet;
    use koma_core::protocol::{
        BlockPayload, PagePayload, PageSetPayload, PopupPayload, Sense, TokenPayload,
    };
    use koma_core::PopupConfig;

    use crate::popup::PopupController;

    fn tree(lines: Vec<&str>, tokens: Vec<TokenPayload>) -> OverlayTree {
        let set = PageSet::from_payload(
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
                        font_size: Some(18.0),
                        lines: lines.into_iter().map(String::from).collect(),
                        tokens,
                    }],
                }],
                gap: None,
            },
            0.0,
        );
        OverlayTree::build(&set, &BTreeSet::new())
    }

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(
            escape("<a href=\"x\">&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;"
        );
        assert_eq!(escape("食べた"), "食べた");
    }

    #[test]
    fn token_span_wraps_exact_surface() {
        let html = render_tree(&tree(
            vec!["食べた"],
            vec![TokenPayload {
                start: 0,
                end: 3,
                lemma: "食べる".to_string(),
                part_of_speech: "verb".to_string(),
                is_tracked: false,
            }],
        ));
        assert!(html.contains(
            "<div class=\"line\"><span class=\"token\" data-lemma=\"食べる\" data-pos=\"verb\">食べた</span></div>"
        ));
        assert!(!html.contains("&amp;"));
        assert!(html.contains("data-block-id=\"1\""));
        assert!(html.contains("left:120px;top:340px;width:200px;height:60px;font-size:18px"));
    }

    #[test]
    fn plain_line_text_is_escaped() {
        let html = render_tree(&tree(vec!["<b>&"], Vec::new()));
        assert!(html.contains("<div class=\"line\">&lt;b&gt;&amp;</div>"));
    }

    #[test]
    fn not_found_popup_has_no_actions() {
        let mut popup = PopupController::new(PopupConfig::default());
        popup.show(
            PopupPayload {
                lemma: "猫".to_string(),
                not_found: true,
                ..PopupPayload::default()
            },
            Size::new(800.0, 600.0),
        );
        let html = render_popup(popup.view().unwrap());
        assert!(html.contains("No definition found."));
        assert!(!html.contains("<button"));
    }

    #[test]
    fn popup_lists_senses_and_actions() {
        let mut popup = PopupController::new(PopupConfig::default());
        popup.show(
            PopupPayload {
                lemma: "猫".to_string(),
                surface: "猫".to_string(),
                reading: "ねこ".to_string(),
                senses: vec![Sense {
                    glosses: vec!["cat".to_string(), "<feline>".to_string()],
                    pos: vec!["noun".to_string()],
                }],
                mouse_x: 100.0,
                mouse_y: 100.0,
                ..PopupPayload::default()
            },
            Size::new(800.0, 600.0),
        );
        let html = render_popup(popup.view().unwrap());
        assert!(html.contains("<li><span class=\"sense-pos\">noun</span> cat; &lt;feline&gt;</li>"));
        assert!(html.contains("data-action=\"track\""));
        assert!(html.contains("data-action=\"expand\""));
        assert!(!html.contains("data-action=\"viewContext\""));
        assert!(popup.view().unwrap().contains(Point::new(120.0, 120.0)));
    }

    #[test]
    fn viewport_layers_popup_over_content() {
        let tree = tree(vec!["猫"], Vec::new());
        let mut popup = PopupController::new(PopupConfig::default());
        popup.show(
            PopupPayload {
                lemma: "猫".to_string(),
                not_found: true,
                ..PopupPayload::default()
            },
            Size::new(800.0, 600.0),
        );
        let html = render_viewport(
            &tree,
            Size::new(800.0, 600.0),
            Projection::new(Point::new(200.0, 0.0), 0.5),
            popup.view(),
            None,
        );
        assert!(html.starts_with("<div class=\"viewport\" style=\"width:800px;height:600px\">"));
        assert!(html.contains("transform:translate(200px,0px) scale(0.5)"));
        let content = html.find("class=\"page-set\"").unwrap();
        let popup_at = html.find("class=\"popup\"").unwrap();
        assert!(content < popup_at);
    }
}
