//! Reading-Order Reconstructor: order a page's items and group them into lines.
//!
//! Ordering is done with stable sorts only, so equal keys always fall back to
//! content-stream order:
//!
//! 1. by draw order;
//! 2. by `y` descending (top of the page first);
//! 3. into bands: an item joins the current band when it sits within
//!    [`LINE_TOLERANCE`] below the band's first item;
//! 4. by `x` ascending inside each band.
//!
//! The scan then flushes a line whenever the item kind changes or two
//! consecutive items are more than [`LINE_TOLERANCE`] apart vertically.

use crate::pipeline::classify::{ContentItem, ItemKind};

/// Vertical distance under which items share a line.
pub const LINE_TOLERANCE: f32 = 10.0;

/// One output line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineGroup {
    pub text: String,
    /// Every item in the line is image text.
    pub is_ocr: bool,
    /// Flags of the item that opened the line.
    pub header_level: u8,
    pub is_bullet: bool,
    pub is_italic: bool,
}

impl LineGroup {
    fn open(item: &ContentItem) -> Self {
        Self {
            text: item.text.clone(),
            is_ocr: item.kind == ItemKind::ImageText,
            header_level: item.header_level,
            is_bullet: item.is_bullet,
            is_italic: item.is_italic,
        }
    }

    fn push(&mut self, item: &ContentItem) {
        let sep = if self.is_ocr { "\n" } else { " " };
        self.text.push_str(sep);
        self.text.push_str(&item.text);
    }
}

/// Items in reading order.
pub fn reading_order(items: &[ContentItem]) -> Vec<&ContentItem> {
    let mut sorted: Vec<&ContentItem> = items.iter().collect();
    sorted.sort_by_key(|item| item.order);
    sorted.sort_by(|a, b| b.y.total_cmp(&a.y));

    let mut ordered = Vec::with_capacity(sorted.len());
    let mut band: Vec<&ContentItem> = Vec::new();
    for item in sorted {
        if let Some(anchor) = band.first() {
            if anchor.y - item.y > LINE_TOLERANCE {
                flush_band(&mut band, &mut ordered);
            }
        }
        band.push(item);
    }
    flush_band(&mut band, &mut ordered);
    ordered
}

fn flush_band<'a>(band: &mut Vec<&'a ContentItem>, out: &mut Vec<&'a ContentItem>) {
    band.sort_by(|a, b| a.x.total_cmp(&b.x));
    out.append(band);
}

/// Group a page's items into lines.
pub fn reconstruct(items: &[ContentItem]) -> Vec<LineGroup> {
    let mut lines: Vec<LineGroup> = Vec::new();
    let mut current: Option<LineGroup> = None;
    let mut prev: Option<&ContentItem> = None;

    for item in reading_order(items) {
        let text = item.text.trim();
        if text.is_empty() {
            continue;
        }
        let breaks = prev.is_some_and(|p| {
            p.kind != item.kind || (item.y - p.y).abs() > LINE_TOLERANCE
        });
        if breaks {
            lines.extend(current.take());
        }
        match current.as_mut() {
            Some(line) => line.push(item),
            None => current = Some(LineGroup::open(item)),
        }
        prev = Some(item);
    }
    lines.extend(current);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str, x: f32, y: f32, order: usize) -> ContentItem {
        ContentItem {
            kind: ItemKind::Text,
            text: s.into(),
            x,
            y,
            font_size: 10.0,
            is_italic: false,
            is_bullet: false,
            header_level: 0,
            order,
        }
    }

    fn ocr(s: &str, x: f32, y: f32, order: usize) -> ContentItem {
        ContentItem {
            kind: ItemKind::ImageText,
            font_size: 0.0,
            ..text(s, x, y, order)
        }
    }

    fn texts(lines: &[LineGroup]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn top_to_bottom_then_left_to_right() {
        let items = vec![
            text("world", 200.0, 700.0, 0),
            text("below", 72.0, 650.0, 1),
            text("hello", 72.0, 704.0, 2),
        ];
        let lines = reconstruct(&items);
        assert_eq!(texts(&lines), vec!["hello world", "below"]);
    }

    #[test]
    fn large_vertical_gap_breaks_the_line() {
        let items = vec![text("a", 0.0, 700.0, 0), text("b", 0.0, 689.0, 1)];
        assert_eq!(reconstruct(&items).len(), 2);

        let items = vec![text("a", 0.0, 700.0, 0), text("b", 50.0, 691.0, 1)];
        assert_eq!(texts(&reconstruct(&items)), vec!["a b"]);
    }

    #[test]
    fn text_and_image_text_never_share_a_line() {
        let items = vec![
            text("before", 0.0, 500.0, 0),
            ocr("caption", 100.0, 500.0, 1),
            text("after", 300.0, 500.0, 2),
        ];
        let lines = reconstruct(&items);
        assert_eq!(texts(&lines), vec!["before", "caption", "after"]);
        assert_eq!(
            lines.iter().map(|l| l.is_ocr).collect::<Vec<_>>(),
            vec![false, true, false]
        );
    }

    #[test]
    fn adjacent_image_texts_join_with_newline() {
        let items = vec![ocr("left", 0.0, 300.0, 0), ocr("right", 200.0, 300.0, 1)];
        let lines = reconstruct(&items);
        assert_eq!(texts(&lines), vec!["left\nright"]);
    }

    #[test]
    fn ties_fall_back_to_draw_order() {
        let items = vec![
            text("second", 10.0, 100.0, 5),
            text("first", 10.0, 100.0, 2),
        ];
        assert_eq!(texts(&reconstruct(&items)), vec!["first second"]);
    }

    #[test]
    fn line_flags_come_from_the_opening_item() {
        let mut head = text("Title", 0.0, 700.0, 0);
        head.header_level = 2;
        let tail = text("continued", 80.0, 700.0, 1);
        let lines = reconstruct(&[head, tail]);
        assert_eq!(lines[0].header_level, 2);
        assert_eq!(lines[0].text, "Title continued");
    }

    #[test]
    fn empty_input_gives_no_lines() {
        assert!(reconstruct(&[]).is_empty());
    }

    #[test]
    fn ordering_is_deterministic_for_any_input_order() {
        let base = vec![
            text("c", 30.0, 400.0, 2),
            text("a", 10.0, 405.0, 0),
            text("b", 20.0, 398.0, 1),
            text("d", 10.0, 300.0, 3),
        ];
        let mut reversed = base.clone();
        reversed.reverse();
        assert_eq!(reconstruct(&base), reconstruct(&reversed));
        assert_eq!(texts(&reconstruct(&base)), vec!["a b c", "d"]);
    }
}
