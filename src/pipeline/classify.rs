//! Item Classifier: turn one page's text runs and image captions into
//! positioned [`ContentItem`]s.
//!
//! Classification is two passes over an immutable snapshot of the runs.
//! The first builds a font-size histogram and derives the heading table from
//! it; the second flags each run as header, bullet or italic. Nothing here
//! sorts: items come out in content-stream order and carry that order for
//! the reconstructor's tie-break.
//!
//! ## Heading levels
//!
//! The body size is the histogram mode (ties go to the smaller size). Sizes
//! more than 10% larger than the body size are heading candidates; the four
//! largest are ranked from 1 and every rank past 3 shares level 3.
//!
//! Whitespace-only runs are left out of the histogram. Some producers emit
//! spacer runs at a stray size, and counting them can drag the body size
//! off the real text. They produce no items either.

use crate::output::ImageId;
use crate::pipeline::extract::ImagePlacement;
use crate::pipeline::source::PageContent;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// Heading candidates must exceed the body size by this factor.
const HEADING_SIZE_RATIO: f32 = 1.1;
/// Only the largest few candidate sizes become headings.
const MAX_HEADING_SIZES: usize = 4;
/// Deepest heading level emitted.
const MAX_HEADING_LEVEL: u8 = 3;
/// A header must start a block: its y jump from the previous run exceeds
/// this multiple of its own font size.
const NEW_BLOCK_RATIO: f32 = 1.5;

/// Leading bullet glyphs.
pub(crate) static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[•\-\*\x{2022}\x{2023}\x{25E6}\x{2043}\x{2219}]").unwrap());

/// Recognized text per image on one page. Ordered so image items come out
/// deterministically.
pub type OcrMap = BTreeMap<ImageId, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Text,
    ImageText,
}

/// One positioned unit of page content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub kind: ItemKind,
    /// Never empty after trimming.
    pub text: String,
    pub x: f32,
    /// PDF space: grows upward.
    pub y: f32,
    /// `|a|` of the run's transform; 0 for image text.
    pub font_size: f32,
    pub is_italic: bool,
    pub is_bullet: bool,
    /// 0 = not a header, otherwise 1..=3.
    pub header_level: u8,
    /// Content-stream position, used to break layout ties.
    pub order: usize,
}

impl ContentItem {
    pub fn is_header(&self) -> bool {
        self.header_level > 0
    }

    pub fn is_image_text(&self) -> bool {
        self.kind == ItemKind::ImageText
    }
}

/// Histogram key: font size in hundredths of a unit.
fn size_key(size: f32) -> i64 {
    (size * 100.0).round() as i64
}

/// Font size → heading level for one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadingTable {
    /// Most frequent size on the page, if the page has any text.
    pub body_size: Option<f32>,
    levels: HashMap<i64, u8>,
}

impl HeadingTable {
    /// Build the table from the sizes of every non-blank run.
    pub fn from_sizes(sizes: impl IntoIterator<Item = f32>) -> Self {
        let mut histogram: BTreeMap<i64, usize> = BTreeMap::new();
        for size in sizes {
            *histogram.entry(size_key(size)).or_insert(0) += 1;
        }

        // BTreeMap iterates ascending, so the first maximum is the smallest size.
        let mut mode: Option<(i64, usize)> = None;
        for (&key, &count) in &histogram {
            if mode.is_none_or(|(_, best)| count > best) {
                mode = Some((key, count));
            }
        }
        let Some((body_key, _)) = mode else {
            return Self::default();
        };
        let body_size = body_key as f32 / 100.0;

        let levels = histogram
            .keys()
            .rev()
            .filter(|&&key| key as f32 / 100.0 > body_size * HEADING_SIZE_RATIO)
            .take(MAX_HEADING_SIZES)
            .enumerate()
            .map(|(rank, &key)| (key, (rank as u8 + 1).min(MAX_HEADING_LEVEL)))
            .collect();

        Self {
            body_size: Some(body_size),
            levels,
        }
    }

    /// Heading level for `size`, or 0 when it is not a heading size.
    pub fn level_for(&self, size: f32) -> u8 {
        self.levels.get(&size_key(size)).copied().unwrap_or(0)
    }
}

pub fn is_bullet(text: &str) -> bool {
    BULLET.is_match(text.trim())
}

pub fn is_italic_font(font_name: &str) -> bool {
    font_name.to_lowercase().contains("italic")
}

/// Build the page's content items.
///
/// `placements` are the extractor's draws for this page; `ocr` holds the
/// recognized text per image. Images whose text is empty after trimming
/// produce no item.
pub fn classify_page(
    page: &PageContent,
    placements: &[ImagePlacement],
    ocr: &OcrMap,
) -> Vec<ContentItem> {
    let runs: Vec<_> = page
        .text_runs
        .iter()
        .filter(|r| !r.text.trim().is_empty())
        .collect();

    let table = HeadingTable::from_sizes(runs.iter().map(|r| r.transform.x_scale().abs()));

    let mut items = Vec::with_capacity(runs.len() + ocr.len());
    let mut prev_y: Option<f32> = None;

    for run in runs {
        let text = run.text.trim();
        let font_size = run.transform.x_scale().abs();
        let y = run.transform.y();
        let bullet = is_bullet(text);
        let new_block = prev_y.is_none_or(|py| (y - py).abs() > font_size * NEW_BLOCK_RATIO);
        let header_level = if !bullet && new_block {
            table.level_for(font_size)
        } else {
            0
        };

        items.push(ContentItem {
            kind: ItemKind::Text,
            text: text.to_string(),
            x: run.transform.x(),
            y,
            font_size,
            is_italic: is_italic_font(&run.font_name),
            is_bullet: bullet,
            header_level,
            order: run.sequence,
        });
        prev_y = Some(y);
    }

    for (id, text) in ocr {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let placement = placements.iter().find(|p| p.id == *id);
        let transform = placement.and_then(|p| p.transform);
        items.push(ContentItem {
            kind: ItemKind::ImageText,
            text: text.to_string(),
            x: transform.map_or(0.0, |t| t.x()),
            y: transform.map_or(page.height / 2.0, |t| t.y()),
            font_size: 0.0,
            is_italic: false,
            is_bullet: false,
            header_level: 0,
            order: placement.map_or(usize::MAX, |p| p.sequence),
        });
    }

    items
}
