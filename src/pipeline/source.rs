//! The page-source contract: what the engine needs from a PDF backend.
//!
//! A [`PageSource`] hands out one page at a time as plain data: positioned
//! text runs and image draw operators, each tagged with its position in the
//! content stream. Nothing downstream of this module knows which PDF library
//! produced the page, which keeps classification and layout testable with
//! hand-built pages.

use crate::error::PageError;

/// A PDF affine transform `[a, b, c, d, e, f]`.
///
/// For text runs this is the text rendering matrix scaled by the font size,
/// so `a` is the horizontal glyph scale and `(e, f)` the baseline origin.
/// For images it maps the unit square onto the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform(pub [f32; 6]);

impl Transform {
    pub const IDENTITY: Transform = Transform([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    /// Horizontal scale (`a`).
    pub fn x_scale(&self) -> f32 {
        self.0[0]
    }

    /// Vertical scale (`d`).
    pub fn y_scale(&self) -> f32 {
        self.0[3]
    }

    /// Horizontal translation (`e`).
    pub fn x(&self) -> f32 {
        self.0[4]
    }

    /// Vertical translation (`f`). Grows upward in PDF space.
    pub fn y(&self) -> f32 {
        self.0[5]
    }
}

/// A run of text drawn with one font at one position.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub transform: Transform,
    pub font_name: String,
    /// Position in the page's content stream, shared with image operators.
    pub sequence: usize,
}

impl TextRun {
    pub fn new(
        text: impl Into<String>,
        transform: Transform,
        font_name: impl Into<String>,
        sequence: usize,
    ) -> Self {
        Self {
            text: text.into(),
            transform,
            font_name: font_name.into(),
            sequence,
        }
    }
}

/// Where an image operator's pixels come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageSource {
    /// A named image XObject; repeated draws share the same name.
    Named(String),
    /// An inline image (`BI … ID … EI`); every draw is distinct.
    Inline,
}

impl ImageSource {
    pub fn label(&self) -> &str {
        match self {
            ImageSource::Named(name) => name,
            ImageSource::Inline => "inline",
        }
    }
}

/// Channel layout of a decoded pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Gray,
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }
}

/// Decoded 8-bit pixels, row-major, tightly packed.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Byte length the buffer must have for its dimensions and layout.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.channels()
    }
}

/// One image draw operator from the content stream.
#[derive(Debug, Clone)]
pub struct ImageOperator {
    pub source: ImageSource,
    /// Placement on the page; `None` when the backend could not determine it.
    pub transform: Option<Transform>,
    pub sequence: usize,
    decoded: Result<PixelBuffer, String>,
}

impl ImageOperator {
    pub fn new(
        source: ImageSource,
        transform: Option<Transform>,
        sequence: usize,
        decoded: Result<PixelBuffer, String>,
    ) -> Self {
        Self {
            source,
            transform,
            sequence,
            decoded,
        }
    }

    /// The operator's pixels, or the backend's reason they are unavailable.
    pub fn decode(&self) -> Result<&PixelBuffer, &str> {
        self.decoded.as_ref().map_err(String::as_str)
    }
}

/// Everything the engine consumes from one page.
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Page height in PDF units; used for the image-placement fallback.
    pub height: f32,
    pub text_runs: Vec<TextRun>,
    pub images: Vec<ImageOperator>,
}

/// A loaded PDF that can be walked page by page.
///
/// Implementations are free to be blocking; the converter calls them from a
/// blocking context.
pub trait PageSource {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Load one page by 0-based index.
    fn load_page(&self, index: usize) -> Result<PageContent, PageError>;
}
