//! Image Extractor: pull embedded images off a page and persist them as PNG.
//!
//! [`PageImages`] walks a page's image operators lazily, in content-stream
//! order. Each successful draw yields an [`ImageRecord`] whose `(page, index)`
//! identity is assigned on success only, so indices stay dense even when an
//! image is skipped. Repeated draws of one named image are persisted once;
//! every draw, repeat or not, is still recorded as an [`ImagePlacement`] so
//! the classifier can position the caption.

use crate::error::ExtractionError;
use crate::output::{ImageId, ImageRecord};
use crate::pipeline::sink::ByteSink;
use crate::pipeline::source::{ImageOperator, ImageSource, PixelBuffer, PixelLayout, Transform};
use image::{ImageFormat, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where an extracted image was drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePlacement {
    pub id: ImageId,
    pub transform: Option<Transform>,
    /// Content-stream position of the draw.
    pub sequence: usize,
}

/// Lazy iterator over the images drawn on one page.
pub struct PageImages<'a> {
    page_num: usize,
    operators: std::slice::Iter<'a, ImageOperator>,
    dir: &'a Path,
    sink: &'a dyn ByteSink,
    seen: HashMap<String, ImageId>,
    next_index: usize,
    placements: Vec<ImagePlacement>,
}

impl<'a> PageImages<'a> {
    pub fn new(
        page_num: usize,
        operators: &'a [ImageOperator],
        dir: &'a Path,
        sink: &'a dyn ByteSink,
    ) -> Self {
        Self {
            page_num,
            operators: operators.iter(),
            dir,
            sink,
            seen: HashMap::new(),
            next_index: 1,
            placements: Vec::new(),
        }
    }

    /// Placements recorded so far, one per successful draw.
    pub fn placements(&self) -> &[ImagePlacement] {
        &self.placements
    }

    /// Drain the iterator, logging and skipping failures.
    ///
    /// Returns the new records and every placement, repeats included.
    pub fn collect_all(mut self) -> (Vec<ImageRecord>, Vec<ImagePlacement>) {
        let mut records = Vec::new();
        for result in self.by_ref() {
            match result {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping image: {}", e),
            }
        }
        (records, self.placements)
    }

    fn extract(&mut self, op: &ImageOperator) -> Result<Option<ImageRecord>, ExtractionError> {
        if let ImageSource::Named(name) = &op.source {
            if let Some(&id) = self.seen.get(name) {
                debug!("Page {}: '{}' already extracted as {}", self.page_num, name, id);
                self.placements.push(ImagePlacement {
                    id,
                    transform: op.transform,
                    sequence: op.sequence,
                });
                return Ok(None);
            }
        }

        let pixels = op.decode().map_err(|detail| ExtractionError::DecodeFailed {
            page: self.page_num,
            source_name: op.source.label().to_string(),
            detail: detail.to_string(),
        })?;
        let png = encode_png(pixels).map_err(|detail| ExtractionError::EncodeFailed {
            page: self.page_num,
            source_name: op.source.label().to_string(),
            detail,
        })?;

        let id = ImageId::new(self.page_num, self.next_index);
        let path: PathBuf = self.dir.join(id.file_name());
        self.sink
            .write(&path, &png)
            .map_err(|source| ExtractionError::WriteFailed {
                path: path.clone(),
                source,
            })?;

        self.next_index += 1;
        if let ImageSource::Named(name) = &op.source {
            self.seen.insert(name.clone(), id);
        }
        self.placements.push(ImagePlacement {
            id,
            transform: op.transform,
            sequence: op.sequence,
        });
        debug!(
            "Extracted {} ({}x{}, {} bytes)",
            id,
            pixels.width,
            pixels.height,
            png.len()
        );

        Ok(Some(ImageRecord::new(id, path, pixels.width, pixels.height)))
    }
}

impl Iterator for PageImages<'_> {
    type Item = Result<ImageRecord, ExtractionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let op = self.operators.next()?;
            match self.extract(op) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Expand to RGBA and encode as PNG.
fn encode_png(pixels: &PixelBuffer) -> Result<Vec<u8>, String> {
    if pixels.data.len() != pixels.expected_len() {
        return Err(format!(
            "buffer is {} bytes, expected {} for {}x{} {:?}",
            pixels.data.len(),
            pixels.expected_len(),
            pixels.width,
            pixels.height,
            pixels.layout
        ));
    }

    let rgba = to_rgba(pixels);
    let image = RgbaImage::from_raw(pixels.width, pixels.height, rgba)
        .ok_or_else(|| "pixel buffer does not match dimensions".to_string())?;

    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(buf.into_inner())
}

fn to_rgba(pixels: &PixelBuffer) -> Vec<u8> {
    match pixels.layout {
        PixelLayout::Rgba => pixels.data.clone(),
        PixelLayout::Rgb => pixels
            .data
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect(),
        PixelLayout::Gray => pixels.data.iter().flat_map(|&g| [g, g, g, 255]).collect(),
    }
}
